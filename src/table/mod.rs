// src/table/mod.rs

//! In-memory column-oriented tables and the handful of relational
//! operations the merge stage needs: select, dedup, left join, drop.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

pub mod dbf;
pub mod parquet;

/// Values of one column, all rows nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Utf8(Vec<Option<String>>),
    Float64(Vec<Option<f64>>),
    Int32(Vec<Option<i32>>),
    Boolean(Vec<Option<bool>>),
    /// Days since the Unix epoch.
    Date32(Vec<Option<i32>>),
    /// Microseconds since the Unix epoch, no timezone.
    TimestampMicros(Vec<Option<i64>>),
}

/// One cell in hashable form, used as a dedup and join key.
///
/// Floats are compared by bit pattern. Nulls compare equal to each other,
/// which is what dedup wants; the join skips them instead (a null key
/// never matches anything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyValue<'a> {
    Null,
    Utf8(&'a str),
    Float64(u64),
    Int32(i32),
    Boolean(bool),
    Date32(i32),
    TimestampMicros(i64),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Date32(v) => v.len(),
            ColumnData::TimestampMicros(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Utf8(_) => "utf8",
            ColumnData::Float64(_) => "float64",
            ColumnData::Int32(_) => "int32",
            ColumnData::Boolean(_) => "boolean",
            ColumnData::Date32(_) => "date32",
            ColumnData::TimestampMicros(_) => "timestamp_us",
        }
    }

    pub fn push_null(&mut self) {
        match self {
            ColumnData::Utf8(v) => v.push(None),
            ColumnData::Float64(v) => v.push(None),
            ColumnData::Int32(v) => v.push(None),
            ColumnData::Boolean(v) => v.push(None),
            ColumnData::Date32(v) => v.push(None),
            ColumnData::TimestampMicros(v) => v.push(None),
        }
    }

    /// The value at `row` as a join/dedup key.
    pub fn key_at(&self, row: usize) -> KeyValue<'_> {
        match self {
            ColumnData::Utf8(v) => v[row].as_deref().map_or(KeyValue::Null, KeyValue::Utf8),
            ColumnData::Float64(v) => {
                v[row].map_or(KeyValue::Null, |x| KeyValue::Float64(x.to_bits()))
            }
            ColumnData::Int32(v) => v[row].map_or(KeyValue::Null, KeyValue::Int32),
            ColumnData::Boolean(v) => v[row].map_or(KeyValue::Null, KeyValue::Boolean),
            ColumnData::Date32(v) => v[row].map_or(KeyValue::Null, KeyValue::Date32),
            ColumnData::TimestampMicros(v) => {
                v[row].map_or(KeyValue::Null, KeyValue::TimestampMicros)
            }
        }
    }

    /// Gather rows by index: `Some(i)` copies row `i`, `None` yields null.
    pub fn take(&self, indices: &[Option<usize>]) -> ColumnData {
        match self {
            ColumnData::Utf8(v) => ColumnData::Utf8(
                indices
                    .iter()
                    .map(|ix| ix.and_then(|i| v[i].clone()))
                    .collect(),
            ),
            ColumnData::Float64(v) => {
                ColumnData::Float64(indices.iter().map(|ix| ix.and_then(|i| v[i])).collect())
            }
            ColumnData::Int32(v) => {
                ColumnData::Int32(indices.iter().map(|ix| ix.and_then(|i| v[i])).collect())
            }
            ColumnData::Boolean(v) => {
                ColumnData::Boolean(indices.iter().map(|ix| ix.and_then(|i| v[i])).collect())
            }
            ColumnData::Date32(v) => {
                ColumnData::Date32(indices.iter().map(|ix| ix.and_then(|i| v[i])).collect())
            }
            ColumnData::TimestampMicros(v) => ColumnData::TimestampMicros(
                indices.iter().map(|ix| ix.and_then(|i| v[i])).collect(),
            ),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// A column-oriented table. All columns have the same row count and
/// distinct names; `new` enforces both.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            for col in &columns {
                if col.data.len() != rows {
                    bail!(
                        "column {} has {} rows, expected {}",
                        col.name,
                        col.data.len(),
                        rows
                    );
                }
            }
        }
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                bail!("duplicate column name {}", col.name);
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |col| col.data.len())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        match self.column_index(name) {
            Some(ix) => Ok(&self.columns[ix]),
            None => bail!(
                "no column {name}, table has: {}",
                self.column_names().join(", ")
            ),
        }
    }

    /// A new table holding just the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| self.column(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        Table::new(columns)
    }

    /// A new table without the named column.
    pub fn drop_column(&self, name: &str) -> Result<Table> {
        self.column(name)?;
        Ok(Table {
            columns: self
                .columns
                .iter()
                .filter(|col| col.name != name)
                .cloned()
                .collect(),
        })
    }

    /// Keep only the first row for each distinct key tuple.
    pub fn dedup_by_key(&self, key_columns: &[&str]) -> Result<Table> {
        let keys = key_columns
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>>>()?;

        let mut seen: HashSet<Vec<KeyValue<'_>>> = HashSet::new();
        let mut kept: Vec<Option<usize>> = Vec::new();
        for row in 0..self.num_rows() {
            let key: Vec<KeyValue<'_>> = keys.iter().map(|col| col.data.key_at(row)).collect();
            if seen.insert(key) {
                kept.push(Some(row));
            }
        }

        Ok(Table {
            columns: self
                .columns
                .iter()
                .map(|col| Column {
                    name: col.name.clone(),
                    data: col.data.take(&kept),
                })
                .collect(),
        })
    }

    /// Left-outer join against a lookup table.
    ///
    /// Every left row appears exactly once in the output, so the row count
    /// is preserved no matter what the lookup contains. When several right
    /// rows share a key the first one wins. Null keys never match. All
    /// left columns are kept, including `left_on`; the right columns are
    /// appended, nulled out where nothing matched.
    pub fn left_join(&self, right: &Table, left_on: &str, right_on: &str) -> Result<Table> {
        let left_key = &self.column(left_on)?.data;
        let right_key = &right.column(right_on)?.data;

        if std::mem::discriminant(left_key) != std::mem::discriminant(right_key) {
            bail!(
                "join key type mismatch: {left_on} is {} but {right_on} is {}",
                left_key.type_name(),
                right_key.type_name()
            );
        }
        for col in &right.columns {
            if self.column_index(&col.name).is_some() {
                bail!("join would duplicate column {}", col.name);
            }
        }

        let mut first_match: HashMap<KeyValue<'_>, usize> = HashMap::new();
        for row in 0..right.num_rows() {
            match right_key.key_at(row) {
                KeyValue::Null => {}
                key => {
                    first_match.entry(key).or_insert(row);
                }
            }
        }

        let indices: Vec<Option<usize>> = (0..self.num_rows())
            .map(|row| match left_key.key_at(row) {
                KeyValue::Null => None,
                key => first_match.get(&key).copied(),
            })
            .collect();

        let mut columns = self.columns.clone();
        columns.extend(right.columns.iter().map(|col| Column {
            name: col.name.clone(),
            data: col.data.take(&indices),
        }));
        Ok(Table { columns })
    }
}
