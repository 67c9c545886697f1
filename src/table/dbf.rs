// src/table/dbf.rs

//! Reads a DBF attribute table into a [`Table`].
//!
//! Column types follow the DBF field types: text fields become utf8,
//! every numeric flavour widens to float64 except the true 32-bit
//! integer type, dates become epoch days and datetimes epoch
//! microseconds. Deleted records are skipped by the reader.

use anyhow::{bail, Context, Result};
use dbase::{FieldType, FieldValue, Reader};
use std::path::Path;
use tracing::debug;

use super::{Column, ColumnData, Table};

/// Character set used to decode text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Whatever the file header declares, per the reader's defaults.
    Default,
    /// Latin-1, for exports carrying accented owner and street names.
    Latin1,
}

/// Load a whole DBF file into memory.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn read_dbf(path: &Path, encoding: TextEncoding) -> Result<Table> {
    let mut reader = match encoding {
        TextEncoding::Default => Reader::from_path(path),
        TextEncoding::Latin1 => Reader::from_path_with_encoding(
            path,
            dbase::encoding::EncodingRs::from(encoding_rs::WINDOWS_1252),
        ),
    }
    .with_context(|| format!("opening dbf {}", path.display()))?;

    let fields: Vec<(String, FieldType)> = reader
        .fields()
        .iter()
        .map(|field| (field.name().to_string(), field.field_type()))
        .collect();
    let records = reader
        .read()
        .with_context(|| format!("reading dbf {}", path.display()))?;

    let mut columns: Vec<Column> = fields
        .iter()
        .map(|(name, field_type)| Column {
            name: name.clone(),
            data: empty_column(*field_type, records.len()),
        })
        .collect();

    for record in &records {
        for ((name, _), column) in fields.iter().zip(columns.iter_mut()) {
            match record.get(name) {
                Some(value) => append_value(&mut column.data, value)
                    .with_context(|| format!("field {name} in {}", path.display()))?,
                None => column.data.push_null(),
            }
        }
    }

    let table = Table::new(columns)?;
    debug!(
        rows = table.num_rows(),
        columns = table.num_columns(),
        "loaded dbf"
    );
    Ok(table)
}

fn empty_column(field_type: FieldType, capacity: usize) -> ColumnData {
    match field_type {
        FieldType::Character | FieldType::Memo => {
            ColumnData::Utf8(Vec::with_capacity(capacity))
        }
        FieldType::Numeric | FieldType::Float | FieldType::Currency | FieldType::Double => {
            ColumnData::Float64(Vec::with_capacity(capacity))
        }
        FieldType::Integer => ColumnData::Int32(Vec::with_capacity(capacity)),
        FieldType::Logical => ColumnData::Boolean(Vec::with_capacity(capacity)),
        FieldType::Date => ColumnData::Date32(Vec::with_capacity(capacity)),
        FieldType::DateTime => ColumnData::TimestampMicros(Vec::with_capacity(capacity)),
    }
}

fn append_value(data: &mut ColumnData, value: &FieldValue) -> Result<()> {
    match (data, value) {
        (ColumnData::Utf8(v), FieldValue::Character(s)) => v.push(s.clone()),
        (ColumnData::Utf8(v), FieldValue::Memo(s)) => v.push(Some(s.clone())),
        (ColumnData::Float64(v), FieldValue::Numeric(x)) => v.push(*x),
        (ColumnData::Float64(v), FieldValue::Float(x)) => v.push((*x).map(f64::from)),
        (ColumnData::Float64(v), FieldValue::Currency(x)) => v.push(Some(*x)),
        (ColumnData::Float64(v), FieldValue::Double(x)) => v.push(Some(*x)),
        (ColumnData::Int32(v), FieldValue::Integer(x)) => v.push(Some(*x)),
        (ColumnData::Boolean(v), FieldValue::Logical(x)) => v.push(*x),
        (ColumnData::Date32(v), FieldValue::Date(d)) => {
            v.push((*d).map(|date| date.to_unix_days()));
        }
        (ColumnData::TimestampMicros(v), FieldValue::DateTime(dt)) => {
            v.push(Some(datetime_to_micros(*dt)));
        }
        (data, value) => bail!("unexpected {value:?} for a {} column", data.type_name()),
    }
    Ok(())
}

fn datetime_to_micros(dt: dbase::DateTime) -> i64 {
    let days = i64::from(dt.date().to_unix_days());
    let time = dt.time();
    let seconds = days * 86_400
        + i64::from(time.hours()) * 3_600
        + i64::from(time.minutes()) * 60
        + i64::from(time.seconds());
    seconds * 1_000_000
}
