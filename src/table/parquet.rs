// src/table/parquet.rs

use anyhow::{Context, Result};
use arrow::{
    array::{
        ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, StringArray,
        TimestampMicrosecondArray,
    },
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{ColumnData, Table};

/// Arrow schema for a table. Every column is nullable since DBF cells
/// can always be empty.
pub fn arrow_schema(table: &Table) -> Schema {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|col| Field::new(&col.name, arrow_type(&col.data), true))
        .collect();
    Schema::new(fields)
}

fn arrow_type(data: &ColumnData) -> DataType {
    match data {
        ColumnData::Utf8(_) => DataType::Utf8,
        ColumnData::Float64(_) => DataType::Float64,
        ColumnData::Int32(_) => DataType::Int32,
        ColumnData::Boolean(_) => DataType::Boolean,
        ColumnData::Date32(_) => DataType::Date32,
        ColumnData::TimestampMicros(_) => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

fn to_array(data: &ColumnData) -> ArrayRef {
    match data {
        ColumnData::Utf8(v) => Arc::new(StringArray::from(v.clone())),
        ColumnData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
        ColumnData::Int32(v) => Arc::new(Int32Array::from(v.clone())),
        ColumnData::Boolean(v) => Arc::new(BooleanArray::from(v.clone())),
        ColumnData::Date32(v) => Arc::new(Date32Array::from(v.clone())),
        ColumnData::TimestampMicros(v) => Arc::new(TimestampMicrosecondArray::from(v.clone())),
    }
}

/// Write a table to a Snappy-compressed Parquet file, replacing any
/// file already at that path.
pub fn write_parquet(table: &Table, path: &Path) -> Result<()> {
    let schema = Arc::new(arrow_schema(table));
    let arrays: Vec<ArrayRef> = table.columns().iter().map(|col| to_array(&col.data)).collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .with_context(|| format!("assembling record batch for {}", path.display()))?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .context("initializing Parquet writer")?;
    writer
        .write(&batch)
        .with_context(|| format!("writing {}", path.display()))?;
    writer.close().context("closing Parquet writer")?;

    info!(path = %path.display(), rows = table.num_rows(), "wrote parquet");
    Ok(())
}
