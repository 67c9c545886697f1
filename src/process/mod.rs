// src/process/mod.rs

use anyhow::{Context, Result};
use std::fs;
use tracing::{debug, info};

use crate::config::DataPaths;
use crate::locate::DatasetFiles;
use crate::table::dbf::{read_dbf, TextEncoding};
use crate::table::parquet::write_parquet;
use crate::table::Table;

/// Land-use code column on the parcel table, dropped after its join.
pub const PARCEL_DOR_KEY: &str = "DOR_C";
/// Matching key column on the land-use lookup.
pub const DOR_LOOKUP_KEY: &str = "DORCODE";
/// Subdivision code column on the parcel table, dropped after its join.
pub const PARCEL_SUB_KEY: &str = "SUB";
/// Matching key column on the subdivision lookup.
pub const SUB_LOOKUP_KEY: &str = "SUBCODE";
/// Description column kept from the subdivision lookup.
pub const SUB_LOOKUP_NAME: &str = "SUBNAME";

/// Output file names under the processed dir.
pub const SALES_OUTPUT: &str = "allsales.parquet";
pub const PARCEL_OUTPUT: &str = "parcel.parquet";

/// Load the latest extracted tables, attach the lookup descriptions to
/// the parcel table, and export both tables as Parquet.
///
/// Nothing is written until every load and join has succeeded, so a bad
/// input never leaves one output file fresh and the other stale.
#[tracing::instrument(level = "info", skip_all)]
pub fn load_and_merge(paths: &DataPaths) -> Result<()> {
    let files = DatasetFiles::locate(paths)?;

    // The sales export carries accented owner names in Latin-1.
    let sales = read_dbf(&files.sales_dbf, TextEncoding::Latin1)?;
    let parcel = read_dbf(&files.parcel_dbf, TextEncoding::Default)?;
    let dor_names = read_dbf(&files.dor_names_dbf, TextEncoding::Default)?;
    let sub_names = read_dbf(&files.sub_names_dbf, TextEncoding::Default)?
        .select(&[SUB_LOOKUP_KEY, SUB_LOOKUP_NAME])?
        .dedup_by_key(&[SUB_LOOKUP_KEY, SUB_LOOKUP_NAME])?;

    let parcel = merge_descriptions(&parcel, &dor_names, &sub_names)?;
    debug!(
        rows = parcel.num_rows(),
        columns = parcel.num_columns(),
        "merged parcel table"
    );

    fs::create_dir_all(&paths.processed_dir).with_context(|| {
        format!("creating processed dir {}", paths.processed_dir.display())
    })?;
    let sales_path = paths.processed_dir.join(SALES_OUTPUT);
    let parcel_path = paths.processed_dir.join(PARCEL_OUTPUT);
    write_parquet(&sales, &sales_path)?;
    write_parquet(&parcel, &parcel_path)?;

    info!(
        sales = %sales_path.display(),
        sales_rows = sales.num_rows(),
        parcel = %parcel_path.display(),
        parcel_rows = parcel.num_rows(),
        "exported processed tables"
    );
    Ok(())
}

/// Attach the land-use and subdivision descriptions to each parcel row.
/// Both joins keep every parcel row; the code columns they matched on
/// are dropped afterwards since the lookups carry their own key columns.
fn merge_descriptions(parcel: &Table, dor_names: &Table, sub_names: &Table) -> Result<Table> {
    let parcel = parcel
        .left_join(dor_names, PARCEL_DOR_KEY, DOR_LOOKUP_KEY)?
        .drop_column(PARCEL_DOR_KEY)?;
    parcel
        .left_join(sub_names, PARCEL_SUB_KEY, SUB_LOOKUP_KEY)?
        .drop_column(PARCEL_SUB_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_archives;
    use anyhow::Result;
    use arrow::array::StringArray;
    use arrow::record_batch::RecordBatch;
    use dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;
    use std::io::Write as _;
    use std::path::Path;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::CompressionMethod;

    fn init_test_logging() {
        use tracing_subscriber::{EnvFilter, FmtSubscriber};
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn field(name: &str) -> FieldName {
        FieldName::try_from(name).unwrap()
    }

    fn chr(s: Option<&str>) -> FieldValue {
        FieldValue::Character(s.map(str::to_string))
    }

    fn write_sales(dir: &Path) -> Result<()> {
        let latin1 = dbase::encoding::EncodingRs::from(encoding_rs::WINDOWS_1252);
        let writer = TableWriterBuilder::with_encoding(latin1)
            .add_character_field(field("SALE_ID"), 10)
            .add_character_field(field("GRANTOR"), 30)
            .add_numeric_field(field("PRICE"), 12, 0)
            .build_with_file_dest(dir.join("allsales2024.dbf"))?;

        let mut first = Record::default();
        first.insert("SALE_ID".into(), chr(Some("S1")));
        first.insert("GRANTOR".into(), chr(Some("PEÑA JOSÉ")));
        first.insert("PRICE".into(), FieldValue::Numeric(Some(250_000.0)));
        let mut second = Record::default();
        second.insert("SALE_ID".into(), chr(Some("S2")));
        second.insert("GRANTOR".into(), chr(None));
        second.insert("PRICE".into(), FieldValue::Numeric(None));
        writer.write_records(&[first, second])?;
        Ok(())
    }

    fn write_parcel(dir: &Path, include_dor_column: bool) -> Result<()> {
        let mut builder = TableWriterBuilder::new().add_character_field(field("PARCEL_ID"), 10);
        if include_dor_column {
            builder = builder.add_character_field(field("DOR_C"), 4);
        }
        let writer = builder
            .add_character_field(field("SUB"), 4)
            .add_numeric_field(field("ACRES"), 10, 2)
            .build_with_file_dest(dir.join("parcel.dbf"))?;

        let rows = [
            (Some("P1"), Some("0100"), Some("01"), Some(0.25)),
            (Some("P2"), Some("9999"), None, Some(1.5)),
            (Some("P3"), None, Some("02"), None),
        ];
        let records: Vec<Record> = rows
            .iter()
            .map(|(id, dor, sub, acres)| {
                let mut record = Record::default();
                record.insert("PARCEL_ID".into(), chr(*id));
                if include_dor_column {
                    record.insert("DOR_C".into(), chr(*dor));
                }
                record.insert("SUB".into(), chr(*sub));
                record.insert("ACRES".into(), FieldValue::Numeric(*acres));
                record
            })
            .collect();
        writer.write_records(&records)?;
        Ok(())
    }

    fn write_sub_names(dir: &Path) -> Result<()> {
        let writer = TableWriterBuilder::new()
            .add_numeric_field(field("OBJECTID"), 10, 0)
            .add_character_field(field("SUBCODE"), 4)
            .add_character_field(field("SUBNAME"), 30)
            .build_with_file_dest(dir.join("parcel_sub_names.dbf"))?;

        // the first two rows are duplicates apart from OBJECTID
        let rows = [
            (1.0, Some("01"), Some("OAKWOOD")),
            (2.0, Some("01"), Some("OAKWOOD")),
            (3.0, Some("02"), Some("PINECREST")),
        ];
        let records: Vec<Record> = rows
            .iter()
            .map(|(oid, code, name)| {
                let mut record = Record::default();
                record.insert("OBJECTID".into(), FieldValue::Numeric(Some(*oid)));
                record.insert("SUBCODE".into(), chr(*code));
                record.insert("SUBNAME".into(), chr(*name));
                record
            })
            .collect();
        writer.write_records(&records)?;
        Ok(())
    }

    fn write_dor_names(dir: &Path) -> Result<()> {
        let writer = TableWriterBuilder::new()
            .add_character_field(field("DORCODE"), 4)
            .add_character_field(field("DORNAME"), 30)
            .build_with_file_dest(dir.join("parcel_dor_names.dbf"))?;

        let rows = [
            (Some("0100"), Some("SINGLE FAMILY")),
            (Some("0200"), Some("MOBILE HOME")),
        ];
        let records: Vec<Record> = rows
            .iter()
            .map(|(code, name)| {
                let mut record = Record::default();
                record.insert("DORCODE".into(), chr(*code));
                record.insert("DORNAME".into(), chr(*name));
                record
            })
            .collect();
        writer.write_records(&records)?;
        Ok(())
    }

    /// Interim tree with the current vintages plus empty decoy folders
    /// from an earlier vintage. If version resolution ever picked a
    /// decoy, the required files would be missing and the run would fail.
    fn build_interim(paths: &DataPaths, parcel_with_dor: bool) -> Result<()> {
        let sales_dir = paths.interim_dir.join("allsales_2024_06");
        let parcel_dir = paths.interim_dir.join("parcel_2024_06");
        fs::create_dir_all(&sales_dir)?;
        fs::create_dir_all(&parcel_dir)?;
        fs::create_dir_all(paths.interim_dir.join("allsales_2020_01"))?;
        fs::create_dir_all(paths.interim_dir.join("parcel_2020_01"))?;

        write_sales(&sales_dir)?;
        write_parcel(&parcel_dir, parcel_with_dor)?;
        write_sub_names(&parcel_dir)?;
        write_dor_names(&parcel_dir)?;
        Ok(())
    }

    fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        Ok(reader.collect::<std::result::Result<_, _>>()?)
    }

    fn total_rows(batches: &[RecordBatch]) -> usize {
        batches.iter().map(|b| b.num_rows()).sum()
    }

    fn strings(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
        let ix = batch.schema().index_of(name).unwrap();
        batch
            .column(ix)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn merges_lookups_and_exports_both_tables() -> Result<()> {
        init_test_logging();
        let tmp = TempDir::new()?;
        let paths = DataPaths::rooted(tmp.path().join("data"));
        build_interim(&paths, true)?;

        load_and_merge(&paths)?;

        let sales = read_batches(&paths.processed_dir.join(SALES_OUTPUT))?;
        assert_eq!(total_rows(&sales), 2);
        assert_eq!(
            strings(&sales[0], "GRANTOR"),
            vec![Some("PEÑA JOSÉ".into()), None]
        );

        let parcel = read_batches(&paths.processed_dir.join(PARCEL_OUTPUT))?;
        assert_eq!(total_rows(&parcel), 3, "left joins must not change row count");

        let batch = &parcel[0];
        let names: Vec<&str> = batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            vec!["PARCEL_ID", "ACRES", "DORCODE", "DORNAME", "SUBCODE", "SUBNAME"]
        );

        assert_eq!(
            strings(batch, "DORNAME"),
            vec![Some("SINGLE FAMILY".into()), None, None]
        );
        assert_eq!(
            strings(batch, "SUBNAME"),
            vec![Some("OAKWOOD".into()), None, Some("PINECREST".into())]
        );
        Ok(())
    }

    #[test]
    fn success_line_names_both_output_files() -> Result<()> {
        use std::sync::{Arc, Mutex};
        use tracing_subscriber::{EnvFilter, FmtSubscriber};

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let tmp = TempDir::new()?;
        let paths = DataPaths::rooted(tmp.path().join("data"));
        build_interim(&paths, true)?;

        let capture = Capture::default();
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new("info"))
            .with_ansi(false)
            .with_writer({
                let capture = capture.clone();
                move || capture.clone()
            })
            .finish();
        tracing::subscriber::with_default(subscriber, || load_and_merge(&paths))?;

        let log = String::from_utf8(capture.0.lock().unwrap().clone())?;
        assert!(
            log.lines()
                .any(|line| line.contains(SALES_OUTPUT) && line.contains(PARCEL_OUTPUT)),
            "no single line names both outputs:\n{log}"
        );
        Ok(())
    }

    #[test]
    fn missing_lookup_fails_before_any_output_is_written() -> Result<()> {
        init_test_logging();
        let tmp = TempDir::new()?;
        let paths = DataPaths::rooted(tmp.path().join("data"));
        build_interim(&paths, true)?;
        fs::remove_file(
            paths
                .interim_dir
                .join("parcel_2024_06")
                .join("parcel_dor_names.dbf"),
        )?;

        let err = load_and_merge(&paths).unwrap_err();
        assert!(
            err.to_string().contains("parcel_dor_names.dbf"),
            "error was: {err:#}"
        );
        assert!(!paths.processed_dir.join(SALES_OUTPUT).exists());
        assert!(!paths.processed_dir.join(PARCEL_OUTPUT).exists());
        Ok(())
    }

    #[test]
    fn merge_failure_leaves_no_partial_output() -> Result<()> {
        init_test_logging();
        let tmp = TempDir::new()?;
        let paths = DataPaths::rooted(tmp.path().join("data"));
        build_interim(&paths, false)?;

        let err = load_and_merge(&paths).unwrap_err();
        assert!(
            err.to_string().contains("no column DOR_C"),
            "error was: {err:#}"
        );
        assert!(!paths.processed_dir.join(SALES_OUTPUT).exists());
        assert!(!paths.processed_dir.join(PARCEL_OUTPUT).exists());
        Ok(())
    }

    #[test]
    fn full_pipeline_runs_from_raw_archives() -> Result<()> {
        init_test_logging();
        let tmp = TempDir::new()?;
        let paths = DataPaths::rooted(tmp.path().join("data"));
        fs::create_dir_all(&paths.raw_dir)?;

        // stage the DBF files, then pack them the way the county ships them
        let stage = tmp.path().join("stage");
        let sales_stage = stage.join("sales");
        let parcel_stage = stage.join("parcel");
        fs::create_dir_all(&sales_stage)?;
        fs::create_dir_all(&parcel_stage)?;
        write_sales(&sales_stage)?;
        write_parcel(&parcel_stage, true)?;
        write_sub_names(&parcel_stage)?;
        write_dor_names(&parcel_stage)?;

        zip_dir_contents(&sales_stage, &paths.raw_dir.join("allsales_2024_06.zip"))?;
        zip_dir_contents(&parcel_stage, &paths.raw_dir.join("parcel_2024_06.zip"))?;

        extract_archives(&paths)?;
        load_and_merge(&paths)?;

        let sales = read_batches(&paths.processed_dir.join(SALES_OUTPUT))?;
        let parcel = read_batches(&paths.processed_dir.join(PARCEL_OUTPUT))?;
        assert_eq!(total_rows(&sales), 2);
        assert_eq!(total_rows(&parcel), 3);
        Ok(())
    }

    fn zip_dir_contents(dir: &Path, zip_path: &Path) -> Result<()> {
        let file = File::create(zip_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Stored);
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(&path)?)?;
        }
        zip.finish()?;
        Ok(())
    }
}
