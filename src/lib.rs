//! One-shot cadastral ETL: expand zipped county property exports, load the
//! DBF attribute tables, attach lookup descriptions to the parcel records,
//! and write the results as Parquet.

pub mod config;
pub mod extract;
pub mod locate;
pub mod process;
pub mod table;
