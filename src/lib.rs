//! # subir
//!
//! Uploads CSV files into columnar warehouse tables: infers column types,
//! generates the SQL to create and combine tables, stages rows in a
//! short-lived table and folds them into the target. A tagging pipeline
//! reconciles entity tag files with the warehouse tag tables.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod prompt;
pub mod query;
pub mod sanitize;
pub mod staging;
pub mod tag;
pub mod types;
pub mod upload;
pub mod warehouse;

pub use config::SubirConfig;
pub use error::{Result, SubirError};
pub use frame::RowFrame;
pub use tag::{EntityType, Operator, Resolution, TagRequest, Tagger};
pub use types::{ColumnType, ColumnTypeMap};
pub use upload::{CombineStrategy, UploadOptions, Uploader};
pub use warehouse::{DuckDbWarehouse, Warehouse};
