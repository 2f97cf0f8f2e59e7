//! Error types for subir operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SubirError>;

#[derive(Error, Debug)]
pub enum SubirError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Invalid name: {name}")]
    InvalidName { name: String },

    #[error("Invalid column type: {column_type}")]
    InvalidColumnType { column_type: String },

    #[error("CSV does not contain all table columns: {}", columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("Unrecognized warehouse type: {type_name}")]
    UnrecognizedWarehouseType { type_name: String },

    #[error("Operation aborted by operator")]
    AbortedByOperator,

    #[error("Table not found: {schema}.{table}")]
    MissingTable { schema: String, table: String },

    #[error("Cannot convert value '{value}' in column '{column}' to {column_type}")]
    ValueConversion {
        column: String,
        value: String,
        column_type: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Warehouse is not connected")]
    NotConnected,

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SubirError {
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    pub fn invalid_column_type(column_type: impl Into<String>) -> Self {
        Self::InvalidColumnType {
            column_type: column_type.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }
}
