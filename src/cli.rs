//! Command-line interface for subir

use crate::tag::EntitySelection;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "subir")]
#[command(about = "Upload CSV files into warehouse tables and reconcile entity tags")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to $SUBIR_CONFIG, then ./subir.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Named database from the configuration
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a table whose columns are inferred from a CSV file
    Create {
        /// CSV file to infer the table from
        csv: PathBuf,

        /// Target schema
        #[arg(short, long)]
        schema: String,

        /// Table name (defaults to the file name)
        #[arg(short, long)]
        table: Option<String>,

        /// Run the statement without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Upload a CSV file into an existing table
    Upload {
        /// CSV file to upload
        csv: PathBuf,

        /// Target schema
        #[arg(short, long)]
        schema: String,

        /// Table name (defaults to the file name)
        #[arg(short, long)]
        table: Option<String>,

        /// Column identifying a row; repeat for composite keys
        #[arg(short, long = "merge-column")]
        merge_column: Vec<String>,

        /// Replace the table contents
        #[arg(long)]
        drop: bool,

        /// Delete rows whose key is absent from the file, then merge
        #[arg(long)]
        merge_replace: bool,

        /// Upload empty text values as null
        #[arg(long)]
        empty_as_null: bool,
    },

    /// Apply a tag file to the entity tag tables
    Tag {
        /// Tag CSV file
        csv: PathBuf,

        /// Target schema
        #[arg(short, long)]
        schema: String,

        /// Entity type: "ad", "adset", "campaign" or "auto"
        #[arg(short, long, default_value = "auto", value_parser = EntitySelection::parse)]
        entity: EntitySelection,

        /// Replace all existing tags instead of merging
        #[arg(long)]
        drop_existing: bool,

        /// Delete rows left without tag and subtag (default)
        #[arg(long, overrides_with = "no_purge_empty")]
        purge_empty: bool,

        /// Keep rows left without tag and subtag
        #[arg(long, overrides_with = "purge_empty")]
        no_purge_empty: bool,

        /// Skip the confirmation prompt and resolve conflicts by keeping the last row
        #[arg(short, long)]
        yes: bool,
    },
}

/// Table name derived from a file name: stem, lowercased, with anything
/// outside `[a-z0-9]` replaced by `_`.
pub fn path_to_table_name(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
