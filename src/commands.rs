//! Command implementations for subir CLI

use crate::cli::{path_to_table_name, Commands};
use crate::config::{DatabaseConfig, SubirConfig};
use crate::error::Result;
use crate::prompt::TerminalOperator;
use crate::query::Query;
use crate::tag::{EntitySelection, Operator, TagRequest, Tagger, Unattended};
use crate::upload::{UploadOptions, Uploader};
use crate::warehouse::DuckDbWarehouse;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

/// Execute a command
pub fn execute_command(
    command: Commands,
    config_path: Option<&Path>,
    database_name: Option<&str>,
) -> Result<()> {
    let config = SubirConfig::load(config_path)?;
    let database = config.database(database_name)?;
    log::debug!("Using database at {}", database.path);

    match command {
        Commands::Create {
            csv,
            schema,
            table,
            yes,
        } => create_command(&config, &database, &csv, &schema, table.as_deref(), yes),
        Commands::Upload {
            csv,
            schema,
            table,
            merge_column,
            drop,
            merge_replace,
            empty_as_null,
        } => {
            let options = UploadOptions {
                replace: drop,
                merge_replace,
                empty_as_null,
            };
            upload_command(&database, &csv, &schema, table.as_deref(), &merge_column, &options)
        }
        Commands::Tag {
            csv,
            schema,
            entity,
            drop_existing,
            purge_empty: _,
            no_purge_empty,
            yes,
        } => {
            let request = TagRequest {
                schema,
                entity,
                replace: drop_existing,
                purge: !no_purge_empty,
                file_name: csv.display().to_string(),
            };
            tag_command(&config, &database, &csv, &request, yes)
        }
    }
}

fn open_warehouse(database: &DatabaseConfig) -> Result<DuckDbWarehouse> {
    DuckDbWarehouse::from_location(&database.path)
}

fn table_name(csv: &Path, table: Option<&str>) -> String {
    table
        .map(str::to_string)
        .unwrap_or_else(|| path_to_table_name(csv))
}

/// Infer a table from a CSV file and create it
fn create_command(
    config: &SubirConfig,
    database: &DatabaseConfig,
    csv: &Path,
    schema: &str,
    table: Option<&str>,
    yes: bool,
) -> Result<()> {
    let table = table_name(csv, table);
    let mut uploader = Uploader::new(open_warehouse(database)?);

    let reader = BufReader::new(File::open(csv)?);
    let sql = uploader.create_table_sql_from_csv(schema, &table, reader, &database.read_only_groups)?;

    fs::create_dir_all(&config.output_dir)?;
    let sql_path = config.output_dir.join(format!("create_{}.sql", table));
    fs::write(&sql_path, &sql)?;
    println!("📝 Create statement written to: {}", sql_path.display());
    println!("{}", sql);

    if !yes {
        let mut operator = TerminalOperator::stdio();
        if !operator.confirm(&format!("Create table {}.{}?", schema, table))? {
            println!("❌ Create cancelled.");
            return Ok(());
        }
    }

    uploader.run_query(&Query::new(sql))?;
    println!("✅ Created table {}.{}", schema, table);
    Ok(())
}

/// Upload a CSV file into an existing table
fn upload_command(
    database: &DatabaseConfig,
    csv: &Path,
    schema: &str,
    table: Option<&str>,
    merge_columns: &[String],
    options: &UploadOptions,
) -> Result<()> {
    let table = table_name(csv, table);
    let merge_columns: Vec<String> = merge_columns.iter().map(|c| c.to_lowercase()).collect();
    let mut uploader = Uploader::new(open_warehouse(database)?);

    println!("📤 Uploading '{}' to {}.{}...", csv.display(), schema, table);
    let reader = BufReader::new(File::open(csv)?);
    let staged = uploader.upload(schema, &table, &merge_columns, reader, options)?;
    println!("✅ Uploaded {} rows to {}.{}", staged, schema, table);
    Ok(())
}

/// Apply a tag file
fn tag_command(
    config: &SubirConfig,
    database: &DatabaseConfig,
    csv: &Path,
    request: &TagRequest,
    yes: bool,
) -> Result<()> {
    let mut tagger = Tagger::new(open_warehouse(database)?, &config.output_dir);
    let reader = BufReader::new(File::open(csv)?);

    if request.entity == EntitySelection::Auto {
        log::debug!("Detecting entity type from {}", csv.display());
    }

    let mut terminal;
    let mut unattended = Unattended;
    let operator: &mut dyn Operator = if yes {
        &mut unattended
    } else {
        terminal = TerminalOperator::stdio();
        &mut terminal
    };

    let applied = tagger.apply_tags(request, reader, operator)?;
    if applied == 0 {
        println!("No tags applied.");
    } else {
        println!("✅ Applied {} tag rows to schema {}", applied, request.schema);
    }
    Ok(())
}
