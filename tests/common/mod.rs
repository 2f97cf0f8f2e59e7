//! Common test utilities and helpers

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use subir::query::Query;
use subir::tag::{ConflictReport, Operator, Resolution};
use subir::{DuckDbWarehouse, Result, SubirError, Warehouse};
use tempfile::TempDir;

/// Test fixture manager for creating temporary test environments
///
/// Each fixture owns a temporary directory holding an on-disk DuckDB warehouse,
/// a configuration file pointing at it, and an output directory for reports.
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub database_path: PathBuf,
    pub output_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestFixture {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let database_path = temp_dir.path().join("warehouse.duckdb");
        let output_dir = temp_dir.path().join("output");
        let config_path = temp_dir.path().join("subir.json");

        let config = serde_json::json!({
            "default_database": "test",
            "output_dir": output_dir,
            "databases": {
                "test": { "path": database_path, "read_only_groups": ["analysts"] }
            }
        });
        fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

        let fixture = Self {
            temp_dir,
            database_path,
            output_dir,
            config_path,
        };
        fixture.execute("create schema if not exists sales;")?;
        Ok(fixture)
    }

    /// Get the root path of the test fixture
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Open the fixture's warehouse. Drop it before another handle opens the file.
    pub fn warehouse(&self) -> Result<DuckDbWarehouse> {
        DuckDbWarehouse::open(&self.database_path)
    }

    /// Run statements in autocommit mode
    pub fn execute(&self, sql: &str) -> Result<()> {
        let mut warehouse = self.warehouse()?;
        warehouse.connect()?;
        warehouse.set_autocommit(true)?;
        warehouse.execute(&Query::new(sql))?;
        warehouse.disconnect()
    }

    /// Fetch rows rendered as text
    pub fn query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut warehouse = self.warehouse()?;
        warehouse.connect()?;
        let rows = warehouse.fetch(&Query::new(sql))?;
        warehouse.disconnect()?;
        Ok(rows)
    }

    pub fn count(&self, table: &str) -> Result<u64> {
        let rows = self.query(&format!("select count(*) from {}", table))?;
        let value = rows[0][0].clone().unwrap_or_default();
        value
            .parse()
            .map_err(|_| SubirError::invalid_input(format!("bad count {}", value)))
    }

    pub fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let rows = self.query(&format!(
            "select count(*) from information_schema.tables where table_schema = '{}' and table_name = '{}'",
            schema, table
        ))?;
        Ok(rows[0][0].as_deref() != Some("0"))
    }

    /// Create a test CSV file with sample data
    pub fn create_csv(&self, name: &str, data: &[Vec<&str>]) -> Result<PathBuf> {
        let path = self.root().join(name);
        let mut content = String::new();

        for row in data {
            content.push_str(&row.join(","));
            content.push('\n');
        }

        fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a test CSV file with raw string content
    pub fn create_csv_raw(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.root().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Create the tag table of `entity` in `sales`
    pub fn create_tag_table(&self, entity: subir::EntityType) -> Result<()> {
        let query = entity.create_table_query(subir::query::Dialect::DuckDb, "sales");
        self.execute(&query.text)
    }
}

/// Helper for running subir CLI commands against a fixture
pub struct CliTestRunner {
    fixture: TestFixture,
}

impl CliTestRunner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fixture: TestFixture::new()?,
        })
    }

    pub fn fixture(&self) -> &TestFixture {
        &self.fixture
    }

    /// Run a subir command and return the result
    pub fn run_command(&self, args: &[&str]) -> Result<()> {
        use clap::Parser;
        use subir::cli::Cli;
        use subir::commands::execute_command;

        let mut cmd_args = vec!["subir"];
        cmd_args.extend(args);

        let cli = Cli::try_parse_from(cmd_args)
            .map_err(|e| SubirError::invalid_input(e.to_string()))?;

        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| self.fixture.config_path.clone());
        execute_command(cli.command, Some(&config_path), cli.database.as_deref())
    }

    /// Run a command and expect it to succeed
    pub fn expect_success(&self, args: &[&str]) {
        self.run_command(args).expect("Command should succeed");
    }

    /// Run a command and expect it to fail
    pub fn expect_failure(&self, args: &[&str]) -> SubirError {
        self.run_command(args).expect_err("Command should fail")
    }
}

/// Operator answering from a script and recording what it was told
#[derive(Default)]
pub struct ScriptedOperator {
    pub resolutions: VecDeque<Resolution>,
    pub confirmations: VecDeque<bool>,
    pub messages: Vec<String>,
    pub prompts: Vec<String>,
    /// `(conflicting, non_conflicting)` report sizes seen
    pub reports: Vec<(usize, usize)>,
}

impl ScriptedOperator {
    pub fn resolving(resolution: Resolution) -> Self {
        Self {
            resolutions: VecDeque::from([resolution]),
            confirmations: VecDeque::from([true]),
            ..Self::default()
        }
    }

    pub fn declining() -> Self {
        Self {
            confirmations: VecDeque::from([false]),
            ..Self::default()
        }
    }
}

impl Operator for ScriptedOperator {
    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn resolve_conflicts(&mut self, report: &ConflictReport) -> Result<Resolution> {
        self.reports
            .push((report.conflicting.len(), report.non_conflicting.len()));
        self.resolutions
            .pop_front()
            .ok_or_else(|| SubirError::invalid_input("unexpected conflict prompt"))
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        self.prompts.push(prompt.to_string());
        Ok(self.confirmations.pop_front().unwrap_or(true))
    }
}

/// Assertion helpers for common test patterns
pub mod assertions {
    use std::path::Path;

    pub fn assert_file_exists_and_not_empty(path: &Path) {
        assert!(path.exists(), "File should exist: {}", path.display());
        let metadata = std::fs::metadata(path).unwrap();
        assert!(metadata.len() > 0, "File should not be empty: {}", path.display());
    }

    pub fn assert_csv_rows(path: &Path, expected_rows: usize) {
        let content = std::fs::read_to_string(path).unwrap();
        let rows = content.lines().count().saturating_sub(1);
        assert_eq!(rows, expected_rows, "Unexpected row count in {}", path.display());
    }
}

/// Warehouse wrapper recording every statement it is asked to execute
pub struct RecordingWarehouse<W: Warehouse> {
    pub inner: W,
    pub executed: Vec<String>,
    pub disconnects: usize,
}

impl<W: Warehouse> RecordingWarehouse<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            executed: Vec::new(),
            disconnects: 0,
        }
    }
}

impl<W: Warehouse> Warehouse for RecordingWarehouse<W> {
    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        self.disconnects += 1;
        self.inner.disconnect()
    }

    fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        self.inner.set_autocommit(autocommit)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.executed.push("rollback".to_string());
        self.inner.rollback()
    }

    fn execute(&mut self, query: &Query) -> Result<()> {
        self.executed.push(query.text.clone());
        self.inner.execute(query)
    }

    fn fetch(&mut self, query: &Query) -> Result<Vec<Vec<Option<String>>>> {
        self.inner.fetch(query)
    }

    fn insert_frame(
        &mut self,
        schema: Option<&str>,
        table: &str,
        frame: &subir::RowFrame,
        column_types: Option<&subir::ColumnTypeMap>,
        empty_as_null: bool,
    ) -> Result<usize> {
        self.inner
            .insert_frame(schema, table, frame, column_types, empty_as_null)
    }

    fn database(&mut self) -> Result<String> {
        self.inner.database()
    }

    fn dialect(&self) -> subir::query::Dialect {
        self.inner.dialect()
    }
}
