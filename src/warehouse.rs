//! Warehouse connection layer
//!
//! The upload and tag pipelines only talk to the warehouse through the
//! [`Warehouse`] trait. [`DuckDbWarehouse`] is the bundled columnar implementation.

use crate::error::{Result, SubirError};
use crate::frame::RowFrame;
use crate::query::{quote_ident, qualified, Dialect, Query};
use crate::types::{CellValue, ColumnTypeMap};
use chrono::Datelike;
use duckdb::types::{Value, ValueRef};
use duckdb::{params_from_iter, Connection};
use std::path::Path;

/// Operations the pipelines need from a SQL warehouse
pub trait Warehouse {
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn set_autocommit(&mut self, autocommit: bool) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Run a statement, or a parameterless batch of statements.
    fn execute(&mut self, query: &Query) -> Result<()>;

    /// Run a single statement and return its rows rendered as text.
    fn fetch(&mut self, query: &Query) -> Result<Vec<Vec<Option<String>>>>;

    /// Insert every row of `frame` into `table`, matching columns by name.
    ///
    /// With `column_types`, each value is cast to its column's declared type;
    /// without, values are inserted as text. Returns the number of rows inserted.
    fn insert_frame(
        &mut self,
        schema: Option<&str>,
        table: &str,
        frame: &RowFrame,
        column_types: Option<&ColumnTypeMap>,
        empty_as_null: bool,
    ) -> Result<usize>;

    /// Catalog name used by `information_schema` queries
    fn database(&mut self) -> Result<String>;

    fn dialect(&self) -> Dialect;
}

/// DuckDB-backed warehouse
///
/// A root handle keeps the database open for the lifetime of the value; every
/// `connect` opens a fresh session on it, so temporary tables end with the session.
pub struct DuckDbWarehouse {
    database: Connection,
    session: Option<Session>,
}

struct Session {
    connection: Connection,
    autocommit: bool,
    in_transaction: bool,
}

impl DuckDbWarehouse {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let database = Connection::open(path)?;
        log::debug!("Opened DuckDB warehouse at {}", path.display());
        Ok(Self {
            database,
            session: None,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            database: Connection::open_in_memory()?,
            session: None,
        })
    }

    /// Open a file path, or an in-memory database for `:memory:`
    pub fn from_location(location: &str) -> Result<Self> {
        if location == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(Path::new(location))
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(SubirError::NotConnected)
    }
}

impl Session {
    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.connection.execute_batch("BEGIN TRANSACTION")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl Warehouse for DuckDbWarehouse {
    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let connection = self.database.try_clone()?;
        // Sessions start outside autocommit, matching DB-API drivers.
        let mut session = Session {
            connection,
            autocommit: false,
            in_transaction: false,
        };
        session.begin()?;
        self.session = Some(session);
        log::debug!("Connected to warehouse");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if session.in_transaction {
                session.connection.execute_batch("ROLLBACK")?;
            }
            log::debug!("Disconnected from warehouse");
        }
        Ok(())
    }

    fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        let session = self.session()?;
        session.autocommit = autocommit;
        if autocommit {
            if session.in_transaction {
                session.connection.execute_batch("COMMIT")?;
                session.in_transaction = false;
            }
        } else {
            session.begin()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let session = self.session()?;
        if session.in_transaction {
            session.connection.execute_batch("COMMIT")?;
            session.in_transaction = false;
        }
        if !session.autocommit {
            session.begin()?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let session = self.session()?;
        if session.in_transaction {
            session.connection.execute_batch("ROLLBACK")?;
            session.in_transaction = false;
        }
        if !session.autocommit {
            session.begin()?;
        }
        Ok(())
    }

    fn execute(&mut self, query: &Query) -> Result<()> {
        let session = self.session()?;
        log::debug!("Executing: {}", query.text);
        if query.parameters.is_empty() {
            session.connection.execute_batch(&query.text)?;
        } else {
            session
                .connection
                .execute(&query.text, params_from_iter(query.parameters.iter()))?;
        }
        Ok(())
    }

    fn fetch(&mut self, query: &Query) -> Result<Vec<Vec<Option<String>>>> {
        let session = self.session()?;
        log::debug!("Fetching: {}", query.text);
        let mut stmt = session.connection.prepare(&query.text)?;
        let mut rows = stmt.query(params_from_iter(query.parameters.iter()))?;
        let column_count = rows.as_ref().map_or(0, |s| s.column_count());

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_to_string(row.get_ref(i)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    fn insert_frame(
        &mut self,
        schema: Option<&str>,
        table: &str,
        frame: &RowFrame,
        column_types: Option<&ColumnTypeMap>,
        empty_as_null: bool,
    ) -> Result<usize> {
        let target = match schema {
            Some(schema) => qualified(schema, table),
            None => table.to_string(),
        };
        let columns = frame.columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "insert into {} ({}) values ({})",
            target,
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders
        );

        let mut converted = Vec::with_capacity(frame.len());
        for row in frame.rows() {
            let mut values = Vec::with_capacity(columns.len());
            for (column, raw) in columns.iter().zip(row) {
                let cell = match column_types.and_then(|types| types.get(column)) {
                    Some(column_type) => column_type.convert(column, raw.as_deref(), empty_as_null)?,
                    None => match raw {
                        Some(raw) if !(raw.is_empty() && empty_as_null) => CellValue::Text(raw.clone()),
                        _ => CellValue::Null,
                    },
                };
                values.push(cell_to_value(cell));
            }
            converted.push(values);
        }

        let session = self.session()?;
        log::debug!("Inserting {} row(s) into {}", converted.len(), target);
        if session.in_transaction {
            let mut stmt = session.connection.prepare(&sql)?;
            for values in &converted {
                stmt.execute(params_from_iter(values.iter()))?;
            }
        } else {
            let tx = session.connection.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for values in &converted {
                    stmt.execute(params_from_iter(values.iter()))?;
                }
            }
            tx.commit()?;
        }
        Ok(converted.len())
    }

    fn database(&mut self) -> Result<String> {
        let rows = self.fetch(&Query::new("select current_database()"))?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| SubirError::invalid_input("Warehouse did not report a database name"))
    }

    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }
}

fn cell_to_value(cell: CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Integer(i) => Value::BigInt(i),
        CellValue::Decimal(f) => Value::Double(f),
        CellValue::Boolean(b) => Value::Boolean(b),
        CellValue::Text(s) => Value::Text(s),
        CellValue::Date(d) => Value::Date32(days_since_epoch(d)),
    }
}

/// Days from 0001-01-01 (CE) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn days_since_epoch(date: chrono::NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    let rendered = match value {
        ValueRef::Null => return None,
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(i) => i.to_string(),
        ValueRef::SmallInt(i) => i.to_string(),
        ValueRef::Int(i) => i.to_string(),
        ValueRef::BigInt(i) => i.to_string(),
        ValueRef::HugeInt(i) => i.to_string(),
        ValueRef::UTinyInt(i) => i.to_string(),
        ValueRef::USmallInt(i) => i.to_string(),
        ValueRef::UInt(i) => i.to_string(),
        ValueRef::UBigInt(i) => i.to_string(),
        ValueRef::Float(f) => f.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Text(s) => String::from_utf8_lossy(s).to_string(),
        ValueRef::Blob(b) => format!("<blob:{} bytes>", b.len()),
        ValueRef::Date32(d) => chrono::NaiveDate::from_num_days_from_ce_opt(d + UNIX_EPOCH_DAYS_FROM_CE)
            .map(|date| date.to_string())
            .unwrap_or_else(|| d.to_string()),
        other => format!("{:?}", other),
    };
    Some(rendered)
}
