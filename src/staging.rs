//! Staging table lifecycle
//!
//! A staging table is created, used, and dropped on every exit path of the work
//! that uses it. A failed drop is reported, never swallowed: when the work itself
//! succeeded the drop error is returned, and when both fail the work's error wins
//! and the drop error is logged.

use crate::error::Result;
use crate::query::{self, Dialect, Query};
use crate::warehouse::Warehouse;

/// An ephemeral table plus the statements that create and drop it
#[derive(Debug, Clone)]
pub struct StagingTable {
    name: String,
    prepare: Query,
    release: Query,
}

impl StagingTable {
    /// Session-scoped `flx_upload_<table>` shaped like `schema.table`
    pub fn for_upload(dialect: Dialect, schema: &str, table: &str) -> Self {
        Self {
            name: query::upload_table_name(table),
            prepare: query::prepare_upload_table_query(dialect, schema, table),
            release: query::drop_upload_table_query(table),
        }
    }

    /// Regular table `schema.staging_table` shaped like `schema.table`, replacing
    /// any leftover from an earlier run.
    pub fn in_schema(dialect: Dialect, schema: &str, table: &str, staging_table: &str) -> Self {
        Self {
            name: staging_table.to_string(),
            prepare: query::prepare_table_like_query(dialect, schema, table, staging_table),
            release: query::drop_table_if_exists_query(schema, staging_table),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the table, run `body`, and drop the table whatever `body` returned.
    pub fn scope<W, T, F>(&self, warehouse: &mut W, body: F) -> Result<T>
    where
        W: Warehouse + ?Sized,
        F: FnOnce(&mut W) -> Result<T>,
    {
        warehouse.execute(&self.prepare)?;
        log::debug!("Created staging table {}", self.name);
        let outcome = body(warehouse);
        let released = warehouse.execute(&self.release);
        if released.is_ok() {
            log::debug!("Dropped staging table {}", self.name);
        }
        release(outcome, released, &format!("drop staging table {}", self.name))
    }
}

/// Combine the outcome of some work with the outcome of its cleanup step.
pub fn release<T>(outcome: Result<T>, cleanup: Result<()>, cleanup_name: &str) -> Result<T> {
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(cleanup_error)) => {
            log::error!("Failed to {} after error: {}", cleanup_name, cleanup_error);
            Err(error)
        }
    }
}
