//! CSV upload into existing warehouse tables
//!
//! An upload stages the CSV rows in a session-scoped table shaped like the
//! target, then folds them into the target with exactly one combination
//! strategy. The staging table is dropped on every exit path.

use crate::error::{Result, SubirError};
use crate::frame::RowFrame;
use crate::query::{self, Dialect, Query};
use crate::sanitize::{sanitize_column_name, validate_column_name, validate_relation_name};
use crate::staging::{release, StagingTable};
use crate::types::{ColumnType, ColumnTypeMap};
use crate::warehouse::Warehouse;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::io::Read;

/// Flags controlling how staged rows are combined with the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Truncate the target before appending
    pub replace: bool,
    /// Delete target rows whose key is absent from the upload, then merge
    pub merge_replace: bool,
    /// Insert empty text cells as null
    pub empty_as_null: bool,
}

/// How staged rows are folded into the target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombineStrategy {
    Replace,
    MergeReplace {
        join_columns: Vec<String>,
        update_columns: Vec<String>,
    },
    Merge {
        join_columns: Vec<String>,
        update_columns: Vec<String>,
    },
    Append,
}

impl CombineStrategy {
    /// Pick exactly one strategy: replace, then merge-replace, then keyed merge,
    /// then append.
    pub fn select(
        replace: bool,
        merge_replace: bool,
        merge_columns: &[String],
        frame_columns: &[String],
    ) -> Self {
        let update_columns = || {
            frame_columns
                .iter()
                .filter(|c| !merge_columns.contains(c))
                .cloned()
                .collect::<Vec<_>>()
        };

        if replace {
            CombineStrategy::Replace
        } else if merge_replace {
            CombineStrategy::MergeReplace {
                join_columns: merge_columns.to_vec(),
                update_columns: update_columns(),
            }
        } else if !merge_columns.is_empty() {
            CombineStrategy::Merge {
                join_columns: merge_columns.to_vec(),
                update_columns: update_columns(),
            }
        } else {
            CombineStrategy::Append
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CombineStrategy::Replace => "replace",
            CombineStrategy::MergeReplace { .. } => "merge-replace",
            CombineStrategy::Merge { .. } => "merge",
            CombineStrategy::Append => "append",
        }
    }

    /// Combination statement(s) reading from the staging table of `table`
    pub fn query(&self, schema: &str, table: &str) -> Query {
        match self {
            CombineStrategy::Replace => query::replace_upload_query(schema, table),
            CombineStrategy::MergeReplace {
                join_columns,
                update_columns,
            } => query::merge_replace_upload_query(schema, table, join_columns, update_columns),
            CombineStrategy::Merge {
                join_columns,
                update_columns,
            } => query::merge_upload_query(schema, table, join_columns, update_columns),
            CombineStrategy::Append => query::append_upload_query(schema, table),
        }
    }
}

/// Infer a column type map from CSV content. Column names are sanitized.
pub fn get_table_structure<R: Read>(csv: R) -> Result<ColumnTypeMap> {
    let frame = RowFrame::from_csv_reader(csv)?;
    let mut column_types = ColumnTypeMap::new();
    for column in frame.columns() {
        let column_type = ColumnType::infer_from_sample(frame.column_values(column)?);
        let name = sanitize_column_name(column);
        if column_types.insert(name.clone(), column_type).is_some() {
            log::warn!("Column '{}' appears more than once after sanitizing", name);
        }
    }
    Ok(column_types)
}

/// Warehouse type strings for a column type map
pub fn render_column_types(column_types: &ColumnTypeMap) -> IndexMap<String, String> {
    column_types
        .iter()
        .map(|(column, column_type)| (column.clone(), column_type.warehouse_type().to_string()))
        .collect()
}

/// Every name must already be sanitized and every type string must be one
/// produced by a [`ColumnType`].
pub fn validate_column_types(column_types: &IndexMap<String, String>) -> Result<()> {
    for (column, column_type) in column_types {
        validate_column_name(column)?;
        if !ColumnType::ALL
            .iter()
            .any(|t| t.warehouse_type() == column_type)
        {
            return Err(SubirError::invalid_column_type(column_type));
        }
    }
    Ok(())
}

pub fn delete_table_query(schema: &str, table: &str) -> Result<Query> {
    validate_relation_name(schema)?;
    validate_relation_name(table)?;
    Ok(query::drop_table_query(schema, table))
}

/// Uploads CSV content into tables of one warehouse
pub struct Uploader<W: Warehouse> {
    warehouse: W,
}

impl<W: Warehouse> Uploader<W> {
    pub fn new(warehouse: W) -> Self {
        Self { warehouse }
    }

    pub fn warehouse_mut(&mut self) -> &mut W {
        &mut self.warehouse
    }

    pub fn into_inner(self) -> W {
        self.warehouse
    }

    pub fn dialect(&self) -> Dialect {
        self.warehouse.dialect()
    }

    pub fn create_table_query(
        &self,
        schema: &str,
        table: &str,
        column_types: &IndexMap<String, String>,
        read_only_groups: &[String],
    ) -> Result<Query> {
        validate_relation_name(schema)?;
        validate_relation_name(table)?;
        validate_column_types(column_types)?;
        Ok(query::create_table_query(
            self.dialect(),
            schema,
            table,
            column_types,
            read_only_groups,
        ))
    }

    /// Inferred `create table` statement for the CSV, parameters substituted
    pub fn create_table_sql_from_csv<R: Read>(
        &self,
        schema: &str,
        table: &str,
        csv: R,
        read_only_groups: &[String],
    ) -> Result<String> {
        let column_types = render_column_types(&get_table_structure(csv)?);
        let query = self.create_table_query(schema, table, &column_types, read_only_groups)?;
        Ok(query.substituted(self.dialect()))
    }

    /// Run standalone statements and commit them.
    pub fn run_query(&mut self, query: &Query) -> Result<()> {
        let warehouse = &mut self.warehouse;
        warehouse.connect()?;
        let outcome = warehouse
            .execute(query)
            .and_then(|_| warehouse.commit());
        release(outcome, warehouse.disconnect(), "disconnect")
    }

    /// Column types of an existing table, in column order
    pub fn get_column_types(&mut self, schema: &str, table: &str) -> Result<ColumnTypeMap> {
        validate_relation_name(schema)?;
        validate_relation_name(table)?;

        let dialect = self.dialect();
        let warehouse = &mut self.warehouse;
        warehouse.connect()?;
        let outcome = fetch_column_types(warehouse, dialect, schema, table);
        let rows = release(outcome, warehouse.disconnect(), "disconnect")?;

        if rows.is_empty() {
            return Err(SubirError::MissingTable {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }

        query::column_types_from_rows(&rows)
            .into_iter()
            .map(|(column, type_string)| {
                Ok((column, ColumnType::infer_from_warehouse_type(&type_string)?))
            })
            .collect()
    }

    /// Upload CSV content into `schema.table`, returning the number of rows staged.
    ///
    /// Only columns the target declares are uploaded; a target column missing
    /// from the CSV is an error.
    pub fn upload<R: Read>(
        &mut self,
        schema: &str,
        table: &str,
        merge_column_names: &[String],
        csv: R,
        options: &UploadOptions,
    ) -> Result<usize> {
        let column_types = self.get_column_types(schema, table)?;

        let mut frame = RowFrame::from_csv_reader(csv)?;
        frame.rename_columns(sanitize_column_name);

        let mut seen = HashSet::new();
        let columns: Vec<String> = frame
            .columns()
            .iter()
            .filter(|c| column_types.contains_key(*c) && seen.insert(c.as_str()))
            .cloned()
            .collect();

        let mut missing: Vec<String> = column_types
            .keys()
            .filter(|c| !columns.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(SubirError::MissingColumns { columns: missing });
        }

        let frame = frame.select(&columns);
        self.upload_data_frame(schema, table, merge_column_names, &frame, &column_types, options)
    }

    /// Stage `frame` and combine it into `schema.table`.
    pub fn upload_data_frame(
        &mut self,
        schema: &str,
        table: &str,
        merge_column_names: &[String],
        frame: &RowFrame,
        column_types: &ColumnTypeMap,
        options: &UploadOptions,
    ) -> Result<usize> {
        validate_relation_name(schema)?;
        validate_relation_name(table)?;
        for column in frame.columns() {
            validate_column_name(column)?;
        }

        if options.merge_replace && !options.replace && merge_column_names.is_empty() {
            return Err(SubirError::invalid_input(
                "merge-replace requires at least one merge column",
            ));
        }
        if !options.replace {
            let mut missing: Vec<String> = merge_column_names
                .iter()
                .filter(|c| !frame.has_column(c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                missing.sort();
                return Err(SubirError::MissingColumns { columns: missing });
            }
        }

        let strategy = CombineStrategy::select(
            options.replace,
            options.merge_replace,
            merge_column_names,
            frame.columns(),
        );
        let staging = StagingTable::for_upload(self.dialect(), schema, table);

        let warehouse = &mut self.warehouse;
        warehouse.connect()?;
        let outcome = warehouse.set_autocommit(true).and_then(|_| {
            staging.scope(warehouse, |w| {
                let staged = w.insert_frame(
                    None,
                    staging.name(),
                    frame,
                    Some(column_types),
                    options.empty_as_null,
                )?;
                log::info!(
                    "Staged {} row(s) for {}.{}, combining with {}",
                    staged,
                    schema,
                    table,
                    strategy.name()
                );
                w.execute(&strategy.query(schema, table))?;
                Ok(staged)
            })
        });
        release(outcome, warehouse.disconnect(), "disconnect")
    }
}

fn fetch_column_types<W: Warehouse>(
    warehouse: &mut W,
    dialect: Dialect,
    schema: &str,
    table: &str,
) -> Result<Vec<Vec<Option<String>>>> {
    let database = warehouse.database()?;
    warehouse.fetch(&query::column_type_query(dialect, &database, schema, table))
}
