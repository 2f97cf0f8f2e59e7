//! SQL generation for table creation, staging tables and combination strategies
//!
//! Every function here is pure: it returns SQL text plus parameter bindings and
//! never touches the warehouse. Relation names must already be validated by the
//! caller; column names are always quoted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Prefix of the per-upload staging table
pub const UPLOAD_TABLE_PREFIX: &str = "flx_upload_";

/// SQL text with positional parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub parameters: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(text: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Query text with every placeholder replaced by its quoted parameter, for
    /// display and for writing to a file.
    pub fn substituted(&self, dialect: Dialect) -> String {
        let placeholder = dialect.placeholder();
        let mut parameters = self.parameters.iter();
        let mut pieces = self.text.split(placeholder);
        let mut result = pieces.next().unwrap_or_default().to_string();
        for piece in pieces {
            match parameters.next() {
                Some(value) => result.push_str(&quote_literal(value)),
                None => result.push_str(placeholder),
            }
            result.push_str(piece);
        }
        result
    }
}

/// SQL flavour of the target warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Redshift,
    #[default]
    DuckDb,
}

impl Dialect {
    pub fn placeholder(self) -> &'static str {
        match self {
            Dialect::Redshift => "%s",
            Dialect::DuckDb => "?",
        }
    }

    pub fn supports_grants(self) -> bool {
        matches!(self, Dialect::Redshift)
    }

    /// `create table` statement for an empty table shaped like `source`
    fn create_table_like(self, new_table: &str, source: &str, temporary: bool) -> String {
        let temporary = if temporary { "temporary " } else { "" };
        match self {
            Dialect::Redshift => format!(
                "create {}table {} (like {} including defaults);",
                temporary, new_table, source
            ),
            Dialect::DuckDb => format!(
                "create {}table {} as select * from {} limit 0;",
                temporary, new_table, source
            ),
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

/// Name of the staging table used when uploading into `table`
pub fn upload_table_name(table: &str) -> String {
    format!("{}{}", UPLOAD_TABLE_PREFIX, table)
}

pub fn create_table_query(
    dialect: Dialect,
    schema: &str,
    table: &str,
    column_types: &IndexMap<String, String>,
    read_only_groups: &[String],
) -> Query {
    let columns_definition = column_types
        .iter()
        .map(|(column, column_type)| format!("  {} {}", quote_ident(column), column_type))
        .collect::<Vec<_>>()
        .join(",\n");
    let mut text = format!(
        "create table {} (\n{}\n);",
        qualified(schema, table),
        columns_definition
    );

    if dialect.supports_grants() {
        for group in read_only_groups {
            text.push_str(&format!(
                "\ngrant select on table {} to group {};",
                qualified(schema, table),
                group
            ));
        }
    } else if !read_only_groups.is_empty() {
        log::warn!(
            "Skipping grants for {} read-only group(s): not supported by {:?}",
            read_only_groups.len(),
            dialect
        );
    }

    Query::new(text)
}

pub fn drop_table_query(schema: &str, table: &str) -> Query {
    Query::new(format!("drop table {}", qualified(schema, table)))
}

pub fn count_query(schema: &str, table: &str) -> Query {
    Query::new(format!("select count(*) from {};", qualified(schema, table)))
}

pub fn truncate_query(schema: &str, table: &str) -> Query {
    Query::new(format!("truncate table {};", qualified(schema, table)))
}

/// Catalog query listing `(column_name, data_type, character_maximum_length)`
pub fn column_type_query(dialect: Dialect, database: &str, schema: &str, table: &str) -> Query {
    let p = dialect.placeholder();
    Query::with_parameters(
        format!(
            "select column_name, data_type, character_maximum_length
from information_schema.columns
where table_catalog = {p}
and table_schema = {p}
and table_name = {p}
order by ordinal_position;"
        ),
        vec![database.to_string(), schema.to_string(), table.to_string()],
    )
}

/// Column name to type string from the rows of [`column_type_query`]. Varchar
/// types carry their length in parentheses.
pub fn column_types_from_rows(rows: &[Vec<Option<String>>]) -> IndexMap<String, String> {
    rows.iter()
        .filter_map(|row| {
            let name = row.first()?.clone()?;
            let data_type = row.get(1).cloned().flatten().unwrap_or_default();
            let length = row.get(2).cloned().flatten();
            let rendered = match (data_type.as_str(), length) {
                ("character varying", Some(length)) => format!("{}({})", data_type, length),
                _ => data_type,
            };
            Some((name, rendered))
        })
        .collect()
}

/// Temporary staging table shaped like the target
pub fn prepare_upload_table_query(dialect: Dialect, schema: &str, table: &str) -> Query {
    Query::new(dialect.create_table_like(
        &upload_table_name(table),
        &qualified(schema, table),
        true,
    ))
}

pub fn drop_upload_table_query(table: &str) -> Query {
    Query::new(format!("drop table {};", upload_table_name(table)))
}

/// Recreate `new_table` in `schema` as an empty table shaped like `source_table`.
pub fn prepare_table_like_query(
    dialect: Dialect,
    schema: &str,
    source_table: &str,
    new_table: &str,
) -> Query {
    Query::new(format!(
        "drop table if exists {};\n{}",
        qualified(schema, new_table),
        dialect.create_table_like(
            &qualified(schema, new_table),
            &qualified(schema, source_table),
            false
        )
    ))
}

/// Copy every row of `table` into a freshly created `restore_table`.
pub fn backup_table_query(dialect: Dialect, schema: &str, table: &str, restore_table: &str) -> Query {
    let prepare = prepare_table_like_query(dialect, schema, table, restore_table);
    Query::new(format!(
        "{}\ninsert into {} select * from {};",
        prepare.text,
        qualified(schema, restore_table),
        qualified(schema, table)
    ))
}

pub fn drop_table_if_exists_query(schema: &str, table: &str) -> Query {
    Query::new(format!("drop table if exists {};", qualified(schema, table)))
}

pub fn append_upload_query(schema: &str, table: &str) -> Query {
    Query::new(format!(
        "insert into {} select * from {};",
        qualified(schema, table),
        upload_table_name(table)
    ))
}

pub fn replace_upload_query(schema: &str, table: &str) -> Query {
    let append = append_upload_query(schema, table);
    Query::with_parameters(
        format!("{}\n{}", truncate_query(schema, table).text, append.text),
        append.parameters,
    )
}

// Merge statements refer to both tables only through these aliases.
const TARGET_ALIAS: &str = "flx_target";
const SOURCE_ALIAS: &str = "flx_source";

/// Upsert of `source_table` into `target_schema.target_table` by `join_columns`
#[derive(Debug, Clone)]
pub struct MergeQuery<'a> {
    pub join_columns: &'a [String],
    pub update_columns: &'a [String],
    pub source_table: String,
    pub target_schema: &'a str,
    pub target_table: &'a str,
}

impl MergeQuery<'_> {
    fn target(&self) -> String {
        qualified(self.target_schema, self.target_table)
    }

    fn join_condition(&self) -> String {
        self.join_columns
            .iter()
            .map(|c| format!("{}.{} = {}.{}", TARGET_ALIAS, quote_ident(c), SOURCE_ALIAS, quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Update matching rows, then insert rows whose key is absent from the target.
    /// The update is omitted when there is nothing to update.
    pub fn query(&self) -> Query {
        let mut statements = Vec::new();

        if !self.update_columns.is_empty() {
            let assignments = self
                .update_columns
                .iter()
                .map(|c| format!("{} = {}.{}", quote_ident(c), SOURCE_ALIAS, quote_ident(c)))
                .collect::<Vec<_>>()
                .join(",\n  ");
            statements.push(format!(
                "update {} as {}\nset {}\nfrom {} as {}\nwhere {};",
                self.target(),
                TARGET_ALIAS,
                assignments,
                self.source_table,
                SOURCE_ALIAS,
                self.join_condition()
            ));
        }

        statements.push(format!(
            "insert into {target}\nselect {source_alias}.* from {source} as {source_alias}\nwhere not exists (\n  select 1 from {target} as {target_alias}\n  where {condition}\n);",
            target = self.target(),
            source = self.source_table,
            source_alias = SOURCE_ALIAS,
            target_alias = TARGET_ALIAS,
            condition = self.join_condition()
        ));

        Query::new(statements.join("\n"))
    }

    /// Delete target rows whose key is absent from the source, then merge.
    pub fn replace_query(&self) -> Query {
        let delete = format!(
            "delete from {} as {}\nwhere not exists (\n  select 1 from {} as {}\n  where {}\n);",
            self.target(),
            TARGET_ALIAS,
            self.source_table,
            SOURCE_ALIAS,
            self.join_condition()
        );
        Query::new(format!("{}\n{}", delete, self.query().text))
    }
}

pub fn merge_upload_query(
    schema: &str,
    table: &str,
    join_columns: &[String],
    update_columns: &[String],
) -> Query {
    MergeQuery {
        join_columns,
        update_columns,
        source_table: upload_table_name(table),
        target_schema: schema,
        target_table: table,
    }
    .query()
}

pub fn merge_replace_upload_query(
    schema: &str,
    table: &str,
    join_columns: &[String],
    update_columns: &[String],
) -> Query {
    MergeQuery {
        join_columns,
        update_columns,
        source_table: upload_table_name(table),
        target_schema: schema,
        target_table: table,
    }
    .replace_query()
}

/// Delete rows in which every one of `columns` is empty or null.
pub fn purge_empty_query(dialect: Dialect, schema: &str, table: &str, columns: &[String]) -> Query {
    let p = dialect.placeholder();
    let conditions = columns
        .iter()
        .map(|c| format!("({} = {} or {} is null)", quote_ident(c), p, quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" and ");
    Query::with_parameters(
        format!("delete from {}\nwhere {};", qualified(schema, table), conditions),
        columns.iter().map(|_| String::new()).collect(),
    )
}

/// Turn empty strings in `column` into null.
pub fn nullify_empty_query(schema: &str, table: &str, column: &str) -> Query {
    Query::new(format!(
        "update {}\nset {} = null\nwhere {} = '';",
        qualified(schema, table),
        quote_ident(column),
        quote_ident(column)
    ))
}
