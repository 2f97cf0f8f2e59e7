//! Entity tag reconciliation
//!
//! A tag CSV assigns a tag and subtag to ads, ad sets or campaigns. Rows are
//! normalized and deduplicated locally, then merged into the entity's tag table
//! by `(channel, <entity>_id)`. Conflicting rows (same identifier, different
//! tags) are resolved by the [`Operator`].

use crate::error::{Result, SubirError};
use crate::frame::{Keep, RowFrame};
use crate::query::{self, qualified, Dialect, MergeQuery, Query};
use crate::sanitize::validate_relation_name;
use crate::staging::{release, StagingTable};
use crate::warehouse::Warehouse;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Column stamped with the name of the file a tag row came from
pub const UPLOAD_GROUP_COLUMN: &str = "upload_group";

const IDENTIFIER_TYPE: &str = "character varying(127)";
const TAG_TYPE: &str = "character varying(255)";

/// Kind of advertising entity a tag file describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Ad,
    Adset,
    Campaign,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Ad, EntityType::Adset, EntityType::Campaign];

    /// Guess the entity from the columns of a tag file.
    pub fn from_tag_data(columns: &[String]) -> Self {
        let has = |name: &str| columns.iter().any(|c| c == name);
        if has("ad_id") {
            EntityType::Ad
        } else if has("adset_tag") {
            EntityType::Adset
        } else {
            EntityType::Campaign
        }
    }

    pub fn value(self) -> &'static str {
        match self {
            EntityType::Ad => "ad",
            EntityType::Adset => "adset",
            EntityType::Campaign => "campaign",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|e| e.value() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid entity type: {}. Valid options: ad, adset, campaign", s))
    }

    /// Columns that identify one entity: `channel` and `<entity>_id`
    pub fn identifier_column_names(self) -> Vec<String> {
        vec!["channel".to_string(), self.id_column()]
    }

    pub fn id_column_names(self) -> Vec<String> {
        vec![self.id_column()]
    }

    pub fn tag_column_names(self) -> Vec<String> {
        vec![self.tag_column(), self.subtag_column()]
    }

    /// Columns a merge overwrites on an existing identifier
    pub fn update_column_names(self) -> Vec<String> {
        let mut columns = self.tag_column_names();
        columns.push(UPLOAD_GROUP_COLUMN.to_string());
        columns
    }

    /// Tag table columns and their warehouse types, excluding `upload_group`
    pub fn columns(self) -> IndexMap<String, String> {
        let mut columns = IndexMap::new();
        columns.insert("company_identifier".to_string(), IDENTIFIER_TYPE.to_string());
        columns.insert("app".to_string(), IDENTIFIER_TYPE.to_string());
        for identifier in self.identifier_column_names() {
            columns.insert(identifier, IDENTIFIER_TYPE.to_string());
        }
        for tag in self.tag_column_names() {
            columns.insert(tag, TAG_TYPE.to_string());
        }
        columns
    }

    pub fn column_names(self) -> Vec<String> {
        self.columns().into_keys().collect()
    }

    pub fn id_column(self) -> String {
        format!("{}_id", self.value())
    }

    pub fn tag_column(self) -> String {
        format!("{}_tag", self.value())
    }

    pub fn subtag_column(self) -> String {
        format!("{}_subtag", self.value())
    }

    pub fn table_name(self) -> &'static str {
        match self {
            EntityType::Ad => "tag_ads",
            EntityType::Adset => "tag_adsets",
            EntityType::Campaign => "tag_campaigns",
        }
    }

    pub fn upload_table_name(self) -> String {
        format!("upload_{}", self.table_name())
    }

    pub fn restore_table_name(self) -> String {
        format!("restore_{}", self.table_name())
    }

    /// `create table` statement for this entity's tag table
    pub fn create_table_query(self, dialect: Dialect, schema: &str) -> Query {
        let mut columns = self.columns();
        columns.insert(UPLOAD_GROUP_COLUMN.to_string(), TAG_TYPE.to_string());
        query::create_table_query(dialect, schema, self.table_name(), &columns, &[])
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Entity named on the command line, or detected from the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntitySelection {
    #[default]
    Auto,
    Explicit(EntityType),
}

impl EntitySelection {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(EntitySelection::Auto)
        } else {
            EntityType::parse(s).map(EntitySelection::Explicit)
        }
    }

    pub fn resolve(self, columns: &[String]) -> EntityType {
        match self {
            EntitySelection::Auto => EntityType::from_tag_data(columns),
            EntitySelection::Explicit(entity) => entity,
        }
    }
}

/// How to settle rows that share an identifier but carry different tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    First,
    Last,
    /// Drop every conflicting row
    Skip,
    Abort,
}

impl Resolution {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "f" | "first" => Ok(Resolution::First),
            "l" | "last" => Ok(Resolution::Last),
            "s" | "skip" => Ok(Resolution::Skip),
            "a" | "abort" => Ok(Resolution::Abort),
            _ => Err(format!("Invalid resolution: {}. Valid options: f, l, s, a", s)),
        }
    }
}

/// Conflicting rows found in a tag file, as written to the report files
#[derive(Debug, Clone)]
pub struct ConflictReport {
    pub entity: EntityType,
    /// Parsed rows sharing an identifier with another row
    pub candidate_rows: usize,
    /// Source rows whose identifier is in conflict, sorted by identifier
    pub conflicting: RowFrame,
    pub non_conflicting: RowFrame,
    pub conflicting_path: PathBuf,
    pub non_conflicting_path: PathBuf,
}

impl ConflictReport {
    fn build(
        frame: &RowFrame,
        duplicated: &[bool],
        original: &RowFrame,
        entity: EntityType,
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Self> {
        let identifiers = entity.identifier_column_names();
        let indices = identifiers
            .iter()
            .map(|c| frame.column_index(c))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SubirError::MissingColumns {
                columns: identifiers.clone(),
            })?;

        let conflict_keys: HashSet<Vec<Option<String>>> = frame
            .rows()
            .iter()
            .zip(duplicated)
            .filter(|(_, &is_duplicate)| is_duplicate)
            .map(|(row, _)| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();

        let mut sorted = original.clone();
        let sort_columns: Vec<String> = identifiers
            .iter()
            .filter(|c| sorted.has_column(c))
            .cloned()
            .collect();
        sorted.sort_by_columns(&sort_columns)?;

        let id_columns = entity.id_column_names();
        let source_indices: Vec<(Option<usize>, bool)> = identifiers
            .iter()
            .map(|c| (sorted.column_index(c), id_columns.contains(c)))
            .collect();
        let mask: Vec<bool> = sorted
            .rows()
            .iter()
            .map(|row| {
                let key: Vec<Option<String>> = source_indices
                    .iter()
                    .map(|&(index, is_id)| {
                        let value = index.and_then(|i| row[i].as_deref());
                        if is_id {
                            value.and_then(decode_id)
                        } else {
                            value.map(str::to_string)
                        }
                    })
                    .collect();
                conflict_keys.contains(&key)
            })
            .collect();
        let inverse: Vec<bool> = mask.iter().map(|m| !m).collect();

        Ok(Self {
            entity,
            candidate_rows: duplicated.iter().filter(|d| **d).count(),
            conflicting: sorted.filter_mask(&mask),
            non_conflicting: sorted.filter_mask(&inverse),
            conflicting_path: output_dir.join(format!("{}_conflicting_tags.csv", prefix)),
            non_conflicting_path: output_dir.join(format!("{}_non_conflicting_tags.csv", prefix)),
        })
    }

    pub fn write(&self) -> Result<()> {
        self.conflicting.write_csv_file(&self.conflicting_path)?;
        self.non_conflicting.write_csv_file(&self.non_conflicting_path)?;
        Ok(())
    }
}

/// The person (or script) driving a tag upload
pub trait Operator {
    /// Whether prompts reach a person. Non-interactive operators get no reports,
    /// previews or confirmations, and conflicts keep the last row.
    fn is_interactive(&self) -> bool {
        true
    }

    fn notify(&mut self, message: &str);

    fn resolve_conflicts(&mut self, report: &ConflictReport) -> Result<Resolution>;

    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Operator for unattended runs
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Operator for Unattended {
    fn is_interactive(&self) -> bool {
        false
    }

    fn notify(&mut self, message: &str) {
        log::info!("{}", message);
    }

    fn resolve_conflicts(&mut self, _report: &ConflictReport) -> Result<Resolution> {
        Ok(Resolution::Last)
    }

    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// One tag file to apply
#[derive(Debug, Clone)]
pub struct TagRequest {
    pub schema: String,
    pub entity: EntitySelection,
    /// Truncate the tag table before merging
    pub replace: bool,
    /// Delete rows left with neither tag nor subtag
    pub purge: bool,
    /// Source file name; its base name becomes the upload group
    pub file_name: String,
}

impl TagRequest {
    fn upload_group(&self) -> String {
        Path::new(&self.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_name.clone())
    }

    fn report_prefix(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_name.clone())
    }
}

/// Decode a JSON-encoded identifier; strings and numbers survive, anything
/// else is rejected.
pub fn decode_id(raw: &str) -> Option<String> {
    let decoded = match serde_json::from_str::<Value>(raw).ok()? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

/// JSON-decode each id column, dropping rows whose id cannot be decoded.
/// Returns the number of rows dropped.
pub fn convert_id_columns(frame: &mut RowFrame, columns: &[String]) -> Result<usize> {
    let before = frame.len();
    for column in columns {
        frame.map_column(column, |value| value.and_then(decode_id))?;
        if let Some(index) = frame.column_index(column) {
            frame.retain_rows(|row| row[index].is_some());
        }
    }
    Ok(before - frame.len())
}

/// Fill missing tags with empty strings and trim them. Returns the number of
/// rows in which every tag column ends up empty.
pub fn strip_empty_tags(frame: &mut RowFrame, columns: &[String]) -> Result<usize> {
    if columns.is_empty() {
        return Ok(0);
    }
    for column in columns {
        frame.map_column(column, |value| Some(value.unwrap_or("").trim().to_string()))?;
    }
    let indices: Vec<usize> = columns
        .iter()
        .filter_map(|c| frame.column_index(c))
        .collect();
    Ok(frame
        .rows()
        .iter()
        .filter(|row| indices.iter().all(|&i| row[i].as_deref() == Some("")))
        .count())
}

/// Drop exact duplicates, then settle identifier conflicts with `operator`.
///
/// Interactive operators are shown the conflict reports written under
/// `output_dir`. Returns the number of rows dropped.
pub fn drop_duplicates(
    frame: &mut RowFrame,
    original: &RowFrame,
    entity: EntityType,
    output_dir: &Path,
    prefix: &str,
    operator: &mut dyn Operator,
) -> Result<usize> {
    let identifiers = entity.identifier_column_names();
    let mut exact = identifiers.clone();
    exact.extend(entity.tag_column_names());

    let identical = frame.drop_duplicates(&exact, Keep::First)?;
    if identical > 0 {
        operator.notify(&format!(
            "Dropped {} duplicate rows with identical tags.",
            identical
        ));
    }

    let duplicated = frame.duplicated(&identifiers)?;
    if !duplicated.iter().any(|d| *d) {
        return Ok(identical);
    }

    let resolution = if operator.is_interactive() {
        let report = ConflictReport::build(frame, &duplicated, original, entity, output_dir, prefix)?;
        report.write()?;
        operator.notify(&format!(
            "{} conflicting tag rows written to {}",
            report.conflicting.len(),
            report.conflicting_path.display()
        ));
        operator.notify(&format!(
            "{} non conflicting tag rows written to {}",
            report.non_conflicting.len(),
            report.non_conflicting_path.display()
        ));
        operator.resolve_conflicts(&report)?
    } else {
        Resolution::Last
    };

    let keep = match resolution {
        Resolution::First => Keep::First,
        Resolution::Last => Keep::Last,
        Resolution::Skip => Keep::None,
        Resolution::Abort => return Err(SubirError::AbortedByOperator),
    };
    let resolved = frame.drop_duplicates(&identifiers, keep)?;
    log::info!(
        "Resolved {} conflicting tag row(s) with {:?}, dropping {}",
        duplicated.iter().filter(|d| **d).count(),
        resolution,
        resolved
    );
    Ok(identical + resolved)
}

/// Applies tag files to the tag tables of one warehouse
pub struct Tagger<W: Warehouse> {
    warehouse: W,
    output_dir: PathBuf,
}

impl<W: Warehouse> Tagger<W> {
    /// `output_dir` receives the conflict reports.
    pub fn new(warehouse: W, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            warehouse,
            output_dir: output_dir.into(),
        }
    }

    pub fn warehouse_mut(&mut self) -> &mut W {
        &mut self.warehouse
    }

    pub fn into_inner(self) -> W {
        self.warehouse
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Apply one tag file. Returns the number of tag rows uploaded, or zero when
    /// there was nothing to upload or the operator declined.
    pub fn apply_tags<R: Read>(
        &mut self,
        request: &TagRequest,
        csv: R,
        operator: &mut dyn Operator,
    ) -> Result<usize> {
        validate_relation_name(&request.schema)?;

        let original = RowFrame::from_csv_reader(csv)?;
        operator.notify(&format!(
            "Imported {} tag rows from {}",
            original.len(),
            request.file_name
        ));

        let mut renamed = original.clone();
        renamed.rename_column("company", "company_identifier");
        let entity = request.entity.resolve(renamed.columns());
        log::info!("Applying {} tags from {}", entity, request.file_name);

        let mut frame = renamed.select(&entity.column_names());
        let undecodable = convert_id_columns(&mut frame, &entity.id_column_names())?;
        if undecodable > 0 {
            log::warn!("Dropped {} row(s) without a usable {}", undecodable, entity.id_column());
        }

        let empty = strip_empty_tags(&mut frame, &entity.tag_column_names())?;
        if empty > 0 {
            operator.notify(&format!("Found {} empty tag rows", empty));
        }

        drop_duplicates(
            &mut frame,
            &original,
            entity,
            &self.output_dir,
            &request.report_prefix(),
            operator,
        )?;

        if frame.is_empty() {
            operator.notify("No tags found in data");
            return Ok(0);
        }

        frame.set_constant_column(UPLOAD_GROUP_COLUMN, &request.upload_group());

        if operator.is_interactive() {
            operator.notify(&frame.head(5).preview());
            let count = self.count_tags(&request.schema, entity)?;
            let verb = if request.replace { "Replace" } else { "Merge" };
            let prompt = format!(
                "{} {} existing {} tags with {} new tags for {}",
                verb,
                count,
                entity,
                frame.len(),
                request.schema
            );
            if !operator.confirm(&prompt)? {
                return Ok(0);
            }
        }

        self.upload_tags(&request.schema, entity, &frame, request.replace, request.purge)?;

        if operator.is_interactive() {
            let final_count = self.count_tags(&request.schema, entity)?;
            operator.notify(&format!(
                "{} {} tags for {} exist after upload",
                final_count, entity, request.schema
            ));
        }

        Ok(frame.len())
    }

    /// Rows currently in the entity's tag table
    pub fn count_tags(&mut self, schema: &str, entity: EntityType) -> Result<u64> {
        validate_relation_name(schema)?;
        let warehouse = &mut self.warehouse;
        warehouse.connect()?;
        let outcome = fetch_count(warehouse, &query::count_query(schema, entity.table_name()));
        release(outcome, warehouse.disconnect(), "disconnect")
    }

    /// Stage `tags` next to the tag table and merge them in one transaction.
    ///
    /// A non-empty tag table is first copied to its restore table. With `replace`
    /// the tag table is truncated before the merge; with `purge` rows left
    /// without any tag are deleted afterwards.
    pub fn upload_tags(
        &mut self,
        schema: &str,
        entity: EntityType,
        tags: &RowFrame,
        replace: bool,
        purge: bool,
    ) -> Result<usize> {
        validate_relation_name(schema)?;
        log::info!("Uploading {} tags to schema {}", tags.len(), schema);

        let dialect = self.warehouse.dialect();
        let staging = StagingTable::in_schema(
            dialect,
            schema,
            entity.table_name(),
            &entity.upload_table_name(),
        );

        let warehouse = &mut self.warehouse;
        warehouse.connect()?;
        let outcome = warehouse.set_autocommit(true).and_then(|_| {
            staging.scope(warehouse, |w| {
                let staged = w.insert_frame(Some(schema), staging.name(), tags, None, false)?;
                with_transaction(w, |w| merge_staged_tags(w, dialect, schema, entity, replace, purge))?;
                Ok(staged)
            })
        });
        release(outcome, warehouse.disconnect(), "disconnect")
    }
}

/// Run `body` in a transaction, rolling back when it fails.
fn with_transaction<W, T, F>(warehouse: &mut W, body: F) -> Result<T>
where
    W: Warehouse + ?Sized,
    F: FnOnce(&mut W) -> Result<T>,
{
    warehouse.set_autocommit(false)?;
    let outcome = body(warehouse).and_then(|value| warehouse.commit().map(|_| value));
    let outcome = match outcome {
        Ok(value) => Ok(value),
        Err(error) => {
            log::warn!("Rolling back tag upload: {}", error);
            release(Err(error), warehouse.rollback(), "roll back")
        }
    };
    release(outcome, warehouse.set_autocommit(true), "restore autocommit")
}

fn merge_staged_tags<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    dialect: Dialect,
    schema: &str,
    entity: EntityType,
    replace: bool,
    purge: bool,
) -> Result<()> {
    let table = entity.table_name();
    let existing = fetch_count(warehouse, &query::count_query(schema, table))?;

    if existing > 0 {
        let restore_table = entity.restore_table_name();
        warehouse.execute(&query::backup_table_query(dialect, schema, table, &restore_table))?;
        log::info!(
            "Copied {} existing tag(s) to {}",
            existing,
            qualified(schema, &restore_table)
        );
        if replace {
            warehouse.execute(&query::truncate_query(schema, table))?;
        }
    }

    let join_columns = entity.identifier_column_names();
    let update_columns = entity.update_column_names();
    let merge = MergeQuery {
        join_columns: &join_columns,
        update_columns: &update_columns,
        source_table: qualified(schema, &entity.upload_table_name()),
        target_schema: schema,
        target_table: table,
    };
    warehouse.execute(&merge.query())?;

    if purge {
        warehouse.execute(&query::purge_empty_query(
            dialect,
            schema,
            table,
            &entity.tag_column_names(),
        ))?;
        warehouse.execute(&query::nullify_empty_query(
            schema,
            table,
            &entity.subtag_column(),
        ))?;
    }
    Ok(())
}

fn fetch_count<W: Warehouse + ?Sized>(warehouse: &mut W, query: &Query) -> Result<u64> {
    let rows = warehouse.fetch(query)?;
    let value = rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .unwrap_or_default();
    value
        .parse()
        .map_err(|_| SubirError::invalid_input(format!("Unexpected row count: '{}'", value)))
}
