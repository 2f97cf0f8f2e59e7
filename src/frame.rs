//! In-memory tabular CSV content

use crate::error::{Result, SubirError};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

/// Which occurrence to keep when dropping duplicate rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
    /// Drop every row that has a duplicate
    None,
}

/// Rows of optional text cells under a header.
///
/// Cells read from CSV are always `Some`, possibly empty. `None` marks a cell that
/// did not exist in the source, e.g. a column added by [`RowFrame::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFrame {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RowFrame {
    /// Read comma-delimited CSV with a header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let columns = csv_reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(|v| Some(v.to_string())).collect());
        }

        log::debug!("Read {} row(s) across {} column(s)", rows.len(), columns.len());
        Ok(Self { columns, rows })
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SubirError::invalid_input(format!(
                "Row has {} value(s) but frame has {} column(s)",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| SubirError::MissingColumns {
            columns: vec![name.to_string()],
        })
    }

    /// Values of one column in row order
    pub fn column_values<'a>(&'a self, name: &str) -> Result<impl Iterator<Item = Option<&'a str>> + 'a> {
        let index = self.require_column(name)?;
        Ok(self.rows.iter().map(move |row| row[index].as_deref()))
    }

    /// Rename every column through `rename`.
    pub fn rename_columns<F: Fn(&str) -> String>(&mut self, rename: F) {
        for column in &mut self.columns {
            *column = rename(column);
        }
    }

    /// Rename a single column if present.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(index) = self.column_index(from) {
            self.columns[index] = to.to_string();
        }
    }

    /// Project onto `columns` in the given order; columns the frame lacks are
    /// filled with missing values.
    pub fn select(&self, columns: &[String]) -> RowFrame {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|index| index.and_then(|i| row[i].clone()))
                    .collect()
            })
            .collect();
        RowFrame {
            columns: columns.to_vec(),
            rows,
        }
    }

    /// Add a column holding `value` in every row, replacing an existing column of
    /// the same name.
    pub fn set_constant_column(&mut self, name: &str, value: &str) {
        match self.column_index(name) {
            Some(index) => {
                for row in &mut self.rows {
                    row[index] = Some(value.to_string());
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(Some(value.to_string()));
                }
            }
        }
    }

    /// Replace every cell of `name` with `map(cell)`.
    pub fn map_column<F>(&mut self, name: &str, map: F) -> Result<()>
    where
        F: Fn(Option<&str>) -> Option<String>,
    {
        let index = self.require_column(name)?;
        for row in &mut self.rows {
            row[index] = map(row[index].as_deref());
        }
        Ok(())
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn retain_rows<F: FnMut(&[Option<String>]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|row| keep(row.as_slice()));
    }

    fn key_of(row: &[Option<String>], indices: &[usize]) -> Vec<Option<String>> {
        indices.iter().map(|&i| row[i].clone()).collect()
    }

    fn subset_indices(&self, subset: &[String]) -> Result<Vec<usize>> {
        subset.iter().map(|c| self.require_column(c)).collect()
    }

    /// Per row, whether another row shares its values over `subset`.
    pub fn duplicated(&self, subset: &[String]) -> Result<Vec<bool>> {
        let indices = self.subset_indices(subset)?;
        let mut counts: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for row in &self.rows {
            *counts.entry(Self::key_of(row, &indices)).or_default() += 1;
        }
        Ok(self
            .rows
            .iter()
            .map(|row| counts[&Self::key_of(row, &indices)] > 1)
            .collect())
    }

    /// Drop rows sharing values over `subset`, keeping the chosen occurrence.
    /// Surviving rows keep their relative order. Returns the number dropped.
    pub fn drop_duplicates(&mut self, subset: &[String], keep: Keep) -> Result<usize> {
        let indices = self.subset_indices(subset)?;
        let keys: Vec<Vec<Option<String>>> =
            self.rows.iter().map(|row| Self::key_of(row, &indices)).collect();

        let mut counts: HashMap<&Vec<Option<String>>, usize> = HashMap::new();
        for key in &keys {
            *counts.entry(key).or_default() += 1;
        }

        let mut seen: HashSet<&Vec<Option<String>>> = HashSet::new();
        let mut last_position: HashMap<&Vec<Option<String>>, usize> = HashMap::new();
        for (position, key) in keys.iter().enumerate() {
            last_position.insert(key, position);
        }

        let keep_mask: Vec<bool> = keys
            .iter()
            .enumerate()
            .map(|(position, key)| match keep {
                Keep::First => seen.insert(key),
                Keep::Last => last_position[key] == position,
                Keep::None => counts[key] == 1,
            })
            .collect();

        let before = self.rows.len();
        let mut mask = keep_mask.into_iter();
        self.rows.retain(|_| mask.next().unwrap_or(false));
        Ok(before - self.rows.len())
    }

    /// Stable sort by `columns`, missing values first.
    pub fn sort_by_columns(&mut self, columns: &[String]) -> Result<()> {
        let indices = self.subset_indices(columns)?;
        self.rows
            .sort_by(|a, b| Self::key_of(a, &indices).cmp(&Self::key_of(b, &indices)));
        Ok(())
    }

    /// The first `n` rows
    pub fn head(&self, n: usize) -> RowFrame {
        RowFrame {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Rows whose mask entry is true, in order
    pub fn filter_mask(&self, mask: &[bool]) -> RowFrame {
        RowFrame {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .zip(mask)
                .filter(|(_, &keep)| keep)
                .map(|(row, _)| row.clone())
                .collect(),
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }

    /// Plain-text table for previews
    pub fn preview(&self) -> String {
        let cell = |v: &Option<String>| v.clone().unwrap_or_else(|| "NULL".to_string());
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell(value).chars().count());
            }
        }

        let format_line = |values: Vec<String>| {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![format_line(self.columns.clone())];
        for row in &self.rows {
            lines.push(format_line(row.iter().map(cell).collect()));
        }
        lines.join("\n")
    }
}
