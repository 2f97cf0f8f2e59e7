//! Identifier sanitization
//!
//! Table, schema and column names are interpolated directly into generated SQL,
//! so every caller-supplied name must already be in its sanitized form.

use crate::error::{Result, SubirError};
use regex::Regex;
use std::sync::OnceLock;

/// Lowercase `name` and replace every character outside `[a-z0-9_]` with `_`.
pub fn sanitize_relation_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^a-z0-9_]").expect("valid relation pattern"));
    unsafe_chars.replace_all(&name.to_lowercase(), "_").into_owned()
}

/// Like [`sanitize_relation_name`] but spaces are kept.
pub fn sanitize_column_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^a-z0-9_ ]").expect("valid column pattern"));
    unsafe_chars.replace_all(&name.to_lowercase(), "_").into_owned()
}

/// Fail with `InvalidName` unless `name` is already a sanitized relation name.
pub fn validate_relation_name(name: &str) -> Result<()> {
    if name.is_empty() || sanitize_relation_name(name) != name {
        return Err(SubirError::invalid_name(name));
    }
    Ok(())
}

/// Fail with `InvalidName` unless `name` is already a sanitized column name.
pub fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() || sanitize_column_name(name) != name {
        return Err(SubirError::invalid_name(name));
    }
    Ok(())
}
