//! Column types, type inference and value conversion

use crate::error::{Result, SubirError};
use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Values longer than this are stored as long text.
pub const LONG_TEXT_THRESHOLD: usize = 2048;

/// Values shorter than this are candidates for short text or date.
pub const SHORT_TEXT_THRESHOLD: usize = 64;

/// Sanitized column name to column type, in column order.
pub type ColumnTypeMap = IndexMap<String, ColumnType>;

/// Semantic type of a warehouse column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Decimal,
    Date,
    ShortText,
    MediumText,
    LongText,
    Boolean,
}

/// A CSV value cast to its column's declared type
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Text(String),
    Boolean(bool),
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Integer,
        ColumnType::Decimal,
        ColumnType::Date,
        ColumnType::ShortText,
        ColumnType::MediumText,
        ColumnType::LongText,
        ColumnType::Boolean,
    ];

    /// Column type string used in `CREATE TABLE`
    pub fn warehouse_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "bigint",
            ColumnType::Decimal => "double precision",
            ColumnType::Date => "date",
            ColumnType::ShortText => "character varying(256)",
            ColumnType::MediumText => "character varying(8192)",
            ColumnType::LongText => "character varying(32768)",
            ColumnType::Boolean => "boolean",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Date => "date",
            ColumnType::ShortText => "short_text",
            ColumnType::MediumText => "medium_text",
            ColumnType::LongText => "long_text",
            ColumnType::Boolean => "boolean",
        }
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            ColumnType::ShortText | ColumnType::MediumText | ColumnType::LongText
        )
    }

    /// Infer a column's type from its sampled CSV values.
    ///
    /// `None` and empty strings are missing values and do not vote. A column is
    /// integer when every present value is a plain integer literal, decimal when
    /// every present value is numeric once thousands separators are stripped, and
    /// boolean when every present value is `true`/`false`. Anything else is text,
    /// sized by the longest value, with short values that all look like dates
    /// classified as date. A column with no present values is short text.
    pub fn infer_from_sample<'a, I>(values: I) -> ColumnType
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let present: Vec<&str> = values
            .into_iter()
            .flatten()
            .filter(|v| !v.is_empty())
            .collect();

        if present.is_empty() {
            return ColumnType::ShortText;
        }
        if present.iter().all(|v| is_integer_literal(v)) {
            return ColumnType::Integer;
        }
        if present.iter().all(|v| parse_number(v).is_some()) {
            return ColumnType::Decimal;
        }
        if present.iter().all(|v| parse_bool_literal(v).is_some()) {
            return ColumnType::Boolean;
        }

        let length = present
            .iter()
            .map(|v| v.chars().count())
            .max()
            .unwrap_or(0);
        if length > LONG_TEXT_THRESHOLD {
            return ColumnType::LongText;
        }
        if length < SHORT_TEXT_THRESHOLD {
            if values_are_dates(&present) {
                return ColumnType::Date;
            }
            return ColumnType::ShortText;
        }
        ColumnType::MediumText
    }

    /// Map a warehouse-reported type description back to a column type.
    pub fn infer_from_warehouse_type(type_string: &str) -> Result<ColumnType> {
        if let Some(column_type) = Self::from_warehouse_type_exact(type_string) {
            return Ok(column_type);
        }

        let lowered = type_string.trim().to_lowercase();
        if let Some(column_type) = Self::from_warehouse_type_exact(&lowered) {
            return Ok(column_type);
        }

        let column_type = if lowered.starts_with("character varying")
            || lowered.starts_with("user-defined")
            || lowered.starts_with("varchar(")
        {
            ColumnType::LongText
        } else if lowered.starts_with("integer") {
            ColumnType::Integer
        } else if lowered.starts_with("numeric") || lowered.starts_with("decimal(") {
            ColumnType::Decimal
        } else if lowered.starts_with("timestamp") {
            ColumnType::Date
        } else {
            match lowered.as_str() {
                "varchar" | "text" | "string" => ColumnType::LongText,
                "int" | "int4" | "int8" | "int64" | "smallint" | "tinyint" | "hugeint" => {
                    ColumnType::Integer
                }
                "double" | "float" | "float8" | "real" | "decimal" => ColumnType::Decimal,
                "bool" => ColumnType::Boolean,
                _ => {
                    return Err(SubirError::UnrecognizedWarehouseType {
                        type_name: type_string.to_string(),
                    })
                }
            }
        };
        Ok(column_type)
    }

    fn from_warehouse_type_exact(type_string: &str) -> Option<ColumnType> {
        Self::ALL
            .into_iter()
            .find(|t| t.warehouse_type() == type_string)
    }

    /// Cast a raw CSV value to this column type.
    ///
    /// Missing and empty values become null for non-text types. Text keeps empty
    /// strings unless `empty_as_null` is set.
    pub fn convert(self, column: &str, raw: Option<&str>, empty_as_null: bool) -> Result<CellValue> {
        let raw = match raw {
            Some(raw) => raw,
            None => return Ok(CellValue::Null),
        };

        if self.is_text() {
            if raw.is_empty() && empty_as_null {
                return Ok(CellValue::Null);
            }
            return Ok(CellValue::Text(raw.to_string()));
        }

        if raw.trim().is_empty() {
            return Ok(CellValue::Null);
        }

        let converted = match self {
            ColumnType::Integer => parse_integer(raw).map(CellValue::Integer),
            ColumnType::Decimal => parse_number(raw).map(CellValue::Decimal),
            ColumnType::Boolean => parse_bool(raw).map(CellValue::Boolean),
            ColumnType::Date => parse_date(raw).map(CellValue::Date),
            ColumnType::ShortText | ColumnType::MediumText | ColumnType::LongText => {
                unreachable!("text handled above")
            }
        };

        converted.ok_or_else(|| SubirError::ValueConversion {
            column: column.to_string(),
            value: raw.to_string(),
            column_type: self.name().to_string(),
        })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn is_integer_literal(value: &str) -> bool {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) && trimmed.parse::<i64>().is_ok()
}

/// Parse a number, ignoring thousands separators.
pub fn parse_number(value: &str) -> Option<f64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_integer(value: &str) -> Option<i64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(n) = cleaned.parse::<i64>() {
        return Some(n);
    }
    let n = parse_number(value)?;
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

fn parse_bool_literal(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn date_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"^[0-9]{1,2}[/-][0-9]{1,2}[/-][0-9]{2,4}").expect("valid date pattern"),
            Regex::new(r"^[0-9]{2,4}[/-][0-9]{1,2}[/-][0-9]{1,2}").expect("valid date pattern"),
        ]
    })
}

/// True when every present value starts with a day/month/year or year/month/day
/// date, and there is at least one present value.
fn values_are_dates(present: &[&str]) -> bool {
    let patterns = date_patterns();
    !present.is_empty()
        && present
            .iter()
            .all(|v| patterns.iter().any(|pattern| pattern.is_match(v)))
}

/// Parse the date prefix of `value`; any time suffix after a space or `T` is ignored.
///
/// Year-first values are read as `Y-M-D`. Otherwise month-first is tried before
/// day-first. Two digit years follow the POSIX pivot (69 and below is 20xx).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let date_part = value
        .trim()
        .split(|c| c == ' ' || c == 'T')
        .next()
        .unwrap_or_default();
    let parts: Vec<&str> = date_part.split(|c| c == '/' || c == '-').collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let number = |s: &str| s.parse::<u32>().ok();
    if parts[0].len() >= 3 {
        let year = parts[0].parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, number(parts[1])?, number(parts[2])?);
    }

    let mut year = parts[2].parse::<i32>().ok()?;
    if parts[2].len() <= 2 {
        year += if year <= 68 { 2000 } else { 1900 };
    }
    let (first, second) = (number(parts[0])?, number(parts[1])?);
    NaiveDate::from_ymd_opt(year, first, second)
        .or_else(|| NaiveDate::from_ymd_opt(year, second, first))
}
