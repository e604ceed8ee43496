//! Decoded provider responses
//!
//! The caller declares the shape of every response up front; nothing is
//! auto-detected and no fallback format is tried.

use crate::error::{MeteredError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared response shape for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// JSON document
    #[default]
    Json,
    /// Delimited text with a header row
    Tabular,
}

impl PayloadFormat {
    /// Format for a call site's `is_tabular` flag
    pub fn from_tabular(is_tabular: bool) -> Self {
        if is_tabular { Self::Tabular } else { Self::Json }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Tabular => f.write_str("tabular"),
        }
    }
}

/// Row/column data decoded from a CSV body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Header names, in file order
    pub columns: Vec<String>,
    /// Data rows; every row has `columns.len()` cells
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no data rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of a named column
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).map_or("", String::as_str))
                .collect(),
        )
    }

    /// Single cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows
            .get(row)
            .and_then(|r| r.get(idx))
            .map(String::as_str)
    }

    /// Rows as column-name maps
    pub fn records(&self) -> impl Iterator<Item = BTreeMap<&str, &str>> + '_ {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect()
        })
    }

    /// Rows as an array of JSON objects
    pub fn to_json(&self) -> serde_json::Value {
        self.records()
            .map(|record| {
                record
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                    .collect::<serde_json::Map<_, _>>()
            })
            .map(serde_json::Value::Object)
            .collect()
    }
}

/// A decoded response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Structured JSON value
    Json(serde_json::Value),
    /// Tabular rows
    Table(Table),
}

impl Payload {
    /// Decode a raw body in the declared format
    pub fn decode(raw: &str, format: PayloadFormat) -> Result<Self> {
        match format {
            PayloadFormat::Json => serde_json::from_str(raw)
                .map(Self::Json)
                .map_err(|e| MeteredError::decode(format, e)),
            PayloadFormat::Tabular => decode_table(raw).map(Self::Table),
        }
    }

    /// Shape of this payload
    pub fn format(&self) -> PayloadFormat {
        match self {
            Self::Json(_) => PayloadFormat::Json,
            Self::Table(_) => PayloadFormat::Tabular,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            Self::Json(_) => None,
        }
    }

    /// Take the JSON value, failing if the payload is tabular
    pub fn into_json(self) -> Result<serde_json::Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Table(_) => Err(MeteredError::decode(
                PayloadFormat::Json,
                "payload is tabular",
            )),
        }
    }

    /// Take the table, failing if the payload is JSON
    pub fn into_table(self) -> Result<Table> {
        match self {
            Self::Table(table) => Ok(table),
            Self::Json(_) => Err(MeteredError::decode(
                PayloadFormat::Tabular,
                "payload is json",
            )),
        }
    }
}

fn decode_table(raw: &str) -> Result<Table> {
    let format = PayloadFormat::Tabular;
    let body = raw
        .trim_start_matches('\u{feff}')
        .trim_start_matches(['\r', '\n']);

    if body.trim().is_empty() {
        return Err(MeteredError::decode(format, "empty body"));
    }
    // Providers answer CSV endpoints with a JSON note on errors
    if body.trim_start().starts_with(['{', '[']) {
        return Err(MeteredError::decode(format, "body is a JSON document"));
    }
    // The csv reader accepts a quoted field cut off by EOF
    if ends_inside_quotes(body) {
        return Err(MeteredError::decode(format, "unterminated quoted field"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(body.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| MeteredError::decode(format, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let rows = reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect::<Vec<_>>())
                .map_err(|e| MeteredError::decode(format, e))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table { columns, rows })
}

/// Whether `body` ends inside a quoted field
///
/// A quote only opens a field when it is the field's first byte; quotes
/// elsewhere in an unquoted field are literal.
fn ends_inside_quotes(body: &str) -> bool {
    let mut bytes = body.bytes().peekable();
    let mut field_start = true;
    let mut quoted = false;

    while let Some(b) = bytes.next() {
        if quoted {
            if b == b'"' {
                if bytes.peek() == Some(&b'"') {
                    bytes.next();
                } else {
                    quoted = false;
                }
            }
            continue;
        }
        match b {
            b'"' if field_start => {
                quoted = true;
                field_start = false;
            }
            b',' | b'\n' | b'\r' => field_start = true,
            _ => field_start = false,
        }
    }

    quoted
}
