//! Query-related data models.
//!
//! This module defines saved queries, bind parameters and execution results.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row cap appended to read statements without a LIMIT.
pub const DEFAULT_ROW_CAP: u32 = 100;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;

/// One result row, column order preserved.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A query saved by the user. The SQL text is stored base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub title: String,
    pub content: String,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl SavedQuery {
    pub fn new(title: impl Into<String>, sql: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            title: title.into(),
            content: encode_content(sql),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Decoded SQL text; empty when the stored content is corrupted.
    pub fn sql(&self) -> String {
        decode_content(&self.content)
    }

    pub fn set_sql(&mut self, sql: &str) {
        self.content = encode_content(sql);
        self.updated_at = Some(chrono::Utc::now().timestamp_millis());
    }
}

pub fn encode_content(sql: &str) -> String {
    STANDARD.encode(sql.as_bytes())
}

/// Never fails: invalid base64 or non UTF-8 payloads decode to `""`.
pub fn decode_content(content: &str) -> String {
    STANDARD
        .decode(content.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Whether a statement reads data or changes something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Read,
    Write,
}

/// Result of running a statement through the query facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub kind: StatementKind,
    /// The statement actually sent to the database
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub execution_time_ms: u64,
}

impl QueryOutcome {
    pub fn read(sql: String, rows: Vec<Row>, execution_time_ms: u64) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            kind: StatementKind::Read,
            sql,
            columns,
            rows,
            rows_affected: None,
            execution_time_ms,
        }
    }

    pub fn write(sql: String, rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            kind: StatementKind::Write,
            sql,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
