//! In-place table edits turned into SQL.
//!
//! Values are rendered with [`normalize_query_value`], which quotes but does
//! not escape. Edits are trusted to come from the user operating the local
//! database.

use crate::db::cursor::Cursor;
use crate::db::dialect::normalize_query_value;
use crate::error::AppError;
use crate::models::{Backend, Row, TableStructure};
use crate::output::format_value;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

/// One synthesized statement. Disabled statements are skipped by [`apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingStatement {
    pub sql: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct RowUpdate {
    key: Row,
    values: Row,
}

/// Pending cell updates, inserted rows and deleted rows of one table.
#[derive(Debug, Clone, Default)]
pub struct TableChanges {
    table: String,
    updates: Vec<RowUpdate>,
    inserts: Vec<Row>,
    deletes: Vec<Row>,
}

impl TableChanges {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns identifying `row`: its primary keys, or every column when
    /// the table has none.
    pub fn identify(row: &Row, primary_keys: &[String]) -> Row {
        if primary_keys.is_empty() {
            return row.clone();
        }
        primary_keys
            .iter()
            .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(JsonValue::Null)))
            .collect()
    }

    /// Record a new value for `column` of the row identified by `key`.
    pub fn set_cell(&mut self, key: Row, column: impl Into<String>, value: JsonValue) {
        match self.updates.iter_mut().find(|u| u.key == key) {
            Some(update) => {
                update.values.insert(column.into(), value);
            }
            None => {
                let mut values = Row::new();
                values.insert(column.into(), value);
                self.updates.push(RowUpdate { key, values });
            }
        }
    }

    pub fn insert(&mut self, row: Row) {
        self.inserts.push(row);
    }

    pub fn delete(&mut self, key: Row) {
        if !self.deletes.contains(&key) {
            self.deletes.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Drop every pending change.
    pub fn discard(&mut self) {
        self.updates.clear();
        self.inserts.clear();
        self.deletes.clear();
    }

    /// UPDATEs, then INSERTs, then DELETEs, all enabled.
    pub fn statements(&self, backend: Backend, structure: &TableStructure) -> Vec<PendingStatement> {
        let table = backend.quote_identifier(&self.table);
        let literal = |column: &str, value: &JsonValue| render_value(value, structure.data_type_of(column));

        let updates = self.updates.iter().filter(|u| !u.values.is_empty()).map(|u| {
            let setter = u
                .values
                .iter()
                .map(|(k, v)| format!("{} = {}", backend.quote_identifier(k), literal(k, v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                setter,
                where_clause(&u.key, backend, structure)
            )
        });

        let inserts = self.inserts.iter().filter(|r| !r.is_empty()).map(|row| {
            let columns = row
                .keys()
                .map(|k| backend.quote_identifier(k))
                .collect::<Vec<_>>()
                .join(", ");
            let values = row
                .iter()
                .map(|(k, v)| literal(k, v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {} ({}) VALUES ({})", table, columns, values)
        });

        let deletes = self.deletes.iter().filter(|k| !k.is_empty()).map(|key| {
            format!(
                "DELETE FROM {} WHERE {}",
                table,
                where_clause(key, backend, structure)
            )
        });

        updates
            .chain(inserts)
            .chain(deletes)
            .map(|sql| PendingStatement { sql, enabled: true })
            .collect()
    }
}

fn render_value(value: &JsonValue, data_type: Option<&str>) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        other => normalize_query_value(format_value(other), data_type),
    }
}

fn where_clause(key: &Row, backend: Backend, structure: &TableStructure) -> String {
    key.iter()
        .map(|(k, v)| {
            let column = backend.quote_identifier(k);
            match v {
                JsonValue::Null => format!("{} IS NULL", column),
                other => format!(
                    "{} = {}",
                    column,
                    render_value(other, structure.data_type_of(k))
                ),
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Result of [`apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub applied: usize,
    pub failure: Option<AppError>,
}

/// Run the enabled statements in order, stopping at the first failure.
pub async fn apply(cursor: &dyn Cursor, statements: &[PendingStatement]) -> ApplyReport {
    let mut applied = 0;
    for statement in statements.iter().filter(|s| s.enabled) {
        if let Err(e) = cursor.execute(&statement.sql).await {
            warn!(sql = %statement.sql, error = %e, applied, "Applying changes stopped");
            return ApplyReport {
                applied,
                failure: Some(e),
            };
        }
        applied += 1;
    }
    info!(applied, "Applied table changes");
    ApplyReport {
        applied,
        failure: None,
    }
}
