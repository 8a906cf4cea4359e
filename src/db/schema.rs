//! Schema introspection.
//!
//! All statements come from [`crate::db::dialect`]; this module runs them
//! through a [`Cursor`] and normalizes the backend-specific result shapes:
//!
//! | data | MySQL | PostgreSQL | SQLite |
//! |---|---|---|---|
//! | structure | `Field`/`Type` | aliased `Field`/`Type` | `name`/`type` |
//! | create table | `Create Table` | synthesized `Create Table` | `sql` |
//! | primary keys | `is_unique = 'TRUE'` | `is_unique = 'TRUE'` | `pk = 1` |

use crate::db::cursor::Cursor;
use crate::db::dialect::{SqlOperation, create_table_column, sql_for};
use crate::error::AppResult;
use crate::models::{
    Backend, ColumnStructure, QueryParam, Row, TableDescription, TableSchema, TableStructure,
    database_name,
};
use crate::output::format_as_tsv;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Rows of sample data included in prompts by default.
pub const DEFAULT_SAMPLE_ROWS: usize = 3;

/// Case-insensitive column lookup.
fn field<'a>(row: &'a Row, name: &str) -> Option<&'a JsonValue> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn text(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn first_text(row: &Row) -> Option<String> {
    text(row.values().next())
}

/// Log and swallow a failed introspection query.
fn tolerate<T: Default>(what: &str, table: &str, result: AppResult<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!(table = %table, query = what, error = %e, "Introspection query failed");
        T::default()
    })
}

/// Schema inspector working over any [`Cursor`].
pub struct SchemaInspector;

impl SchemaInspector {
    /// Names of all tables visible to the connection.
    pub async fn list_tables(cursor: &dyn Cursor) -> AppResult<Vec<String>> {
        let backend = cursor.backend()?;
        let rows = cursor.select(&sql_for(SqlOperation::ShowTables, backend)).await?;
        Ok(rows.iter().filter_map(first_text).collect())
    }

    /// Structure, row count, catalog metadata and primary keys of `table`.
    ///
    /// The four queries run concurrently; any of them failing only leaves its
    /// part of the description empty.
    pub async fn describe_table(cursor: &dyn Cursor, table: &str) -> AppResult<TableDescription> {
        let backend = cursor.backend()?;
        let database = database_name(cursor.url()).unwrap_or_default();

        let (structure, count, schema, unique) = tokio::join!(
            Self::structure(cursor, backend, table),
            Self::row_count(cursor, backend, table),
            Self::table_schema(cursor, backend, table),
            Self::primary_keys(cursor, backend, &database, table),
        );

        let description = TableDescription {
            structure: tolerate("structure", table, structure),
            row_count: tolerate("count", table, count),
            schema: tolerate("schema", table, schema),
            primary_keys: tolerate("unique columns", table, unique),
        };
        debug!(
            table = %table,
            columns = description.structure.len(),
            row_count = description.row_count,
            primary_keys = ?description.primary_keys,
            "Described table"
        );
        Ok(description)
    }

    pub async fn structure(
        cursor: &dyn Cursor,
        backend: Backend,
        table: &str,
    ) -> AppResult<TableStructure> {
        let rows = cursor
            .select(&sql_for(SqlOperation::DescribeTable { table }, backend))
            .await?;
        let columns = rows
            .iter()
            .filter_map(|row| {
                let name = text(field(row, "Field")).or_else(|| text(field(row, "name")))?;
                let data_type = text(field(row, "Type"))
                    .or_else(|| text(field(row, "type")))
                    .unwrap_or_default();
                Some(ColumnStructure::new(name, data_type))
            })
            .collect();
        Ok(TableStructure(columns))
    }

    async fn row_count(cursor: &dyn Cursor, backend: Backend, table: &str) -> AppResult<u64> {
        let rows = cursor
            .select(&sql_for(SqlOperation::CountRows { table }, backend))
            .await?;
        let count = rows
            .first()
            .and_then(|row| field(row, "count").or_else(|| row.values().next()))
            .and_then(|value| match value {
                JsonValue::Number(n) => n.as_u64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(0);
        Ok(count)
    }

    async fn table_schema(
        cursor: &dyn Cursor,
        backend: Backend,
        table: &str,
    ) -> AppResult<TableSchema> {
        let sql = sql_for(SqlOperation::TableMetadata { table }, backend);
        if sql.is_empty() {
            return Ok(TableSchema {
                table_type: Some(backend.tag().to_string()),
                ..Default::default()
            });
        }
        let rows = cursor.select(&sql).await?;
        Ok(rows
            .first()
            .map(|row| TableSchema {
                table_catalog: text(field(row, "TABLE_CATALOG")),
                table_schema: text(field(row, "TABLE_SCHEMA")),
                table_type: text(field(row, "TABLE_TYPE")),
                table_collation: text(field(row, "TABLE_COLLATION")),
            })
            .unwrap_or_default())
    }

    async fn primary_keys(
        cursor: &dyn Cursor,
        backend: Backend,
        database: &str,
        table: &str,
    ) -> AppResult<Vec<String>> {
        let rows = cursor
            .select(&sql_for(
                SqlOperation::QueryUniqueColumns { database, table },
                backend,
            ))
            .await?;
        Ok(primary_keys_from_rows(&rows, backend))
    }

    /// DDL of `table`; empty when the dialect has no statement or nothing matched.
    pub async fn query_create_table_sql(cursor: &dyn Cursor, table: &str) -> AppResult<String> {
        let backend = cursor.backend()?;
        let sql = sql_for(SqlOperation::ShowCreateTable { table }, backend);
        if sql.is_empty() {
            return Ok(String::new());
        }
        let rows = cursor.select(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| text(field(row, create_table_column(backend))))
            .unwrap_or_default())
    }

    /// Up to `limit` rows of `table` rendered as tab-separated text.
    pub async fn sample_rows(cursor: &dyn Cursor, table: &str, limit: usize) -> AppResult<String> {
        let backend = cursor.backend()?;
        let rows = cursor
            .select(&sql_for(SqlOperation::SampleRows { table, limit }, backend))
            .await?;
        Ok(format_as_tsv(&rows))
    }

    /// Schema block for a prompt: the DDL followed by a commented sample of rows.
    pub async fn table_prompt(cursor: &dyn Cursor, table: &str, limit: usize) -> AppResult<String> {
        let (create, sample) = tokio::join!(
            Self::query_create_table_sql(cursor, table),
            Self::sample_rows(cursor, table, limit),
        );
        Ok([
            create?,
            "\n/*".to_string(),
            format!("{} rows from {} table:", limit, table),
            sample?,
            "*/".to_string(),
        ]
        .join("\n"))
    }

    /// One page of `table`, bound through the dialect's placeholder syntax.
    pub async fn fetch_page(
        cursor: &dyn Cursor,
        table: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<Row>> {
        let backend = cursor.backend()?;
        let sql = format!(
            "SELECT * FROM {} LIMIT {} OFFSET {}",
            backend.quote_identifier(table),
            backend.placeholder(1),
            backend.placeholder(2)
        );
        cursor
            .select_with(
                &sql,
                &[QueryParam::Int(limit as i64), QueryParam::Int(offset as i64)],
            )
            .await
    }
}

/// Filter unique-column rows by the dialect's own flag representation.
pub fn primary_keys_from_rows(rows: &[Row], backend: Backend) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for row in rows {
        let flagged = match backend {
            Backend::Sqlite => field(row, "pk") == Some(&JsonValue::from(1)),
            Backend::MySql | Backend::Postgres => {
                field(row, "is_unique") == Some(&JsonValue::from("TRUE"))
            }
        };
        if !flagged {
            continue;
        }
        if let Some(name) = text(field(row, "COLUMN_NAME"))
            && !keys.contains(&name)
        {
            keys.push(name);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_primary_keys_respect_dialect_flags() {
        let rows = vec![
            row(json!({"COLUMN_NAME": "id", "is_unique": "TRUE"})),
            row(json!({"COLUMN_NAME": "email", "is_unique": "TRUE"})),
            row(json!({"COLUMN_NAME": "name", "is_unique": "FALSE"})),
            row(json!({"COLUMN_NAME": "id", "is_unique": "TRUE"})),
            // a generic truthy value is not the dialect's literal
            row(json!({"COLUMN_NAME": "other", "is_unique": true})),
        ];
        assert_eq!(primary_keys_from_rows(&rows, Backend::MySql), ["id", "email"]);

        let rows = vec![
            row(json!({"COLUMN_NAME": "id", "pk": 1})),
            row(json!({"COLUMN_NAME": "name", "pk": 0})),
            row(json!({"COLUMN_NAME": "flag", "pk": "1"})),
        ];
        assert_eq!(primary_keys_from_rows(&rows, Backend::Sqlite), ["id"]);
    }

    #[test]
    fn test_field_lookup_is_case_insensitive() {
        let r = row(json!({"table_catalog": "def", "Field": "id"}));
        assert_eq!(text(field(&r, "TABLE_CATALOG")).as_deref(), Some("def"));
        assert_eq!(text(field(&r, "Field")).as_deref(), Some("id"));
        assert_eq!(text(field(&r, "missing")), None);
    }
}
