//! Integration tests for schema introspection and query execution on SQLite.
//!
//! Tests verify that:
//! - The registry opens one cursor per URL and persists the connection
//! - Tables, columns and primary keys are introspected
//! - Prompt blocks carry the DDL and a sample of rows
//! - Reads are capped, writes report affected rows
//! - Table edits are applied in order

use std::sync::Arc;
use tablite::db::{
    CancellationToken, ConnectionRegistry, Cursor, QueryExecutor, SchemaInspector, SqlxOpener,
    TableChanges, changes,
};
use tablite::models::{Backend, StatementKind};
use tablite::storage::{CONNECTIONS_KEY, KeyValueStore, MemoryStore};
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

/// Registry with a fresh SQLite file holding `users` and `orders`.
async fn setup_db() -> (ConnectionRegistry, Arc<dyn Cursor>, Arc<MemoryStore>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", file.path().display());
    let store = Arc::new(MemoryStore::new());
    let registry = ConnectionRegistry::new(store.clone(), Arc::new(SqlxOpener::default()));

    let id = registry.connect(&url).await.unwrap();
    let cursor = registry.get_cursor(&id).await.unwrap();

    for sql in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active BOOLEAN)",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL)",
        "INSERT INTO users (id, name, active) VALUES (1, 'ada', 1), (2, 'grace', 1), (3, 'alan', 0)",
        "INSERT INTO orders (id, user_id, total) VALUES (10, 1, 9.5), (11, 2, 20.0)",
    ] {
        cursor.execute(sql).await.unwrap();
    }

    (registry, cursor, store, file)
}

#[tokio::test]
async fn test_connect_persists_and_reuses_cursor() {
    let (registry, cursor, store, file) = setup_db().await;
    let url = format!("sqlite:{}", file.path().display());

    assert_eq!(cursor.backend().unwrap(), Backend::Sqlite);
    let again = registry.connect(&url).await.unwrap();
    assert!(Arc::ptr_eq(&cursor, &registry.get_cursor(&again).await.unwrap()));
    assert_eq!(registry.open_cursor_count().await, 1);

    let persisted = store.get(CONNECTIONS_KEY).await.unwrap().unwrap();
    assert_eq!(persisted.as_array().map(Vec::len), Some(1));
    registry.close_all().await;
}

#[tokio::test]
async fn test_list_and_describe_tables() {
    let (registry, cursor, _store, _file) = setup_db().await;

    let tables = SchemaInspector::list_tables(cursor.as_ref()).await.unwrap();
    assert_eq!(tables, ["orders", "users"]);

    let description = SchemaInspector::describe_table(cursor.as_ref(), "users")
        .await
        .unwrap();
    let columns: Vec<&str> = description.structure.column_names().collect();
    assert_eq!(columns, ["id", "name", "active"]);
    assert_eq!(description.structure.data_type_of("name"), Some("TEXT"));
    assert_eq!(description.row_count, 3);
    assert_eq!(description.primary_keys, ["id"]);
    registry.close_all().await;
}

#[tokio::test]
async fn test_table_prompt_block() {
    let (registry, cursor, _store, _file) = setup_db().await;

    let block = SchemaInspector::table_prompt(cursor.as_ref(), "users", 2)
        .await
        .unwrap();
    assert!(block.starts_with("CREATE TABLE users"));
    assert!(block.contains("/*\n2 rows from users table:"));
    assert!(block.contains("ada"));
    assert!(!block.contains("alan"));
    assert!(block.ends_with("*/"));
    registry.close_all().await;
}

#[tokio::test]
async fn test_fetch_page() {
    let (registry, cursor, _store, _file) = setup_db().await;

    let page = SchemaInspector::fetch_page(cursor.as_ref(), "users", 2, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["name"], "grace");
    registry.close_all().await;
}

#[tokio::test]
async fn test_executor_caps_reads_and_reports_writes() {
    let (registry, cursor, _store, _file) = setup_db().await;
    let executor = QueryExecutor::with_defaults(5, 2);

    let read = assert_ok!(executor.execute(cursor.as_ref(), "SELECT * FROM users").await);
    assert_eq!(read.kind, StatementKind::Read);
    assert_eq!(read.sql, "SELECT * FROM users LIMIT 2");
    assert_eq!(read.row_count(), 2);
    assert_eq!(read.columns, ["id", "name", "active"]);

    let write = assert_ok!(
        executor
            .execute(cursor.as_ref(), "UPDATE users SET active = 0 WHERE active = 1")
            .await
    );
    assert_eq!(write.kind, StatementKind::Write);
    assert_eq!(write.rows_affected, Some(2));

    // only the last statement of a batch runs
    let last = assert_ok!(
        executor
            .execute(cursor.as_ref(), "DELETE FROM users; SELECT id FROM orders")
            .await
    );
    assert_eq!(last.row_count(), 2);

    assert_err!(executor.execute(cursor.as_ref(), "SELECT * FROM missing").await);
    assert!(!executor.is_loading());
    registry.close_all().await;
}

#[tokio::test]
async fn test_aggregate_reads_return_numbers() {
    let (registry, cursor, _store, _file) = setup_db().await;
    let executor = QueryExecutor::new();

    let outcome = assert_ok!(
        executor
            .execute(
                cursor.as_ref(),
                "SELECT COUNT(*) AS count, SUM(total) AS revenue FROM orders"
            )
            .await
    );
    assert_eq!(outcome.columns, ["count", "revenue"]);
    assert_eq!(outcome.rows[0]["count"], serde_json::json!(2));
    assert_eq!(outcome.rows[0]["revenue"], serde_json::json!(29.5));

    let rows = cursor
        .select("SELECT COUNT(*) AS count FROM \"users\"")
        .await
        .unwrap();
    assert_eq!(rows[0]["count"], serde_json::json!(3));
    registry.close_all().await;
}

#[tokio::test]
async fn test_cancelled_query_returns_cancelled() {
    let (registry, cursor, _store, _file) = setup_db().await;
    let executor = QueryExecutor::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor
        .execute_cancellable(cursor.as_ref(), "SELECT * FROM users", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, tablite::AppError::Cancelled { .. }));
    registry.close_all().await;
}

#[tokio::test]
async fn test_table_changes_apply_in_order() {
    let (registry, cursor, _store, _file) = setup_db().await;
    let structure = SchemaInspector::structure(cursor.as_ref(), Backend::Sqlite, "users")
        .await
        .unwrap();
    let primary_keys = vec!["id".to_string()];
    let rows = cursor.select("SELECT * FROM users ORDER BY id").await.unwrap();

    let mut changes = TableChanges::new("users");
    let ada = TableChanges::identify(&rows[0], &primary_keys);
    changes.set_cell(ada, "name", serde_json::json!("ada lovelace"));
    let mut new_row = serde_json::Map::new();
    new_row.insert("id".to_string(), serde_json::json!(4));
    new_row.insert("name".to_string(), serde_json::json!("edsger"));
    new_row.insert("active".to_string(), serde_json::json!(true));
    changes.insert(new_row);
    changes.delete(TableChanges::identify(&rows[2], &primary_keys));

    let statements = changes.statements(Backend::Sqlite, &structure);
    assert_eq!(statements.len(), 3);
    assert!(statements[0].sql.starts_with("UPDATE"));
    assert!(statements[1].sql.starts_with("INSERT"));
    assert!(statements[2].sql.starts_with("DELETE"));

    let report = changes::apply(cursor.as_ref(), &statements).await;
    assert_eq!(report.applied, 3);
    assert!(report.failure.is_none());

    let names: Vec<String> = cursor
        .select("SELECT name FROM users ORDER BY id")
        .await
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, ["ada lovelace", "grace", "edsger"]);
    registry.close_all().await;
}
