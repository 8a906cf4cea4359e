//! Database layer.
//!
//! This module provides database access functionality:
//! - Connection pools and cursors, one per connection URL
//! - The connection registry with persisted connection records
//! - Dialect-specific SQL templates
//! - Schema introspection
//! - Query execution with row caps and timing
//! - Synthesis of statements from in-place table edits

pub mod changes;
pub mod cursor;
pub mod dialect;
pub mod executor;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod types;

pub use changes::{ApplyReport, PendingStatement, TableChanges};
pub use cursor::{Cursor, CursorOpener, SqlxCursor, SqlxOpener};
pub use dialect::{Comparison, SelectBuilder, SqlOperation, normalize_query_value, sql_for};
pub use executor::{CancellationToken, QueryExecutor};
pub use pool::{DbPool, PoolSettings};
pub use registry::ConnectionRegistry;
pub use schema::SchemaInspector;
