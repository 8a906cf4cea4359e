//! Database cursors.
//!
//! A [`Cursor`] is an open handle to one connection URL. The registry only
//! talks to the [`CursorOpener`] and [`Cursor`] traits; [`SqlxCursor`] is the
//! production implementation backed by a sqlx pool.

use crate::db::pool::{DbPool, PoolSettings};
use crate::db::types::RowToJson;
use crate::error::{AppError, AppResult};
use crate::models::{Backend, QueryParam, Row};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait Cursor: Send + Sync {
    /// The URL this cursor was opened with. Its scheme selects the dialect.
    fn url(&self) -> &str;

    async fn select_with(&self, sql: &str, params: &[QueryParam]) -> AppResult<Vec<Row>>;

    /// Run a statement that returns no rows; yields the affected row count.
    async fn execute(&self, sql: &str) -> AppResult<u64>;

    async fn close(&self);

    fn backend(&self) -> AppResult<Backend> {
        Backend::from_url(self.url()).ok_or_else(|| AppError::unsupported_backend(self.url()))
    }

    async fn select(&self, sql: &str) -> AppResult<Vec<Row>> {
        self.select_with(sql, &[]).await
    }
}

/// Opens cursors for URLs.
#[async_trait]
pub trait CursorOpener: Send + Sync {
    async fn open(&self, url: &str) -> AppResult<Arc<dyn Cursor>>;
}

macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
            };
        }
        query
    }};
}

macro_rules! fetch_json_rows {
    ($pool:expr, $sql:expr, $params:expr) => {{
        // unprepared path for statements like SHOW/PRAGMA
        let rows = if $params.is_empty() {
            sqlx::Executor::fetch_all($pool, $sql).await?
        } else {
            bind_params!(sqlx::query($sql), $params)
                .fetch_all($pool)
                .await?
        };
        rows.iter().map(RowToJson::to_json_map).collect::<Vec<Row>>()
    }};
}

/// Cursor backed by a sqlx pool.
#[derive(Debug)]
pub struct SqlxCursor {
    url: String,
    pool: DbPool,
}

impl SqlxCursor {
    pub async fn open(url: &str, settings: &PoolSettings) -> AppResult<Self> {
        let pool = DbPool::open(url, settings).await?;
        Ok(Self {
            url: url.to_string(),
            pool,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Cursor for SqlxCursor {
    fn url(&self) -> &str {
        &self.url
    }

    fn backend(&self) -> AppResult<Backend> {
        Ok(self.pool.backend())
    }

    async fn select_with(&self, sql: &str, params: &[QueryParam]) -> AppResult<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "Selecting");
        let rows = match &self.pool {
            DbPool::MySql(p) => fetch_json_rows!(p, sql, params),
            DbPool::Postgres(p) => fetch_json_rows!(p, sql, params),
            DbPool::Sqlite(p) => fetch_json_rows!(p, sql, params),
        };
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> AppResult<u64> {
        debug!(sql = %sql, "Executing");
        let rows_affected = match &self.pool {
            DbPool::MySql(p) => sqlx::Executor::execute(p, sql).await?.rows_affected(),
            DbPool::Postgres(p) => sqlx::Executor::execute(p, sql).await?.rows_affected(),
            DbPool::Sqlite(p) => sqlx::Executor::execute(p, sql).await?.rows_affected(),
        };
        Ok(rows_affected)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens [`SqlxCursor`]s with shared pool settings.
#[derive(Debug, Clone, Default)]
pub struct SqlxOpener {
    settings: PoolSettings,
}

impl SqlxOpener {
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CursorOpener for SqlxOpener {
    async fn open(&self, url: &str) -> AppResult<Arc<dyn Cursor>> {
        let cursor = SqlxCursor::open(url, &self.settings).await?;
        Ok(Arc::new(cursor))
    }
}
