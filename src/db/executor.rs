//! Query execution facade.
//!
//! Runs free-form SQL typed by the user (or generated by the assistant):
//! - only the last non-empty `;`-separated statement is executed
//! - read statements (`SELECT`, `DESCRIBE`, `PRAGMA`, `SHOW`) without a `LIMIT`
//!   get `LIMIT <row cap>` appended
//! - execution is timed and bounded by a timeout
//!
//! Cancellation is local only: aborting drops the pending future and clears
//! the loading flag, but the backend may still finish the statement.

use crate::db::cursor::Cursor;
use crate::error::{AppError, AppResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP, QueryOutcome, StatementKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const READ_PREFIXES: [&str; 4] = ["select", "describe", "pragma", "show"];

/// Last non-empty statement of a `;`-separated script.
pub fn last_statement(sql: &str) -> Option<&str> {
    sql.split(';').map(str::trim).rfind(|s| !s.is_empty())
}

/// Classify a single statement by its leading keyword.
pub fn classify(statement: &str) -> StatementKind {
    let head = statement.trim_start().to_lowercase();
    if READ_PREFIXES.iter().any(|p| head.starts_with(p)) {
        StatementKind::Read
    } else {
        StatementKind::Write
    }
}

/// Append `LIMIT cap` to read statements that have no LIMIT yet.
///
/// Detection is a case-insensitive substring match on `limit`, so any
/// occurrence of the word (an identifier such as `limited`, or a string
/// literal) leaves the statement uncapped.
pub fn apply_row_cap(statement: &str, cap: u32) -> String {
    let statement = statement.trim();
    if classify(statement) == StatementKind::Read
        && !statement.to_lowercase().contains("limit")
    {
        format!("{} LIMIT {}", statement, cap)
    } else {
        statement.to_string()
    }
}

/// Cooperative cancellation signal shared between a caller and running work.
///
/// Cloning shares the signal. Work checks [`is_cancelled`](Self::is_cancelled)
/// between steps or awaits [`cancelled`](Self::cancelled).
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Clears the loading flag when dropped, including on abort.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Query executor that classifies, caps, times and runs statements.
#[derive(Debug)]
pub struct QueryExecutor {
    row_cap: u32,
    timeout: Duration,
    loading: AtomicBool,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self::with_defaults(DEFAULT_QUERY_TIMEOUT_SECS as u64, DEFAULT_ROW_CAP)
    }

    pub fn with_defaults(timeout_secs: u64, row_cap: u32) -> Self {
        Self {
            row_cap: row_cap.max(1),
            timeout: Duration::from_secs(timeout_secs),
            loading: AtomicBool::new(false),
        }
    }

    pub fn row_cap(&self) -> u32 {
        self.row_cap
    }

    /// True while a statement is running.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Prepare `sql` for execution: pick the last statement and cap reads.
    pub fn prepare(&self, sql: &str) -> AppResult<(StatementKind, String)> {
        let statement =
            last_statement(sql).ok_or_else(|| AppError::invalid_input("No SQL statement to run"))?;
        Ok((classify(statement), apply_row_cap(statement, self.row_cap)))
    }

    pub async fn execute(&self, cursor: &dyn Cursor, sql: &str) -> AppResult<QueryOutcome> {
        self.execute_cancellable(cursor, sql, &CancellationToken::new())
            .await
    }

    /// Execute `sql`, giving up early when `cancel` fires.
    pub async fn execute_cancellable(
        &self,
        cursor: &dyn Cursor,
        sql: &str,
        cancel: &CancellationToken,
    ) -> AppResult<QueryOutcome> {
        let (kind, statement) = self.prepare(sql)?;
        let _loading = LoadingGuard::start(&self.loading);
        let start = Instant::now();

        debug!(
            sql = %statement,
            kind = ?kind,
            timeout_secs = self.timeout.as_secs(),
            "Executing statement"
        );

        let run = async {
            match kind {
                StatementKind::Read => {
                    let rows = cursor.select(&statement).await?;
                    Ok(QueryOutcome::read(
                        statement.clone(),
                        rows,
                        start.elapsed().as_millis() as u64,
                    ))
                }
                StatementKind::Write => {
                    let affected = cursor.execute(&statement).await?;
                    Ok(QueryOutcome::write(
                        statement.clone(),
                        affected,
                        start.elapsed().as_millis() as u64,
                    ))
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(sql = %statement, "Query aborted; the backend may still complete it");
                Err(AppError::cancelled("query execution"))
            }
            result = timeout(self.timeout, run) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(AppError::timeout("query execution", self.timeout.as_secs() as u32)),
            },
        };

        if let Ok(outcome) = &outcome {
            info!(
                kind = ?outcome.kind,
                rows = outcome.row_count(),
                rows_affected = ?outcome.rows_affected,
                execution_time_ms = outcome.execution_time_ms,
                "Statement finished"
            );
        }
        outcome
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
