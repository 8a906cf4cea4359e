//! Application root context.
//!
//! [`AppContext`] owns the settings store, the connection registry and the
//! query executor. Everything the binary does goes through it, and tests
//! build one over a [`MemoryStore`](crate::storage::MemoryStore) with a fake
//! opener or model.

use crate::agent::{Generation, Text2Sql, Text2SqlOptions};
use crate::db::{CancellationToken, ConnectionRegistry, Cursor, CursorOpener, QueryExecutor};
use crate::error::{AppError, AppResult};
use crate::llm::{ChatModel, Credentials, ProviderKind, ResolvedProvider, open_model, resolve};
use crate::models::{Backend, Connection, ConnectionId, QueryOutcome, SavedQuery, StepTracker};
use crate::storage::{KeyValueStore, Settings, get_typed, queries_key, set_typed};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AppContext {
    store: Arc<dyn KeyValueStore>,
    registry: ConnectionRegistry,
    executor: QueryExecutor,
    options: Text2SqlOptions,
    model_override: Option<String>,
    credential_overrides: Credentials,
}

impl AppContext {
    /// Build the context and load the remembered connections.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        opener: Arc<dyn CursorOpener>,
        executor: QueryExecutor,
    ) -> AppResult<Self> {
        let registry = ConnectionRegistry::new(Arc::clone(&store), opener);
        let loaded = registry.load().await?;
        debug!(connections = loaded, "Application context ready");
        Ok(Self {
            store,
            registry,
            executor,
            options: Text2SqlOptions::default(),
            model_override: None,
            credential_overrides: Credentials::default(),
        })
    }

    pub fn with_options(mut self, options: Text2SqlOptions) -> Self {
        self.options = options;
        self
    }

    /// Model used instead of the stored selection.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_override = model.filter(|m| !m.is_empty());
        self
    }

    /// Keys taking precedence over the stored ones.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credential_overrides = credentials;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn selected_model(&self) -> AppResult<String> {
        if let Some(model) = &self.model_override {
            return Ok(model.clone());
        }
        let settings = Settings::load(self.store.as_ref()).await?;
        Ok(settings.model_or_default().to_string())
    }

    pub async fn set_model(&self, model: &str) -> AppResult<()> {
        let Some(provider) = ProviderKind::for_model(model) else {
            return Err(AppError::provider(format!("Unknown model '{}'", model)));
        };
        Settings::save_model(self.store.as_ref(), model).await?;
        info!(model = %model, provider = %provider, "Default model selected");
        Ok(())
    }

    /// Override keys first, then the stored ones.
    pub async fn credentials(&self) -> AppResult<Credentials> {
        let stored = Settings::load(self.store.as_ref()).await?.credentials;
        Ok(self.credential_overrides.clone().or(stored))
    }

    /// Store `key` for `provider`. An empty key removes the stored one.
    pub async fn set_api_key(&self, provider: ProviderKind, key: &str) -> AppResult<()> {
        let key = key.trim();
        if !key.is_empty() && !key.starts_with(provider.key_prefix()) {
            return Err(AppError::invalid_input(format!(
                "{} keys start with '{}'",
                provider,
                provider.key_prefix()
            )));
        }
        Settings::save_api_key(self.store.as_ref(), provider, key).await?;
        info!(provider = %provider, removed = key.is_empty(), "API key updated");
        Ok(())
    }

    /// Provider, endpoint and key for the selected model.
    pub async fn resolve_model(&self) -> AppResult<ResolvedProvider> {
        let model = self.selected_model().await?;
        resolve(&model, &self.credentials().await?)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub async fn connect(
        &self,
        url: &str,
        alias: Option<String>,
        tags: Vec<String>,
    ) -> AppResult<ConnectionId> {
        self.registry.connect_with(url, alias, tags).await
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.registry.list_connections().await
    }

    /// Connection record named by id, alias or URL. URLs not seen before are
    /// connected and remembered.
    pub async fn resolve_connection(&self, conn: &str) -> AppResult<Connection> {
        if let Some(connection) = self.registry.find(conn).await {
            return Ok(connection);
        }
        if Backend::from_url(conn).is_none() {
            return Err(AppError::connection_not_found(conn));
        }
        let id = self.registry.connect(conn).await?;
        self.registry
            .find(id.as_str())
            .await
            .ok_or_else(|| AppError::connection_not_found(id.as_str()))
    }

    pub async fn cursor(&self, conn: &str) -> AppResult<Arc<dyn Cursor>> {
        let connection = self.resolve_connection(conn).await?;
        self.registry.cursor_or_connect(&connection.id()).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn run_query(
        &self,
        conn: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> AppResult<QueryOutcome> {
        let cursor = self.cursor(conn).await?;
        self.executor
            .execute_cancellable(cursor.as_ref(), sql, cancel)
            .await
    }

    pub async fn saved_queries(&self, conn: &str) -> AppResult<Vec<SavedQuery>> {
        let connection = self.resolve_connection(conn).await?;
        let key = queries_key(connection.id().as_str());
        Ok(get_typed(self.store.as_ref(), &key).await?.unwrap_or_default())
    }

    /// Save `sql` under `title`, replacing the query of the same title.
    pub async fn save_query(&self, conn: &str, title: &str, sql: &str) -> AppResult<SavedQuery> {
        if title.trim().is_empty() {
            return Err(AppError::invalid_input("Query title must not be empty"));
        }
        let connection = self.resolve_connection(conn).await?;
        let key = queries_key(connection.id().as_str());
        let mut queries: Vec<SavedQuery> =
            get_typed(self.store.as_ref(), &key).await?.unwrap_or_default();

        let saved = match queries.iter_mut().find(|q| q.title == title) {
            Some(existing) => {
                existing.set_sql(sql);
                existing.clone()
            }
            None => {
                let query = SavedQuery::new(title, sql);
                queries.push(query.clone());
                query
            }
        };
        set_typed(self.store.as_ref(), &key, &queries).await?;
        debug!(connection_id = %connection.id(), title = %title, "Query saved");
        Ok(saved)
    }

    // =========================================================================
    // Text to SQL
    // =========================================================================

    /// Generator for `conn` backed by `model`, configured from this context.
    pub async fn text2sql(&self, conn: &str, model: Arc<dyn ChatModel>) -> AppResult<Text2Sql> {
        let cursor = self.cursor(conn).await?;
        Ok(Text2Sql::new(model, cursor).with_options(self.options))
    }

    /// Answer `question` with the selected model.
    pub async fn ask(
        &self,
        conn: &str,
        question: &str,
        tracker: StepTracker,
        cancel: CancellationToken,
    ) -> AppResult<Generation> {
        let model = open_model(&self.selected_model().await?, &self.credentials().await?)?;
        self.text2sql(conn, model)
            .await?
            .with_tracker(tracker)
            .with_cancellation(cancel)
            .generate(question)
            .await
    }

    pub async fn close(&self) {
        self.registry.close_all().await;
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("model_override", &self.model_override)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlxOpener;
    use crate::llm::DEFAULT_MODEL;
    use crate::storage::MemoryStore;
    use tempfile::NamedTempFile;

    async fn context() -> AppContext {
        AppContext::open(
            Arc::new(MemoryStore::new()),
            Arc::new(SqlxOpener::default()),
            QueryExecutor::new(),
        )
        .await
        .unwrap()
    }

    fn sqlite_url(file: &NamedTempFile) -> String {
        format!("sqlite:{}", file.path().display())
    }

    #[tokio::test]
    async fn test_model_selection() {
        let ctx = context().await;
        assert_eq!(ctx.selected_model().await.unwrap(), DEFAULT_MODEL);

        ctx.set_model("deepseek-chat").await.unwrap();
        assert_eq!(ctx.selected_model().await.unwrap(), "deepseek-chat");

        let err = ctx.set_model("gpt-0").await.unwrap_err();
        assert!(matches!(err, AppError::Provider { .. }));

        let ctx = ctx.with_model(Some("gemini-2.5-pro".to_string()));
        assert_eq!(ctx.selected_model().await.unwrap(), "gemini-2.5-pro");
    }

    #[tokio::test]
    async fn test_api_keys_and_overrides() {
        let ctx = context().await;
        assert!(ctx.set_api_key(ProviderKind::Google, "sk-wrong").await.is_err());
        ctx.set_api_key(ProviderKind::DeepSeek, "sk-stored").await.unwrap();

        let ctx = ctx.with_credentials(Credentials {
            deepseek: Some("sk-override".to_string()),
            ..Default::default()
        });
        ctx.set_model("deepseek-chat").await.unwrap();
        let resolved = ctx.resolve_model().await.unwrap();
        assert_eq!(resolved.kind, ProviderKind::DeepSeek);
        assert_eq!(resolved.api_key, "sk-override");
    }

    #[tokio::test]
    async fn test_missing_key_fails_resolution() {
        let ctx = context().await;
        let err = ctx.resolve_model().await.unwrap_err();
        assert!(matches!(err, AppError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_resolve_connection_by_url_then_alias() {
        let file = NamedTempFile::new().unwrap();
        let ctx = context().await;
        let url = sqlite_url(&file);

        let id = ctx.connect(&url, Some("local".to_string()), vec![]).await.unwrap();
        assert_eq!(ctx.resolve_connection("local").await.unwrap().id(), id);
        assert_eq!(ctx.resolve_connection(&url).await.unwrap().id(), id);
        assert!(matches!(
            ctx.resolve_connection("nope").await.unwrap_err(),
            AppError::ConnectionNotFound { .. }
        ));
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_saved_queries_replace_by_title() {
        let file = NamedTempFile::new().unwrap();
        let ctx = context().await;
        let url = sqlite_url(&file);

        ctx.save_query(&url, "all", "SELECT 1").await.unwrap();
        ctx.save_query(&url, "all", "SELECT 2").await.unwrap();
        ctx.save_query(&url, "other", "SELECT 3").await.unwrap();

        let saved = ctx.saved_queries(&url).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].sql(), "SELECT 2");
        assert!(ctx.save_query(&url, " ", "SELECT 4").await.is_err());
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_run_query() {
        let file = NamedTempFile::new().unwrap();
        let ctx = context().await;
        let url = sqlite_url(&file);
        let cancel = CancellationToken::new();

        ctx.run_query(&url, "CREATE TABLE t (id INTEGER PRIMARY KEY)", &cancel)
            .await
            .unwrap();
        ctx.run_query(&url, "INSERT INTO t (id) VALUES (1), (2)", &cancel)
            .await
            .unwrap();
        let outcome = ctx.run_query(&url, "SELECT id FROM t", &cancel).await.unwrap();
        assert_eq!(outcome.row_count(), 2);
        assert_eq!(outcome.sql, "SELECT id FROM t LIMIT 100");
        ctx.close().await;
    }
}
