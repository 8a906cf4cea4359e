//! Connection registry.
//!
//! Maps connection URLs to stable identifiers and to lazily opened cursors.
//! The connection list is persisted through a [`KeyValueStore`]; cursors live
//! in memory only and are reopened on demand from the persisted records.
//!
//! Concurrent `connect` calls for the same URL share one in-flight open.

use crate::db::cursor::{Cursor, CursorOpener};
use crate::error::{AppError, AppResult};
use crate::models::{Connection, ConnectionId, mask_url};
use crate::storage::{CONNECTIONS_KEY, KeyValueStore, get_typed, set_typed};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

type PendingOpen = Shared<BoxFuture<'static, AppResult<Arc<dyn Cursor>>>>;

/// Registry of known connections and their open cursors.
pub struct ConnectionRegistry {
    store: Arc<dyn KeyValueStore>,
    opener: Arc<dyn CursorOpener>,
    connections: RwLock<Vec<Connection>>,
    cursors: RwLock<HashMap<ConnectionId, Arc<dyn Cursor>>>,
    pending: Mutex<HashMap<ConnectionId, PendingOpen>>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, opener: Arc<dyn CursorOpener>) -> Self {
        Self {
            store,
            opener,
            connections: RwLock::new(Vec::new()),
            cursors: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Read the persisted connection list. Returns the number of records.
    pub async fn load(&self) -> AppResult<usize> {
        let stored: Vec<Connection> = get_typed(self.store.as_ref(), CONNECTIONS_KEY)
            .await?
            .unwrap_or_default();
        let count = stored.len();
        *self.connections.write().await = stored;
        debug!(connections = count, "Loaded connections");
        Ok(count)
    }

    /// Open (or reuse) a cursor for `url` and return its identifier.
    ///
    /// The record is persisted only after the open succeeds. Open failures
    /// propagate and are not retried.
    pub async fn connect(&self, url: &str) -> AppResult<ConnectionId> {
        let id = ConnectionId::from_url(url);
        if self.cursors.read().await.contains_key(&id) {
            debug!(connection_id = %id, "Reusing open cursor");
            return Ok(id);
        }

        let open = {
            let mut pending = self.pending.lock().await;
            // re-check under the pending lock: a finished open inserts its
            // cursor before it leaves the pending map
            if self.cursors.read().await.contains_key(&id) {
                return Ok(id);
            }
            match pending.get(&id) {
                Some(open) => {
                    debug!(connection_id = %id, "Joining in-flight connect");
                    open.clone()
                }
                None => {
                    let opener = Arc::clone(&self.opener);
                    let owned_url = url.to_string();
                    let open = async move { opener.open(&owned_url).await }
                        .boxed()
                        .shared();
                    pending.insert(id.clone(), open.clone());
                    open
                }
            }
        };

        let result = open.clone().await;
        if let Ok(cursor) = &result {
            self.cursors
                .write()
                .await
                .entry(id.clone())
                .or_insert_with(|| Arc::clone(cursor));
        }
        {
            let mut pending = self.pending.lock().await;
            if pending.get(&id).is_some_and(|p| p.ptr_eq(&open)) {
                pending.remove(&id);
            }
        }

        match result {
            Ok(_) => {
                self.find_or_create(url).await?;
                info!(connection_id = %id, url = %mask_url(url), "Connected");
                Ok(id)
            }
            Err(e) => {
                warn!(url = %mask_url(url), error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// [`connect`](Self::connect), then record an alias and tags.
    pub async fn connect_with(
        &self,
        url: &str,
        alias: Option<String>,
        tags: Vec<String>,
    ) -> AppResult<ConnectionId> {
        let id = self.connect(url).await?;
        if alias.is_none() && tags.is_empty() {
            return Ok(id);
        }

        let mut connections = self.connections.write().await;
        if let Some(record) = connections.iter_mut().find(|c| c.url == url) {
            if alias.is_some() {
                record.alias = alias;
            }
            for tag in tags {
                if !record.tags.contains(&tag) {
                    record.tags.push(tag);
                }
            }
        }
        set_typed(self.store.as_ref(), CONNECTIONS_KEY, &*connections).await?;
        Ok(id)
    }

    /// Look up a persisted connection by exact URL, appending one if absent.
    pub async fn find_or_create(&self, url: &str) -> AppResult<ConnectionId> {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.iter().find(|c| c.url == url) {
            return Ok(existing.id());
        }

        let connection = Connection::new(url);
        let id = connection.id();
        connections.push(connection);
        set_typed(self.store.as_ref(), CONNECTIONS_KEY, &*connections).await?;
        debug!(connection_id = %id, url = %mask_url(url), "Persisted new connection");
        Ok(id)
    }

    /// Cursor of an already connected id.
    pub async fn get_cursor(&self, id: &ConnectionId) -> AppResult<Arc<dyn Cursor>> {
        self.cursors
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::connection_not_found(id.as_str()))
    }

    /// Cursor of `id`, reconnecting from the persisted record when needed.
    pub async fn cursor_or_connect(&self, id: &ConnectionId) -> AppResult<Arc<dyn Cursor>> {
        if let Ok(cursor) = self.get_cursor(id).await {
            return Ok(cursor);
        }
        let connection = self
            .find(id.as_str())
            .await
            .ok_or_else(|| AppError::connection_not_found(id.as_str()))?;
        let id = self.connect(&connection.url).await?;
        self.get_cursor(&id).await
    }

    /// Find a persisted connection by id, alias or exact URL.
    pub async fn find(&self, key: &str) -> Option<Connection> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id().as_str() == key || c.alias.as_deref() == Some(key) || c.url == key)
            .cloned()
    }

    pub async fn list_connections(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }

    pub async fn open_cursor_count(&self) -> usize {
        self.cursors.read().await.len()
    }

    pub async fn close_all(&self) {
        let cursors: Vec<_> = self.cursors.write().await.drain().collect();
        for (id, cursor) in cursors {
            cursor.close().await;
            debug!(connection_id = %id, "Closed cursor");
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryParam, Row};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const URL: &str = "mysql://u:p@host:3306/db";

    struct FakeCursor {
        url: String,
    }

    #[async_trait]
    impl Cursor for FakeCursor {
        fn url(&self) -> &str {
            &self.url
        }

        async fn select_with(&self, _sql: &str, _params: &[QueryParam]) -> AppResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _sql: &str) -> AppResult<u64> {
            Ok(0)
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct CountingOpener {
        opens: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CursorOpener for CountingOpener {
        async fn open(&self, url: &str) -> AppResult<Arc<dyn Cursor>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(AppError::connection("refused", "check the host"));
            }
            Ok(Arc::new(FakeCursor {
                url: url.to_string(),
            }))
        }
    }

    fn registry(opener: Arc<CountingOpener>) -> (ConnectionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ConnectionRegistry::new(store.clone(), opener), store)
    }

    #[tokio::test]
    async fn test_connect_twice_opens_one_cursor() {
        let opener = Arc::new(CountingOpener::default());
        let (registry, _) = registry(opener.clone());

        let first = registry.connect(URL).await.unwrap();
        let second = registry.connect(URL).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, ConnectionId::from_url(URL));
        assert_eq!(registry.open_cursor_count().await, 1);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list_connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_open() {
        let opener = Arc::new(CountingOpener::default());
        let (registry, _) = registry(opener.clone());

        let (a, b, c) = tokio::join!(
            registry.connect(URL),
            registry.connect(URL),
            registry.connect(URL)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.open_cursor_count().await, 1);
        assert_eq!(registry.list_connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_propagates_and_is_not_persisted() {
        let opener = Arc::new(CountingOpener {
            fail: true,
            ..Default::default()
        });
        let (registry, store) = registry(opener.clone());

        let err = registry.connect(URL).await.unwrap_err();
        assert!(matches!(err, AppError::Connection { .. }));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(registry.list_connections().await.is_empty());
        assert!(store.get(CONNECTIONS_KEY).await.unwrap().is_none());

        // no cached failure: the next attempt opens again
        assert!(registry.connect(URL).await.is_err());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (registry, store) = registry(Arc::new(CountingOpener::default()));

        let first = registry.find_or_create(URL).await.unwrap();
        let second = registry.find_or_create(URL).await.unwrap();

        assert_eq!(first, second);
        let stored: Vec<Connection> = get_typed(store.as_ref(), CONNECTIONS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, vec![Connection::new(URL)]);
    }

    #[tokio::test]
    async fn test_cursor_is_rebuilt_from_persisted_connections() {
        let opener = Arc::new(CountingOpener::default());
        let store = Arc::new(MemoryStore::new());
        set_typed(store.as_ref(), CONNECTIONS_KEY, &vec![Connection::new(URL)])
            .await
            .unwrap();

        let registry = ConnectionRegistry::new(store, opener.clone());
        assert_eq!(registry.load().await.unwrap(), 1);

        let id = ConnectionId::from_url(URL);
        assert!(registry.get_cursor(&id).await.is_err());

        let cursor = registry.cursor_or_connect(&id).await.unwrap();
        assert_eq!(cursor.url(), URL);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list_connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_with_alias_and_lookup() {
        let (registry, _) = registry(Arc::new(CountingOpener::default()));

        let id = registry
            .connect_with(URL, Some("prod".to_string()), vec!["mysql".to_string()])
            .await
            .unwrap();

        let by_alias = registry.find("prod").await.unwrap();
        assert_eq!(by_alias.id(), id);
        assert_eq!(by_alias.tags, ["mysql"]);
        assert!(registry.find(id.as_str()).await.is_some());
        assert!(registry.find("missing").await.is_none());

        registry.close_all().await;
        assert_eq!(registry.open_cursor_count().await, 0);
    }
}
