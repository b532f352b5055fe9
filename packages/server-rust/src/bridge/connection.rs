//! Lazily established, cached registry connection.
//!
//! One [`ConnectionManager`] owns at most one live connection. The cache slot
//! sits behind an async mutex held across check-and-create, so concurrent
//! first callers wait for the in-flight connect and share its result instead
//! of racing to open duplicates. `close` and `invalidate` take the same lock.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::error::ConnectionError;
use crate::traits::{Connector, RegistryConnection};

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    cached: Mutex<Option<Arc<dyn RegistryConnection>>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached connection, establishing one if none is cached.
    ///
    /// A cached connection the transport reports as closed is discarded and
    /// replaced. The only wait imposed is the transport's own connect timeout
    /// (plus queueing behind an in-flight connect).
    ///
    /// # Errors
    ///
    /// Returns the connector's [`ConnectionError`]; the cache stays empty so
    /// the next call tries again.
    pub async fn get_connection(&self) -> Result<Arc<dyn RegistryConnection>, ConnectionError> {
        let mut slot = self.cached.lock().await;

        if let Some(conn) = slot.as_ref() {
            if conn.is_open() {
                return Ok(Arc::clone(conn));
            }
            warn!(connection_id = conn.id(), "cached registry connection went away, reconnecting");
            *slot = None;
        }

        info!(endpoint = self.connector.endpoint(), "creating new registry connection");
        match self.connector.connect().await {
            Ok(conn) => {
                debug!(connection_id = conn.id(), "registry connection established");
                *slot = Some(Arc::clone(&conn));
                Ok(conn)
            }
            Err(e) => {
                error!(endpoint = self.connector.endpoint(), error = %e, "failed to create registry connection");
                Err(e)
            }
        }
    }

    /// Closes and forgets the cached connection, if any.
    ///
    /// Teardown errors are logged and swallowed.
    pub async fn close(&self) {
        let taken = self.cached.lock().await.take();
        if let Some(conn) = taken {
            Self::teardown(conn.as_ref()).await;
        }
    }

    /// Drops `conn` from the cache if it is still the cached connection.
    ///
    /// Called after a connection-class failure. A different connection cached
    /// in the meantime is left alone.
    pub async fn invalidate(&self, conn: &Arc<dyn RegistryConnection>) {
        let stale = {
            let mut slot = self.cached.lock().await;
            let is_current = slot
                .as_ref()
                .is_some_and(|cached| Arc::ptr_eq(cached, conn));
            if is_current {
                slot.take()
            } else {
                None
            }
        };
        // Torn down outside the lock so a slow close never stalls new callers.
        if let Some(stale) = stale {
            warn!(connection_id = stale.id(), "invalidating failed registry connection");
            Self::teardown(stale.as_ref()).await;
        }
    }

    /// Whether a live connection is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.cached
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.is_open())
    }

    async fn teardown(conn: &dyn RegistryConnection) {
        match conn.close().await {
            Ok(()) => info!(connection_id = conn.id(), "closed registry connection"),
            Err(e) => error!(connection_id = conn.id(), error = %e, "error closing registry connection"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use opbridge_core::Value;

    use super::*;
    use crate::bridge::BridgeError;
    use crate::traits::RemoteCall;

    /// Connection that records calls and answers with a fixed value.
    pub(crate) struct FakeConnection {
        pub id: u64,
        pub open: AtomicBool,
        pub close_fails: bool,
        pub close_delay: Duration,
        pub closes: AtomicUsize,
        pub calls: parking_lot::Mutex<Vec<RemoteCall>>,
        pub reply: parking_lot::Mutex<Result<Value, BridgeError>>,
    }

    impl FakeConnection {
        pub(crate) fn new(id: u64) -> Self {
            Self {
                id,
                open: AtomicBool::new(true),
                close_fails: false,
                close_delay: Duration::ZERO,
                closes: AtomicUsize::new(0),
                calls: parking_lot::Mutex::new(Vec::new()),
                reply: parking_lot::Mutex::new(Ok(Value::Null)),
            }
        }
    }

    #[async_trait]
    impl RegistryConnection for FakeConnection {
        fn id(&self) -> u64 {
            self.id
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn invoke(&self, call: RemoteCall) -> Result<Value, BridgeError> {
            self.calls.lock().push(call);
            self.reply.lock().clone()
        }

        async fn close(&self) -> Result<(), ConnectionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
            if !self.close_delay.is_zero() {
                tokio::time::sleep(self.close_delay).await;
            }
            if self.close_fails {
                Err(ConnectionError::Lost {
                    reason: "socket already reset".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Connector that hands out numbered fake connections, optionally slowly
    /// or failing the first N attempts.
    pub(crate) struct FakeConnector {
        pub connects: AtomicU64,
        pub delay: Duration,
        pub fail_first: AtomicUsize,
        pub close_fails: bool,
        pub close_delay: Duration,
        pub made: parking_lot::Mutex<Vec<Arc<FakeConnection>>>,
    }

    impl FakeConnector {
        pub(crate) fn new() -> Self {
            Self {
                connects: AtomicU64::new(0),
                delay: Duration::ZERO,
                fail_first: AtomicUsize::new(0),
                close_fails: false,
                close_delay: Duration::ZERO,
                made: parking_lot::Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn last(&self) -> Arc<FakeConnection> {
            Arc::clone(self.made.lock().last().expect("a connection was made"))
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn RegistryConnection>, ConnectionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(ConnectionError::Unreachable {
                    address: "fake:1".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            let mut conn = FakeConnection::new(id);
            conn.close_fails = self.close_fails;
            conn.close_delay = self.close_delay;
            let conn = Arc::new(conn);
            self.made.lock().push(Arc::clone(&conn));
            Ok(conn)
        }

        fn endpoint(&self) -> &str {
            "fake://registry"
        }
    }

    #[tokio::test]
    async fn second_get_returns_cached_connection() {
        let connector = Arc::new(FakeConnector::new());
        let manager = ConnectionManager::new(connector.clone());

        let a = manager.get_connection().await.unwrap();
        let b = manager.get_connection().await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_then_get_establishes_new_connection() {
        let connector = Arc::new(FakeConnector::new());
        let manager = ConnectionManager::new(connector.clone());

        let first = manager.get_connection().await.unwrap();
        manager.close().await;
        assert!(!first.is_open());
        assert!(!manager.is_connected().await);

        let second = manager.get_connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.id(), 2);
    }

    #[tokio::test]
    async fn close_without_connection_is_noop() {
        let connector = Arc::new(FakeConnector::new());
        let manager = ConnectionManager::new(connector.clone());
        manager.close().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_swallows_teardown_error() {
        let mut connector = FakeConnector::new();
        connector.close_fails = true;
        let connector = Arc::new(connector);
        let manager = ConnectionManager::new(connector.clone());

        manager.get_connection().await.unwrap();
        manager.close().await;

        assert_eq!(connector.last().closes.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected().await);
        // Next use reconnects normally.
        assert_eq!(manager.get_connection().await.unwrap().id(), 2);
    }

    #[tokio::test]
    async fn failed_connect_leaves_cache_empty_and_retries() {
        let connector = Arc::new(FakeConnector::new());
        connector.fail_first.store(1, Ordering::SeqCst);
        let manager = ConnectionManager::new(connector.clone());

        let err = manager.get_connection().await.err().expect("first attempt fails");
        assert!(matches!(err, ConnectionError::Unreachable { .. }));
        assert!(!manager.is_connected().await);

        let conn = manager.get_connection().await.unwrap();
        assert_eq!(conn.id(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_use_connects_once() {
        let mut connector = FakeConnector::new();
        connector.delay = Duration::from_millis(50);
        let connector = Arc::new(connector);
        let manager = Arc::new(ConnectionManager::new(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.get_connection().await }));
        }

        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    }

    #[tokio::test]
    async fn closed_cached_connection_is_replaced() {
        let connector = Arc::new(FakeConnector::new());
        let manager = ConnectionManager::new(connector.clone());

        let first = manager.get_connection().await.unwrap();
        connector.last().open.store(false, Ordering::SeqCst);

        let second = manager.get_connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_only_drops_matching_connection() {
        let connector = Arc::new(FakeConnector::new());
        let manager = ConnectionManager::new(connector.clone());

        let first = manager.get_connection().await.unwrap();
        manager.invalidate(&first).await;
        assert!(!manager.is_connected().await);

        let second = manager.get_connection().await.unwrap();
        // A stale handle must not evict the newer connection.
        manager.invalidate(&first).await;
        let still = manager.get_connection().await.unwrap();
        assert!(Arc::ptr_eq(&second, &still));
    }

    #[tokio::test]
    async fn slow_teardown_does_not_block_reconnect() {
        let mut connector = FakeConnector::new();
        connector.close_delay = Duration::from_secs(5);
        let connector = Arc::new(connector);
        let manager = Arc::new(ConnectionManager::new(connector.clone()));

        let failed = manager.get_connection().await.unwrap();
        let invalidating = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.invalidate(&failed).await })
        };
        // Let the invalidation take the connection and start closing it.
        while connector.last().closes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fresh = tokio::time::timeout(Duration::from_millis(500), manager.get_connection())
            .await
            .expect("reconnect is not held up by the closing connection")
            .unwrap();
        assert_eq!(fresh.id(), 2);
        invalidating.abort();
    }
}
