//! Session tracking for the registry stream listener.
//!
//! Each open bridge connection is a session with a bounded outbound queue
//! drained by that session's write loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use opbridge_core::messages::RegistryResponse;
use tokio::sync::mpsc;

use super::config::SessionConfig;

/// Unique identifier for a session, assigned by the [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Message queued for a session's write loop.
#[derive(Debug)]
pub enum OutboundMessage {
    Response(RegistryResponse),
    /// Ends the session; the write loop closes the socket.
    Close,
}

/// Error returned when queueing a message for a session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The queue stayed full for the whole timeout.
    Timeout,
    /// The write loop has exited.
    Disconnected,
}

/// Handle to one session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Sender end of the bounded outbound queue.
    pub tx: mpsc::Sender<OutboundMessage>,
    /// Name the client announced in `OPEN`.
    pub client: String,
    pub opened_at: Instant,
    calls: AtomicU64,
}

impl SessionHandle {
    /// Queues a message without waiting. Returns `false` if the queue is
    /// full or the session has ended.
    #[must_use]
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Queues a message, waiting up to `timeout` for room.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Timeout` if the queue stays full, or
    /// `SendError::Disconnected` if the write loop has exited.
    pub async fn send_timeout(&self, msg: OutboundMessage, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Invocations received on this session so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Thread-safe table of open sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Creates an empty table. Session ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a session, returning its handle and the queue receiver for
    /// its write loop.
    pub fn register(
        &self,
        client: impl Into<String>,
        config: &SessionConfig,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);

        let handle = Arc::new(SessionHandle {
            id,
            tx,
            client: client.into(),
            opened_at: Instant::now(),
            calls: AtomicU64::new(0),
        });

        self.sessions.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes and returns every session. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<SessionHandle>> {
        let keys: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.sessions.remove(&key) {
                handles.push(handle);
            }
        }
        handles
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use opbridge_core::Value;

    use super::*;

    fn small_channel_config() -> SessionConfig {
        SessionConfig {
            outbound_channel_capacity: 2,
            ..SessionConfig::default()
        }
    }

    fn response(call_id: u64) -> OutboundMessage {
        OutboundMessage::Response(RegistryResponse::Result {
            call_id,
            value: Value::Null,
        })
    }

    #[test]
    fn session_ids_start_at_one() {
        let registry = SessionRegistry::new();
        let config = SessionConfig::default();

        let (h1, _rx1) = registry.register("bridge-a", &config);
        let (h2, _rx2) = registry.register("bridge-b", &config);

        assert_eq!(h1.id, SessionId(1));
        assert_eq!(h2.id, SessionId(2));
        assert_eq!(h2.client, "bridge-b");
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn remove_and_get() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = registry.register("bridge", &SessionConfig::default());
        let id = handle.id;

        assert_eq!(registry.get(id).map(|h| h.id), Some(id));
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.get(id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn drain_all_empties_table() {
        let registry = SessionRegistry::new();
        let config = SessionConfig::default();
        let (_h1, _rx1) = registry.register("a", &config);
        let (_h2, _rx2) = registry.register("b", &config);

        assert_eq!(registry.sessions().len(), 2);
        assert_eq!(registry.drain_all().len(), 2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn try_send_respects_capacity() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = registry.register("bridge", &small_channel_config());

        assert!(handle.try_send(response(1)));
        assert!(handle.try_send(response(2)));
        assert!(!handle.try_send(response(3)));
    }

    #[test]
    fn dropped_receiver_disconnects() {
        let registry = SessionRegistry::new();
        let (handle, rx) = registry.register("bridge", &SessionConfig::default());
        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
        assert!(!handle.try_send(OutboundMessage::Close));
    }

    #[tokio::test]
    async fn send_timeout_outcomes() {
        let registry = SessionRegistry::new();
        let (handle, rx) = registry.register("bridge", &small_channel_config());

        assert_eq!(handle.send_timeout(response(1), Duration::from_millis(10)).await, Ok(()));
        assert_eq!(handle.send_timeout(response(2), Duration::from_millis(10)).await, Ok(()));
        assert_eq!(
            handle.send_timeout(response(3), Duration::from_millis(10)).await,
            Err(SendError::Timeout)
        );

        drop(rx);
        assert_eq!(
            handle.send_timeout(response(4), Duration::from_millis(10)).await,
            Err(SendError::Disconnected)
        );
    }

    #[test]
    fn record_call_counts() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = registry.register("bridge", &SessionConfig::default());
        handle.record_call();
        handle.record_call();
        assert_eq!(handle.calls(), 2);
    }
}
