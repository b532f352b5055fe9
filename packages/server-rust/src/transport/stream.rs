//! TCP transport to a registry stream listener.
//!
//! One socket carries any number of concurrent invocations. Each call gets a
//! call id and a pending slot; a reader task routes responses back by id and a
//! writer task drains a bounded queue onto the socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use opbridge_core::messages::{
    DiscoveryRequest, DiscoveryResponse, InvokePayload, RegistryRequest, RegistryResponse,
    RemoteFault,
};
use opbridge_core::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::TransportConfig;
use super::endpoint::EndpointUrl;
use super::frame::{self, FrameError, FrameReader, FrameWriter};
use crate::bridge::{BridgeError, ConnectionError};
use crate::traits::{Connector, RegistryConnection, RemoteCall};

type PendingCalls = DashMap<u64, oneshot::Sender<Result<Value, RemoteFault>>>;

/// Connects to the registry named by a `discovery://` or `direct://` URL.
///
/// The URL is parsed on every [`Connector::connect`], so a malformed URL
/// surfaces as a [`ConnectionError`] on first use rather than at startup.
pub struct StreamConnector {
    url: String,
    config: TransportConfig,
    next_id: AtomicU64,
}

impl StreamConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            url: url.into(),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, ConnectionError> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                // Requests are small; waiting to coalesce them only adds latency.
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(ConnectionError::Unreachable {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::TimedOut {
                address: address.to_string(),
                timeout_ms: self.config.connect_timeout_ms(),
            }),
        }
    }

    /// Asks the discovery service at `address` where `binding` lives.
    async fn lookup(&self, address: &str, binding: &str) -> Result<String, ConnectionError> {
        let lookup_error = |reason: String| ConnectionError::Lookup {
            address: address.to_string(),
            name: binding.to_string(),
            reason,
        };

        let stream = self.dial(address).await?;
        let (mut reader, mut writer) = frame::split(stream, self.config.max_frame_length);

        let request = DiscoveryRequest::Lookup {
            name: binding.to_string(),
        };
        frame::send(&mut writer, &request)
            .await
            .map_err(|e| lookup_error(e.to_string()))?;

        let reply = tokio::time::timeout(
            self.config.connect_timeout,
            frame::recv::<DiscoveryResponse>(&mut reader),
        )
        .await
        .map_err(|_| ConnectionError::TimedOut {
            address: address.to_string(),
            timeout_ms: self.config.connect_timeout_ms(),
        })?;

        match reply {
            Ok(Some(DiscoveryResponse::Bound { address: bound, .. })) => {
                debug!(binding, address = %bound, "discovery lookup resolved");
                Ok(bound)
            }
            Ok(Some(DiscoveryResponse::NotBound { .. })) => {
                Err(lookup_error("name is not bound".to_string()))
            }
            Ok(None) => Err(lookup_error("discovery service closed the connection".to_string())),
            Err(e) => Err(lookup_error(e.to_string())),
        }
    }

    /// Sends `OPEN` and waits for `OPENED`, returning the session id.
    async fn handshake(
        &self,
        address: &str,
        reader: &mut FrameReader,
        writer: &mut FrameWriter,
    ) -> Result<u64, ConnectionError> {
        let handshake_error = |reason: String| ConnectionError::Handshake {
            address: address.to_string(),
            reason,
        };

        let open = RegistryRequest::Open {
            client: self.config.client_name.clone(),
        };
        frame::send(writer, &open)
            .await
            .map_err(|e| handshake_error(e.to_string()))?;

        let reply = tokio::time::timeout(
            self.config.connect_timeout,
            frame::recv::<RegistryResponse>(reader),
        )
        .await
        .map_err(|_| ConnectionError::TimedOut {
            address: address.to_string(),
            timeout_ms: self.config.connect_timeout_ms(),
        })?;

        match reply {
            Ok(Some(RegistryResponse::Opened { session_id })) => Ok(session_id),
            Ok(Some(other)) => Err(handshake_error(format!("unexpected reply {other:?}"))),
            Ok(None) => Err(handshake_error("registry closed the connection".to_string())),
            Err(e) => Err(handshake_error(e.to_string())),
        }
    }
}

#[async_trait]
impl Connector for StreamConnector {
    async fn connect(&self) -> Result<Arc<dyn RegistryConnection>, ConnectionError> {
        let endpoint = EndpointUrl::parse(&self.url)?;
        let address = match &endpoint {
            EndpointUrl::Direct { .. } => endpoint.address(),
            EndpointUrl::Discovery { binding, .. } => {
                self.lookup(&endpoint.address(), binding).await?
            }
        };

        let stream = self.dial(&address).await?;
        let (mut reader, mut writer) = frame::split(stream, self.config.max_frame_length);
        let session_id = self.handshake(&address, &mut reader, &mut writer).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(connection = id, session_id, %address, "registry session opened");
        Ok(Arc::new(StreamConnection::spawn(
            id,
            session_id,
            reader,
            writer,
            &self.config,
        )))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// An open registry session over one TCP socket.
pub struct StreamConnection {
    id: u64,
    session_id: u64,
    open: Arc<AtomicBool>,
    next_call: AtomicU64,
    max_frame_length: usize,
    pending: Arc<PendingCalls>,
    outbound: parking_lot::Mutex<Option<mpsc::Sender<Bytes>>>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    fn spawn(
        id: u64,
        session_id: u64,
        reader: FrameReader,
        writer: FrameWriter,
        config: &TransportConfig,
    ) -> Self {
        let open = Arc::new(AtomicBool::new(true));
        let pending: Arc<PendingCalls> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);

        let writer_task = tokio::spawn(write_loop(
            id,
            writer,
            rx,
            Arc::clone(&open),
            Arc::clone(&pending),
        ));
        let reader_task = tokio::spawn(read_loop(
            id,
            reader,
            Arc::clone(&open),
            Arc::clone(&pending),
        ));

        Self {
            id,
            session_id,
            open,
            next_call: AtomicU64::new(1),
            max_frame_length: config.max_frame_length,
            pending,
            outbound: parking_lot::Mutex::new(Some(tx)),
            writer: parking_lot::Mutex::new(Some(writer_task)),
            reader: parking_lot::Mutex::new(Some(reader_task)),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn lost(&self, call_id: u64, reason: &str) -> BridgeError {
        self.pending.remove(&call_id);
        ConnectionError::Lost {
            reason: reason.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl RegistryConnection for StreamConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn invoke(&self, call: RemoteCall) -> Result<Value, BridgeError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed.into());
        }

        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let request = RegistryRequest::Invoke {
            payload: InvokePayload {
                call_id,
                resource: call.resource,
                operation: call.operation,
                arguments: call.arguments,
                signature: call.signature,
                principals: call.principals,
            },
        };
        // Rejected here, the call fails alone and the session stays up.
        let encoded = match frame::encode(&request, self.max_frame_length) {
            Ok(encoded) => encoded,
            Err(FrameError::Oversized { size, max }) => {
                return Err(BridgeError::invalid_request(format!(
                    "request of {size} bytes exceeds the {max} byte frame limit"
                )));
            }
            Err(e) => return Err(BridgeError::invalid_request(e.to_string())),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, tx);

        // The reader marks the connection closed before failing pending calls,
        // so a slot inserted after that sweep is caught here.
        if !self.is_open() {
            return Err(self.lost(call_id, "connection closed while sending"));
        }

        let sender = self.outbound.lock().clone();
        let Some(sender) = sender else {
            self.pending.remove(&call_id);
            return Err(ConnectionError::Closed.into());
        };

        if sender.send(encoded).await.is_err() {
            return Err(self.lost(call_id, "writer stopped"));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(fault.into()),
            Err(_) => Err(ConnectionError::Lost {
                reason: "connection dropped before the reply arrived".to_string(),
            }
            .into()),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let sender = self.outbound.lock().take();
        let Some(sender) = sender else {
            return Err(ConnectionError::Closed);
        };
        let was_open = self.open.swap(false, Ordering::SeqCst);

        let sent = match frame::encode(&RegistryRequest::Close, self.max_frame_length) {
            Ok(close) => sender.send(close).await.is_ok(),
            Err(_) => false,
        };
        drop(sender);

        // The writer exits once the queue is drained and every sender is gone.
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.pending.clear();

        debug!(connection = self.id, session_id = self.session_id, "registry session closed");
        match (was_open, sent) {
            (true, true) => Ok(()),
            _ => Err(ConnectionError::Lost {
                reason: "connection was already down".to_string(),
            }),
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Routes responses to their pending calls until the socket ends.
async fn read_loop(id: u64, mut reader: FrameReader, open: Arc<AtomicBool>, pending: Arc<PendingCalls>) {
    loop {
        match frame::recv::<RegistryResponse>(&mut reader).await {
            Ok(Some(RegistryResponse::Result { call_id, value })) => {
                deliver(&pending, call_id, Ok(value));
            }
            Ok(Some(RegistryResponse::Fault { call_id, fault })) => {
                deliver(&pending, call_id, Err(fault));
            }
            Ok(Some(RegistryResponse::Opened { session_id })) => {
                warn!(connection = id, session_id, "ignoring repeated OPENED");
            }
            Ok(None) => {
                debug!(connection = id, "registry closed the stream");
                break;
            }
            Err(e) => {
                warn!(connection = id, error = %e, "registry stream failed");
                break;
            }
        }
    }
    shut(&open, &pending);
}

/// Writes queued requests until the queue closes or the socket fails.
async fn write_loop(
    id: u64,
    mut writer: FrameWriter,
    mut rx: mpsc::Receiver<Bytes>,
    open: Arc<AtomicBool>,
    pending: Arc<PendingCalls>,
) {
    while let Some(encoded) = rx.recv().await {
        if let Err(e) = frame::send_encoded(&mut writer, encoded).await {
            warn!(connection = id, error = %e, "write to registry failed");
            shut(&open, &pending);
            return;
        }
    }
}

fn deliver(pending: &PendingCalls, call_id: u64, outcome: Result<Value, RemoteFault>) {
    match pending.remove(&call_id) {
        // The caller may have given up; a dropped receiver is fine.
        Some((_, tx)) => {
            let _ = tx.send(outcome);
        }
        None => warn!(call_id, "response for unknown call"),
    }
}

/// Marks the connection dead and fails every pending call.
fn shut(open: &AtomicBool, pending: &PendingCalls) {
    open.store(false, Ordering::SeqCst);
    // Dropping the senders wakes each waiter with a receive error.
    pending.clear();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
