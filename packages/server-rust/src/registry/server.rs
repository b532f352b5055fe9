//! Registry stream listener with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts sessions until the shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use opbridge_core::messages::{
    InvokePayload, RegistryRequest, RegistryResponse, RemoteException, RemoteFault,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::RegistryServerConfig;
use super::registry::ResourceRegistry;
use super::resource::InvocationContext;
use super::session::{OutboundMessage, SessionHandle, SessionRegistry};
use crate::network::ShutdownController;
use crate::transport::frame::{self, FrameError, FrameReader, FrameWriter};

/// Serves a [`ResourceRegistry`] to bridges over TCP.
pub struct RegistryServer {
    config: RegistryServerConfig,
    listener: Option<TcpListener>,
    registry: Arc<ResourceRegistry>,
    sessions: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownController>,
}

impl RegistryServer {
    #[must_use]
    pub fn new(config: RegistryServerConfig, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            config,
            listener: None,
            registry,
            sessions: Arc::new(SessionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ResourceRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listener, returning the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("registry listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts sessions until `shutdown` resolves, then closes every session
    /// and waits for in-flight invocations to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let config = Arc::new(self.config);
        let registry = self.registry;
        let sessions = self.sessions;
        let shutdown_ctrl = self.shutdown;

        shutdown_ctrl.set_ready();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(handle_session(
                            stream,
                            peer,
                            Arc::clone(&config),
                            Arc::clone(&registry),
                            Arc::clone(&sessions),
                            Arc::clone(&shutdown_ctrl),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        drain_sessions(&sessions, &shutdown_ctrl, &config).await;
        Ok(())
    }
}

async fn drain_sessions(
    sessions: &SessionRegistry,
    shutdown_ctrl: &ShutdownController,
    config: &RegistryServerConfig,
) {
    shutdown_ctrl.begin_drain();

    let handles = sessions.drain_all();
    if !handles.is_empty() {
        info!("closing {} registry sessions", handles.len());
        for handle in &handles {
            let _ = handle.try_send(OutboundMessage::Close);
        }
    }

    if shutdown_ctrl.wait_for_drain(config.drain_timeout).await {
        info!("registry drained");
    } else {
        warn!("drain timeout expired with invocations still running");
    }
}

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<RegistryServerConfig>,
    registry: Arc<ResourceRegistry>,
    sessions: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownController>,
) {
    let (mut reader, mut writer) = frame::split(stream, config.max_frame_length);

    let client = match frame::recv::<RegistryRequest>(&mut reader).await {
        Ok(Some(RegistryRequest::Open { client })) => client,
        Ok(Some(other)) => {
            warn!(%peer, "expected OPEN, got {other:?}");
            return;
        }
        Ok(None) => return,
        Err(e) => {
            warn!(%peer, error = %e, "handshake failed");
            return;
        }
    };

    let (handle, rx) = sessions.register(client, &config.session);
    let session_id = handle.id.0;
    let span = info_span!("session", session_id, client = %handle.client, %peer);

    async move {
        if let Err(e) = frame::send(&mut writer, &RegistryResponse::Opened { session_id }).await {
            warn!(error = %e, "cannot confirm session");
            sessions.remove(handle.id);
            return;
        }
        info!("session opened");

        tokio::spawn(write_loop(writer, rx, config.max_frame_length).in_current_span());
        read_loop(&mut reader, &handle, &config, &registry, &shutdown).await;

        sessions.remove(handle.id);
        info!(calls = handle.calls(), "session ended");
    }
    .instrument(span)
    .await;
}

/// Reads requests until the client sends `CLOSE` or the stream ends.
async fn read_loop(
    reader: &mut FrameReader,
    handle: &Arc<SessionHandle>,
    config: &Arc<RegistryServerConfig>,
    registry: &Arc<ResourceRegistry>,
    shutdown: &Arc<ShutdownController>,
) {
    loop {
        match frame::recv::<RegistryRequest>(reader).await {
            Ok(Some(RegistryRequest::Invoke { payload })) => {
                handle.record_call();
                let guard = shutdown.in_flight_guard();
                let handle = Arc::clone(handle);
                let registry = Arc::clone(registry);
                let send_timeout = config.session.send_timeout;
                tokio::spawn(
                    async move {
                        let response = dispatch(&registry, handle.id.0, payload).await;
                        if let Err(e) = handle
                            .send_timeout(OutboundMessage::Response(response), send_timeout)
                            .await
                        {
                            warn!(?e, "dropping response");
                        }
                        drop(guard);
                    }
                    .in_current_span(),
                );
            }
            Ok(Some(RegistryRequest::Close)) => {
                debug!("client closed session");
                break;
            }
            Ok(Some(RegistryRequest::Open { .. })) => {
                warn!("ignoring repeated OPEN");
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "session stream failed");
                break;
            }
        }
    }
}

async fn dispatch(registry: &ResourceRegistry, session_id: u64, payload: InvokePayload) -> RegistryResponse {
    let InvokePayload {
        call_id,
        resource,
        operation,
        arguments,
        signature,
        principals,
    } = payload;
    debug!(call_id, %resource, %operation, "invoke");

    let ctx = InvocationContext {
        session_id: Some(session_id),
        principals,
    };
    match registry
        .invoke(&resource, &operation, arguments, &signature, &ctx)
        .await
    {
        Ok(value) => RegistryResponse::Result { call_id, value },
        Err(fault) => {
            debug!(call_id, ?fault, "invocation faulted");
            RegistryResponse::Fault { call_id, fault }
        }
    }
}

/// Writes queued responses until the queue closes or a `Close` arrives.
async fn write_loop(
    mut writer: FrameWriter,
    mut rx: mpsc::Receiver<OutboundMessage>,
    max_frame_length: usize,
) {
    while let Some(msg) = rx.recv().await {
        let OutboundMessage::Response(response) = msg else {
            return;
        };
        let encoded = match encode_response(&response, max_frame_length) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(call_id = ?response.call_id(), error = %e, "dropping unencodable response");
                continue;
            }
        };
        if let Err(e) = frame::send_encoded(&mut writer, encoded).await {
            error!(error = %e, "write to session failed");
            return;
        }
    }
}

/// Encodes `response`, replacing one that does not fit in a frame with a
/// fault for the same call.
fn encode_response(response: &RegistryResponse, max_frame_length: usize) -> Result<Bytes, FrameError> {
    match frame::encode(response, max_frame_length) {
        Err(e @ FrameError::Oversized { .. }) => {
            let Some(call_id) = response.call_id() else {
                return Err(e);
            };
            warn!(call_id, error = %e, "response too large, sending fault");
            let fault = RegistryResponse::Fault {
                call_id,
                fault: RemoteFault::Application {
                    message: "response could not be delivered".to_string(),
                    cause: Some(RemoteException::new("ResponseTooLarge", e.to_string()).fatal()),
                },
            };
            frame::encode(&fault, max_frame_length)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use opbridge_core::messages::RegistryFault;
    use opbridge_core::{ResourceName, Value, ValueType};

    use super::*;
    use crate::registry::resource::{ManagedResource, OperationInfo};
    use crate::registry::echo::{demo_registry, TEST_RESOURCE_NAME};

    fn test_config() -> RegistryServerConfig {
        RegistryServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..RegistryServerConfig::default()
        }
    }

    async fn open(port: u16) -> (FrameReader, FrameWriter, u64) {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut reader, mut writer) = frame::split(stream, 1024 * 1024);
        frame::send(&mut writer, &RegistryRequest::Open { client: "test".to_string() })
            .await
            .unwrap();
        match frame::recv::<RegistryResponse>(&mut reader).await.unwrap() {
            Some(RegistryResponse::Opened { session_id }) => (reader, writer, session_id),
            other => panic!("expected OPENED, got {other:?}"),
        }
    }

    fn invoke(call_id: u64, operation: &str, arguments: Vec<Value>, signature: &[&str]) -> RegistryRequest {
        RegistryRequest::Invoke {
            payload: InvokePayload {
                call_id,
                resource: ResourceName::parse(TEST_RESOURCE_NAME).unwrap(),
                operation: operation.to_string(),
                arguments,
                signature: signature.iter().map(ToString::to_string).collect(),
                principals: None,
            },
        }
    }

    #[test]
    fn new_creates_server_without_binding() {
        let server = RegistryServer::new(test_config(), Arc::new(demo_registry()));
        assert!(server.listener.is_none());
        assert_eq!(server.sessions().count(), 0);
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let server = RegistryServer::new(test_config(), Arc::new(demo_registry()));
        let result = server.serve(std::future::pending::<()>()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let mut server = RegistryServer::new(test_config(), Arc::new(demo_registry()));
        let port = server.start().await.unwrap();
        let sessions = server.sessions();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let served = tokio::spawn(server.serve(async move {
            let _ = stop_rx.await;
        }));

        let (mut reader, mut writer, session_id) = open(port).await;
        assert_eq!(session_id, 1);
        assert_eq!(sessions.count(), 1);

        frame::send(&mut writer, &invoke(1, "testStringArgument", vec![Value::from("a")], &["string"]))
            .await
            .unwrap();
        frame::send(&mut writer, &invoke(2, "missing", vec![], &[])).await.unwrap();

        let mut replies = Vec::new();
        for _ in 0..2 {
            replies.push(frame::recv::<RegistryResponse>(&mut reader).await.unwrap().unwrap());
        }
        replies.sort_by_key(|r| r.call_id());
        assert_eq!(
            replies[0],
            RegistryResponse::Result {
                call_id: 1,
                value: Value::from("Echo: a"),
            }
        );
        assert!(matches!(
            &replies[1],
            RegistryResponse::Fault { call_id: 2, fault }
                if matches!(fault, opbridge_core::messages::RemoteFault::Registry {
                    fault: RegistryFault::OperationNotFound { .. }
                })
        ));

        frame::send(&mut writer, &RegistryRequest::Close).await.unwrap();
        let ended = frame::recv::<RegistryResponse>(&mut reader).await.unwrap();
        assert!(ended.is_none());

        stop_tx.send(()).unwrap();
        served.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_open_sessions() {
        let mut server = RegistryServer::new(test_config(), Arc::new(demo_registry()));
        let port = server.start().await.unwrap();
        let ctrl = server.shutdown_controller();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let served = tokio::spawn(server.serve(async move {
            let _ = stop_rx.await;
        }));

        let (mut reader, _writer, _) = open(port).await;
        stop_tx.send(()).unwrap();
        served.await.unwrap().unwrap();

        assert_eq!(ctrl.health_state(), crate::network::HealthState::Stopped);
        let ended = frame::recv::<RegistryResponse>(&mut reader).await.unwrap();
        assert!(ended.is_none());
    }

    #[tokio::test]
    async fn first_message_must_be_open() {
        let mut server = RegistryServer::new(test_config(), Arc::new(demo_registry()));
        let port = server.start().await.unwrap();
        let sessions = server.sessions();
        tokio::spawn(server.serve(std::future::pending::<()>()));

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut reader, mut writer) = frame::split(stream, 1024);
        frame::send(&mut writer, &RegistryRequest::Close).await.unwrap();

        let reply = frame::recv::<RegistryResponse>(&mut reader).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(sessions.count(), 0);
    }

    /// Returns a payload far larger than the test frame limit.
    struct Bulky;

    #[async_trait::async_trait]
    impl ManagedResource for Bulky {
        fn operations(&self) -> Vec<OperationInfo> {
            vec![
                OperationInfo::new("bulk", vec![], ValueType::String),
                OperationInfo::new("small", vec![], ValueType::String),
            ]
        }

        async fn invoke(
            &self,
            operation: &OperationInfo,
            _arguments: Vec<Value>,
            _ctx: &InvocationContext,
        ) -> Result<Value, RemoteException> {
            match operation.name {
                "bulk" => Ok(Value::String("x".repeat(4096))),
                _ => Ok(Value::from("ok")),
            }
        }
    }

    #[tokio::test]
    async fn oversized_response_faults_only_its_call() {
        let registry = ResourceRegistry::new();
        let name = ResourceName::parse("opbridge.demo:type=Bulky").unwrap();
        registry.register(name.clone(), Bulky).unwrap();

        let mut server = RegistryServer::new(
            RegistryServerConfig {
                max_frame_length: 1024,
                ..test_config()
            },
            Arc::new(registry),
        );
        let port = server.start().await.unwrap();
        tokio::spawn(server.serve(std::future::pending::<()>()));

        let (mut reader, mut writer, _) = open(port).await;
        let call = |call_id, operation: &str| RegistryRequest::Invoke {
            payload: InvokePayload {
                call_id,
                resource: name.clone(),
                operation: operation.to_string(),
                arguments: vec![],
                signature: vec![],
                principals: None,
            },
        };

        frame::send(&mut writer, &call(1, "bulk")).await.unwrap();
        let reply = frame::recv::<RegistryResponse>(&mut reader).await.unwrap().unwrap();
        match reply {
            RegistryResponse::Fault {
                call_id: 1,
                fault: RemoteFault::Application { cause: Some(cause), .. },
            } => {
                assert_eq!(cause.type_name, "ResponseTooLarge");
                assert!(!cause.is_recoverable());
            }
            other => panic!("expected a fault for call 1, got {other:?}"),
        }

        frame::send(&mut writer, &call(2, "small")).await.unwrap();
        let reply = frame::recv::<RegistryResponse>(&mut reader).await.unwrap();
        assert_eq!(
            reply,
            Some(RegistryResponse::Result {
                call_id: 2,
                value: Value::from("ok"),
            })
        );
    }
}
