//! Name-to-address lookup service for the discovery transport.
//!
//! Registries bind a name to their stream address; bridges configured with a
//! `discovery://` URL ask this service where that name lives before
//! connecting.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use opbridge_core::messages::{DiscoveryRequest, DiscoveryResponse, DEFAULT_DISCOVERY_PORT};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::transport::frame;
use crate::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Discovery listener with deferred startup, like
/// [`RegistryServer`](super::RegistryServer).
pub struct DiscoveryServer {
    host: String,
    port: u16,
    bindings: Arc<DashMap<String, String>>,
    listener: Option<TcpListener>,
}

impl DiscoveryServer {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            bindings: Arc::new(DashMap::new()),
            listener: None,
        }
    }

    /// A server on all interfaces at [`DEFAULT_DISCOVERY_PORT`].
    #[must_use]
    pub fn with_default_port() -> Self {
        Self::new("0.0.0.0", DEFAULT_DISCOVERY_PORT)
    }

    /// Binds `name` to a registry stream `address`, replacing any previous
    /// binding.
    pub fn bind(&self, name: impl Into<String>, address: impl Into<String>) {
        let (name, address) = (name.into(), address.into());
        info!(%name, %address, "bound name");
        self.bindings.insert(name, address);
    }

    /// Removes a binding. Returns `false` if the name was not bound.
    pub fn unbind(&self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        resolve(&self.bindings, name)
    }

    /// Binds the listener, returning the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let port = listener.local_addr()?.port();
        info!("discovery listener bound to {}:{}", self.host, port);
        self.listener = Some(listener);
        Ok(port)
    }

    /// Answers lookups until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let bindings = self.bindings;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(answer_lookups(stream, Arc::clone(&bindings)));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        info!("discovery listener stopped");
        Ok(())
    }
}

fn resolve(bindings: &DashMap<String, String>, name: &str) -> Option<String> {
    bindings.get(name).map(|entry| entry.value().clone())
}

async fn answer_lookups(stream: TcpStream, bindings: Arc<DashMap<String, String>>) {
    let (mut reader, mut writer) = frame::split(stream, DEFAULT_MAX_FRAME_LENGTH);
    loop {
        let request = match frame::recv::<DiscoveryRequest>(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "discovery request failed");
                return;
            }
        };

        let DiscoveryRequest::Lookup { name } = request;
        let response = match resolve(&bindings, &name) {
            Some(address) => DiscoveryResponse::Bound { name, address },
            None => {
                debug!(%name, "lookup of unbound name");
                DiscoveryResponse::NotBound { name }
            }
        };
        if let Err(e) = frame::send(&mut writer, &response).await {
            warn!(error = %e, "discovery reply failed");
            return;
        }
    }
}
