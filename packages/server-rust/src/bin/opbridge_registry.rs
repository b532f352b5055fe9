//! opbridge-registry - registry host serving the reference resource
//!
//! Runs the registry stream listener and, unless disabled, a discovery
//! service that binds the registry's address under a name.

use std::sync::Arc;

use clap::Parser;
use opbridge_core::messages::DEFAULT_DISCOVERY_PORT;
use opbridge_server::registry::{
    demo_registry, DiscoveryServer, RegistryServer, RegistryServerConfig, DEFAULT_REGISTRY_PORT,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "opbridge-registry")]
#[command(about = "Registry host exposing opbridge.demo:type=Test")]
#[command(version)]
struct Cli {
    /// Bind address for both listeners
    #[arg(long, default_value = "0.0.0.0", env = "OPBRIDGE_REGISTRY_HOST")]
    host: String,

    /// Registry stream port
    #[arg(long, default_value_t = DEFAULT_REGISTRY_PORT, env = "OPBRIDGE_REGISTRY_PORT")]
    port: u16,

    /// Discovery service port
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Name the registry is bound under in the discovery service
    #[arg(long, default_value = "registry")]
    binding_name: String,

    /// Host bridges should use to reach the registry stream listener
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Run only the stream listener (for `direct://` endpoints)
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("opbridge_server=info".parse()?))
        .init();

    let cli = Cli::parse();

    let registry = Arc::new(demo_registry());
    for name in registry.names() {
        info!(resource = %name, "registered resource");
    }

    let mut server = RegistryServer::new(
        RegistryServerConfig {
            host: cli.host.clone(),
            port: cli.port,
            ..RegistryServerConfig::default()
        },
        registry,
    );
    let port = server.start().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let mut registry_stop = stop_rx.clone();
    tasks.push(tokio::spawn(server.serve(async move {
        let _ = registry_stop.changed().await;
    })));

    if !cli.no_discovery {
        let mut discovery = DiscoveryServer::new(cli.host, cli.discovery_port);
        discovery.bind(cli.binding_name, format!("{}:{port}", cli.advertise_host));
        discovery.start().await?;

        let mut discovery_stop = stop_rx;
        tasks.push(tokio::spawn(discovery.serve(async move {
            let _ = discovery_stop.changed().await;
        })));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = stop_tx.send(true);

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "listener failed"),
            Err(e) => error!(error = %e, "listener task panicked"),
        }
    }
    info!("opbridge-registry stopped");
    Ok(())
}
