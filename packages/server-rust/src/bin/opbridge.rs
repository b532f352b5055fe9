//! opbridge - HTTP bridge to a resource registry
//!
//! Serves `/api/invoke` and `/api/test`, forwarding each request as one
//! operation invocation on the configured resource.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use opbridge_server::bridge::{BridgeConfig, IdentityMode, OperationInvoker};
use opbridge_server::network::{NetworkConfig, NetworkModule};
use opbridge_server::transport::TransportConfig;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "opbridge")]
#[command(about = "Invoke operations on a registry resource over HTTP")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file; flags override its values
    #[arg(short, long, env = "OPBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Registry endpoint, `discovery://host:port/binding` or `direct://host:port`
    #[arg(long, env = "OPBRIDGE_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Resource to invoke operations on, e.g. `opbridge.demo:type=Test`
    #[arg(long, env = "OPBRIDGE_RESOURCE_NAME")]
    resource_name: Option<String>,

    /// Operation that runs inside an impersonation scope (repeatable)
    #[arg(long = "privileged-operation")]
    privileged_operations: Vec<String>,

    /// Identity used for privileged operations
    #[arg(long, value_enum)]
    identity_mode: Option<IdentityArg>,

    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0", env = "OPBRIDGE_HOST")]
    host: String,

    /// HTTP port
    #[arg(short, long, default_value_t = 8080, env = "OPBRIDGE_PORT")]
    port: u16,

    /// Registry connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum IdentityArg {
    Synthetic,
    Derived,
}

impl From<IdentityArg> for IdentityMode {
    fn from(arg: IdentityArg) -> Self {
        match arg {
            IdentityArg::Synthetic => Self::Synthetic,
            IdentityArg::Derived => Self::Derived,
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("opbridge_server=info".parse()?);
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

fn bridge_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(url) = &cli.endpoint_url {
        config.endpoint_url.clone_from(url);
    }
    if let Some(name) = &cli.resource_name {
        config.resource_name.clone_from(name);
    }
    if !cli.privileged_operations.is_empty() {
        config.privileged_operations = cli.privileged_operations.iter().cloned().collect();
    }
    if let Some(mode) = cli.identity_mode {
        config.identity_mode = mode.into();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = bridge_config(&cli)?;
    info!(
        endpoint = %config.endpoint_url,
        resource = %config.resource_name,
        privileged = ?config.privileged_operations,
        "starting opbridge"
    );

    let transport = TransportConfig {
        connect_timeout: Duration::from_secs(cli.connect_timeout_secs),
        ..TransportConfig::default()
    };
    let invoker = Arc::new(OperationInvoker::from_config(config, transport)?);

    let mut module = NetworkModule::new(
        NetworkConfig {
            host: cli.host,
            port: cli.port,
            ..NetworkConfig::default()
        },
        Arc::clone(&invoker),
    );
    module.start().await?;
    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    invoker.close().await;
    info!("opbridge stopped");
    Ok(())
}
