//! ons-device binary entry point.
//!
//! Usage:
//! ```bash
//! ons-device register --token <bearer>
//! ons-device run
//! ons-device status
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ons_device::{
    register_device, Controller, DeviceConfig, HttpRegistrar, MockConnector, MockTransport,
    PeerConnector, RtcConnector, Transport, WsTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Device agent for ONS: keeps the relay connection and serves vault sync.
#[derive(Parser, Debug)]
#[command(name = "ons-device")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: device.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use in-process relay and peer backends instead of the network (for testing/demo)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the relay and serve until Ctrl-C
    Run,

    /// Obtain a device id from the directory service
    Register {
        /// Device name (default: $HOSTNAME)
        #[arg(long, short)]
        name: Option<String>,

        /// Bearer token of the owning account
        #[arg(long, short)]
        token: String,
    },

    /// Show the stored configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = DeviceConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    match cli.command {
        Commands::Run => run(config_path, config, cli.mock).await,
        Commands::Register { name, token } => register(&config_path, config, name, &token).await,
        Commands::Status => {
            status(&config_path, &config);
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf, config: DeviceConfig, mock: bool) -> Result<()> {
    if !config.connect.is_registered() {
        anyhow::bail!("device not registered; run 'ons-device register --token <token>' first");
    }

    let timeout = config.connect.connect_timeout();
    let (transport, connector): (Arc<dyn Transport>, Arc<dyn PeerConnector>) = if mock {
        tracing::warn!("mock mode: relay and peer links are in-process");
        (Arc::new(MockTransport::new()), Arc::new(MockConnector::new()))
    } else {
        let connector = RtcConnector::new().context("failed to initialize WebRTC")?;
        (Arc::new(WsTransport::new(timeout)), Arc::new(connector))
    };
    let registrar = Arc::new(HttpRegistrar::new(timeout)?);

    let auto = config.connect.auto;
    let device_id = config.connect.device_id.clone();
    let relay_url = config.connect.relay_url();
    let controller = Controller::new(
        Some(config_path),
        config,
        transport,
        connector,
        registrar,
    )
    .await
    .context("failed to start controller")?;

    if !auto {
        controller.connect().await.context("failed to connect")?;
    }
    tracing::info!(
        "ons-device v{} serving device {} via {}",
        env!("CARGO_PKG_VERSION"),
        device_id,
        relay_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    controller.disconnect().await?;
    Ok(())
}

async fn register(
    config_path: &Path,
    mut config: DeviceConfig,
    name: Option<String>,
    token: &str,
) -> Result<()> {
    let name = name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "ons-device".to_string());
    let registrar = HttpRegistrar::new(config.connect.connect_timeout())?;

    let id = register_device(&mut config.connect, &registrar, &name, token)
        .await
        .context("registration failed")?;
    config
        .save(config_path)
        .with_context(|| format!("failed to save {}", config_path.display()))?;

    println!("Registered {name:?} as device {id}");
    println!("Config: {}", config_path.display());
    Ok(())
}

fn status(config_path: &Path, config: &DeviceConfig) {
    println!("=== ons-device status ===");
    println!();
    println!("Config: {}", config_path.display());
    if config.connect.is_registered() {
        println!("Device: {}", config.connect.device_id);
    } else {
        println!("Device: NOT REGISTERED");
        println!();
        println!("Run 'ons-device register --token <token>' to register.");
        return;
    }
    println!("Relay:  {}", config.connect.relay_url());
    println!("Auto:   {}", config.connect.auto);
    println!("Vault:  {}", config.vault.root.display());
}

/// Default location of device.toml.
fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ons", "ons-device")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join("device.toml"))
}
