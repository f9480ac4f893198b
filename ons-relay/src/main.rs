//! ons-relay binary entry point.
//!
//! Usage:
//! ```bash
//! ons-relay --config relay.toml
//! ons-relay --config relay.toml add-device --owner 2 --name nas --device-id 482913
//! ons-relay list-devices
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ons_relay::directory::{DeviceDirectory, SqliteDirectory, ADMIN_OWNER};
use ons_relay::{http, Config, SignalingRelay};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often idle rate limiter entries are evicted.
const LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(600);

/// Signaling relay for ONS devices and clients.
#[derive(Parser, Debug)]
#[command(name = "ons-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay (default)
    Serve,

    /// Add a device to the directory
    AddDevice {
        /// Owning account id
        #[arg(long)]
        owner: i64,
        /// Device name
        #[arg(long)]
        name: String,
        /// Id the device registers with
        #[arg(long)]
        device_id: String,
    },

    /// List devices in the directory
    ListDevices {
        /// Owning account id (1 lists every device)
        #[arg(long, default_value_t = ADMIN_OWNER)]
        owner: i64,
        /// Page to show
        #[arg(long, default_value = "1")]
        page: u32,
        /// Devices per page
        #[arg(long, default_value = "20")]
        number: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let directory = SqliteDirectory::new(&config.directory.database)
        .await
        .with_context(|| format!("failed to open {}", config.directory.database.display()))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, directory).await,
        Commands::AddDevice {
            owner,
            name,
            device_id,
        } => {
            let device = directory
                .add_device(owner, &name, &device_id)
                .await
                .context("failed to add device")?;
            println!("added device #{} ({})", device.id, device.device_id);
            Ok(())
        }
        Commands::ListDevices {
            owner,
            page,
            number,
        } => {
            let devices = directory
                .list_devices(owner, page, number)
                .await
                .context("failed to list devices")?;
            for device in devices {
                println!(
                    "{:>6}  {:<12} owner={:<4} {}",
                    device.id, device.device_id, device.owner, device.name
                );
            }
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        tracing::info!("{} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

async fn serve(config: Config, directory: SqliteDirectory) -> Result<()> {
    http::health::init_start_time();

    let bind_address = config.server.bind_address.clone();
    let ws_path = config.server.ws_path.clone();
    let relay = Arc::new(SignalingRelay::new(config, Arc::new(directory)));

    let shrinker = relay.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SHRINK_INTERVAL);
        loop {
            interval.tick().await;
            shrinker.rate_limits().shrink();
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(
        "ons-relay v{} listening on {} (signaling path {})",
        env!("CARGO_PKG_VERSION"),
        bind_address,
        ws_path
    );

    http::serve(relay, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

    Ok(())
}
