//! mountctl - 10micron mount control daemon
//!
//! Connects to the mount, starts every protocol link, and processes
//! dispatcher commands until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the configured mount (mountctl.toml / MOUNTCTL_CONFIG)
//! cargo run --release
//!
//! # Override the endpoint
//! cargo run --release -- --host 192.168.2.15 --port 3490
//!
//! # Against the simulator
//! cargo run --bin mount-sim -- --listen 127.0.0.1:3490 &
//! cargo run --release -- --host 127.0.0.1
//! ```
//!
//! # Environment Variables
//!
//! - `MOUNTCTL_CONFIG`: Path to the TOML configuration file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::Result;
use clap::Parser;
use mountctl::config::{self, MountConfig};
use mountctl::data::MountData;
use mountctl::dispatcher::MountDispatcher;
use mountctl::events::{EventBus, MessageSeverity, MountEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mountctl", about = "10micron mount control core", version)]
struct Args {
    /// Mount IP address or hostname (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Mount command port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Path to the configuration file
    #[arg(long, env = "MOUNTCTL_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut mount_config = match &args.config {
        Some(path) => MountConfig::from_file(path)?,
        None => MountConfig::load(),
    };
    if let Some(host) = args.host {
        mount_config.connection.host = host;
    }
    if let Some(port) = args.port {
        mount_config.connection.port = port;
    }
    config::init(mount_config);

    let connection = &config::get().connection;
    info!(
        host = %connection.host,
        port = connection.port,
        "Starting mount control core"
    );

    let data = MountData::new(&connection.host, connection.port).into_shared();
    let events = EventBus::new();

    let (dispatcher, _handle) = MountDispatcher::new(
        data,
        events.clone(),
        None, // dome driver plugs in through the host application
        None, // environment sensor likewise
        &connection.host,
        connection.port,
    );

    let cancel = CancellationToken::new();

    // Surface user-facing message events on the console
    let mut bus = events.subscribe();
    let printer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = printer_cancel.cancelled() => break,
                event = bus.recv() => match event {
                    Ok(MountEvent::Message { severity, text }) => match severity {
                        MessageSeverity::Error => warn!(target: "mount", "{}", text),
                        MessageSeverity::Warning => warn!(target: "mount", "{}", text),
                        MessageSeverity::Info => info!(target: "mount", "{}", text),
                    },
                    Ok(MountEvent::Connection { link, connected }) => {
                        info!(target: "mount", link, connected, "Link state changed");
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
            }
        }
    });

    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    let _ = dispatcher_task.await;

    Ok(())
}
