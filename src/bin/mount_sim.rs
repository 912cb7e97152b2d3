//! mount-sim - protocol-level 10micron mount simulator
//!
//! Listens on a TCP port and answers the LX200-derived command set with a
//! small simulated mount behind it. Useful for developing against no
//! hardware and for demos:
//!
//! ```bash
//! cargo run --bin mount-sim -- --listen 127.0.0.1:3490 --firmware 2.15.1
//! ```

use anyhow::Result;
use clap::Parser;
use mountctl::sim::{MountSimulator, SimState};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mount-sim", about = "10micron mount protocol simulator", version)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:3490")]
    listen: String,

    /// Firmware version string answered to :GVN#
    #[arg(long, default_value = "2.15.1")]
    firmware: String,

    /// Seed the mount with this many alignment points
    #[arg(long, default_value_t = 0)]
    points: usize,

    /// Refuse meridian flips (for error-path testing)
    #[arg(long)]
    refuse_flip: bool,
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

    let mut state = SimState::default();
    state.firmware = args.firmware;
    state.refuse_flip = args.refuse_flip;
    state.jitter = true;
    if args.points > 0 {
        let seed: Vec<(f64, f64)> = (0..args.points)
            .map(|i| (2.0 + (i % 7) as f64, (i as f64 * 37.0) % 360.0))
            .collect();
        state.seed_model(&seed);
    }

    let sim = MountSimulator::bind(&args.listen, state).await?;
    info!(address = %sim.local_addr()?, "Mount simulator listening");

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let server = tokio::spawn(async move { sim.run(run_cancel).await });

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    let _ = server.await;
    Ok(())
}
