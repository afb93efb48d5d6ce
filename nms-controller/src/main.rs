#![forbid(unsafe_code)]

//! Mother Ship daemon binary.

use anyhow::Result;
use clap::Parser;
use nms_controller::{Controller, MissionLibrary, ObservationView};
use nms_core::net::{preferred_local_ip, Ipv4Net};
use nms_core::NmsConfig;
use nms_telemetry::{TelemetryStore, TsServer};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nms-controller", about = "Mother Ship daemon")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address for both protocol sockets (default: the interface in
    /// the rover subnet, falling back to the first routable one).
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Telemetry store root override.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Mission library directory override.
    #[arg(long)]
    library: Option<PathBuf>,
}

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_env("NMS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => NmsConfig::from_file(path)?,
        None => NmsConfig::default(),
    };
    if let Some(store) = args.store {
        cfg.store_root = store;
    }
    if let Some(library) = args.library {
        cfg.library_path = Some(library);
    }
    init_tracing(cfg.log_level.as_deref());

    let subnet = Ipv4Net::parse(&cfg.rover_subnet)?;
    let ip = args
        .bind
        .unwrap_or_else(|| IpAddr::V4(preferred_local_ip(&subnet)));
    info!(%ip, "controller address selected");

    let library = MissionLibrary::discover(cfg.library_path.as_deref())?;
    if let Some(dir) = library.dir() {
        info!(dir = %dir.display(), "mission library");
    }

    let store = Arc::new(TelemetryStore::open(&cfg.store_root, cfg.buffer_size).await?);
    let telemetry = TsServer::bind(SocketAddr::new(ip, cfg.telemetry_port), store.clone()).await?;
    let controller = Controller::bind(
        SocketAddr::new(ip, cfg.missionlink_port),
        cfg.store_root.join("net"),
        &cfg,
        library,
    )
    .await?;

    // The read view handed to the external observation API; also drives the
    // periodic status line.
    let observation = ObservationView::new(controller.state(), store);
    let status_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        tick.tick().await;
        loop {
            tick.tick().await;
            let s = observation.status();
            info!(
                rovers = s.rovers,
                pending = s.pending_missions,
                active = s.active_missions,
                completed = s.completed_missions,
                "fleet status"
            );
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        res = controller.run() => res?,
        res = telemetry.run() => res?,
    }
    status_task.abort();
    Ok(())
}
