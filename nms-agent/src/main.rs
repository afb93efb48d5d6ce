#![forbid(unsafe_code)]

//! Rover daemon binary.

use anyhow::Result;
use clap::Parser;
use nms_agent::{Agent, RoverState, TelemetryReporter, TimedExecutor};
use nms_core::net::{preferred_local_ip, Ipv4Net};
use nms_core::{NmsConfig, RoverId};
use nms_missionlink::{MlConfig, MlEndpoint, MlSender};
use nms_telemetry::TsClient;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nms-agent", about = "Rover daemon")]
struct Args {
    /// Logical rover id (at most 3 bytes, e.g. "r1").
    #[arg(long)]
    id: RoverId,

    /// Mother Ship address.
    #[arg(long)]
    controller: IpAddr,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address override for the MissionLink responder.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Working directory for received files and the telemetry spool.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Seconds of wall clock per mission minute in the built-in executor.
    #[arg(long, default_value_t = 60.0)]
    time_scale: f64,
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
    init_tracing(cfg.log_level.as_deref());

    let subnet = Ipv4Net::parse(&cfg.rover_subnet)?;
    let ip = args
        .bind
        .unwrap_or_else(|| IpAddr::V4(preferred_local_ip(&subnet)));
    info!(rover = %args.id, %ip, controller = %args.controller, "rover starting");

    let ml_cfg = MlConfig::from_nms(&cfg);
    let endpoint = MlEndpoint::bind(
        SocketAddr::new(ip, cfg.missionlink_port),
        cfg.store_root.join("net"),
        ml_cfg.clone(),
    )
    .await?;

    let rover = RoverState::shared(args.id.clone());
    let telemetry = TelemetryReporter::new(
        rover.clone(),
        TsClient::new(cfg.buffer_size),
        SocketAddr::new(args.controller, cfg.telemetry_port),
        cfg.telemetry_interval(),
        cfg.store_root.join("spool"),
    );

    let agent = Agent::new(
        args.id,
        SocketAddr::new(args.controller, cfg.missionlink_port),
        endpoint,
        MlSender::new(ml_cfg),
        rover,
        Arc::new(TimedExecutor::scaled(args.time_scale)),
        telemetry.clone(),
        cfg.retry_limit,
    );

    // Receive loop first, so registration replies have somewhere to land.
    let loop_task = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };

    if let Err(e) = agent.register().await {
        // The Mother Ship may simply not be up yet; stay alive and report.
        warn!(error = %e, "registration failed, continuing unregistered");
    }
    telemetry.ensure_running();
    info!("rover ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        res = loop_task => {
            res??;
        }
    }
    Ok(())
}
