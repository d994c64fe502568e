//! Marionette Daemon - Main entry point
//!
//! Drives a robot's joints in real time from VMC pose tracking and relays
//! joint commands to a remote actuation endpoint.

mod config;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "marionette")]
#[command(about = "Mocap-driven robot control daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "marionette.toml")]
    config: PathBuf,

    /// Model directory override (robot.urdf inside)
    #[arg(short, long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single control tick and exit
    #[arg(long)]
    dry_run: bool,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Marionette v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    if let Some(model) = args.model {
        config.model.path = model;
    }

    info!(
        model = %config.model.path,
        tracking_port = config.tracking.port,
        endpoint = %format!("{}:{}", config.bridge.host, config.bridge.port),
        "Configuration loaded"
    );

    let state = state::AppState::new(config)?;

    if args.dry_run {
        // Single tick mode: exercise the full pipeline once without
        // binding sockets or contacting the endpoint
        let report = state.tick_once().await?;
        println!(
            "Model '{}': {} tracked bones, {} commanded joints, {} link transforms",
            state.model.read().await.name(),
            report.tracked_bones,
            report.commanded_joints,
            report.evaluated_links
        );
        for (joint, angle) in state.joint_positions_rad().await {
            println!("  {joint}: {angle:.4} rad");
        }
        return Ok(());
    }

    state.start().await?;

    tokio::select! {
        result = state.run_control_loop() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }

    state.shutdown();
    Ok(())
}
