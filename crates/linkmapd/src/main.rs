//! linkmapd - cluster connectivity gossip daemon
//!
//! Maintains an eventually-consistent directory of which cluster nodes
//! are connected to which, propagated peer-to-peer over TCP.

use clap::Parser;
use linkmapd::config::Config;
use linkmapd::daemon::Daemon;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let directive = if config.verbose {
        "linkmapd=debug"
    } else {
        "linkmapd=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(directive.parse().unwrap()))
        .init();

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!("linkmapd v{}", env!("CARGO_PKG_VERSION"));

    let daemon = match Daemon::bind(&config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Startup dials are fatal; disconnects after startup only tear down
    // their own connection.
    for addr in &config.peers {
        if let Err(e) = daemon.connect(*addr).await {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    }

    {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            daemon.shutdown();
        });
    }

    if let Err(e) = daemon.run().await {
        error!("Daemon error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
