//! `run` command implementation.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Fabric, FabricOptions};

/// Execute the `run` command
pub async fn run_server(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .map_err(|e| CliError::config(&args.config, e))?;

    // Apply CLI overrides
    if let Some(ref listen) = args.listen {
        info!(listen = %listen, "Overriding listen address from CLI");
        blueprint.server.listen = listen.clone();
    }

    info!(
        listen = %blueprint.server.listen,
        threads = blueprint.router.threads,
        sinks = blueprint.sinks.len(),
        notify = blueprint.notify.len(),
        topics = blueprint.routes.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    if args.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
        observability::init_metrics_only(addr)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let fabric = Fabric::build(&blueprint)
        .await
        .context("Failed to start fabric")?;

    let options = FabricOptions {
        stats_interval: seconds(args.stats_interval),
        config_path: Some(args.config.clone()),
        reload_interval: seconds(args.reload_interval),
    };
    let timeout = seconds(args.timeout);

    let stats = fabric
        .run(options, async move {
            match timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = shutdown_signal() => warn!("Received shutdown signal, stopping fabric..."),
                        _ = tokio::time::sleep(limit) => info!("Run timeout reached"),
                    }
                }
                None => {
                    shutdown_signal().await;
                    warn!("Received shutdown signal, stopping fabric...");
                }
            }
        })
        .await
        .context("Fabric execution failed")?;

    info!(
        received = stats.router.received,
        delivered = stats.router.delivered,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.2}", stats.throughput()),
        "Fabric stopped"
    );
    stats.print_summary();
    Ok(())
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Resolves on Ctrl+C or SIGTERM
///
/// A handler that fails to install is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::FabricBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Server: {}", blueprint.server.listen);
    println!(
        "Router: {} threads, queue {}",
        blueprint.router.threads, blueprint.router.queue_capacity
    );

    println!("\nSinks ({}):", blueprint.sinks.len());
    for (name, sink) in &blueprint.sinks {
        println!("  - {} ({})", name, sink.sink_type);
    }

    if !blueprint.notify.is_empty() {
        println!("\nNotify channels ({}):", blueprint.notify.len());
        for (name, channel) in &blueprint.notify {
            println!("  - {} ({})", name, channel.notify_type);
        }
    }

    println!("\nRoutes ({} topics):", blueprint.routes.len());
    for (topic, info) in &blueprint.routes {
        let sinks: Vec<_> = info.routes.iter().map(|r| r.sink.as_str()).collect();
        println!("  - {} -> {}", topic, sinks.join(", "));
    }

    println!();
}
