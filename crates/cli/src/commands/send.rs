//! `send` command implementation.

use anyhow::{Context, Result};
use client::ClientDispatcher;
use contracts::{ClientConfig, ClientMode, Message};
use tracing::{info, warn};

use crate::cli::SendArgs;
use crate::error::CliError;

/// Execute the `send` command
pub async fn run_send(args: &SendArgs) -> Result<()> {
    let config = client_config(args)?;
    info!(
        endpoints = ?config.server_endpoints,
        mode = ?config.client_mode,
        count = args.count,
        "Sending messages"
    );

    let client = ClientDispatcher::new(config).context("Failed to create client")?;
    let mut failed = 0u64;
    for i in 0..args.count {
        let payload = args.payload.replace("{i}", &i.to_string());
        let message = Message::new(args.topic.as_str(), payload)?;
        if let Err(e) = client.send(message).await {
            failed += 1;
            warn!(index = i, error = %e, "Send failed");
        }
    }
    client.shutdown().await;

    let stats = client.stats();
    println!("{stats}");
    if stats.unacked > 0 {
        warn!(unacked = stats.unacked, "Some requests timed out; those messages may have been delivered");
    }
    if failed > 0 || stats.lost > 0 || stats.unacked > 0 {
        anyhow::bail!(
            "{} of {} messages were not confirmed",
            (stats.lost + stats.unacked).max(failed),
            args.count
        );
    }
    Ok(())
}

/// `[client]` from the config file, with `--endpoints` taking precedence
fn client_config(args: &SendArgs) -> Result<ClientConfig> {
    let from_file = if args.config.exists() {
        config_loader::ConfigLoader::load_from_path(&args.config)
            .map_err(|e| CliError::config(&args.config, e))?
            .client
    } else {
        None
    };

    let config = match (from_file, args.endpoints.is_empty()) {
        (Some(mut config), false) => {
            config.server_endpoints = args.endpoints.clone();
            config
        }
        (Some(config), true) => config,
        (None, false) => ClientConfig::new(args.endpoints.clone(), ClientMode::Sync),
        (None, true) => return Err(CliError::MissingClient.into()),
    };
    Ok(config)
}
