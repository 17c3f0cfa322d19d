//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Event Fabric - topic-routed event delivery
#[derive(Parser, Debug)]
#[command(
    name = "event-fabric",
    author,
    version,
    about = "Topic-routed event delivery fabric",
    long_about = "Receives topic-tagged messages over TCP, routes them through per-topic \n\
                  filters and converters, and delivers them to named sinks. Sinks can \n\
                  cooperate through notify channels."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EVENT_FABRIC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EVENT_FABRIC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingest server, router and sinks
    Run(RunArgs),

    /// Send messages to the configured servers
    Send(SendArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config.toml", env = "EVENT_FABRIC_CONFIG")]
    pub config: PathBuf,

    /// Override the ingest listen address
    #[arg(long, env = "EVENT_FABRIC_LISTEN")]
    pub listen: Option<String>,

    /// Stop after this many seconds (0 = run until signalled)
    #[arg(long, default_value = "0", env = "EVENT_FABRIC_TIMEOUT")]
    pub timeout: u64,

    /// Seconds between stats reports (0 = disabled)
    #[arg(long, default_value = "30", env = "EVENT_FABRIC_STATS_INTERVAL")]
    pub stats_interval: u64,

    /// Seconds between config file change checks (0 = no reload)
    #[arg(long, default_value = "0", env = "EVENT_FABRIC_RELOAD_INTERVAL")]
    pub reload_interval: u64,

    /// Validate configuration and exit without starting
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "EVENT_FABRIC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `send` command
#[derive(Parser, Debug, Clone)]
pub struct SendArgs {
    /// Path to configuration file with a `[client]` section
    #[arg(short, long, default_value = "config.toml", env = "EVENT_FABRIC_CONFIG")]
    pub config: PathBuf,

    /// Override the configured server endpoints (comma separated)
    #[arg(long, value_delimiter = ',', env = "EVENT_FABRIC_ENDPOINTS")]
    pub endpoints: Vec<String>,

    /// Message topic
    #[arg(short, long)]
    pub topic: String,

    /// Message payload; `{i}` is replaced by the message index
    #[arg(short, long)]
    pub payload: String,

    /// Number of messages to send
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u64,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show route details (filters, converters)
    #[arg(long)]
    pub routes: bool,

    /// Show sink and notify parameters
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_args() {
        let cli = Cli::parse_from([
            "event-fabric",
            "send",
            "--topic",
            "topic1",
            "--payload",
            "m{i}",
            "-n",
            "3",
            "--endpoints",
            "a:1,b:2",
        ]);
        let Commands::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.count, 3);
        assert_eq!(args.endpoints, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["event-fabric", "-q", "-v", "validate"]).is_err());
    }
}
