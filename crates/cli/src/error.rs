//! Error types for CLI operations.

use thiserror::Error;

/// Failures while building or reloading the fabric
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration could not be loaded or validated
    #[error("Failed to load configuration from {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: contracts::ContractError,
    },

    /// Notify channels could not be created
    #[error("Failed to create notify channels: {0}")]
    Notify(#[source] sinks::SinkError),

    /// Sinks could not be created
    #[error("Failed to create sinks: {0}")]
    Sinks(#[source] sinks::SinkError),

    /// Routes could not be compiled
    #[error("Failed to compile routes: {0}")]
    Routes(#[from] router::RouterError),

    /// `send` used without a `[client]` section or endpoints
    #[error("No client configuration: add a [client] section or pass --endpoints")]
    MissingClient,
}

impl CliError {
    pub fn config(path: &std::path::Path, source: contracts::ContractError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }
}
