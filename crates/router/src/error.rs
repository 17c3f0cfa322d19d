//! Router error types

use thiserror::Error;

/// Router-specific errors
#[derive(Debug, Error)]
pub enum RouterError {
    /// Descriptor names a filter/converter type that is not registered
    #[error("route '{route}': unknown {kind} type '{type_name}', available: [{available}]")]
    UnknownType {
        route: String,
        kind: &'static str,
        type_name: String,
        available: String,
    },

    /// Filter/converter descriptor could not be built
    #[error("route '{route}': invalid {kind}: {message}")]
    InvalidDescriptor {
        route: String,
        kind: &'static str,
        message: String,
    },

    /// Ingest listener could not bind
    #[error("failed to bind ingest listener on '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Contract-level error
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    pub fn invalid_descriptor(
        route: impl Into<String>,
        kind: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDescriptor {
            route: route.into(),
            kind,
            message: message.into(),
        }
    }
}
