//! Sink error types

use thiserror::Error;

/// Sink-layer errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sink creation or open error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Descriptor names a type no builder is registered for
    #[error("unknown {kind} type '{type_name}', available: [{available}]")]
    UnknownType {
        kind: &'static str,
        type_name: String,
        available: String,
    },

    /// Builder registered twice
    #[error("{kind} type '{type_name}' already registered")]
    DuplicateType {
        kind: &'static str,
        type_name: String,
    },

    /// Notify channel missing or unusable
    #[error("notify channel '{channel}': {message}")]
    Notify { channel: String, message: String },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-type error listing what is registered
    pub fn unknown_type(kind: &'static str, type_name: impl Into<String>, available: &[&str]) -> Self {
        Self::UnknownType {
            kind,
            type_name: type_name.into(),
            available: available.join(", "),
        }
    }

    /// Create a notify channel error
    pub fn notify(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            channel: channel.into(),
            message: message.into(),
        }
    }
}
