//! MessageSink trait - sink write-path interface
//!
//! Defines the abstract interface for Sinks. A sink instance is driven by a
//! single worker task, so methods take `&mut self` and writes are serialized.

use crate::{ContractError, Message};

/// Data output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(MessageSink: Send)]
pub trait LocalMessageSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Initialize resources before the first write
    ///
    /// # Errors
    /// A failure here is fatal for the sink: it never becomes visible in the registry.
    async fn open(&mut self) -> Result<(), ContractError>;

    /// Write one message
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, message: &Message) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;

    /// Sink-specific diagnostic line (empty when there is nothing beyond the handle counters)
    fn stat(&self) -> String;
}
