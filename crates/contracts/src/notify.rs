//! NotifyChannel trait - hand-off between two cooperating sinks
//!
//! A notify channel is a narrow named pub/sub primitive: one producing sink
//! sends items, one consuming sink pulls them. Implementations may be an
//! in-process queue or a networked medium; sinks only see this trait.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Outcome of a bounded `recv`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyRecv<E> {
    /// An item was handed off
    Item(E),
    /// Nothing arrived within the wait bound
    Timeout,
    /// The channel was closed and fully drained
    Closed,
}

impl<E> NotifyRecv<E> {
    /// Item if one was received
    pub fn into_item(self) -> Option<E> {
        match self {
            Self::Item(item) => Some(item),
            Self::Timeout | Self::Closed => None,
        }
    }
}

/// Named hand-off channel
#[async_trait]
pub trait NotifyChannel<E: Send + 'static>: Send + Sync {
    /// Channel name (shared by producer and consumer configuration)
    fn name(&self) -> &str;

    /// Attach to the underlying medium. Idempotent.
    ///
    /// # Errors
    /// Returns `Notify` if the medium is unreachable. Sinks depending on the
    /// channel must treat this as a startup failure.
    async fn init(&self) -> Result<(), ContractError>;

    /// Non-blocking enqueue; `false` when saturated, closed or not initialized
    fn send(&self, item: E) -> bool;

    /// Pull one item, waiting at most `timeout`
    async fn recv(&self, timeout: Duration) -> NotifyRecv<E>;

    /// Queue depth / throughput line for diagnostics
    fn stat(&self) -> String;

    /// Stop accepting items; pending items still drain through `recv`
    fn close(&self);
}

/// Notice sent by a buffering sink when a batch file is complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReady {
    /// Completed batch file
    pub path: PathBuf,
    /// Messages in the batch
    pub messages: u64,
    /// Bytes written
    pub bytes: u64,
}
