//! QueueNotify - in-process bounded hand-off

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use contracts::{ContractError, NotifyChannel, NotifyRecv, Params, ParamsExt};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded MPMC queue shared by a producing and a consuming sink
pub struct QueueNotify<E> {
    name: String,
    tx: async_channel::Sender<E>,
    rx: async_channel::Receiver<E>,
    sent: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
}

impl<E: Send + 'static> QueueNotify<E> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self {
            name: name.into(),
            tx,
            rx,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Create from descriptor params (`capacity`)
    pub fn from_params(name: impl Into<String>, params: &Params) -> Self {
        let capacity = params
            .u64_param("capacity")
            .map(|c| c as usize)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        Self::new(name, capacity)
    }

    /// Items waiting to be received
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[async_trait]
impl<E: Send + 'static> NotifyChannel<E> for QueueNotify<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<(), ContractError> {
        // Nothing to attach to
        Ok(())
    }

    fn send(&self, item: E) -> bool {
        let accepted = self.tx.try_send(item).is_ok();
        if accepted {
            self.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %self.name, "Notify queue full or closed, item dropped");
        }
        observability::record_notify_send(&self.name, accepted);
        accepted
    }

    async fn recv(&self, timeout: Duration) -> NotifyRecv<E> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(item)) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                NotifyRecv::Item(item)
            }
            // Closed and drained
            Ok(Err(_)) => NotifyRecv::Closed,
            Err(_) => NotifyRecv::Timeout,
        }
    }

    fn stat(&self) -> String {
        format!(
            "type=queue depth={} capacity={} sent={} received={} rejected={}{}",
            self.rx.len(),
            self.rx.capacity().unwrap_or_default(),
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            if self.tx.is_closed() { " closed" } else { "" }
        )
    }

    fn close(&self) {
        if self.tx.close() {
            debug!(channel = %self.name, "Notify queue closed");
        }
    }
}
