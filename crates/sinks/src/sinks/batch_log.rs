//! BatchLogSink - consumes batch notices from a notify channel
//!
//! Cooperating half of [`LocalFileSink`](super::LocalFileSink): a background
//! task pulls [`BatchReady`] notices, logs them and optionally removes the
//! acknowledged files. Messages routed to this sink directly are only logged.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{BatchReady, ContractError, Message, MessageSink, NotifyRecv, Params, ParamsExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::notify::BatchNotify;

/// How long one `recv` waits before re-checking for shutdown
pub const DEFAULT_POLL_MS: u64 = 500;

/// Configuration for BatchLogSink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLogSinkConfig {
    /// Notify channel to consume
    pub notify: String,
    /// Delete batch files once acknowledged
    pub remove_acked: bool,
    pub poll_interval: Duration,
}

impl BatchLogSinkConfig {
    /// Create config from params map (`notify`, `remove_acked`, `poll_ms`)
    pub fn from_params(sink_name: &str, params: &Params) -> Result<Self, ContractError> {
        let notify = params
            .require_str(&format!("sinks.{sink_name}"), "notify")?
            .to_string();
        let remove_acked = params
            .get("remove_acked")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let poll_ms = params.u64_param("poll_ms").unwrap_or(DEFAULT_POLL_MS).max(1);

        Ok(Self {
            notify,
            remove_acked,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

/// Counters shared with the consumer task
#[derive(Debug, Default)]
struct AckStats {
    batches: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
    remove_failures: AtomicU64,
}

/// Consumer-side sink for batch notices
pub struct BatchLogSink {
    name: String,
    config: BatchLogSinkConfig,
    channel: BatchNotify,
    stats: Arc<AckStats>,
    direct: u64,
    consumer: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl BatchLogSink {
    pub fn new(name: impl Into<String>, config: BatchLogSinkConfig, channel: BatchNotify) -> Self {
        Self {
            name: name.into(),
            config,
            channel,
            stats: Arc::new(AckStats::default()),
            direct: 0,
            consumer: None,
        }
    }

    /// Batches acknowledged so far
    pub fn acked_batches(&self) -> u64 {
        self.stats.batches.load(Ordering::Relaxed)
    }
}

/// Background loop: ack notices until stopped or the channel closes
#[instrument(name = "batch_log_consumer", skip_all, fields(sink = %consumer.name))]
async fn consume(consumer: Consumer, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            received = consumer.channel.recv(consumer.poll_interval) => match received {
                NotifyRecv::Item(notice) => consumer.ack(notice),
                NotifyRecv::Timeout => {}
                NotifyRecv::Closed => {
                    debug!(sink = %consumer.name, "Notify channel closed");
                    return;
                }
            },
        }
    }

    // Pick up notices sent while the producer was shutting down
    while let NotifyRecv::Item(notice) = consumer.channel.recv(Duration::ZERO).await {
        consumer.ack(notice);
    }
}

struct Consumer {
    name: String,
    channel: BatchNotify,
    stats: Arc<AckStats>,
    remove_acked: bool,
    poll_interval: Duration,
}

impl Consumer {
    fn ack(&self, notice: BatchReady) {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.messages.fetch_add(notice.messages, Ordering::Relaxed);
        self.stats.bytes.fetch_add(notice.bytes, Ordering::Relaxed);
        info!(
            sink = %self.name,
            path = %notice.path.display(),
            messages = notice.messages,
            bytes = notice.bytes,
            "Batch acknowledged"
        );

        if self.remove_acked {
            if let Err(e) = fs::remove_file(&notice.path) {
                self.stats.remove_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = %self.name, path = %notice.path.display(), error = %e, "Remove failed");
            }
        }
    }
}

impl MessageSink for BatchLogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "batch_log_sink_open", skip(self), fields(sink = %self.name))]
    async fn open(&mut self) -> Result<(), ContractError> {
        if self.consumer.is_some() {
            return Ok(());
        }
        self.channel.init().await?;

        let consumer = Consumer {
            name: self.name.clone(),
            channel: Arc::clone(&self.channel),
            stats: Arc::clone(&self.stats),
            remove_acked: self.config.remove_acked,
            poll_interval: self.config.poll_interval,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(consume(consumer, stop_rx));
        self.consumer = Some((stop_tx, task));

        debug!(sink = %self.name, channel = %self.config.notify, "Batch consumer started");
        Ok(())
    }

    async fn write(&mut self, message: &Message) -> Result<(), ContractError> {
        self.direct += 1;
        debug!(
            sink = %self.name,
            topic = message.topic(),
            bytes = message.len(),
            "Direct message received"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "batch_log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some((stop, task)) = self.consumer.take() {
            // The task may already have exited on a closed channel
            let _ = stop.send(());
            if let Err(e) = task.await {
                error!(sink = %self.name, error = ?e, "Batch consumer panicked");
            }
        }
        info!(sink = %self.name, batches = self.acked_batches(), "BatchLogSink closed");
        Ok(())
    }

    fn stat(&self) -> String {
        format!(
            "channel={} acked_batches={} acked_messages={} acked_bytes={} remove_failures={} direct={}",
            self.config.notify,
            self.stats.batches.load(Ordering::Relaxed),
            self.stats.messages.load(Ordering::Relaxed),
            self.stats.bytes.load(Ordering::Relaxed),
            self.stats.remove_failures.load(Ordering::Relaxed),
            self.direct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::QueueNotify;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(remove_acked: bool) -> BatchLogSinkConfig {
        BatchLogSinkConfig {
            notify: "batches".to_string(),
            remove_acked,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_acks_notices_and_removes_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch-1.log");
        fs::write(&path, b"data").unwrap();

        let channel: BatchNotify = Arc::new(QueueNotify::<BatchReady>::new("batches", 8));
        let mut sink = BatchLogSink::new("consumer", config(true), Arc::clone(&channel));
        sink.open().await.unwrap();

        assert!(channel.send(BatchReady {
            path: path.clone(),
            messages: 2,
            bytes: 4,
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.acked_batches(), 1);
        assert!(!path.exists());
        sink.close().await.unwrap();
        assert!(sink.stat().contains("acked_messages=2"));
    }

    #[tokio::test]
    async fn test_close_drains_pending_notices() {
        let channel: BatchNotify = Arc::new(QueueNotify::<BatchReady>::new("batches", 8));
        let mut sink = BatchLogSink::new("consumer", config(false), Arc::clone(&channel));
        sink.open().await.unwrap();

        for i in 0..3 {
            channel.send(BatchReady {
                path: format!("missing-{i}.log").into(),
                messages: 1,
                bytes: 1,
            });
        }
        sink.close().await.unwrap();
        assert_eq!(sink.acked_batches(), 3);
    }

    #[test]
    fn test_config_requires_notify() {
        let params: Params = serde_json::from_value(json!({ "remove_acked": true })).unwrap();
        assert!(BatchLogSinkConfig::from_params("consumer", &params).is_err());

        let params: Params =
            serde_json::from_value(json!({ "notify": "batches", "poll_ms": 20 })).unwrap();
        let config = BatchLogSinkConfig::from_params("consumer", &params).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert!(!config.remove_acked);
    }
}
