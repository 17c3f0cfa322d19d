//! SinkHandle - manages a sink with isolated queue and worker task

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, instrument, warn};

use contracts::{Message, MessageSink, SinkConfig};

use crate::error::SinkError;
use crate::metrics::SinkMetrics;

/// Queue and flush settings for one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    pub queue_capacity: usize,
    /// Periodic flush (None = flush only on close)
    pub flush_interval: Option<Duration>,
}

impl HandleOptions {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            flush_interval: config
                .flush_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            flush_interval: None,
        }
    }
}

/// Handle to a running sink worker
///
/// Held by the registry behind an `Arc`; every clone handed to the router is
/// a write lease. The worker is stopped only through [`SinkHandle::shutdown`],
/// which needs the handle by value, i.e. after all leases are gone.
pub struct SinkHandle {
    /// Sink name
    name: String,
    /// Sink type tag
    sink_type: String,
    /// Descriptor this handle was built from (for reuse on reload)
    descriptor: Option<SinkConfig>,
    /// Drains a notify channel other sinks produce into
    notify_consumer: bool,
    /// Channel to send messages to worker
    tx: mpsc::Sender<Message>,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Last `stat()` line reported by the sink itself
    detail: Arc<ArcSwap<String>>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Open the sink and spawn its worker task
    ///
    /// # Errors
    /// `SinkCreation` if `open` fails; nothing is spawned in that case.
    #[instrument(
        name = "sink_handle_spawn",
        skip(sink, sink_type, options),
        fields(sink = %sink.name())
    )]
    pub async fn spawn<S: MessageSink + 'static>(
        mut sink: S,
        sink_type: impl Into<String>,
        options: HandleOptions,
    ) -> Result<Self, SinkError> {
        let name = sink.name().to_string();
        sink.open()
            .await
            .map_err(|e| SinkError::sink_creation(&name, e.to_string()))?;

        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());
        let detail = Arc::new(ArcSwap::from_pointee(sink.stat()));

        let worker = SinkWorker {
            name: name.clone(),
            metrics: Arc::clone(&metrics),
            detail: Arc::clone(&detail),
            flush_interval: options.flush_interval,
        };
        let worker_handle = tokio::spawn(async move {
            worker.run(sink, rx).await;
        });

        debug!(sink = %name, capacity = options.queue_capacity, "SinkHandle spawned");

        Ok(Self {
            name,
            sink_type: sink_type.into(),
            descriptor: None,
            notify_consumer: false,
            tx,
            metrics,
            detail,
            worker_handle,
        })
    }

    /// Remember the descriptor this handle was built from
    pub fn with_descriptor(mut self, descriptor: SinkConfig) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Mark this sink as a notify consumer; it is retired after producers
    pub fn as_notify_consumer(mut self) -> Self {
        self.notify_consumer = true;
        self
    }

    pub fn is_notify_consumer(&self) -> bool {
        self.notify_consumer
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink_type(&self) -> &str {
        &self.sink_type
    }

    pub fn descriptor(&self) -> Option<&SinkConfig> {
        self.descriptor.as_ref()
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Enqueue a message for the sink (non-blocking)
    ///
    /// Returns true if accepted, false if rejected (queue full or worker gone).
    pub fn write(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.metrics.inc_accepted_count();
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(m)) => {
                self.metrics.inc_rejected_count();
                warn!(
                    sink = %self.name,
                    topic = m.topic(),
                    "Queue full, message rejected"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.inc_rejected_count();
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Handle counters plus the sink's own detail line
    pub fn stat(&self) -> String {
        let detail = self.detail.load();
        if detail.is_empty() {
            format!("type={} {}", self.sink_type, self.metrics.snapshot())
        } else {
            format!(
                "type={} {} {}",
                self.sink_type,
                self.metrics.snapshot(),
                detail
            )
        }
    }

    /// Shutdown the sink worker gracefully
    ///
    /// Queued messages are written, then the sink is flushed and closed.
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        // Drop sender to signal worker to stop
        drop(self.tx);
        // Wait for worker to finish
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("name", &self.name)
            .field("sink_type", &self.sink_type)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Worker state shared with the handle
struct SinkWorker {
    name: String,
    metrics: Arc<SinkMetrics>,
    detail: Arc<ArcSwap<String>>,
    flush_interval: Option<Duration>,
}

impl SinkWorker {
    /// Consume messages and write to sink until the handle drops its sender
    #[instrument(
        name = "sink_worker_loop",
        skip(self, sink, rx),
        fields(sink = %self.name)
    )]
    async fn run<S: MessageSink>(self, mut sink: S, mut rx: mpsc::Receiver<Message>) {
        debug!(sink = %self.name, "Sink worker started");

        let mut ticker = self.flush_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(message) = received else { break };
                    self.metrics.set_queue_len(rx.len());
                    self.write_one(&mut sink, &message).await;
                    if rx.is_empty() {
                        self.refresh_detail(&sink);
                    }
                }
                _ = tick(&mut ticker) => {
                    if let Err(e) = sink.flush().await {
                        error!(sink = %self.name, error = %e, "Periodic flush failed");
                    }
                    self.refresh_detail(&sink);
                }
            }
        }

        // Cleanup
        if let Err(e) = sink.flush().await {
            error!(sink = %self.name, error = %e, "Flush failed on shutdown");
        }
        if let Err(e) = sink.close().await {
            error!(sink = %self.name, error = %e, "Close failed on shutdown");
        }
        self.refresh_detail(&sink);

        debug!(sink = %self.name, "Sink worker stopped");
    }

    async fn write_one<S: MessageSink>(&self, sink: &mut S, message: &Message) {
        match sink.write(message).await {
            Ok(()) => {
                self.metrics.inc_write_count();
                observability::record_sink_write(&self.name, true);
            }
            Err(e) => {
                // Continue processing - don't crash on single failure
                self.metrics.inc_failure_count();
                observability::record_sink_write(&self.name, false);
                error!(
                    sink = %self.name,
                    topic = message.topic(),
                    error = %e,
                    "Write failed"
                );
            }
        }
    }

    fn refresh_detail<S: MessageSink>(&self, sink: &S) {
        self.detail.store(Arc::new(sink.stat()));
        observability::record_sink_queue_depth(&self.name, self.metrics.queue_len());
    }
}

/// Next flush tick, or never when periodic flushing is off
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ContractError;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::time::sleep;

    /// Mock sink for testing
    struct MockSink {
        name: String,
        write_count: Arc<AtomicU64>,
        flush_count: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
        should_fail: bool,
        fail_open: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                write_count: Arc::new(AtomicU64::new(0)),
                flush_count: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
                should_fail: false,
                fail_open: false,
                delay_ms: 0,
            }
        }
    }

    impl MessageSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn open(&mut self) -> Result<(), ContractError> {
            if self.fail_open {
                return Err(ContractError::sink_write(&self.name, "cannot open"));
            }
            Ok(())
        }

        async fn write(&mut self, _message: &Message) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.write_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            self.flush_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stat(&self) -> String {
            format!("mock_writes={}", self.write_count.load(Ordering::Relaxed))
        }
    }

    fn message(i: u64) -> Message {
        Message::with_timestamp("topic1", format!("m{i}"), i + 1).unwrap()
    }

    #[tokio::test]
    async fn test_sink_handle_basic() {
        let sink = MockSink::new("test");
        let write_count = Arc::clone(&sink.write_count);
        let closed = Arc::clone(&sink.closed);

        let handle = SinkHandle::spawn(sink, "mock", HandleOptions::default())
            .await
            .unwrap();

        for i in 0..5 {
            assert!(handle.write(message(i)));
        }

        handle.shutdown().await;
        assert_eq!(write_count.load(Ordering::Relaxed), 5);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sink_handle_queue_full() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 100; // Slow sink
        let write_count = Arc::clone(&sink.write_count);

        // Small queue capacity
        let options = HandleOptions {
            queue_capacity: 2,
            flush_interval: None,
        };
        let handle = SinkHandle::spawn(sink, "mock", options).await.unwrap();

        // Send more than queue can hold
        let accepted = (0..10).filter(|i| handle.write(message(*i))).count() as u64;

        // Some should have been rejected
        assert!(handle.metrics().rejected_count() > 0);
        assert_eq!(handle.metrics().accepted_count(), accepted);

        handle.shutdown().await;
        // Every accepted message is written before close
        assert_eq!(write_count.load(Ordering::Relaxed), accepted);
    }

    #[tokio::test]
    async fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;

        let handle = SinkHandle::spawn(sink, "mock", HandleOptions::default())
            .await
            .unwrap();

        for i in 0..3 {
            handle.write(message(i));
        }

        // Give worker time to process
        sleep(Duration::from_millis(50)).await;

        // Should have recorded failures
        assert_eq!(handle.metrics().failure_count(), 3);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        let mut sink = MockSink::new("broken");
        sink.fail_open = true;

        let result = SinkHandle::spawn(sink, "mock", HandleOptions::default()).await;
        assert!(matches!(result, Err(SinkError::SinkCreation { .. })));
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let sink = MockSink::new("flushing");
        let flush_count = Arc::clone(&sink.flush_count);
        let options = HandleOptions {
            queue_capacity: 10,
            flush_interval: Some(Duration::from_millis(10)),
        };

        let handle = SinkHandle::spawn(sink, "mock", options).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        assert!(flush_count.load(Ordering::Relaxed) >= 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stat_includes_sink_detail() {
        let sink = MockSink::new("stats");
        let handle = SinkHandle::spawn(sink, "mock", HandleOptions::default())
            .await
            .unwrap();

        handle.write(message(1));
        sleep(Duration::from_millis(20)).await;

        let stat = handle.stat();
        assert!(stat.starts_with("type=mock"), "got: {stat}");
        assert!(stat.contains("written=1"), "got: {stat}");
        assert!(stat.contains("mock_writes=1"), "got: {stat}");

        handle.shutdown().await;
    }
}
