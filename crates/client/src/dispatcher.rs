//! ClientDispatcher - sync/async message sending
//!
//! # 发送语义
//!
//! - Sync: `send` 返回时消息已被服务端 ack，或返回错误
//! - Async: `send` 只入缓冲区；后台任务按 `async_batch_size` / `async_linger_ms`
//!   攒批发送，重试耗尽后计入 `lost`
//!
//! 每次尝试换一个 endpoint（由 [`LoadBalancer`] 选择）。
//!
//! 请求已写出但等待 ack 超时时结果未知：不重试（避免重复投递），
//! 计入 `unacked` 而不是 `lost`。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_channel::{bounded, Receiver, Sender, TrySendError};
use contracts::{Ack, BufferFullPolicy, ClientConfig, ClientMode, Message, MessageSet};
use observability::{record_client_send, RunningStats, StatsSummary};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::balancer::{self, LoadBalancer};
use crate::error::ClientError;
use crate::transport::Transport;

/// Client counters at one point in time
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Messages handed to `send`
    pub sent: u64,
    /// Messages the server accepted
    pub acked: u64,
    /// Messages given up on
    pub lost: u64,
    /// Messages whose request timed out after being written (may have been routed)
    pub unacked: u64,
    /// Extra attempts after a failure
    pub retried: u64,
    /// Messages waiting in the async buffer
    pub buffered: u64,
    /// Request round-trip latency (ms)
    pub latency: StatsSummary,
}

impl std::fmt::Display for ClientStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} acked={} lost={} unacked={} retried={} buffered={} latency_ms=[{}]",
            self.sent,
            self.acked,
            self.lost,
            self.unacked,
            self.retried,
            self.buffered,
            self.latency
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    acked: AtomicU64,
    lost: AtomicU64,
    unacked: AtomicU64,
    retried: AtomicU64,
    /// Messages in the batch currently being sent
    in_flight: AtomicU64,
    latency: Mutex<RunningStats>,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Settle a set that failed to deliver
    fn record_failure(&self, error: &ClientError, n: u64) {
        if error.is_ambiguous() {
            Self::add(&self.unacked, n);
        } else {
            Self::add(&self.lost, n);
        }
    }

    fn record_latency(&self, latency_ms: f64) {
        if let Ok(mut stats) = self.latency.lock() {
            stats.push(latency_ms);
        }
    }
}

/// State shared with the background sender
struct Shared {
    balancer: Arc<dyn LoadBalancer>,
    transport: Transport,
    counters: Counters,
    attempts: u32,
}

impl Shared {
    /// Deliver one set, moving to the next endpoint after each failure
    ///
    /// Only a set with nothing accepted is retried, so a partial ack is never
    /// re-sent. A request timeout ends the loop: the server may be routing
    /// the set already.
    async fn deliver(&self, set: &MessageSet) -> Result<Ack, ClientError> {
        let mut last = ClientError::NoEndpoints;

        for attempt in 0..self.attempts {
            let Some(endpoint) = self.balancer.choose() else {
                return Err(ClientError::NoEndpoints);
            };
            if attempt > 0 {
                Counters::add(&self.counters.retried, 1);
            }

            let started = Instant::now();
            let result = self.transport.request(&endpoint, set).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(ack) if ack.accepted > 0 || set.is_empty() => {
                    record_client_send(&endpoint, true, latency_ms);
                    self.counters.record_latency(latency_ms);
                    return Ok(ack);
                }
                Ok(ack) => {
                    record_client_send(&endpoint, false, latency_ms);
                    last = ClientError::Rejected {
                        endpoint,
                        rejected: ack.rejected,
                    };
                }
                Err(e) if e.is_ambiguous() => {
                    record_client_send(&endpoint, false, latency_ms);
                    warn!(attempt, error = %e, "Request outcome unknown, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    record_client_send(&endpoint, false, latency_ms);
                    last = e;
                }
            }
            debug!(attempt, error = %last, "Send attempt failed");
        }

        Err(ClientError::RetriesExhausted {
            attempts: self.attempts,
            last: Box::new(last),
        })
    }

    /// Background path: deliver a batch and settle its counters
    async fn flush_batch(&self, batch: Vec<Message>) {
        let n = batch.len() as u64;
        self.counters.in_flight.store(n, Ordering::Relaxed);

        match self.deliver(&MessageSet::new(batch)).await {
            Ok(ack) => {
                Counters::add(&self.counters.acked, u64::from(ack.accepted));
                Counters::add(&self.counters.lost, u64::from(ack.rejected));
                if ack.rejected > 0 {
                    warn!(rejected = ack.rejected, "Server rejected part of a batch");
                }
            }
            Err(e) => {
                self.counters.record_failure(&e, n);
                warn!(messages = n, error = %e, "Batch not delivered");
            }
        }
        self.counters.in_flight.store(0, Ordering::Relaxed);
    }
}

struct AsyncBuffer {
    tx: Sender<Message>,
    policy: BufferFullPolicy,
    block_timeout: Duration,
}

/// Load-balanced message client
///
/// # Example
///
/// ```ignore
/// let client = ClientDispatcher::new(ClientConfig::new(endpoints, ClientMode::Sync))?;
/// client.send(Message::new("topic1", "payload")?).await?;
/// client.shutdown().await;
/// ```
pub struct ClientDispatcher {
    shared: Arc<Shared>,
    mode: ClientMode,
    buffer: Option<AsyncBuffer>,
    sender: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
    closed: AtomicBool,
}

impl ClientDispatcher {
    /// Create a client using the balancer named in `config`
    ///
    /// Async mode spawns the background sender, so this must run inside a
    /// tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.server_endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        let balancer = balancer::from_config(&config);
        Ok(Self::with_balancer(config, balancer))
    }

    /// Create a client with a caller-supplied balancer
    pub fn with_balancer(config: ClientConfig, balancer: Arc<dyn LoadBalancer>) -> Self {
        let shared = Arc::new(Shared {
            balancer,
            transport: Transport::new(
                Duration::from_millis(config.connect_timeout_ms),
                Duration::from_millis(config.request_timeout_ms),
            ),
            counters: Counters::default(),
            attempts: config.retry_count.max(1),
        });

        let (buffer, sender) = match config.client_mode {
            ClientMode::Sync => (None, None),
            ClientMode::Async => {
                let (tx, rx) = bounded(config.async_buffer_capacity.max(1));
                let task = tokio::spawn(run_sender(
                    Arc::clone(&shared),
                    rx,
                    config.async_batch_size.max(1),
                    Duration::from_millis(config.async_linger_ms),
                ));
                let buffer = AsyncBuffer {
                    tx,
                    policy: config.buffer_full_policy,
                    block_timeout: Duration::from_millis(config.async_block_timeout_ms),
                };
                (Some(buffer), Some(task))
            }
        };

        info!(
            mode = ?config.client_mode,
            balancer = shared.balancer.name(),
            endpoints = ?config.server_endpoints,
            "Client started"
        );

        Self {
            shared,
            mode: config.client_mode,
            buffer,
            sender: Mutex::new(sender),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            closed: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    /// Send one message according to the client mode
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Counters::add(&self.shared.counters.sent, 1);

        match &self.buffer {
            None => self.send_now(MessageSet::new(vec![message])).await.map(|_| ()),
            Some(buffer) => self.enqueue(buffer, message).await,
        }
    }

    /// Send a whole set synchronously, regardless of mode
    pub async fn send_batch(&self, messages: Vec<Message>) -> Result<Ack, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Counters::add(&self.shared.counters.sent, messages.len() as u64);
        self.send_now(MessageSet::new(messages)).await
    }

    async fn send_now(&self, set: MessageSet) -> Result<Ack, ClientError> {
        let counters = &self.shared.counters;
        match self.shared.deliver(&set).await {
            Ok(ack) => {
                Counters::add(&counters.acked, u64::from(ack.accepted));
                Counters::add(&counters.lost, u64::from(ack.rejected));
                Ok(ack)
            }
            Err(e) => {
                counters.record_failure(&e, set.len() as u64);
                Err(e)
            }
        }
    }

    async fn enqueue(&self, buffer: &AsyncBuffer, message: Message) -> Result<(), ClientError> {
        let message = match buffer.tx.try_send(message) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(ClientError::Closed),
            Err(TrySendError::Full(message)) => message,
        };

        let result = match buffer.policy {
            BufferFullPolicy::Reject => Err(ClientError::BufferFull),
            BufferFullPolicy::Block => {
                match tokio::time::timeout(buffer.block_timeout, buffer.tx.send(message)).await {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(_)) => return Err(ClientError::Closed),
                    Err(_) => Err(ClientError::BufferFull),
                }
            }
        };
        Counters::add(&self.shared.counters.lost, 1);
        result
    }

    /// Replace the endpoint set; buffered messages are kept
    pub fn update_endpoints(&self, endpoints: Vec<String>) {
        self.shared.transport.retain(&endpoints);
        self.shared.balancer.update(endpoints);
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.shared.balancer.endpoints()
    }

    pub fn stats(&self) -> ClientStats {
        let counters = &self.shared.counters;
        ClientStats {
            sent: counters.sent.load(Ordering::Relaxed),
            acked: counters.acked.load(Ordering::Relaxed),
            lost: counters.lost.load(Ordering::Relaxed),
            unacked: counters.unacked.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            buffered: self.buffer.as_ref().map_or(0, |b| b.tx.len() as u64),
            latency: counters
                .latency
                .lock()
                .map(|stats| stats.summary())
                .unwrap_or_default(),
        }
    }

    /// Drain the async buffer within the grace period, then release
    ///
    /// Whatever is still undelivered after the grace period is counted as
    /// lost. Idempotent.
    #[instrument(name = "client_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(buffer) = &self.buffer {
            buffer.tx.close();
        }

        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut task) = sender {
            if tokio::time::timeout(self.shutdown_grace, &mut task)
                .await
                .is_err()
            {
                task.abort();
                let counters = &self.shared.counters;
                let abandoned = counters.in_flight.swap(0, Ordering::Relaxed)
                    + self.buffer.as_ref().map_or(0, |b| b.tx.len() as u64);
                Counters::add(&counters.lost, abandoned);
                warn!(
                    abandoned,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Client buffer not drained in time"
                );
            }
        }

        self.shared.transport.clear();
        info!(stats = %self.stats(), "Client stopped");
    }
}

/// Background sender: batch up buffered messages and deliver them
///
/// Exits once the buffer is closed and empty.
#[instrument(name = "client_sender", skip_all)]
async fn run_sender(
    shared: Arc<Shared>,
    rx: Receiver<Message>,
    batch_size: usize,
    linger: Duration,
) {
    while let Ok(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);

        let deadline = tokio::time::Instant::now() + linger;
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(message) => {
                    batch.push(message);
                    continue;
                }
                Err(async_channel::TryRecvError::Closed) => break,
                Err(async_channel::TryRecvError::Empty) => {}
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(message)) => batch.push(message),
                // Closed, or linger expired
                Ok(Err(_)) | Err(_) => break,
            }
        }

        shared.flush_batch(batch).await;
    }
    debug!("Client sender exited");
}
