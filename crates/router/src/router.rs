//! MessageRouter - bounded dispatch queue + worker pool
//!
//! `route` 只负责入队；worker 逐条执行 `dispatch`：
//! 解析路由 → 过滤 → 转换 → 分发时查找 sink → 写入。
//!
//! 单条路由的失败（过滤器错误或 panic、sink 缺失、sink 拒绝）只影响这一条路由，
//! 计数后继续处理其余路由。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use contracts::{ContractError, Message, RouterConfig};
use observability::RouteOutcomeLabel;
use sinks::SinkRegistry;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::{RouterMetrics, RouterStats};
use crate::table::{CompiledRoute, RoutingTable};

/// Result of handing a message to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued for dispatch
    Enqueued,
    /// Queue stayed full past the enqueue timeout; the message was dropped
    Saturated,
    /// Router is shut down
    Closed,
}

/// Per-route results of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routes configured for the topic
    pub routes: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub filtered_out: usize,
    pub filter_errors: usize,
    pub missing_sink: usize,
}

impl DispatchReport {
    /// Write attempts made (never more than `routes`)
    pub fn attempts(&self) -> usize {
        self.delivered + self.rejected
    }
}

/// Shared by the router handle and its workers
struct Dispatcher {
    table: Arc<RoutingTable>,
    registry: Arc<SinkRegistry>,
    metrics: Arc<RouterMetrics>,
}

impl Dispatcher {
    fn dispatch(&self, message: &Message) -> DispatchReport {
        self.metrics.record_received(message.topic());

        // Snapshot: a concurrent table replace does not affect this message
        let routes = self.table.resolve(message.topic());
        let mut report = DispatchReport {
            routes: routes.len(),
            ..Default::default()
        };

        if routes.is_empty() {
            self.metrics.record_unrouted();
            debug!(topic = message.topic(), "No routes for topic");
            return report;
        }
        self.metrics.record_routed();

        for route in routes.iter() {
            let outcome = self.deliver(route, message);
            match outcome {
                RouteOutcomeLabel::Delivered => report.delivered += 1,
                RouteOutcomeLabel::Rejected => report.rejected += 1,
                RouteOutcomeLabel::FilteredOut => report.filtered_out += 1,
                RouteOutcomeLabel::FilterError => report.filter_errors += 1,
                RouteOutcomeLabel::MissingSink => report.missing_sink += 1,
            }
            self.metrics.record_outcome(&route.sink, outcome);
        }
        report
    }

    fn deliver(&self, route: &CompiledRoute, message: &Message) -> RouteOutcomeLabel {
        let prepared = match prepare(route, message) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return RouteOutcomeLabel::FilteredOut,
            Err(e) => {
                warn!(
                    topic = message.topic(),
                    sink = %route.sink,
                    error = %e,
                    "Route dropped by filter/converter failure"
                );
                return RouteOutcomeLabel::FilterError;
            }
        };

        // Looked up per message so a replaced sink takes effect immediately;
        // the lease keeps it open until this write returns.
        let Some(sink) = self.registry.get(&route.sink) else {
            warn!(topic = message.topic(), sink = %route.sink, "Route target sink not registered");
            return RouteOutcomeLabel::MissingSink;
        };

        if sink.write(prepared) {
            RouteOutcomeLabel::Delivered
        } else {
            debug!(topic = message.topic(), sink = %route.sink, "Sink rejected message");
            RouteOutcomeLabel::Rejected
        }
    }
}

/// Filter then convert; `Ok(None)` means filtered out
///
/// Panics raised by plugin code are converted into filter errors.
fn prepare(route: &CompiledRoute, message: &Message) -> Result<Option<Message>, ContractError> {
    catch_unwind(AssertUnwindSafe(|| {
        if let Some(filter) = &route.filter {
            if !filter.test(message)? {
                return Ok(None);
            }
        }
        match &route.converter {
            Some(converter) => Ok(Some(message.with_payload(converter.convert(message)?))),
            None => Ok(Some(message.clone())),
        }
    }))
    .unwrap_or_else(|panic| {
        let name = route
            .filter
            .as_ref()
            .map(|f| f.name())
            .or_else(|| route.converter.as_ref().map(|c| c.name()))
            .unwrap_or("route");
        Err(ContractError::filter(name, format!("panicked: {}", panic_message(&*panic))))
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Message router
///
/// # Example
///
/// ```ignore
/// let router = MessageRouter::start(&config.router, table, registry);
/// router.route(message).await;
/// router.shutdown().await;
/// ```
pub struct MessageRouter {
    tx: Sender<Message>,
    dispatcher: Arc<Dispatcher>,
    enqueue_timeout: Duration,
    shutdown_grace: Duration,
    workers: Mutex<Option<Workers>>,
}

/// Worker tasks plus a receiver to account for what they leave behind
struct Workers {
    tasks: JoinSet<()>,
    rx: Receiver<Message>,
}

impl MessageRouter {
    /// Spawn the worker pool
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &RouterConfig,
        table: Arc<RoutingTable>,
        registry: Arc<SinkRegistry>,
    ) -> Self {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let dispatcher = Arc::new(Dispatcher {
            table,
            registry,
            metrics: Arc::new(RouterMetrics::new()),
        });

        let threads = config.threads.max(1);
        let mut tasks = JoinSet::new();
        for worker_id in 0..threads {
            tasks.spawn(run_worker(worker_id, rx.clone(), Arc::clone(&dispatcher)));
        }
        info!(
            threads,
            queue_capacity = config.queue_capacity,
            "Message router started"
        );

        Self {
            tx,
            dispatcher,
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            workers: Mutex::new(Some(Workers { tasks, rx })),
        }
    }

    /// Queue a message for dispatch
    ///
    /// Waits at most `enqueue_timeout` on a full queue.
    pub async fn route(&self, message: Message) -> RouteOutcome {
        let message = match self.tx.try_send(message) {
            Ok(()) => return RouteOutcome::Enqueued,
            Err(TrySendError::Closed(_)) => return RouteOutcome::Closed,
            Err(TrySendError::Full(message)) => message,
        };

        match tokio::time::timeout(self.enqueue_timeout, self.tx.send(message)).await {
            Ok(Ok(())) => RouteOutcome::Enqueued,
            Ok(Err(_)) => RouteOutcome::Closed,
            Err(_) => {
                self.dispatcher.metrics.record_saturated();
                warn!(
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Dispatch queue saturated, message dropped"
                );
                RouteOutcome::Saturated
            }
        }
    }

    /// Queue a message without waiting
    pub fn try_route(&self, message: Message) -> RouteOutcome {
        match self.tx.try_send(message) {
            Ok(()) => RouteOutcome::Enqueued,
            Err(TrySendError::Closed(_)) => RouteOutcome::Closed,
            Err(TrySendError::Full(_)) => {
                self.dispatcher.metrics.record_saturated();
                RouteOutcome::Saturated
            }
        }
    }

    /// Dispatch on the caller's task, bypassing the queue
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        self.dispatcher.dispatch(message)
    }

    /// Messages waiting in the dispatch queue
    pub fn queue_len(&self) -> usize {
        self.tx.len()
    }

    pub fn stats(&self) -> RouterStats {
        self.dispatcher.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop accepting messages and let workers drain the queue
    ///
    /// Workers still running after the grace period are aborted; messages
    /// still queued at that point are counted as `dropped_on_shutdown`. A
    /// dispatch already in progress runs to completion. Idempotent.
    #[instrument(name = "router_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.tx.close();

        let workers = match self.workers.lock() {
            Ok(mut workers) => workers.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(Workers { mut tasks, rx }) = workers else {
            return;
        };

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Router worker panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tasks.abort_all();
            // Each queued message is taken either by a worker or here, never both
            let mut dropped = 0u64;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            self.dispatcher.metrics.record_dropped_on_shutdown(dropped);
            warn!(
                dropped,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Router workers did not drain in time, aborted"
            );
        }
        info!(stats = %self.stats(), "Message router stopped");
    }
}

#[instrument(name = "router_worker", skip(rx, dispatcher))]
async fn run_worker(worker_id: usize, rx: Receiver<Message>, dispatcher: Arc<Dispatcher>) {
    debug!(worker_id, "Router worker started");
    // recv fails only once the queue is closed and empty
    while let Ok(message) = rx.recv().await {
        dispatcher.dispatch(&message);
    }
    debug!(worker_id, "Router worker exited");
}
