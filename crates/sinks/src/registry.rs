//! SinkRegistry - name → live sink handle, with atomic replacement
//!
//! Readers take a snapshot with a single atomic load and clone the
//! `Arc<SinkHandle>` they need into a [`SinkLease`]. Replacement swaps the
//! whole map, then retires every handle that is no longer present: the
//! retiring task waits until it holds the last reference (no writer can
//! still be using it) and only then drains, flushes and closes the sink.
//! Dropping a lease wakes the waiting retirements.
//!
//! Notify consumers (`batch_log`) are retired after every other sink, so the
//! last batch notice a producer sends on close still finds its reader.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use contracts::SinkConfig;

use crate::error::SinkError;
use crate::factory::SinkFactory;
use crate::handle::SinkHandle;
use crate::notify::NotifyHub;

type SinkMap = HashMap<String, Arc<SinkHandle>>;

/// Re-check period for references held outside a lease (map snapshots)
const QUIESCE_RECHECK: Duration = Duration::from_millis(200);
/// Warn when a retired sink stays leased this long
const QUIESCE_WARN_AFTER: Duration = Duration::from_secs(5);

/// What [`SinkRegistry::apply`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: Vec<String>,
    pub reused: Vec<String>,
    pub retired: Vec<String>,
}

/// Write lease on a registered sink
///
/// Hold it only for the duration of a write; a retired sink cannot close
/// while any lease is outstanding.
pub struct SinkLease {
    handle: Arc<SinkHandle>,
    // Dropped after `handle`, so waiters see the reference already gone
    _release: ReleaseSignal,
}

impl SinkLease {
    /// Both leases refer to the same handle instance
    pub fn same_handle(&self, other: &SinkLease) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl Deref for SinkLease {
    type Target = SinkHandle;

    fn deref(&self) -> &SinkHandle {
        &self.handle
    }
}

impl std::fmt::Debug for SinkLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SinkLease").field(&*self.handle).finish()
    }
}

struct ReleaseSignal(Arc<Notify>);

impl Drop for ReleaseSignal {
    fn drop(&mut self) {
        self.0.notify_waiters();
    }
}

/// Registry of live sinks
pub struct SinkRegistry {
    sinks: ArcSwap<SinkMap>,
    /// Serializes writers; readers never take it
    update_lock: Mutex<()>,
    /// Signalled whenever a lease is dropped
    released: Arc<Notify>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: ArcSwap::from_pointee(HashMap::new()),
            update_lock: Mutex::new(()),
            released: Arc::new(Notify::new()),
        }
    }

    /// Write lease on the sink called `name`
    pub fn get(&self, name: &str) -> Option<SinkLease> {
        let handle = self.sinks.load().get(name).cloned()?;
        Some(SinkLease {
            handle,
            _release: ReleaseSignal(Arc::clone(&self.released)),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.load().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sinks.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sinks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.load().is_empty()
    }

    /// Per-sink diagnostic line
    pub fn report_stats(&self) -> BTreeMap<String, String> {
        self.sinks
            .load()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.stat()))
            .collect()
    }

    /// Replace the whole registry
    ///
    /// Returns once every handle that was replaced has been closed.
    #[instrument(name = "sink_registry_set", skip_all, fields(sinks = sinks.len()))]
    pub async fn set(&self, sinks: HashMap<String, SinkHandle>) -> Vec<String> {
        let map = sinks
            .into_iter()
            .map(|(name, handle)| (name, Arc::new(handle)))
            .collect();
        let _guard = self.update_lock.lock().await;
        self.install(map).await
    }

    /// Rebuild the registry from descriptors
    ///
    /// Handles whose descriptor is unchanged are carried over as-is. If any
    /// sink fails to build, the ones built so far are shut down and the
    /// registry is left untouched.
    ///
    /// # Errors
    /// The first factory error, prefixed with the sink name.
    #[instrument(name = "sink_registry_apply", skip_all, fields(sinks = configs.len()))]
    pub async fn apply(
        &self,
        configs: &BTreeMap<String, SinkConfig>,
        factory: &SinkFactory,
        hub: &NotifyHub,
    ) -> Result<ApplySummary, SinkError> {
        let _guard = self.update_lock.lock().await;
        let current = self.sinks.load_full();

        let mut next = SinkMap::with_capacity(configs.len());
        let mut summary = ApplySummary::default();
        let mut built = Vec::new();

        for (name, config) in configs {
            if let Some(existing) = current.get(name) {
                if existing.descriptor() == Some(config) {
                    next.insert(name.clone(), Arc::clone(existing));
                    summary.reused.push(name.clone());
                    continue;
                }
            }

            match factory.create(name, config, hub).await {
                Ok(handle) => {
                    built.push(name.clone());
                    next.insert(name.clone(), Arc::new(handle));
                    summary.created.push(name.clone());
                }
                Err(e) => {
                    error!(sink = %name, error = %e, "Sink build failed, rolling back");
                    drop(current);
                    self.rollback(&mut next, &built).await;
                    return Err(match e {
                        SinkError::SinkCreation { .. } => e,
                        other => SinkError::sink_creation(name, other.to_string()),
                    });
                }
            }
        }
        drop(current);

        summary.retired = self.install(next).await;
        info!(
            created = summary.created.len(),
            reused = summary.reused.len(),
            retired = summary.retired.len(),
            "Sink registry applied"
        );
        Ok(summary)
    }

    /// Retire every sink
    #[instrument(name = "sink_registry_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let _guard = self.update_lock.lock().await;
        let retired = self.install(SinkMap::new()).await;
        info!(retired = retired.len(), "Sink registry shut down");
    }

    /// Swap in `next` and retire what it no longer contains
    ///
    /// Producers close first; notify consumers close once they are done.
    async fn install(&self, next: SinkMap) -> Vec<String> {
        let previous = self.sinks.swap(Arc::new(next));
        let current = self.sinks.load();

        let retiring: Vec<(String, Arc<SinkHandle>)> = previous
            .iter()
            .filter(|(name, old)| {
                current
                    .get(name.as_str())
                    .is_none_or(|new| !Arc::ptr_eq(new, old))
            })
            .map(|(name, old)| (name.clone(), Arc::clone(old)))
            .collect();
        drop(current);
        drop(previous);

        let names: Vec<String> = retiring.iter().map(|(name, _)| name.clone()).collect();
        let (consumers, producers): (Vec<_>, Vec<_>) = retiring
            .into_iter()
            .map(|(_, handle)| handle)
            .partition(|handle| handle.is_notify_consumer());
        self.retire_all(producers).await;
        self.retire_all(consumers).await;
        names
    }

    /// Retire `handles` concurrently
    async fn retire_all(&self, handles: Vec<Arc<SinkHandle>>) {
        let mut tasks = JoinSet::new();
        for handle in handles {
            tasks.spawn(retire(handle, Arc::clone(&self.released)));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Sink retirement task failed");
            }
        }
    }

    /// Shut down handles built during a failed `apply`
    async fn rollback(&self, next: &mut SinkMap, built: &[String]) {
        let handles = built.iter().filter_map(|name| next.remove(name)).collect();
        self.retire_all(handles).await;
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for quiescence, then close
async fn retire(mut handle: Arc<SinkHandle>, released: Arc<Notify>) {
    let name = handle.name().to_string();
    let started = Instant::now();
    let mut warned = false;

    loop {
        // Registered before the check so a release in between is not missed
        let notified = released.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match Arc::try_unwrap(handle) {
            Ok(owned) => {
                debug!(sink = %name, waited_ms = started.elapsed().as_millis() as u64, "Sink quiescent");
                owned.shutdown().await;
                return;
            }
            Err(shared) => {
                handle = shared;
                if !warned && started.elapsed() >= QUIESCE_WARN_AFTER {
                    warned = true;
                    warn!(
                        sink = %name,
                        leases = Arc::strong_count(&handle) - 1,
                        "Retired sink still leased"
                    );
                }
                let _ = timeout(QUIESCE_RECHECK, notified).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, Message, MessageSink};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use crate::handle::HandleOptions;

    struct TrackingSink {
        name: String,
        writes: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
    }

    impl MessageSink for TrackingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn open(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn write(&mut self, _message: &Message) -> Result<(), ContractError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stat(&self) -> String {
            String::new()
        }
    }

    async fn tracking(name: &str) -> (SinkHandle, Arc<AtomicU64>, Arc<AtomicBool>) {
        let writes = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let sink = TrackingSink {
            name: name.to_string(),
            writes: Arc::clone(&writes),
            closed: Arc::clone(&closed),
        };
        let handle = SinkHandle::spawn(sink, "tracking", HandleOptions::default())
            .await
            .unwrap();
        (handle, writes, closed)
    }

    fn message() -> Message {
        Message::new("topic1", "x").unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let registry = SinkRegistry::new();
        let (handle, writes, _) = tracking("sink1").await;
        registry
            .set(HashMap::from([("sink1".to_string(), handle)]))
            .await;

        assert_eq!(registry.names(), vec!["sink1"]);
        assert!(registry.get("missing").is_none());
        let lease = registry.get("sink1").unwrap();
        assert!(lease.write(message()));
        drop(lease);

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replaced_sink_closes_only_after_lease_released() {
        let registry = Arc::new(SinkRegistry::new());
        let (old, old_writes, old_closed) = tracking("sink1").await;
        registry
            .set(HashMap::from([("sink1".to_string(), old)]))
            .await;

        // A writer holds a lease across the swap
        let lease = registry.get("sink1").unwrap();

        let (new, _, _) = tracking("sink1").await;
        let swapper = Arc::clone(&registry);
        let swap = tokio::spawn(async move {
            swapper
                .set(HashMap::from([("sink1".to_string(), new)]))
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        // New instance is visible, old one still open for the leaseholder
        assert!(!registry.get("sink1").unwrap().same_handle(&lease));
        assert!(!old_closed.load(Ordering::SeqCst));
        assert!(lease.write(message()));
        drop(lease);

        let retired = swap.await.unwrap();
        assert_eq!(retired, vec!["sink1"]);
        assert!(old_closed.load(Ordering::SeqCst));
        // Accepted message was written before close
        assert_eq!(old_writes.load(Ordering::SeqCst), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_apply_reuses_unchanged_and_rolls_back_on_error() {
        let registry = SinkRegistry::new();
        let factory = SinkFactory::with_defaults();
        let hub = NotifyHub::new();

        let mut configs = BTreeMap::new();
        configs.insert("sink1".to_string(), SinkConfig::new("null"));
        configs.insert("default".to_string(), SinkConfig::new("log"));
        let summary = registry.apply(&configs, &factory, &hub).await.unwrap();
        assert_eq!(summary.created, vec!["default", "sink1"]);
        let sink1 = registry.get("sink1").unwrap();

        // Change only `default`
        let mut changed = SinkConfig::new("log");
        changed.queue_capacity = 10;
        configs.insert("default".to_string(), changed);
        let summary = registry.apply(&configs, &factory, &hub).await.unwrap();
        assert_eq!(summary.reused, vec!["sink1"]);
        assert_eq!(summary.created, vec!["default"]);
        assert_eq!(summary.retired, vec!["default"]);
        assert!(registry.get("sink1").unwrap().same_handle(&sink1));
        drop(sink1);

        // A bad descriptor leaves the registry as it was
        configs.insert("broken".to_string(), SinkConfig::new("s3"));
        let err = registry.apply(&configs, &factory, &hub).await.unwrap_err();
        assert!(err.to_string().contains("broken"), "got: {err}");
        assert_eq!(registry.names(), vec!["default", "sink1"]);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_lease_release_wakes_retirement() {
        let registry = Arc::new(SinkRegistry::new());
        let (handle, _, closed) = tracking("sink1").await;
        registry
            .set(HashMap::from([("sink1".to_string(), handle)]))
            .await;

        let lease = registry.get("sink1").unwrap();
        let shutdown = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!closed.load(Ordering::SeqCst));

        let released = Instant::now();
        drop(lease);
        shutdown.await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
        // Woken by the release, not by the periodic re-check
        assert!(released.elapsed() < QUIESCE_RECHECK / 2);
    }

    #[tokio::test]
    async fn test_notify_consumer_retired_after_producer() {
        let dir = tempfile::tempdir().unwrap();
        let mut notify = BTreeMap::new();
        notify.insert(
            "batches".to_string(),
            contracts::NotifyConfig {
                notify_type: "queue".to_string(),
                params: contracts::Params::new(),
            },
        );
        let hub = NotifyHub::from_configs(&notify).unwrap();
        let factory = SinkFactory::with_defaults();

        let mut producer = SinkConfig::new("local_file");
        producer.params = serde_json::from_value(serde_json::json!({
            "directory": dir.path(),
            "notify": "batches"
        }))
        .unwrap();
        let mut consumer = SinkConfig::new("batch_log");
        consumer.params =
            serde_json::from_value(serde_json::json!({ "notify": "batches", "poll_ms": 10 }))
                .unwrap();
        let configs = BTreeMap::from([
            ("local".to_string(), producer),
            ("uploader".to_string(), consumer),
        ]);

        let registry = SinkRegistry::new();
        registry.apply(&configs, &factory, &hub).await.unwrap();
        {
            let local = registry.get("local").unwrap();
            for i in 0..3 {
                assert!(local.write(Message::new("topic1", format!("m{i}")).unwrap()));
            }
        }

        // The pending batch is only rotated (and announced) on close
        registry.shutdown().await;
        let stat = &hub.report_stats()["batches"];
        assert!(stat.contains("sent=1 received=1"), "got: {stat}");
    }

    #[tokio::test]
    async fn test_report_stats() {
        let registry = SinkRegistry::new();
        let (handle, _, _) = tracking("sink1").await;
        registry
            .set(HashMap::from([("sink1".to_string(), handle)]))
            .await;

        let stats = registry.report_stats();
        assert!(stats["sink1"].starts_with("type=tracking"), "got: {stats:?}");

        registry.shutdown().await;
    }
}
