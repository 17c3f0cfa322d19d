//! Fabric orchestrator - coordinates all components.
//!
//! Startup order: notify channels → routing table → sinks → router → ingest
//! server. Shutdown runs in reverse so every accepted message reaches its
//! sink before the sink closes.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use contracts::FabricBlueprint;
use router::{FilterRegistry, IngestServer, MessageRouter, RoutingTable};
use sinks::{ApplySummary, NotifyHub, SinkFactory, SinkRegistry};
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

use super::FabricStats;
use crate::error::CliError;

/// Runtime options for [`Fabric::run`]
#[derive(Debug, Clone, Default)]
pub struct FabricOptions {
    /// Periodic stats report (None = disabled)
    pub stats_interval: Option<Duration>,
    /// Config file to watch for changes
    pub config_path: Option<PathBuf>,
    /// Change check period (None = no reload)
    pub reload_interval: Option<Duration>,
}

/// A running server-side fabric
pub struct Fabric {
    hub: NotifyHub,
    factory: SinkFactory,
    filters: FilterRegistry,
    registry: Arc<SinkRegistry>,
    table: Arc<RoutingTable>,
    router: Arc<MessageRouter>,
    server: Option<IngestServer>,
    local_addr: SocketAddr,
}

impl Fabric {
    /// Build every component and bind the ingest listener
    #[instrument(name = "fabric_build", skip_all, fields(listen = %blueprint.server.listen))]
    pub async fn build(blueprint: &FabricBlueprint) -> Result<Self> {
        let hub = NotifyHub::from_configs(&blueprint.notify).map_err(CliError::Notify)?;
        let filters = FilterRegistry::with_defaults();
        let table = Arc::new(RoutingTable::from_map(
            RoutingTable::compile(&blueprint.routes, &filters).map_err(CliError::Routes)?,
        ));

        let factory = SinkFactory::with_defaults();
        let registry = Arc::new(SinkRegistry::new());
        let summary = match registry.apply(&blueprint.sinks, &factory, &hub).await {
            Ok(summary) => summary,
            Err(e) => {
                hub.close_all();
                return Err(CliError::Sinks(e).into());
            }
        };
        info!(
            sinks = ?summary.created,
            notify = hub.len(),
            topics = table.len(),
            "Sinks and routes ready"
        );

        let router = Arc::new(MessageRouter::start(
            &blueprint.router,
            Arc::clone(&table),
            Arc::clone(&registry),
        ));

        let server = match IngestServer::bind(&blueprint.server.listen, Arc::clone(&router)).await
        {
            Ok(server) => server.with_request_deadline(Duration::from_millis(
                blueprint.server.request_deadline_ms,
            )),
            Err(e) => {
                router.shutdown().await;
                registry.shutdown().await;
                hub.close_all();
                return Err(e).context("Failed to start ingest server");
            }
        };

        Ok(Self {
            hub,
            factory,
            filters,
            registry,
            table,
            router,
            local_addr: server.local_addr(),
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Apply a new blueprint to the running fabric
    ///
    /// Sinks are applied before routes so new routes never point at sinks
    /// that do not exist yet. Notify channels and the listener are fixed at
    /// startup.
    pub async fn reload(&self, blueprint: &FabricBlueprint) -> Result<ApplySummary, CliError> {
        let routes = RoutingTable::compile(&blueprint.routes, &self.filters)?;
        let summary = self
            .registry
            .apply(&blueprint.sinks, &self.factory, &self.hub)
            .await
            .map_err(CliError::Sinks)?;
        self.table.replace(routes);
        info!(
            created = ?summary.created,
            reused = summary.reused.len(),
            retired = ?summary.retired,
            "Configuration reloaded"
        );
        Ok(summary)
    }

    /// Serve until `shutdown` resolves, then tear everything down
    pub async fn run<F>(mut self, options: FabricOptions, shutdown: F) -> Result<FabricStats>
    where
        F: Future<Output = ()> + Send,
    {
        let start_time = Instant::now();
        let listener = self.server.take().context("Ingest server already started")?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));
        info!(addr = %self.local_addr, "Fabric running");

        let mut stats_tick = interval(options.stats_interval);
        let mut reload_tick = interval(options.reload_interval);
        let mut watched = options
            .config_path
            .as_ref()
            .map(|path| (path.clone(), modified(path)));
        let mut reloads = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick(&mut stats_tick) => self.report_stats(),
                _ = tick(&mut reload_tick) => {
                    if let Some((path, last)) = watched.as_mut() {
                        let current = modified(path);
                        if current != *last {
                            *last = current;
                            if self.reload_from(path).await {
                                reloads += 1;
                            }
                        }
                    }
                }
            }
        }

        info!("Shutting down fabric");
        let _ = stop_tx.send(());
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Ingest server stopped with error"),
            Err(e) => warn!(error = ?e, "Ingest server task panicked"),
        }
        self.router.shutdown().await;

        // Sink stat lines must be taken before the registry retires them
        let sinks = self.registry.report_stats();
        self.registry.shutdown().await;
        let stats = FabricStats {
            router: self.router.stats(),
            sinks,
            notify: self.hub.report_stats(),
            reloads,
            duration: start_time.elapsed(),
        };
        self.hub.close_all();
        Ok(stats)
    }

    fn report_stats(&self) {
        info!(router = %self.router.stats(), "Router stats");
        for (name, stat) in self.registry.report_stats() {
            info!(sink = %name, stat = %stat, "Sink stats");
        }
        for (name, stat) in self.hub.report_stats() {
            info!(channel = %name, stat = %stat, "Notify stats");
        }
    }

    /// Reload from disk; a bad file keeps the running configuration
    async fn reload_from(&self, path: &std::path::Path) -> bool {
        let blueprint = match config_loader::ConfigLoader::load_from_path(path) {
            Ok(blueprint) => blueprint,
            Err(e) => {
                warn!(error = %CliError::config(path, e), "Reload skipped");
                return false;
            }
        };
        match self.reload(&blueprint).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Reload failed, keeping current configuration");
                false
            }
        }
    }
}

fn interval(period: Option<Duration>) -> Option<tokio::time::Interval> {
    period.filter(|p| !p.is_zero()).map(|p| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + p, p);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    })
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
