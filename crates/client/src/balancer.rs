//! Endpoint selection

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use contracts::{ClientConfig, LoadBalancerType};
use tracing::info;

/// Picks the endpoint for the next attempt
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Next endpoint, `None` when the set is empty
    fn choose(&self) -> Option<String>;

    /// Replace the endpoint set; takes effect on the next `choose`
    fn update(&self, endpoints: Vec<String>);

    /// Current endpoint set
    fn endpoints(&self) -> Arc<Vec<String>>;
}

/// Build the balancer named by the config
pub fn from_config(config: &ClientConfig) -> Arc<dyn LoadBalancer> {
    match config.load_balancer_type {
        LoadBalancerType::Static => {
            Arc::new(StaticLoadBalancer::new(config.server_endpoints.clone()))
        }
    }
}

/// Caller-supplied endpoint list, round-robin
#[derive(Debug)]
pub struct StaticLoadBalancer {
    endpoints: ArcSwap<Vec<String>>,
    cursor: AtomicUsize,
}

impl StaticLoadBalancer {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(endpoints),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for StaticLoadBalancer {
    fn name(&self) -> &'static str {
        "static"
    }

    fn choose(&self) -> Option<String> {
        let endpoints = self.endpoints.load();
        if endpoints.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[idx].clone())
    }

    fn update(&self, endpoints: Vec<String>) {
        info!(endpoints = ?endpoints, "Endpoint set replaced");
        self.endpoints.store(Arc::new(endpoints));
    }

    fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.load_full()
    }
}
