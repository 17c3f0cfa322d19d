//! FabricBlueprint - Config Loader output
//!
//! Describes a complete fabric deployment: ingest listener, router pool,
//! sinks, notify channels, topic routes and the client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Params;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete fabric configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Ingest server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Router worker pool settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Sink name -> descriptor
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkConfig>,

    /// Notify channel name -> descriptor
    #[serde(default)]
    pub notify: BTreeMap<String, NotifyConfig>,

    /// Topic -> routes
    #[serde(default)]
    pub routes: BTreeMap<String, RoutingInfo>,

    /// Client settings (only used by producers)
    #[serde(default)]
    pub client: Option<ClientConfig>,
}

/// Ingest server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upper bound on routing one request; later messages are only queued
    /// if there is room. Keep below the clients' `request_timeout_ms`.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            request_deadline_ms: default_request_deadline_ms(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:7101".to_string()
}

fn default_request_deadline_ms() -> u64 {
    1_000
}

/// Message router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Dispatch worker count
    #[serde(default = "default_router_threads")]
    pub threads: usize,

    /// Dispatch queue capacity shared by all workers
    #[serde(default = "default_router_queue_capacity")]
    pub queue_capacity: usize,

    /// How long `route` waits on a full queue before reporting saturation
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Upper bound for draining the queue on shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threads: default_router_threads(),
            queue_capacity: default_router_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_router_threads() -> usize {
    4
}

fn default_router_queue_capacity() -> usize {
    10_000
}

fn default_enqueue_timeout_ms() -> u64 {
    100
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Sink descriptor: `type` plus type-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink type tag (resolved by the sink factory)
    #[serde(rename = "type")]
    pub sink_type: String,

    /// Handle queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Periodic flush interval (None = flush only on close)
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,

    /// Type-specific fields
    #[serde(flatten)]
    pub params: Params,
}

impl SinkConfig {
    /// Descriptor with default handle settings
    pub fn new(sink_type: impl Into<String>) -> Self {
        Self {
            sink_type: sink_type.into(),
            queue_capacity: default_queue_capacity(),
            flush_interval_ms: None,
            params: Params::new(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1_000
}

/// Notify channel descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Channel type tag (`queue`, `udp`)
    #[serde(rename = "type")]
    pub notify_type: String,

    /// Type-specific fields
    #[serde(flatten)]
    pub params: Params,
}

/// Routes for one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    /// Ordered route list
    #[serde(rename = "where")]
    pub routes: Vec<RouteConfig>,
}

/// One route: destination sink plus optional filter/converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Destination sink name
    pub sink: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<ConverterSpec>,
}

impl RouteConfig {
    /// Unfiltered route to `sink`
    pub fn to_sink(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            filter: None,
            converter: None,
        }
    }

    /// Effective converter: route-level first, then the one nested in the filter
    pub fn effective_converter(&self) -> Option<&ConverterSpec> {
        self.converter
            .as_ref()
            .or_else(|| self.filter.as_ref().and_then(|f| f.converter.as_deref()))
    }
}

/// Filter descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Filter type tag
    #[serde(rename = "type")]
    pub filter_type: String,

    /// Converter applied after this filter passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<Box<ConverterSpec>>,

    #[serde(flatten)]
    pub params: Params,
}

/// Converter descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterSpec {
    /// Converter type tag
    #[serde(rename = "type")]
    pub converter_type: String,

    #[serde(flatten)]
    pub params: Params,
}

/// Load balancer variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerType {
    /// Fixed endpoint list, round-robin
    #[default]
    Static,
}

/// Client send mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// `send` waits for the server acknowledgement
    #[default]
    Sync,
    /// `send` enqueues into a bounded buffer drained in the background
    Async,
}

/// What an async `send` does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferFullPolicy {
    /// Fail immediately, counting the message as lost
    #[default]
    Reject,
    /// Wait up to `async_block_timeout_ms`, then fail
    Block,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub load_balancer_type: LoadBalancerType,

    /// Server endpoints (`host:port`)
    pub server_endpoints: Vec<String>,

    #[serde(default)]
    pub client_mode: ClientMode,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delivery attempts per send (each on the next endpoint)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_async_buffer_capacity")]
    pub async_buffer_capacity: usize,

    #[serde(default = "default_async_batch_size")]
    pub async_batch_size: usize,

    /// How long the background sender waits to fill a batch
    #[serde(default = "default_async_linger_ms")]
    pub async_linger_ms: u64,

    #[serde(default)]
    pub buffer_full_policy: BufferFullPolicy,

    #[serde(default = "default_async_block_timeout_ms")]
    pub async_block_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl ClientConfig {
    /// Static client against the given endpoints, defaults elsewhere
    pub fn new(server_endpoints: Vec<String>, client_mode: ClientMode) -> Self {
        Self {
            load_balancer_type: LoadBalancerType::Static,
            server_endpoints,
            client_mode,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_count: default_retry_count(),
            async_buffer_capacity: default_async_buffer_capacity(),
            async_batch_size: default_async_batch_size(),
            async_linger_ms: default_async_linger_ms(),
            buffer_full_policy: BufferFullPolicy::Reject,
            async_block_timeout_ms: default_async_block_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_async_buffer_capacity() -> usize {
    10_000
}

fn default_async_batch_size() -> usize {
    200
}

fn default_async_linger_ms() -> u64 {
    50
}

fn default_async_block_timeout_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamsExt;

    #[test]
    fn route_descriptor_with_nested_converter() {
        let json = r#"{
            "sink": "sink1",
            "filter": {
                "type": "json_path",
                "path": "/foo/bar",
                "pattern": "^value[02468]$",
                "converter": { "type": "json_compact" }
            }
        }"#;
        let route: RouteConfig = serde_json::from_str(json).unwrap();
        let filter = route.filter.as_ref().unwrap();
        assert_eq!(filter.filter_type, "json_path");
        assert_eq!(filter.params.str_param("path"), Some("/foo/bar"));
        assert!(!filter.params.contains_key("converter"));
        assert_eq!(
            route.effective_converter().map(|c| c.converter_type.as_str()),
            Some("json_compact")
        );
    }

    #[test]
    fn sink_descriptor_collects_type_fields() {
        let toml_str = r#"
type = "local_file"
queue_capacity = 64
directory = "/tmp/out"
max_file_bytes = 4096
"#;
        let sink: SinkConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(sink.sink_type, "local_file");
        assert_eq!(sink.queue_capacity, 64);
        assert_eq!(sink.flush_interval_ms, None);
        assert_eq!(sink.params.str_param("directory"), Some("/tmp/out"));
        assert_eq!(sink.params.u64_param("max_file_bytes"), Some(4096));
    }

    #[test]
    fn client_config_defaults() {
        let json = r#"{ "server_endpoints": ["localhost:7101"] }"#;
        let client: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(client.load_balancer_type, LoadBalancerType::Static);
        assert_eq!(client.client_mode, ClientMode::Sync);
        assert_eq!(client.buffer_full_policy, BufferFullPolicy::Reject);
        assert_eq!(client.retry_count, 3);
    }
}
