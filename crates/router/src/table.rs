//! RoutingTable - topic → ordered routes
//!
//! 整表原子替换：`resolve` 返回当前快照的 `Arc`，替换期间进行中的分发继续使用
//! 旧快照，不会看到半更新状态。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use contracts::{MessageFilter, PayloadConverter, RoutingInfo};
use tracing::info;

use crate::error::RouterError;
use crate::filter::FilterRegistry;

/// One compiled route
#[derive(Clone)]
pub struct CompiledRoute {
    pub sink: String,
    pub filter: Option<Arc<dyn MessageFilter>>,
    pub converter: Option<Arc<dyn PayloadConverter>>,
}

impl CompiledRoute {
    /// Unfiltered, unconverted route to `sink`
    pub fn to_sink(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            filter: None,
            converter: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn MessageFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn PayloadConverter>) -> Self {
        self.converter = Some(converter);
        self
    }
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("sink", &self.sink)
            .field("filter", &self.filter.as_ref().map(|filter| filter.name()))
            .field("converter", &self.converter.as_ref().map(|c| c.name()))
            .finish()
    }
}

/// Full topic → routes map
pub type RouteMap = HashMap<String, Arc<[CompiledRoute]>>;

/// Atomically replaceable routing table
pub struct RoutingTable {
    routes: ArcSwap<RouteMap>,
    /// Shared result for unrouted topics
    empty: Arc<[CompiledRoute]>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::from_map(RouteMap::new())
    }

    pub fn from_map(map: RouteMap) -> Self {
        Self {
            routes: ArcSwap::from_pointee(map),
            empty: Arc::from(Vec::new()),
        }
    }

    /// Compile route descriptors into a route map
    ///
    /// Unknown or malformed filter/converter descriptors fail the whole
    /// compile; nothing is half-built.
    pub fn compile(
        descriptors: &BTreeMap<String, RoutingInfo>,
        registry: &FilterRegistry,
    ) -> Result<RouteMap, RouterError> {
        let mut map = RouteMap::with_capacity(descriptors.len());
        for (topic, info) in descriptors {
            let mut compiled = Vec::with_capacity(info.routes.len());
            for (idx, route) in info.routes.iter().enumerate() {
                let label = format!("routes.{topic}.where[{idx}]");
                let filter = route
                    .filter
                    .as_ref()
                    .map(|spec| registry.create_filter(&label, spec))
                    .transpose()?;
                let converter = route
                    .effective_converter()
                    .map(|spec| registry.create_converter(&label, spec))
                    .transpose()?;
                compiled.push(CompiledRoute {
                    sink: route.sink.clone(),
                    filter,
                    converter,
                });
            }
            map.insert(topic.clone(), Arc::from(compiled));
        }
        Ok(map)
    }

    /// Routes for `topic`; empty for unconfigured topics
    pub fn resolve(&self, topic: &str) -> Arc<[CompiledRoute]> {
        self.routes
            .load()
            .get(topic)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.empty))
    }

    /// Swap in a whole new table
    pub fn replace(&self, map: RouteMap) {
        let topics = map.len();
        self.routes.store(Arc::new(map));
        info!(topics, "Routing table replaced");
    }

    /// Configured topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.routes.load().keys().cloned().collect();
        topics.sort_unstable();
        topics
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptors(value: serde_json::Value) -> BTreeMap<String, RoutingInfo> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unrouted_topic_resolves_empty() {
        let table = RoutingTable::new();
        assert!(table.resolve("nothing").is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_compile_keeps_route_order() {
        let map = RoutingTable::compile(
            &descriptors(json!({
                "topic1": { "where": [ { "sink": "sink1" }, { "sink": "default" } ] },
                "topic4": { "where": [ {
                    "sink": "sink1",
                    "filter": {
                        "type": "json_path",
                        "path": "/foo/bar",
                        "pattern": "^value",
                        "converter": { "type": "json_compact" }
                    }
                } ] }
            })),
            &FilterRegistry::with_defaults(),
        )
        .unwrap();

        let table = RoutingTable::from_map(map);
        let sinks: Vec<_> = table.resolve("topic1").iter().map(|r| r.sink.clone()).collect();
        assert_eq!(sinks, vec!["sink1", "default"]);

        let routes = table.resolve("topic4");
        assert_eq!(routes[0].filter.as_ref().unwrap().name(), "json_path");
        // Converter nested in the filter applies to the route
        assert_eq!(routes[0].converter.as_ref().unwrap().name(), "json_compact");
        assert_eq!(table.topics(), vec!["topic1", "topic4"]);
    }

    #[test]
    fn test_compile_rejects_unknown_converter() {
        let err = RoutingTable::compile(
            &descriptors(json!({
                "topic1": { "where": [ { "sink": "s", "converter": { "type": "xml" } } ] }
            })),
            &FilterRegistry::with_defaults(),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("routes.topic1.where[0]"), "got: {message}");
        assert!(message.contains("unknown converter type 'xml'"), "got: {message}");
    }

    #[test]
    fn test_replace_keeps_captured_snapshot() {
        let mut first = RouteMap::new();
        first.insert("topic1".into(), Arc::from(vec![CompiledRoute::to_sink("old")]));
        let table = RoutingTable::from_map(first);

        let captured = table.resolve("topic1");

        let mut second = RouteMap::new();
        second.insert("topic1".into(), Arc::from(vec![CompiledRoute::to_sink("new")]));
        table.replace(second);

        assert_eq!(captured[0].sink, "old");
        assert_eq!(table.resolve("topic1")[0].sink, "new");
    }
}
