//! SinkFactory - builds sink handles from descriptors
//!
//! Maps the descriptor `type` tag to a [`SinkBuilder`]. Built-in types are
//! `log`, `null`, `local_file` and `batch_log`; more can be registered.
//!
//! # Example
//!
//! ```ignore
//! let factory = SinkFactory::with_defaults();
//! let handle = factory.create("sink1", &config, &hub).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, instrument};

use contracts::{ParamsExt, SinkConfig};

use crate::error::SinkError;
use crate::handle::{HandleOptions, SinkHandle};
use crate::notify::NotifyHub;
use crate::sinks::{
    BatchLogSink, BatchLogSinkConfig, LocalFileSink, LocalFileSinkConfig, LogSink, NullSink,
};

/// Everything a builder may need for one sink
pub struct BuildContext<'a> {
    pub name: &'a str,
    pub config: &'a SinkConfig,
    pub hub: &'a NotifyHub,
}

impl BuildContext<'_> {
    pub fn options(&self) -> HandleOptions {
        HandleOptions::from_config(self.config)
    }
}

/// Builder for one sink type
///
/// Returns a running handle: the sink is opened before its worker starts, so
/// a failed open never produces a visible sink.
#[async_trait]
pub trait SinkBuilder: Send + Sync {
    /// Descriptor `type` tag
    fn sink_type(&self) -> &'static str;

    async fn build(&self, ctx: &BuildContext<'_>) -> Result<SinkHandle, SinkError>;
}

/// Registry of sink builders
pub struct SinkFactory {
    builders: HashMap<&'static str, Box<dyn SinkBuilder>>,
}

impl SinkFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Factory with the built-in sink types
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(LogBuilder);
        factory.register(NullBuilder);
        factory.register(LocalFileBuilder);
        factory.register(BatchLogBuilder);
        factory
    }

    /// Register a builder, replacing one with the same type
    pub fn register<B: SinkBuilder + 'static>(&mut self, builder: B) {
        self.builders.insert(builder.sink_type(), Box::new(builder));
    }

    /// Register a builder unless the type is taken
    pub fn try_register<B: SinkBuilder + 'static>(&mut self, builder: B) -> Result<(), SinkError> {
        let sink_type = builder.sink_type();
        if self.builders.contains_key(sink_type) {
            return Err(SinkError::DuplicateType {
                kind: "sink",
                type_name: sink_type.to_string(),
            });
        }
        self.builders.insert(sink_type, Box::new(builder));
        Ok(())
    }

    pub fn contains(&self, sink_type: &str) -> bool {
        self.builders.contains_key(sink_type)
    }

    /// Registered types, sorted
    pub fn available_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.builders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Build, open and spawn a sink from its descriptor
    ///
    /// # Errors
    /// - `UnknownType` if no builder matches
    /// - `SinkCreation` / `Notify` if the builder or `open` fails
    #[instrument(
        name = "sink_factory_create",
        skip(self, config, hub),
        fields(sink_type = %config.sink_type)
    )]
    pub async fn create(
        &self,
        name: &str,
        config: &SinkConfig,
        hub: &NotifyHub,
    ) -> Result<SinkHandle, SinkError> {
        let builder = self.builders.get(config.sink_type.as_str()).ok_or_else(|| {
            SinkError::unknown_type("sink", &config.sink_type, &self.available_types())
        })?;

        let ctx = BuildContext { name, config, hub };
        let handle = builder.build(&ctx).await?.with_descriptor(config.clone());
        info!(sink = %name, sink_type = %config.sink_type, "Sink created");
        Ok(handle)
    }
}

impl Default for SinkFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

struct LogBuilder;

#[async_trait]
impl SinkBuilder for LogBuilder {
    fn sink_type(&self) -> &'static str {
        "log"
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> Result<SinkHandle, SinkError> {
        SinkHandle::spawn(LogSink::new(ctx.name), self.sink_type(), ctx.options()).await
    }
}

struct NullBuilder;

#[async_trait]
impl SinkBuilder for NullBuilder {
    fn sink_type(&self) -> &'static str {
        "null"
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> Result<SinkHandle, SinkError> {
        SinkHandle::spawn(NullSink::new(ctx.name), self.sink_type(), ctx.options()).await
    }
}

struct LocalFileBuilder;

#[async_trait]
impl SinkBuilder for LocalFileBuilder {
    fn sink_type(&self) -> &'static str {
        "local_file"
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> Result<SinkHandle, SinkError> {
        let config = LocalFileSinkConfig::from_params(ctx.name, &ctx.config.params)
            .map_err(|e| SinkError::sink_creation(ctx.name, e.to_string()))?;
        let notify = match ctx.config.params.str_param("notify") {
            Some(channel) => Some(ctx.hub.resolve(channel).await?),
            None => None,
        };
        let sink = LocalFileSink::new(ctx.name, config, notify);
        SinkHandle::spawn(sink, self.sink_type(), ctx.options()).await
    }
}

struct BatchLogBuilder;

#[async_trait]
impl SinkBuilder for BatchLogBuilder {
    fn sink_type(&self) -> &'static str {
        "batch_log"
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> Result<SinkHandle, SinkError> {
        let config = BatchLogSinkConfig::from_params(ctx.name, &ctx.config.params)
            .map_err(|e| SinkError::sink_creation(ctx.name, e.to_string()))?;
        let channel = ctx.hub.resolve(&config.notify).await?;
        let sink = BatchLogSink::new(ctx.name, config, channel);
        SinkHandle::spawn(sink, self.sink_type(), ctx.options())
            .await
            .map(SinkHandle::as_notify_consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Message, NotifyConfig, Params};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sink_config(sink_type: &str, params: serde_json::Value) -> SinkConfig {
        let mut config = SinkConfig::new(sink_type);
        config.params = serde_json::from_value::<Params>(params).unwrap();
        config
    }

    #[test]
    fn test_available_types() {
        let factory = SinkFactory::with_defaults();
        assert_eq!(
            factory.available_types(),
            vec!["batch_log", "local_file", "log", "null"]
        );
        assert!(SinkFactory::new().available_types().is_empty());
    }

    #[test]
    fn test_try_register_duplicate() {
        let mut factory = SinkFactory::with_defaults();
        let err = factory.try_register(NullBuilder).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn test_unknown_type_lists_available() {
        let factory = SinkFactory::with_defaults();
        let err = factory
            .create("s3", &SinkConfig::new("s3"), &NotifyHub::new())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("unknown sink type 's3'"), "got: {err}");
        assert!(err.contains("batch_log, local_file, log, null"), "got: {err}");
    }

    #[tokio::test]
    async fn test_create_keeps_descriptor() {
        let factory = SinkFactory::with_defaults();
        let config = SinkConfig::new("null");
        let handle = factory
            .create("sink1", &config, &NotifyHub::new())
            .await
            .unwrap();
        assert_eq!(handle.name(), "sink1");
        assert_eq!(handle.sink_type(), "null");
        assert_eq!(handle.descriptor(), Some(&config));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_notify_channel_is_fatal() {
        let dir = tempdir().unwrap();
        let factory = SinkFactory::with_defaults();
        let config = sink_config(
            "local_file",
            json!({ "directory": dir.path(), "notify": "batches" }),
        );
        let err = factory
            .create("local", &config, &NotifyHub::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Notify { .. }));
    }

    #[tokio::test]
    async fn test_file_producer_and_batch_consumer_cooperate() {
        let dir = tempdir().unwrap();
        let mut notify = BTreeMap::new();
        notify.insert(
            "batches".to_string(),
            NotifyConfig {
                notify_type: "queue".to_string(),
                params: Params::new(),
            },
        );
        let hub = NotifyHub::from_configs(&notify).unwrap();
        let factory = SinkFactory::with_defaults();

        let producer = factory
            .create(
                "local",
                &sink_config(
                    "local_file",
                    json!({ "directory": dir.path(), "notify": "batches" }),
                ),
                &hub,
            )
            .await
            .unwrap();
        // Periodic flush refreshes the consumer's stat line
        let mut consumer_config =
            sink_config("batch_log", json!({ "notify": "batches", "poll_ms": 10 }));
        consumer_config.flush_interval_ms = Some(10);
        let consumer = factory
            .create("uploader", &consumer_config, &hub)
            .await
            .unwrap();
        assert!(consumer.is_notify_consumer());
        assert!(!producer.is_notify_consumer());

        for i in 0..4 {
            assert!(producer.write(Message::new("topic1", format!("m{i}")).unwrap()));
        }
        // Close flushes the pending batch and sends its notice
        producer.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(
            consumer.stat().contains("acked_batches=1 acked_messages=4"),
            "got: {}",
            consumer.stat()
        );
        consumer.shutdown().await;
    }
}
