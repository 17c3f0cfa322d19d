//! Notify channels
//!
//! A [`NotifyHub`] owns the named channels declared in configuration, so the
//! producing and consuming sinks resolve the same instance by name.

mod queue;
mod udp;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{info, instrument};

use contracts::{BatchReady, NotifyChannel, NotifyConfig};

use crate::error::SinkError;

pub use self::queue::{QueueNotify, DEFAULT_QUEUE_CAPACITY};
pub use self::udp::{UdpNotify, UdpNotifyConfig, DEFAULT_MAX_DATAGRAM};

/// Channel carrying batch notices between sinks
pub type BatchNotify = Arc<dyn NotifyChannel<BatchReady>>;

/// Known notify channel types
pub const NOTIFY_TYPES: &[&str] = &["queue", "udp"];

/// Named notify channel registry
#[derive(Default, Clone)]
pub struct NotifyHub {
    channels: HashMap<String, BatchNotify>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every channel from its descriptor
    ///
    /// Channels are created but not initialized; sinks that depend on a
    /// channel call [`NotifyHub::resolve`], which initializes it.
    ///
    /// # Errors
    /// `UnknownType` for an unregistered `type`, or an invalid descriptor field.
    #[instrument(name = "notify_hub_from_configs", skip(configs), fields(channels = configs.len()))]
    pub fn from_configs(configs: &BTreeMap<String, NotifyConfig>) -> Result<Self, SinkError> {
        let mut hub = Self::new();
        for (name, config) in configs {
            let channel: BatchNotify = match config.notify_type.as_str() {
                "queue" => Arc::new(QueueNotify::from_params(name, &config.params)),
                "udp" => Arc::new(UdpNotify::from_params(name, &config.params)?),
                other => return Err(SinkError::unknown_type("notify", other, NOTIFY_TYPES)),
            };
            hub.insert(name, channel);
        }
        info!(channels = hub.channels.len(), "Notify channels created");
        Ok(hub)
    }

    /// Register a channel under `name`, replacing any previous one
    pub fn insert(&mut self, name: impl Into<String>, channel: BatchNotify) {
        self.channels.insert(name.into(), channel);
    }

    pub fn get(&self, name: &str) -> Option<BatchNotify> {
        self.channels.get(name).cloned()
    }

    /// Look up a channel and make sure it is attached to its medium
    ///
    /// # Errors
    /// `Notify` if the channel is not declared or `init` fails.
    pub async fn resolve(&self, name: &str) -> Result<BatchNotify, SinkError> {
        let channel = self
            .get(name)
            .ok_or_else(|| SinkError::notify(name, "channel not declared"))?;
        channel
            .init()
            .await
            .map_err(|e| SinkError::notify(name, e.to_string()))?;
        Ok(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Per-channel diagnostics
    pub fn report_stats(&self) -> BTreeMap<String, String> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.stat()))
            .collect()
    }

    /// Close every channel; receivers drain what is left
    pub fn close_all(&self) {
        for channel in self.channels.values() {
            channel.close();
        }
    }
}

impl std::fmt::Debug for NotifyHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHub")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{NotifyRecv, Params};
    use serde_json::json;
    use std::time::Duration;

    fn descriptor(notify_type: &str, params: serde_json::Value) -> NotifyConfig {
        NotifyConfig {
            notify_type: notify_type.to_string(),
            params: serde_json::from_value::<Params>(params).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_hub_shares_channel_by_name() {
        let mut configs = BTreeMap::new();
        configs.insert("batches".to_string(), descriptor("queue", json!({ "capacity": 4 })));
        let hub = NotifyHub::from_configs(&configs).unwrap();

        let producer = hub.resolve("batches").await.unwrap();
        let consumer = hub.resolve("batches").await.unwrap();
        let notice = BatchReady {
            path: "a.log".into(),
            messages: 1,
            bytes: 1,
        };
        assert!(producer.send(notice.clone()));
        assert_eq!(
            consumer.recv(Duration::from_millis(50)).await,
            NotifyRecv::Item(notice)
        );

        let stats = hub.report_stats();
        assert!(stats["batches"].contains("sent=1"), "got: {stats:?}");
    }

    #[test]
    fn test_unknown_notify_type() {
        let mut configs = BTreeMap::new();
        configs.insert("n".to_string(), descriptor("sqs", json!({})));
        let err = NotifyHub::from_configs(&configs).unwrap_err().to_string();
        assert!(err.contains("unknown notify type 'sqs'"), "got: {err}");
        assert!(err.contains("queue, udp"), "got: {err}");
    }

    #[tokio::test]
    async fn test_resolve_undeclared_channel() {
        let hub = NotifyHub::new();
        assert!(matches!(
            hub.resolve("missing").await,
            Err(SinkError::Notify { .. })
        ));
    }
}
