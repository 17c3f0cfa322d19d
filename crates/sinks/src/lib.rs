//! # Sinks
//!
//! Sink 注册表与生命周期模块。
//!
//! 负责：
//! - 每个 sink 独立队列 + worker，隔离慢 sink
//! - 按名称原子替换 sink，旧实例在静默 (quiescence) 后才关闭
//! - 按 `type` 构造 sink 与 notify 通道
//! - sink 之间通过 notify 通道协作

pub mod error;
pub mod factory;
pub mod handle;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod sinks;

pub use contracts::{Message, MessageSink};
pub use error::SinkError;
pub use factory::{BuildContext, SinkBuilder, SinkFactory};
pub use handle::{HandleOptions, SinkHandle};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use notify::{BatchNotify, NotifyHub, QueueNotify, UdpNotify, UdpNotifyConfig, NOTIFY_TYPES};
pub use registry::{ApplySummary, SinkLease, SinkRegistry};
pub use sinks::{read_batch, BatchLogSink, LocalFileSink, LogSink, NullSink};
