//! Sink implementations
//!
//! Contains LogSink, NullSink, LocalFileSink and BatchLogSink.

mod batch_log;
mod local_file;
mod log;
mod null;

pub use self::batch_log::{BatchLogSink, BatchLogSinkConfig};
pub use self::local_file::{read_batch, LocalFileSink, LocalFileSinkConfig, DEFAULT_MAX_FILE_BYTES};
pub use self::log::LogSink;
pub use self::null::NullSink;
