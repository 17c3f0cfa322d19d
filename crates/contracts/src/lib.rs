//! # Contracts
//!
//! Frozen interface contracts shared by every fabric crate: the message model,
//! the wire framing, configuration descriptors and the capability traits for
//! sinks, notify channels, filters and converters.
//! Business crates depend only on this crate, never on each other's internals.
//!
//! ## Time Model
//! - Message timestamps are UNIX epoch milliseconds (`u64`)
//! - A timestamp of `0` on the wire means "unset" and is stamped on ingest

mod blueprint;
mod error;
mod filter;
mod message;
mod notify;
mod params;
mod sink;
pub mod wire;

pub use blueprint::*;
pub use error::*;
pub use filter::{MessageFilter, PayloadConverter};
pub use message::{now_millis, Ack, Message, MessageSet};
pub use notify::{BatchReady, NotifyChannel, NotifyRecv};
pub use params::{Params, ParamsExt};
pub use sink::*;
