//! # Router
//!
//! Message routing module.
//!
//! Responsibilities:
//! - Compile topic routes (filter + converter per route) into a `RoutingTable`
//! - Dispatch each message to every matching sink through a bounded worker pool
//! - Accept framed `MessageSet`s from clients over TCP and acknowledge them
//!
//! Per-message failures never leave the pipeline: they are counted in
//! [`RouterStats`] and reported through `tracing`.

pub mod error;
pub mod filter;
pub mod metrics;
pub mod router;
pub mod server;
pub mod table;

pub use error::RouterError;
pub use filter::FilterRegistry;
pub use metrics::{RouterMetrics, RouterStats};
pub use router::{DispatchReport, MessageRouter, RouteOutcome};
pub use server::IngestServer;
pub use table::{CompiledRoute, RouteMap, RoutingTable};
