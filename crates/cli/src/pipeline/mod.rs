//! Fabric orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{Fabric, FabricOptions};
pub use stats::FabricStats;
