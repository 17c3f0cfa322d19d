//! Command implementations.

mod info;
mod run;
mod send;
mod validate;

pub use info::run_info;
pub use run::run_server;
pub use send::run_send;
pub use validate::run_validate;
