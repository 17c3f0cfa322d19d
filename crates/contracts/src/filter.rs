//! Per-route filter and converter interfaces
//!
//! Both are pure: no side effects, no blocking. Any error (or panic) is
//! contained by the router and only drops the message for that route.

use bytes::Bytes;

use crate::{ContractError, Message};

/// Route predicate. An absent filter passes everything.
pub trait MessageFilter: Send + Sync {
    /// Filter type name (for logs)
    fn name(&self) -> &'static str;

    /// Whether the message should be delivered on this route
    fn test(&self, message: &Message) -> Result<bool, ContractError>;
}

/// Payload transformer. An absent converter is the identity.
pub trait PayloadConverter: Send + Sync {
    /// Converter type name (for logs)
    fn name(&self) -> &'static str;

    /// Produce the payload handed to the sink
    fn convert(&self, message: &Message) -> Result<Bytes, ContractError>;
}
