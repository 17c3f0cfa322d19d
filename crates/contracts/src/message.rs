//! Message - the unit of transport
//!
//! A message is a topic tag plus opaque payload bytes. It is immutable once
//! built; converters produce a new message via [`Message::with_payload`].

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Current wall-clock time in UNIX milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Topic-tagged message
///
/// Invariant: `topic` is never empty. Deserialization goes through the same
/// check, so a decoded message is always routable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    topic: String,
    payload: Bytes,
    timestamp_ms: u64,
}

/// Wire shape before validation (timestamp 0 = unset)
#[derive(Deserialize)]
struct RawMessage {
    topic: String,
    payload: Bytes,
    #[serde(default)]
    timestamp_ms: u64,
}

impl TryFrom<RawMessage> for Message {
    type Error = ContractError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let timestamp_ms = if raw.timestamp_ms == 0 {
            now_millis()
        } else {
            raw.timestamp_ms
        };
        Self::with_timestamp(raw.topic, raw.payload, timestamp_ms)
    }
}

impl Message {
    /// Create a message stamped with the current time
    ///
    /// # Errors
    /// Returns `InvalidMessage` if `topic` is empty
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self, ContractError> {
        Self::with_timestamp(topic, payload, now_millis())
    }

    /// Create a message with an explicit timestamp
    pub fn with_timestamp(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        timestamp_ms: u64,
    ) -> Result<Self, ContractError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(ContractError::invalid_message("topic cannot be empty"));
        }
        Ok(Self {
            topic,
            payload: payload.into(),
            timestamp_ms,
        })
    }

    /// Topic tag
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Creation time (UNIX ms)
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty (allowed)
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Derive a message with the same topic/timestamp and a new payload
    pub fn with_payload(&self, payload: Bytes) -> Self {
        Self {
            topic: self.topic.clone(),
            payload,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// A batch of messages carried by one request frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSet {
    pub messages: Vec<Message>,
}

impl MessageSet {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Server acknowledgement for one `MessageSet`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Messages accepted into the router queue
    pub accepted: u32,
    /// Messages rejected (router saturated)
    pub rejected: u32,
}
