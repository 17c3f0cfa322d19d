//! NullSink - discards messages, keeps counts

use contracts::{ContractError, Message, MessageSink};

/// Sink that accepts and drops everything
pub struct NullSink {
    name: String,
    messages: u64,
    bytes: u64,
}

impl NullSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: 0,
            bytes: 0,
        }
    }
}

impl MessageSink for NullSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn write(&mut self, message: &Message) -> Result<(), ContractError> {
        self.messages += 1;
        self.bytes += message.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    fn stat(&self) -> String {
        format!("discarded={} bytes={}", self.messages, self.bytes)
    }
}
