//! LogSink - logs message summary via tracing

use contracts::{ContractError, Message, MessageSink};
use tracing::{info, instrument};

/// Payload bytes shown in the log line
const PREVIEW_LEN: usize = 64;

/// Sink that logs message summaries for debugging
pub struct LogSink {
    name: String,
    logged: u64,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logged: 0,
        }
    }

    fn log_message_summary(&self, message: &Message) {
        let payload = message.payload();
        let preview = String::from_utf8_lossy(&payload[..payload.len().min(PREVIEW_LEN)]);

        info!(
            sink = %self.name,
            topic = message.topic(),
            timestamp_ms = message.timestamp_ms(),
            bytes = message.len(),
            preview = %preview,
            "Message received"
        );
    }
}

impl MessageSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, message),
        fields(sink = %self.name, topic = message.topic())
    )]
    async fn write(&mut self, message: &Message) -> Result<(), ContractError> {
        self.log_message_summary(message);
        self.logged += 1;
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, logged = self.logged, "LogSink closed");
        Ok(())
    }

    fn stat(&self) -> String {
        format!("logged={}", self.logged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let message = Message::new("topic1", vec![0xff, b'a', b'b']).unwrap();

        let result = sink.write(&message).await;
        assert!(result.is_ok());
        assert_eq!(sink.stat(), "logged=1");
    }

    #[tokio::test]
    async fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
