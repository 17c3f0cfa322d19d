//! LocalFileSink - appends messages to rotating batch files
//!
//! Records are written to a `.pending` file as `u32 BE length || bincode(Message)`.
//! On rotation the file is renamed to `.log` and a [`BatchReady`] notice is sent
//! on the configured notify channel, if any.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use contracts::{
    now_millis, wire, BatchReady, ContractError, Message, MessageSink, Params, ParamsExt,
};
use tracing::{debug, info, instrument, warn};

use crate::notify::BatchNotify;

/// Default rotation size
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;

const PENDING_EXT: &str = "pending";
const DONE_EXT: &str = "log";

/// Configuration for LocalFileSink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileSinkConfig {
    /// Output directory
    pub directory: PathBuf,
    /// File name prefix
    pub file_prefix: String,
    /// Rotate once a file would grow past this size
    pub max_file_bytes: u64,
}

impl LocalFileSinkConfig {
    /// Create config from params map (`directory`, `file_prefix`, `max_file_bytes`)
    pub fn from_params(sink_name: &str, params: &Params) -> Result<Self, ContractError> {
        let directory = params.require_str(&format!("sinks.{sink_name}"), "directory")?;
        let file_prefix = params
            .str_param("file_prefix")
            .unwrap_or(sink_name)
            .to_string();
        let max_file_bytes = params
            .u64_param("max_file_bytes")
            .unwrap_or(DEFAULT_MAX_FILE_BYTES);
        if max_file_bytes == 0 {
            return Err(ContractError::config_validation(
                format!("sinks.{sink_name}.max_file_bytes"),
                "max_file_bytes must be > 0",
            ));
        }

        Ok(Self {
            directory: PathBuf::from(directory),
            file_prefix,
            max_file_bytes,
        })
    }
}

/// File currently being appended to
struct OpenBatch {
    path: PathBuf,
    writer: BufWriter<File>,
    messages: u64,
    bytes: u64,
}

/// Sink that buffers messages into local batch files
pub struct LocalFileSink {
    name: String,
    config: LocalFileSinkConfig,
    notify: Option<BatchNotify>,
    current: Option<OpenBatch>,
    seq: u64,
    batches: u64,
    messages: u64,
    notify_dropped: u64,
}

impl LocalFileSink {
    /// Create a new LocalFileSink
    ///
    /// Nothing touches the disk until `open`.
    pub fn new(
        name: impl Into<String>,
        config: LocalFileSinkConfig,
        notify: Option<BatchNotify>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            notify,
            current: None,
            seq: 0,
            batches: 0,
            messages: 0,
            notify_dropped: 0,
        }
    }

    fn sink_error(&self, e: impl std::fmt::Display) -> ContractError {
        ContractError::sink_write(&self.name, e.to_string())
    }

    fn start_batch(&mut self) -> std::io::Result<OpenBatch> {
        self.seq += 1;
        let file_name = format!(
            "{}-{}-{:06}.{PENDING_EXT}",
            self.config.file_prefix,
            now_millis(),
            self.seq
        );
        let path = self.config.directory.join(file_name);
        let file = File::create(&path)?;
        debug!(sink = %self.name, path = %path.display(), "Batch file started");
        Ok(OpenBatch {
            path,
            writer: BufWriter::new(file),
            messages: 0,
            bytes: 0,
        })
    }

    /// Close the current file and hand it to the consumer
    fn rotate(&mut self) -> std::io::Result<()> {
        let Some(mut batch) = self.current.take() else {
            return Ok(());
        };
        batch.writer.flush()?;
        drop(batch.writer);

        if batch.messages == 0 {
            fs::remove_file(&batch.path)?;
            return Ok(());
        }

        let done = batch.path.with_extension(DONE_EXT);
        fs::rename(&batch.path, &done)?;
        self.batches += 1;

        let notice = BatchReady {
            path: done,
            messages: batch.messages,
            bytes: batch.bytes,
        };
        info!(
            sink = %self.name,
            path = %notice.path.display(),
            messages = notice.messages,
            bytes = notice.bytes,
            "Batch ready"
        );
        if let Some(notify) = &self.notify {
            if !notify.send(notice) {
                self.notify_dropped += 1;
                warn!(sink = %self.name, channel = notify.name(), "Batch notice dropped");
            }
        }
        Ok(())
    }

    fn append(&mut self, message: &Message) -> Result<(), ContractError> {
        let body = wire::encode(message)?;
        let record_len = body.len() as u64 + 4;

        let needs_rotation = self.current.as_ref().is_some_and(|b| {
            b.messages > 0 && b.bytes + record_len > self.config.max_file_bytes
        });
        if needs_rotation {
            self.rotate().map_err(|e| self.sink_error(e))?;
        }
        if self.current.is_none() {
            let batch = self.start_batch().map_err(|e| self.sink_error(e))?;
            self.current = Some(batch);
        }

        if let Some(batch) = self.current.as_mut() {
            batch
                .writer
                .write_all(&(body.len() as u32).to_be_bytes())
                .and_then(|()| batch.writer.write_all(&body))
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
            batch.messages += 1;
            batch.bytes += record_len;
        }
        self.messages += 1;
        Ok(())
    }
}

/// Read back every record of a batch file
pub fn read_batch(path: &Path) -> Result<Vec<Message>, ContractError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut messages = Vec::new();
    let mut len_buf = [0u8; 4];
    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > wire::MAX_FRAME_LEN {
            return Err(ContractError::wire(format!("record too large: {len}")));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        messages.push(wire::decode(&body)?);
    }
    Ok(messages)
}

impl MessageSink for LocalFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "local_file_sink_open", skip(self), fields(sink = %self.name))]
    async fn open(&mut self) -> Result<(), ContractError> {
        fs::create_dir_all(&self.config.directory).map_err(|e| self.sink_error(e))?;
        Ok(())
    }

    #[instrument(
        name = "local_file_sink_write",
        skip(self, message),
        fields(sink = %self.name, topic = message.topic())
    )]
    async fn write(&mut self, message: &Message) -> Result<(), ContractError> {
        self.append(message)
    }

    /// Completes the pending batch, if it holds anything
    #[instrument(name = "local_file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        let pending = self.current.as_ref().is_some_and(|b| b.messages > 0);
        if pending {
            self.rotate().map_err(|e| self.sink_error(e))?;
        }
        Ok(())
    }

    #[instrument(name = "local_file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.rotate().map_err(|e| self.sink_error(e))?;
        debug!(sink = %self.name, batches = self.batches, "LocalFileSink closed");
        Ok(())
    }

    fn stat(&self) -> String {
        let pending = self.current.as_ref().map(|b| b.messages).unwrap_or(0);
        format!(
            "batches={} messages={} pending={} notify_dropped={}",
            self.batches, self.messages, pending, self.notify_dropped
        )
    }
}
