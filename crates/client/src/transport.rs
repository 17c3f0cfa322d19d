//! Transport - pooled TCP connections per endpoint
//!
//! A connection carries one request/ack pair at a time. Connections are
//! returned to the pool only after a clean exchange; any error drops them.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Mutex;
use std::time::Duration;

use contracts::{wire, Ack, MessageSet};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ClientError;

/// Idle connections kept per endpoint
const MAX_IDLE_PER_ENDPOINT: usize = 4;

pub struct Transport {
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Transport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            connect_timeout,
            request_timeout,
        }
    }

    /// Send one `MessageSet` and wait for its ack
    ///
    /// Bounded by `connect_timeout + request_timeout`.
    pub async fn request(&self, endpoint: &str, set: &MessageSet) -> Result<Ack, ClientError> {
        let mut stream = match self.checkout(endpoint) {
            Some(stream) => stream,
            None => self.connect(endpoint).await?,
        };

        let exchange = async {
            wire::write_frame(&mut stream, set).await?;
            wire::read_frame::<_, Ack>(&mut stream).await
        };
        let ack = match timeout(self.request_timeout, exchange).await {
            Ok(Ok(Some(ack))) => ack,
            Ok(Ok(None)) => {
                return Err(ClientError::NoAck {
                    endpoint: endpoint.to_string(),
                })
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(ClientError::RequestTimeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        };

        self.checkin(endpoint, stream);
        Ok(ack)
    }

    /// Drop idle connections to endpoints not in `keep`
    pub fn retain(&self, keep: &[String]) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.retain(|endpoint, _| keep.contains(endpoint));
        }
    }

    /// Drop every idle connection
    pub fn clear(&self) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.idle
            .lock()
            .map(|idle| idle.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    async fn connect(&self, endpoint: &str) -> Result<TcpStream, ClientError> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::connection_failed(endpoint, e)),
            Err(_) => {
                return Err(ClientError::connection_failed(
                    endpoint,
                    std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
                ))
            }
        };

        // Non-fatal: default buffering still works
        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint, error = %e, "Failed to set TCP_NODELAY");
        }
        debug!(endpoint, "Connected");
        Ok(stream)
    }

    fn checkout(&self, endpoint: &str) -> Option<TcpStream> {
        self.idle.lock().ok()?.get_mut(endpoint)?.pop()
    }

    fn checkin(&self, endpoint: &str, stream: TcpStream) {
        if let Ok(mut idle) = self.idle.lock() {
            let pool = idle.entry(endpoint.to_string()).or_default();
            if pool.len() < MAX_IDLE_PER_ENDPOINT {
                pool.push(stream);
            }
        }
    }
}
