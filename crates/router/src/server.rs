//! IngestServer - TCP front end of the router
//!
//! One task per connection. Each request frame carries a `MessageSet`; every
//! message is handed to [`MessageRouter::route`] and the reply `Ack` counts
//! enqueued vs dropped messages. An undecodable frame closes the connection.
//!
//! Routing one request is bounded by `request_deadline`: past it, remaining
//! messages go through [`MessageRouter::try_route`] so the ack is written
//! before the client gives up on the request.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use contracts::{wire, Ack, ContractError, MessageSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::RouterError;
use crate::router::{MessageRouter, RouteOutcome};

/// Default bound on routing one request
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_millis(1_000);

/// TCP ingest listener
pub struct IngestServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Arc<MessageRouter>,
    request_deadline: Duration,
}

impl IngestServer {
    /// Bind the listener (port 0 picks a free port)
    pub async fn bind(addr: &str, router: Arc<MessageRouter>) -> Result<Self, RouterError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RouterError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            router,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
        })
    }

    /// Bound the time spent routing one request
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Open connections finish the request in progress, then close.
    #[instrument(name = "ingest_server", skip_all, fields(addr = %self.local_addr))]
    pub async fn run<F>(self, shutdown: F) -> Result<(), RouterError>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            addr = %self.local_addr,
            request_deadline_ms = self.request_deadline.as_millis() as u64,
            "Ingest server listening"
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Connection accepted");
                        let router = Arc::clone(&self.router);
                        let stop = stop_rx.clone();
                        let deadline = self.request_deadline;
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, router, deadline, stop).await {
                                warn!(peer = %peer, error = %e, "Connection closed with error");
                            }
                        });
                    }
                    // Transient accept errors - log and continue
                    Err(e) => warn!(error = %e, "Accept error"),
                },
                // Reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let _ = stop_tx.send(true);
        let open = connections.len();
        while connections.join_next().await.is_some() {}
        info!(closed_connections = open, "Ingest server stopped");
        Ok(())
    }
}

/// Request/ack loop for one client connection
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: Arc<MessageRouter>,
    request_deadline: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ContractError> {
    stream.set_nodelay(true)?;

    loop {
        let request = tokio::select! {
            biased;
            _ = stop.changed() => return Ok(()),
            frame = wire::read_frame::<_, MessageSet>(&mut stream) => frame?,
        };
        let Some(set) = request else {
            debug!(peer = %peer, "Client closed connection");
            return Ok(());
        };

        let ack = route_set(&router, set, Instant::now() + request_deadline).await;
        if ack.rejected > 0 {
            debug!(peer = %peer, accepted = ack.accepted, rejected = ack.rejected, "Request partly rejected");
        }
        wire::write_frame(&mut stream, &ack).await?;
    }
}

async fn route_set(router: &MessageRouter, set: MessageSet, deadline: Instant) -> Ack {
    let mut ack = Ack::default();
    for message in set.messages {
        let outcome = if Instant::now() >= deadline {
            router.try_route(message)
        } else {
            tokio::time::timeout_at(deadline, router.route(message))
                .await
                .unwrap_or(RouteOutcome::Saturated)
        };
        match outcome {
            RouteOutcome::Enqueued => ack.accepted += 1,
            RouteOutcome::Saturated | RouteOutcome::Closed => ack.rejected += 1,
        }
    }
    ack
}
