//! UdpNotify - JSON datagrams between two processes
//!
//! Each item is one datagram. Delivery is best-effort, like any UDP path.
//!
//! The socket is never `connect()`ed: a consumer accepts datagrams from any
//! producer, and `send` addresses `peer` explicitly.

use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{watch, OnceCell};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use contracts::{ContractError, NotifyChannel, NotifyRecv, Params, ParamsExt};

/// Largest datagram sent or accepted
pub const DEFAULT_MAX_DATAGRAM: usize = 65_000;

/// Configuration for UdpNotify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpNotifyConfig {
    /// Local address to bind
    pub bind: SocketAddr,
    /// Where `send` goes (None = this channel's own socket)
    pub peer: Option<SocketAddr>,
    pub max_datagram: usize,
}

impl UdpNotifyConfig {
    /// Create config from descriptor params (`bind`, `peer`, `max_datagram`)
    pub fn from_params(channel: &str, params: &Params) -> Result<Self, ContractError> {
        let bind = params.str_param("bind").unwrap_or("127.0.0.1:0");
        let bind: SocketAddr = bind.parse().map_err(|e| {
            ContractError::config_validation(
                format!("notify.{channel}.bind"),
                format!("invalid address '{bind}': {e}"),
            )
        })?;

        let peer = params
            .str_param("peer")
            .map(|peer| {
                peer.parse::<SocketAddr>().map_err(|e| {
                    ContractError::config_validation(
                        format!("notify.{channel}.peer"),
                        format!("invalid address '{peer}': {e}"),
                    )
                })
            })
            .transpose()?;

        let max_datagram = params
            .u64_param("max_datagram")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_DATAGRAM);

        Ok(Self {
            bind,
            peer,
            max_datagram,
        })
    }
}

/// Socket plus the address `send` targets
struct Bound {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

/// Networked notify channel
pub struct UdpNotify<E> {
    name: String,
    config: UdpNotifyConfig,
    socket: OnceCell<Bound>,
    closed: watch::Sender<bool>,
    sent: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    _item: PhantomData<fn() -> E>,
}

impl<E> UdpNotify<E>
where
    E: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(name: impl Into<String>, config: UdpNotifyConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            name: name.into(),
            config,
            socket: OnceCell::new(),
            closed,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            _item: PhantomData,
        }
    }

    /// Create from descriptor params
    pub fn from_params(name: impl Into<String>, params: &Params) -> Result<Self, ContractError> {
        let name = name.into();
        let config = UdpNotifyConfig::from_params(&name, params)?;
        Ok(Self::new(name, config))
    }

    /// Bound local address (None before `init`)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.get().and_then(|b| b.socket.local_addr().ok())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    #[instrument(name = "udp_notify_connect", skip(self), fields(channel = %self.name))]
    async fn bind(&self) -> Result<Bound, ContractError> {
        let socket = UdpSocket::bind(self.config.bind)
            .await
            .map_err(|e| ContractError::notify(&self.name, format!("bind {}: {e}", self.config.bind)))?;
        let local = socket.local_addr()?;
        let peer = self.config.peer.unwrap_or_else(|| loopback_of(local));

        // Readiness is only known once the reactor has seen the socket
        socket.writable().await?;

        debug!(channel = %self.name, local = %local, peer = %peer, "UdpNotify bound");
        Ok(Bound {
            socket: Arc::new(socket),
            peer,
        })
    }

    fn decode(&self, datagram: &[u8]) -> Option<E> {
        match serde_json::from_slice(datagram) {
            Ok(item) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                Some(item)
            }
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %self.name, error = %e, "Malformed notify datagram dropped");
                None
            }
        }
    }

    /// Pull whatever is already buffered without waiting
    fn drain_one(&self, socket: &UdpSocket) -> NotifyRecv<E> {
        let mut buf = vec![0u8; self.config.max_datagram];
        while let Ok((n, _)) = socket.try_recv_from(&mut buf) {
            if let Some(item) = self.decode(&buf[..n]) {
                return NotifyRecv::Item(item);
            }
        }
        NotifyRecv::Closed
    }
}

/// Self-addressed peer: an unspecified bind address becomes loopback
fn loopback_of(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

#[async_trait]
impl<E> NotifyChannel<E> for UdpNotify<E>
where
    E: Serialize + DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<(), ContractError> {
        self.socket.get_or_try_init(|| self.bind()).await?;
        Ok(())
    }

    fn send(&self, item: E) -> bool {
        let accepted = match self.socket.get() {
            Some(bound) if !self.is_closed() => match serde_json::to_vec(&item) {
                Ok(data) if data.len() <= self.config.max_datagram => {
                    bound.socket.try_send_to(&data, bound.peer).is_ok()
                }
                Ok(data) => {
                    warn!(
                        channel = %self.name,
                        size = data.len(),
                        max = self.config.max_datagram,
                        "Notify item too large"
                    );
                    false
                }
                Err(e) => {
                    warn!(channel = %self.name, error = %e, "Notify item not serializable");
                    false
                }
            },
            _ => false,
        };

        if accepted {
            self.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        observability::record_notify_send(&self.name, accepted);
        accepted
    }

    async fn recv(&self, timeout: Duration) -> NotifyRecv<E> {
        let Some(Bound { socket, .. }) = self.socket.get() else {
            if self.is_closed() {
                return NotifyRecv::Closed;
            }
            tokio::time::sleep(timeout).await;
            return NotifyRecv::Timeout;
        };
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow_and_update() {
            return self.drain_one(socket);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.config.max_datagram];

        loop {
            tokio::select! {
                received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => return NotifyRecv::Timeout,
                        Ok(Ok((n, _from))) => {
                            if let Some(item) = self.decode(&buf[..n]) {
                                return NotifyRecv::Item(item);
                            }
                        }
                        Ok(Err(e)) => {
                            // ICMP refusals surface here on some platforms; keep waiting
                            debug!(channel = %self.name, error = %e, "UDP recv error");
                        }
                    }
                }
                _ = closed_rx.changed() => {
                    return self.drain_one(socket);
                }
            }
        }
    }

    fn stat(&self) -> String {
        format!(
            "type=udp local={} sent={} received={} rejected={} malformed={}{}",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unbound".to_string()),
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.malformed.load(Ordering::Relaxed),
            if self.is_closed() { " closed" } else { "" }
        )
    }

    fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(channel = %self.name, "UdpNotify closed");
        }
    }
}
