use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use crate::protocol::{NtpCodec, Responder, MAX_DATAGRAM_SIZE, PACKET_SIZE};

/// How long shutdown waits for in-flight replies
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Request counters, shared with the handler tasks
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    replied: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_mode: AtomicU64,
    send_errors: AtomicU64,
}

impl ListenerStats {
    /// Datagrams read from the socket
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Replies sent
    pub fn replied(&self) -> u64 {
        self.replied.load(Ordering::Relaxed)
    }

    /// Datagrams dropped as truncated or otherwise undecodable
    pub fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed.load(Ordering::Relaxed)
    }

    /// Requests dropped because their mode is never answered
    pub fn dropped_mode(&self) -> u64 {
        self.dropped_mode.load(Ordering::Relaxed)
    }

    /// Replies that failed to send
    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    fn record_drop(&self, error: &Error) {
        match error {
            Error::UnsupportedMode(_) => self.dropped_mode.fetch_add(1, Ordering::Relaxed),
            _ => self.dropped_malformed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// State every handler task needs
struct Handler {
    socket: Arc<UdpSocket>,
    responder: Responder,
    stats: Arc<ListenerStats>,
}

impl Handler {
    /// Decode, answer and send one datagram
    async fn answer(&self, mut datagram: BytesMut, peer: SocketAddr, received_at: Instant) {
        let mut codec = NtpCodec::new();

        let request = match codec.decode_eof(&mut datagram) {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, "Dropped empty datagram");
                return;
            }
            Err(e) => {
                self.drop_request(peer, &e);
                return;
            }
        };

        let pending = match self.responder.respond(&request, received_at) {
            Ok(pending) => pending,
            Err(e) => {
                self.drop_request(peer, &e);
                return;
            }
        };

        let mut out = BytesMut::with_capacity(PACKET_SIZE);
        if let Err(e) = codec.encode(pending.finalize_packet(), &mut out) {
            self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer, error = %e, "Failed to encode reply");
            return;
        }

        match self.socket.send_to(&out, peer).await {
            Ok(_) => {
                self.stats.replied.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, error = %e, "Failed to send reply");
            }
        }
    }

    fn drop_request(&self, peer: SocketAddr, error: &Error) {
        self.stats.record_drop(error);
        if error.is_recoverable() {
            debug!(peer = %peer, error = %error, "Dropped request");
        } else {
            warn!(peer = %peer, error = %error, "Failed to handle request");
        }
    }
}

/// Owns the NTP socket and fans requests out to handler tasks
pub struct RequestListener {
    handler: Arc<Handler>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    local_addr: SocketAddr,
}

impl RequestListener {
    /// Binds the NTP socket.
    ///
    /// Must be called from within a Tokio runtime. Port 0 picks a free port.
    pub fn bind(addr: SocketAddr, responder: Responder, max_in_flight: usize) -> Result<Self> {
        let socket = bind_socket(addr)
            .map_err(|e| Error::network(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::network(format!("failed to get local address: {}", e)))?;

        let max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Ok(RequestListener {
            handler: Arc::new(Handler {
                socket: Arc::new(socket),
                responder,
                stats: Arc::new(ListenerStats::default()),
            }),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            local_addr,
        })
    }

    /// Returns the bound socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Counters that stay readable after `run` consumes the listener
    pub fn stats(&self) -> Arc<ListenerStats> {
        self.handler.stats.clone()
    }

    /// Answers requests until `shutdown` is cancelled, then drains in-flight replies.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!(addr = %self.local_addr, max_in_flight = self.max_in_flight, "NTP listener started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (len, peer, received_at) = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.handler.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => (len, peer, Instant::now()),
                    Err(e) => {
                        warn!(error = %e, "Failed to receive datagram");
                        continue;
                    }
                },
            };

            self.handler.stats.received.fetch_add(1, Ordering::Relaxed);
            let datagram = BytesMut::from(&buf[..len]);
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                handler.answer(datagram, peer, received_at).await;
            });
        }

        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        if tokio::time::timeout(DRAIN_TIMEOUT, self.permits.acquire_many(all))
            .await
            .is_err()
        {
            warn!("Shutting down with replies still in flight");
        }

        let stats = &self.handler.stats;
        info!(
            received = stats.received(),
            replied = stats.replied(),
            dropped_malformed = stats.dropped_malformed(),
            dropped_mode = stats.dropped_mode(),
            send_errors = stats.send_errors(),
            "NTP listener stopped"
        );
        Ok(())
    }
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}
