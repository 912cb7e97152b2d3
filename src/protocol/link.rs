//! Base TCP session to the mount.
//!
//! One [`MountLink`] owns one socket. Commands go out with a trailing `\r`;
//! replies accumulate until the expected number of `#` terminators arrived.
//! `exchange` takes `&mut self`, so a link can never have two commands in
//! flight — the send-lock of the original design is enforced by the borrow
//! checker instead of a flag.
//!
//! There is no read timeout beyond TCP keepalive: absence of data leaves
//! the buffer partially filled until more bytes arrive, and a dead peer is
//! eventually detected by the keepalive probes.

use super::{split_fields, CommandTemplate};
use crate::config::defaults::{
    CONNECTION_TIMEOUT_MS, KEEPALIVE_IDLE_SECS, KEEPALIVE_INTERVAL_SECS,
};
use crate::events::{EventBus, MountEvent};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Link-level errors. All are transient: the owner logs, tears the
/// connection down, and reconnects on the next cycle.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connect timeout")]
    ConnectTimeout,

    #[error("Connection closed by mount")]
    ConnectionClosed,

    #[error("Reply framing error: expected {expected} fields, buffer holds {got}")]
    Framing { expected: usize, got: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// One long-lived TCP session to `(host, port)`.
pub struct MountLink {
    name: &'static str,
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    state: ConnectionState,
    read_buffer: Vec<u8>,
    events: EventBus,
}

impl MountLink {
    pub fn new(name: &'static str, host: &str, port: u16, events: EventBus) -> Self {
        Self {
            name,
            host: host.to_string(),
            port,
            stream: None,
            state: ConnectionState::Disconnected,
            read_buffer: Vec::with_capacity(1024),
            events,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Point the link at a new endpoint. Only legal while disconnected —
    /// the IP-change reconfiguration stops every worker first.
    pub fn set_endpoint(&mut self, host: &str, port: u16) {
        debug_assert_eq!(self.state, ConnectionState::Disconnected);
        self.host = host.to_string();
        self.port = port;
    }

    /// Connect if not already connected. One attempt per call with the
    /// standard 2000 ms budget; the owning worker retries on its next
    /// cycle tick. Any queued partial reply data is discarded.
    pub async fn ensure_connected(&mut self) -> Result<(), LinkError> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        self.read_buffer.clear();

        let addr = format!("{}:{}", self.host, self.port);
        let budget = Duration::from_millis(CONNECTION_TIMEOUT_MS);

        let stream = match tokio::time::timeout(budget, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(LinkError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(LinkError::ConnectTimeout);
            }
        };

        stream.set_nodelay(true)?;

        // Keepalive detects dead connections in lieu of a read timeout
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(KEEPALIVE_IDLE_SECS))
            .with_interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        tracing::info!(link = self.name, address = %addr, "Mount link connected");
        self.events.publish(MountEvent::Connection {
            link: self.name,
            connected: true,
        });
        Ok(())
    }

    /// Tear the connection down. Pending reply data is discarded, not
    /// buffered across reconnects.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnecting;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.read_buffer.clear();
        self.state = ConnectionState::Disconnected;
        tracing::info!(link = self.name, "Mount link disconnected");
        self.events.publish(MountEvent::Connection {
            link: self.name,
            connected: false,
        });
    }

    /// Send a template and accumulate its reply fields.
    ///
    /// Returns exactly `template.expected()` fields, terminators stripped.
    /// Over-delivery (more `#` than expected) is a framing error: the
    /// buffer is reset and the connection torn down. On any error the
    /// caller skips this cycle; the next cycle reconnects.
    pub async fn exchange(
        &mut self,
        template: &CommandTemplate,
    ) -> Result<Vec<String>, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;

        let mut wire = template.text().to_string();
        wire.push('\r');
        if let Err(e) = stream.write_all(wire.as_bytes()).await {
            self.teardown().await;
            return Err(e.into());
        }

        if template.expected() == 0 {
            return Ok(Vec::new());
        }

        let mut chunk = [0u8; 1024];
        loop {
            let hashes = self.read_buffer.iter().filter(|b| **b == b'#').count();
            if hashes == template.expected() {
                break;
            }
            if hashes > template.expected() {
                let got = hashes;
                tracing::error!(
                    link = self.name,
                    expected = template.expected(),
                    got,
                    raw = %String::from_utf8_lossy(&self.read_buffer),
                    "Reply framing overflow — resetting link"
                );
                self.read_buffer.clear();
                self.teardown().await;
                return Err(LinkError::Framing {
                    expected: template.expected(),
                    got,
                });
            }

            let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
            let n = match stream.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.teardown().await;
                    return Err(e.into());
                }
            };
            if n == 0 {
                self.teardown().await;
                return Err(LinkError::ConnectionClosed);
            }
            self.read_buffer.extend_from_slice(&chunk[..n]);
        }

        let raw = String::from_utf8_lossy(&self.read_buffer).into_owned();
        self.read_buffer.clear();
        Ok(split_fields(&raw))
    }

    /// Send without waiting for any reply.
    pub async fn send_blind(&mut self, text: &str) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        let mut wire = text.to_string();
        wire.push('\r');
        if let Err(e) = stream.write_all(wire.as_bytes()).await {
            self.teardown().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the socket after a failure, without the orderly shutdown
    /// handshake of [`disconnect`](Self::disconnect).
    async fn teardown(&mut self) {
        if self.stream.take().is_some() {
            self.state = ConnectionState::Disconnected;
            self.read_buffer.clear();
            self.events.publish(MountEvent::Connection {
                link: self.name,
                connected: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(reply: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(reply.as_bytes()).await;
                // Hold the socket open so the client finishes reading
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_exchange_collects_expected_fields() {
        let addr = serve_once("10:30:00#1.0,+45.0,W,120.0,50.0,2460000.5,0,0#").await;
        let mut link = MountLink::new("test", &addr.ip().to_string(), addr.port(), EventBus::new());
        link.ensure_connected().await.expect("connect");

        let mut template = CommandTemplate::new();
        template.push_blind(":U2#").push(":GS#").push(":Ginfo#");
        let fields = link.exchange(&template).await.expect("exchange");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], "10:30:00");
    }

    #[tokio::test]
    async fn test_exchange_requires_connection() {
        let mut link = MountLink::new("test", "127.0.0.1", 1, EventBus::new());
        let mut template = CommandTemplate::new();
        template.push(":GS#");
        assert!(matches!(
            link.exchange(&template).await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Port 1 on localhost is essentially never listening
        let mut link = MountLink::new("test", "127.0.0.1", 1, EventBus::new());
        let result = link.ensure_connected().await;
        assert!(result.is_err());
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_partial_reply_accumulates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = socket.read(&mut buf).await;
                // Deliver the reply in two TCP segments
                let _ = socket.write_all(b"10:30").await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = socket.write_all(b":00#").await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let mut link = MountLink::new("test", &addr.ip().to_string(), addr.port(), EventBus::new());
        link.ensure_connected().await.expect("connect");
        let mut template = CommandTemplate::new();
        template.push(":GS#");
        let fields = link.exchange(&template).await.expect("exchange");
        assert_eq!(fields, vec!["10:30:00"]);
    }
}
