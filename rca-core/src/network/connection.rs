use std::fmt;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::RcaCodec;
use crate::error::RcaError;
use crate::packet::Packet;

/// Default depth of the inbound and outbound packet queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

/// Handle for queueing packets onto a connection's writer task.
pub type ConnectionSender = mpsc::Sender<Packet>;

/// A framed packet connection to one peer.
///
/// The byte stream is owned by two background tasks: a writer draining
/// the outbound queue into the socket and a reader feeding decoded
/// packets into the inbound queue. Dropping every sender ends the writer;
/// a read error or EOF ends the reader, after which [`recv`](Self::recv)
/// returns `None`.
#[derive(Debug)]
pub struct Connection {
    tx: ConnectionSender,
    rx: mpsc::Receiver<Packet>,
}

impl Connection {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_capacity(stream, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_capacity<S>(stream: S, capacity: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut net_writer, mut net_reader) = Framed::new(stream, RcaCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Packet>(capacity.max(1));

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!("network write error: {e}");
                    break;
                }
            }
            let _ = net_writer.close().await;
            debug!("connection writer stopped");
        });

        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).await.is_err() {
                            // Receiver dropped; nobody is listening.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("network read error: {e}");
                        break;
                    }
                }
            }
            debug!("connection reader stopped");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    pub async fn connect(info: &ConnectionInfo) -> Result<Self, RcaError> {
        let stream = TcpStream::connect(info.to_string()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub async fn send(&self, packet: Packet) -> Result<(), RcaError> {
        self.tx.send(packet).await.map_err(RcaError::from)
    }

    /// Next inbound packet; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    /// Separate the outbound and inbound halves.
    pub fn into_split(self) -> (ConnectionSender, mpsc::Receiver<Packet>) {
        (self.tx, self.rx)
    }
}

/// Host and port of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    ip: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<std::net::SocketAddr> for ConnectionInfo {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use bytes::Bytes;
    use serde_json::json;

    #[tokio::test]
    async fn packets_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(4096);
        let left = Connection::new(a);
        let mut right = Connection::new(b);

        let packet = Packet::with_attachments(
            Message::Publish {
                topic: "t".into(),
                data: json!({"n": 1}),
            },
            vec![Bytes::from_static(b"payload")],
        );
        left.send(packet.clone()).await.unwrap();
        assert_eq!(right.recv().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn recv_ends_when_peer_drops() {
        let (a, b) = tokio::io::duplex(1024);
        let left = Connection::new(a);
        let mut right = Connection::new(b);

        drop(left);
        assert!(right.recv().await.is_none());
    }

    #[test]
    fn info_formats_as_host_port() {
        let info = ConnectionInfo::new("127.0.0.1", 9400);
        assert_eq!(info.to_string(), "127.0.0.1:9400");
        assert_eq!(info.ip(), "127.0.0.1");
        assert_eq!(info.port(), 9400);
    }
}
