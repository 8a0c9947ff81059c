//! Datagram transports that carry ZRTP and, after the handshake, media.
//!
//! [`UdpTransport`] is the production implementation. [`LoopbackTransport`]
//! pairs two in-process endpoints and can rewrite or drop datagrams in
//! flight, which tests use for corruption and loss injection.

use async_trait::async_trait;
use log::debug;
use rpcore::types::SessionDescriptor;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport closed")]
    Closed,

    #[error("could not resolve relay address {0}")]
    Resolve(String),
}

impl TransportError {
    /// The relay or peer actively refused the datagram (ICMP port unreachable).
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }
}

/// A connected, unreliable datagram channel.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next datagram and returns its length.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Opens the media transport for a signaled session.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        session: &SessionDescriptor,
    ) -> Result<Arc<dyn DatagramTransport>, TransportError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(local: &str) -> Result<Self, TransportError> {
        Ok(Self {
            socket: UdpSocket::bind(local).await?,
        })
    }

    /// Fixes the remote end; only datagrams from it are received afterwards.
    pub async fn connect(&self, remote: &str) -> Result<(), TransportError> {
        self.socket
            .connect(remote)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::InvalidInput => TransportError::Resolve(remote.to_string()),
                _ => TransportError::Io(e),
            })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket.send(datagram).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.socket.recv(buf).await?)
    }
}

/// Connects to the relay named in the session descriptor over UDP.
#[derive(Default)]
pub struct UdpConnector {
    bind_address: Option<String>,
}

impl UdpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = Some(address.into());
        self
    }
}

#[async_trait]
impl TransportConnector for UdpConnector {
    async fn connect(
        &self,
        session: &SessionDescriptor,
    ) -> Result<Arc<dyn DatagramTransport>, TransportError> {
        let transport =
            UdpTransport::bind(self.bind_address.as_deref().unwrap_or("0.0.0.0:0")).await?;
        transport.connect(&session.relay_address()).await?;
        debug!(
            "Media transport {} -> {} for session {}",
            transport.local_addr()?,
            session.relay_address(),
            session.session_id
        );
        Ok(Arc::new(transport))
    }
}

/// Sees every outgoing datagram with its index on this endpoint.
/// Returning `None` drops the datagram.
pub type DatagramFilter = Arc<dyn Fn(usize, Vec<u8>) -> Option<Vec<u8>> + Send + Sync>;

/// One end of an in-process datagram pipe.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    filter: Option<DatagramFilter>,
    sent: AtomicUsize,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
            filter: None,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn with_filter(mut self, filter: DatagramFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[async_trait]
impl DatagramTransport for LoopbackTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        let index = self.sent.fetch_add(1, Ordering::SeqCst);
        let datagram = match &self.filter {
            Some(filter) => match filter(index, datagram.to_vec()) {
                Some(d) => d,
                None => return Ok(()),
            },
            None => datagram.to_vec(),
        };
        // The peer having gone away is indistinguishable from loss on UDP.
        let _ = self.tx.send(datagram);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let datagram = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }
}

/// Hands out pre-built transports in order, one per `connect` call.
///
/// Lets tests and the loopback demo put both call roles on one pair.
#[derive(Default)]
pub struct StaticConnector {
    transports: std::sync::Mutex<Vec<Arc<dyn DatagramTransport>>>,
}

impl StaticConnector {
    pub fn new(transports: Vec<Arc<dyn DatagramTransport>>) -> Self {
        let mut transports = transports;
        transports.reverse();
        Self {
            transports: std::sync::Mutex::new(transports),
        }
    }
}

#[async_trait]
impl TransportConnector for StaticConnector {
    async fn connect(
        &self,
        _session: &SessionDescriptor,
    ) -> Result<Arc<dyn DatagramTransport>, TransportError> {
        self.transports
            .lock()
            .map_err(|_| TransportError::Closed)?
            .pop()
            .ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_pair_delivers_both_ways() {
        let (a, b) = LoopbackTransport::pair();
        a.send(b"ping").await.unwrap();
        b.send(b"pong").await.unwrap();

        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_filter_can_drop_and_rewrite() {
        let (a, b) = LoopbackTransport::pair();
        let a = a.with_filter(Arc::new(|index: usize, mut datagram: Vec<u8>| {
            if index == 0 {
                return None;
            }
            datagram[0] ^= 0xff;
            Some(datagram)
        }));

        a.send(&[0x00]).await.unwrap();
        a.send(&[0x0f]).await.unwrap();

        let mut buf = [0u8; 4];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xf0]);
    }

    #[tokio::test]
    async fn test_recv_after_peer_dropped_reports_closed() {
        let (a, b) = LoopbackTransport::pair();
        drop(a);
        let mut buf = [0u8; 4];
        assert!(matches!(b.recv(&mut buf).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_udp_transport_round_trip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        a.connect(&b.local_addr().unwrap().to_string()).await.unwrap();
        b.connect(&a.local_addr().unwrap().to_string()).await.unwrap();

        a.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_static_connector_hands_out_in_order() {
        let (a, b) = LoopbackTransport::pair();
        let b: Arc<dyn DatagramTransport> = Arc::new(b);
        let connector = StaticConnector::new(vec![Arc::new(a), b]);
        let session = SessionDescriptor::new("relay", 1, 1);

        let first = connector.connect(&session).await.unwrap();
        let second = connector.connect(&session).await.unwrap();
        first.send(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(second.recv(&mut buf).await.unwrap(), 1);
        assert!(connector.connect(&session).await.is_err());
    }
}
