//! TCP transport for the dyad networking layer.
//!
//! Provides [`TcpSocket`], [`TcpListener`] and [`TcpConnector`], which wrap
//! Tokio's TCP primitives and implement the `dyad_net` socket traits.
//!
//! The socket splits a `TcpStream` into independent read/write halves so that
//! sending and receiving can proceed concurrently without holding a single lock
//! over the entire stream. Frames are read with exact-length reads: first the
//! fixed header, then exactly the body size it announces.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use dyad_net::message::{FrameHeader, FRAME_HEADER_SIZE};
use dyad_net::{AsyncConnector, Frame, Listener, NetError, Socket};
use dyad_types::{Address, AddressType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

fn to_address(sa: SocketAddr) -> Address {
    // Only IPv4 is representable; anything else keeps its port with a zero IP.
    Address::from_socket_addr(sa, AddressType::TCP)
        .unwrap_or_else(|| Address::new(0, sa.port(), AddressType::TCP))
}

// ---------------------------------------------------------------------------
// TcpSocket
// ---------------------------------------------------------------------------

pub struct TcpSocket {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    peer_addr: Address,
    local_addr: Address,
}

impl TcpSocket {
    pub fn from_stream(stream: tokio::net::TcpStream) -> Result<Self, NetError> {
        stream.set_nodelay(true)?;
        let peer_addr = to_address(stream.peer_addr()?);
        let local_addr = to_address(stream.local_addr()?);
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: Arc::new(Mutex::new(read_half)),
            writer: Arc::new(Mutex::new(write_half)),
            peer_addr,
            local_addr,
        })
    }

    /// Read one complete frame. EOF before the first header byte is a clean
    /// close; EOF anywhere later is a truncated frame.
    async fn read_frame(&self) -> Result<Frame, NetError> {
        let mut reader = self.reader.lock().await;

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < FRAME_HEADER_SIZE {
            let n = reader.read(&mut raw[filled..]).await?;
            if n == 0 {
                return Err(if filled == 0 {
                    NetError::ConnectionClosed
                } else {
                    NetError::IncompleteHeader {
                        need: FRAME_HEADER_SIZE,
                        have: filled,
                    }
                });
            }
            filled += n;
        }
        let header = FrameHeader::from_bytes(&raw)?;

        let mut body = BytesMut::zeroed(header.size as usize);
        if let Err(e) = reader.read_exact(&mut body).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => NetError::IncompleteBody {
                    need: header.size,
                    have: 0,
                },
                _ => NetError::Io(e),
            });
        }
        header.validate(&body)?;

        Ok(Frame {
            kind: header.kind,
            code: header.code,
            word: header.word,
            body: body.freeze(),
        })
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), NetError> {
        let header = frame.header().to_bytes();
        let mut writer = self.writer.lock().await;
        writer.write_all(&header).await?;
        writer.write_all(&frame.body).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Socket for TcpSocket {
    async fn send_frame(&self, frame: &Frame) -> Result<(), NetError> {
        self.write_frame(frame).await
    }

    async fn recv_frame(&self) -> Result<Frame, NetError> {
        self.read_frame().await
    }

    fn peer_addr(&self) -> Address {
        self.peer_addr
    }

    fn local_addr(&self) -> Address {
        self.local_addr
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// TcpListener
// ---------------------------------------------------------------------------

pub struct TcpListener {
    inner: tokio::net::TcpListener,
    local_addr: Address,
}

impl TcpListener {
    /// Bind to `addr`; port 0 picks a free port.
    pub async fn bind(addr: Address) -> Result<Self, NetError> {
        Self::bind_socket_addr(addr.to_socket_addr()).await
    }

    pub async fn bind_socket_addr(sa: SocketAddr) -> Result<Self, NetError> {
        let listener = tokio::net::TcpListener::bind(sa).await?;
        let local_addr = to_address(listener.local_addr()?);
        tracing::info!(%local_addr, "TCP listener bound");
        Ok(Self {
            inner: listener,
            local_addr,
        })
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Socket = TcpSocket;

    async fn accept(&self) -> Result<TcpSocket, NetError> {
        let (stream, peer_sa) = self.inner.accept().await?;
        tracing::debug!(peer = %peer_sa, "accepted TCP connection");
        TcpSocket::from_stream(stream)
    }

    fn local_addr(&self) -> Address {
        self.local_addr
    }
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

pub async fn connect(addr: Address) -> Result<TcpSocket, NetError> {
    tracing::trace!(%addr, "connecting via TCP");
    let stream = tokio::net::TcpStream::connect(addr.to_socket_addr())
        .await
        .map_err(|source| NetError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;
    TcpSocket::from_stream(stream)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AsyncConnector<TcpSocket> for TcpConnector {
    async fn connect(&self, addr: Address) -> Result<TcpSocket, NetError> {
        crate::connect(addr).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
