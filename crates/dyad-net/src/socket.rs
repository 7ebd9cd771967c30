use async_trait::async_trait;
use dyad_types::Address;

use crate::error::NetError;
use crate::message::Frame;

/// A connected, frame-oriented socket.
///
/// Implementations live in their own crates (`dyad-net-tcp`); tests use
/// in-memory mocks.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    async fn send_frame(&self, frame: &Frame) -> Result<(), NetError>;

    /// Receive exactly one frame. `NetError::ConnectionClosed` on EOF.
    async fn recv_frame(&self) -> Result<Frame, NetError>;

    fn peer_addr(&self) -> Address;

    fn local_addr(&self) -> Address;

    async fn close(&self);
}

/// Accepts incoming connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Socket: Socket;

    async fn accept(&self) -> Result<Self::Socket, NetError>;

    fn local_addr(&self) -> Address;
}

/// Establishes outbound connections.
#[async_trait]
pub trait AsyncConnector<S: Socket>: Send + Sync {
    async fn connect(&self, addr: Address) -> Result<S, NetError>;
}
