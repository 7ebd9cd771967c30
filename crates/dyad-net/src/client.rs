use bytes::Bytes;
use dyad_types::Address;

use crate::error::NetError;
use crate::message::{Frame, FrameKind};
use crate::socket::{AsyncConnector, Socket};

/// Issues calls against a [`crate::Server`].
///
/// Every call gets its own connection so a call that blocks on the remote
/// side (a lookup waiting for its key, a long transfer) never holds up
/// another one.
pub struct RpcClient<C> {
    connector: C,
}

impl<C> RpcClient<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Send a call and return the stream of its responses.
    pub async fn call<S: Socket>(
        &self,
        addr: Address,
        service_id: u16,
        method_id: u16,
        request: Bytes,
    ) -> Result<ResponseStream<S>, NetError>
    where
        C: AsyncConnector<S>,
    {
        let socket = self.connector.connect(addr).await?;
        socket
            .send_frame(&Frame::request(service_id, method_id, request))
            .await?;
        Ok(ResponseStream {
            socket,
            done: false,
        })
    }

    /// Call and expect at most one response body. An empty body is
    /// returned when the service answered with `End` alone.
    pub async fn call_unary<S: Socket>(
        &self,
        addr: Address,
        service_id: u16,
        method_id: u16,
        request: Bytes,
    ) -> Result<Bytes, NetError>
    where
        C: AsyncConnector<S>,
    {
        let mut stream = self.call::<S>(addr, service_id, method_id, request).await?;
        let body = stream.next().await?.unwrap_or_default();
        stream.finish().await?;
        Ok(body)
    }
}

/// Responses of one call, read frame by frame.
pub struct ResponseStream<S: Socket> {
    socket: S,
    done: bool,
}

impl<S: Socket> ResponseStream<S> {
    /// Next response body; `None` once the call ended normally, the
    /// remote status as `NetError::Remote` if it failed.
    pub async fn next(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.done {
            return Ok(None);
        }
        let frame = match self.socket.recv_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        match frame.kind {
            FrameKind::Data => Ok(Some(frame.body)),
            FrameKind::End => {
                self.close().await;
                Ok(None)
            }
            FrameKind::Error => {
                self.close().await;
                Err(NetError::Remote(frame.to_status()))
            }
            FrameKind::Request => {
                self.close().await;
                Err(NetError::UnexpectedFrame("request"))
            }
            FrameKind::Tagged => {
                self.close().await;
                Err(NetError::UnexpectedFrame("tagged"))
            }
        }
    }

    /// Drain any remaining responses until the terminal frame.
    pub async fn finish(&mut self) -> Result<(), NetError> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    async fn close(&mut self) {
        self.done = true;
        self.socket.close().await;
    }
}
