use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dyad_net::ResponseSink;
use dyad_types::{ParticipantId, RPCCode, Result, Status};
use tokio::sync::mpsc;

/// Responses an RPC stream buffers before the responder is backpressured.
pub const RPC_STREAM_DEPTH: usize = 16;

/// One item of an RPC response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEvent {
    Data(Bytes),
    End,
    Error(Status),
}

/// Caller side of an RPC: zero or more data responses followed by one
/// terminal end or error.
pub struct RpcStream {
    rx: mpsc::Receiver<RpcEvent>,
    done: bool,
}

impl RpcStream {
    pub fn channel(depth: usize) -> (mpsc::Sender<RpcEvent>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (tx, Self { rx, done: false })
    }

    /// Next data response, `None` after the terminal end. A terminal error
    /// is returned as `Err`. Safe to use inside `select!`.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(RpcEvent::Data(body)) => Ok(Some(body)),
            Some(RpcEvent::End) => {
                self.done = true;
                Ok(None)
            }
            Some(RpcEvent::Error(status)) => {
                self.done = true;
                Err(status)
            }
            None => {
                self.done = true;
                Err(Status::with_message(
                    RPCCode::SOCKET_CLOSED,
                    "rpc stream closed without a terminal response",
                ))
            }
        }
    }

    /// Drain until the terminal response.
    pub async fn finish(&mut self) -> Result<()> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

enum Outlet {
    Stream(mpsc::Sender<RpcEvent>),
    Wire(ResponseSink),
}

/// Handler side of an RPC. Data goes out through [`Responder::respond`];
/// the handler's return value becomes the terminal response.
#[derive(Clone)]
pub struct Responder {
    outlet: Arc<Outlet>,
}

impl Responder {
    /// Responder feeding an in-process [`RpcStream`].
    pub fn stream(tx: mpsc::Sender<RpcEvent>) -> Self {
        Self {
            outlet: Arc::new(Outlet::Stream(tx)),
        }
    }

    /// Responder writing `Data` frames of a networked call.
    pub fn wire(sink: ResponseSink) -> Self {
        Self {
            outlet: Arc::new(Outlet::Wire(sink)),
        }
    }

    pub async fn respond(&self, body: Bytes) -> Result<()> {
        match self.outlet.as_ref() {
            Outlet::Stream(tx) => tx.send(RpcEvent::Data(body)).await.map_err(|_| {
                Status::with_message(RPCCode::SOCKET_CLOSED, "requester went away")
            }),
            Outlet::Wire(sink) => sink.send(body).await,
        }
    }
}

/// An inbound RPC delivered to a registered handler.
#[derive(Debug, Clone)]
pub struct Request {
    pub sender: ParticipantId,
    pub topic: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request, responder: Responder) -> Result<()>;
}

/// The distributed key-value store plus the RPC mechanism that rides on it.
///
/// A store handle is bound to one participant: `rpc` calls are sent as that
/// participant and `register_service` hosts handlers for it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn rank(&self) -> ParticipantId;

    async fn commit(&self, namespace: &str, key: &str, value: Bytes) -> Result<()>;

    /// Fetch a value. With `wait_for_create` the call blocks until the key
    /// exists; without it a missing key is `KV_STORE_NOT_FOUND`.
    async fn lookup(&self, namespace: &str, key: &str, wait_for_create: bool) -> Result<Bytes>;

    async fn rpc(&self, target: ParticipantId, topic: &str, payload: Bytes) -> Result<RpcStream>;

    async fn register_service(&self, topic: &str, handler: Arc<dyn RequestHandler>) -> Result<()>;
}

/// Run `handler` in its own task, streaming into a fresh [`RpcStream`].
pub fn spawn_request(handler: Arc<dyn RequestHandler>, request: Request) -> RpcStream {
    let (tx, stream) = RpcStream::channel(RPC_STREAM_DEPTH);
    let responder = Responder::stream(tx.clone());
    tokio::spawn(async move {
        let topic = request.topic.clone();
        let terminal = match handler.handle(request, responder).await {
            Ok(()) => RpcEvent::End,
            Err(status) => {
                tracing::debug!(%topic, %status, "request handler failed");
                RpcEvent::Error(status)
            }
        };
        let _ = tx.send(terminal).await;
    });
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyad_types::DyadCode;

    struct Repeat;

    #[async_trait]
    impl RequestHandler for Repeat {
        async fn handle(&self, request: Request, responder: Responder) -> Result<()> {
            if request.payload.is_empty() {
                return Err(Status::new(DyadCode::NO_DATA));
            }
            for _ in 0..request.payload[0] {
                responder.respond(request.payload.clone()).await?;
            }
            Ok(())
        }
    }

    fn request(payload: &'static [u8]) -> Request {
        Request {
            sender: ParticipantId(1),
            topic: "repeat".into(),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn test_stream_data_then_end() {
        let mut stream = spawn_request(Arc::new(Repeat), request(&[2]));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(&[2]));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(&[2]));
        assert!(stream.next().await.unwrap().is_none());
        assert!(stream.is_done());
    }

    #[tokio::test]
    async fn test_stream_error_terminal() {
        let mut stream = spawn_request(Arc::new(Repeat), request(&[]));
        let err = stream.next().await.unwrap_err();
        assert_eq!(err.code(), DyadCode::NO_DATA);
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_more_responses_than_buffer() {
        let mut stream = spawn_request(Arc::new(Repeat), request(&[40]));
        let mut n = 0;
        while stream.next().await.unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 40);
    }

    #[tokio::test]
    async fn test_stream_without_terminal() {
        let (tx, mut stream) = RpcStream::channel(1);
        drop(tx);
        let err = stream.next().await.unwrap_err();
        assert_eq!(err.code(), RPCCode::SOCKET_CLOSED);
    }
}
