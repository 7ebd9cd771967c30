use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dyad_types::{Address, Status};
use tokio::sync::mpsc;

/// Sending half handed to a handler for streaming response bodies.
///
/// The terminal frame is not the handler's business: the server sends `End`
/// when the handler returns `Ok` and `Error` when it returns `Err`.
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Bytes>,
}

impl ResponseSink {
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Queue one `Data` response. Fails if the caller has gone away.
    pub async fn send(&self, body: Bytes) -> Result<(), Status> {
        self.tx.send(body).await.map_err(|_| {
            Status::with_message(dyad_types::RPCCode::SOCKET_CLOSED, "caller went away")
        })
    }
}

/// Who sent the call being handled.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub peer: Address,
}

/// An RPC service: a numeric id plus methods identified by `method_id`.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn service_id(&self) -> u16;

    fn service_name(&self) -> &str;

    async fn handle(
        &self,
        ctx: CallContext,
        method_id: u16,
        request: Bytes,
        sink: ResponseSink,
    ) -> Result<(), Status>;
}

/// Registry mapping service ids to their handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<u16, Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same id.
    pub fn register(&self, service: Arc<dyn ServiceHandler>) {
        self.services.insert(service.service_id(), service);
    }

    /// Clone out the handler so no map guard is held while it runs.
    pub fn get(&self, service_id: u16) -> Option<Arc<dyn ServiceHandler>> {
        self.services.get(&service_id).map(|e| Arc::clone(e.value()))
    }

    pub fn unregister(&self, service_id: u16) -> bool {
        self.services.remove(&service_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
