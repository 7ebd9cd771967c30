//! Payload inside the fetch call's own response stream.

use async_trait::async_trait;
use bytes::Bytes;
use dyad_kvs::{Responder, RpcStream};
use dyad_storage::StorageEntry;
use dyad_types::{DyadCode, ParticipantId, Status};

use crate::error::{DtlError, DtlResult};
use crate::mode::DtlMode;
use crate::request::FetchRequest;
use crate::transport::{ClientTransport, Received, ServerConnection, ServerTransport};

/// Map a failed fetch stream to the transport outcome.
pub(crate) fn stream_failure(status: Status) -> DtlResult<Received> {
    if status.code() == DyadCode::NO_TRANSFER_NEEDED {
        Ok(Received::SharedDevice)
    } else {
        Err(DtlError::CommFail(format!("producer answered {}", status)))
    }
}

#[derive(Debug, Default)]
pub struct RpcClientTransport {
    owner: Option<ParticipantId>,
}

impl RpcClientTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<ParticipantId> {
        self.owner
    }
}

#[async_trait]
impl ClientTransport for RpcClientTransport {
    fn mode(&self) -> DtlMode {
        DtlMode::Rpc
    }

    async fn establish_connection(&mut self, owner: ParticipantId) -> DtlResult<()> {
        self.owner = Some(owner);
        Ok(())
    }

    fn pack_request(&self, rel_path: &str, storage: Option<&StorageEntry>) -> DtlResult<Bytes> {
        FetchRequest {
            path: rel_path.to_string(),
            rma: None,
            storage: storage.cloned(),
        }
        .pack()
    }

    async fn recv(&mut self, stream: &mut RpcStream) -> DtlResult<Received> {
        let payload = match stream.next().await {
            Ok(Some(body)) => body,
            Ok(None) => return Err(DtlError::CommFail("fetch ended without a payload".to_string())),
            Err(status) => return stream_failure(status),
        };
        if let Err(status) = stream.finish().await {
            return Err(DtlError::CommFail(format!("after payload: {}", status)));
        }
        tracing::debug!(len = payload.len(), "payload received in response");
        Ok(Received::Payload(payload))
    }

    async fn close_connection(&mut self) -> DtlResult<()> {
        self.owner = None;
        Ok(())
    }

    async fn finalize(&mut self) -> DtlResult<()> {
        self.close_connection().await
    }
}

#[derive(Debug, Default)]
pub struct RpcServerTransport;

impl RpcServerTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServerTransport for RpcServerTransport {
    fn mode(&self) -> DtlMode {
        DtlMode::Rpc
    }

    fn unpack_request(&self, payload: &[u8]) -> DtlResult<FetchRequest> {
        FetchRequest::unpack(payload)
    }

    async fn respond(&self, _request: &FetchRequest, _payload_size: u64, _responder: &Responder) -> DtlResult<()> {
        Ok(())
    }

    async fn establish_connection(
        &self,
        _request: &FetchRequest,
        responder: &Responder,
    ) -> DtlResult<Box<dyn ServerConnection>> {
        Ok(Box::new(RpcConnection {
            responder: Some(responder.clone()),
        }))
    }

    async fn finalize(&self) -> DtlResult<()> {
        Ok(())
    }
}

pub struct RpcConnection {
    responder: Option<Responder>,
}

#[async_trait]
impl ServerConnection for RpcConnection {
    async fn send(&mut self, data: Bytes) -> DtlResult<()> {
        let responder = self
            .responder
            .as_ref()
            .ok_or_else(|| DtlError::CommFail("send on a closed connection".to_string()))?;
        responder
            .respond(data)
            .await
            .map_err(|status| DtlError::CommFail(status.to_string()))
    }

    async fn close(&mut self) -> DtlResult<()> {
        self.responder = None;
        Ok(())
    }
}
