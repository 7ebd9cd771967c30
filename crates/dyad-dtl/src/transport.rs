use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dyad_kvs::{Responder, RpcStream};
use dyad_storage::StorageEntry;
use dyad_types::{Address, ParticipantId};

use crate::config::DtlConfig;
use crate::error::{DtlError, DtlResult};
use crate::mode::DtlMode;
use crate::request::FetchRequest;
use crate::rma::{RmaClientTransport, RmaServerTransport};
use crate::rpc::{RpcClientTransport, RpcServerTransport};

/// What a fetch delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Payload(Bytes),
    /// The producer found both sides on the same device and sent nothing.
    SharedDevice,
}

/// Consumer half of a transport. One connection at a time:
/// establish, pack, recv, close.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    fn mode(&self) -> DtlMode;

    async fn establish_connection(&mut self, owner: ParticipantId) -> DtlResult<()>;

    /// Body of the `dyad.fetch` call for `rel_path`.
    fn pack_request(&self, rel_path: &str, storage: Option<&StorageEntry>) -> DtlResult<Bytes>;

    /// Take the file contents out of the fetch call's response stream.
    async fn recv(&mut self, stream: &mut RpcStream) -> DtlResult<Received>;

    /// Idempotent.
    async fn close_connection(&mut self) -> DtlResult<()>;

    /// Idempotent.
    async fn finalize(&mut self) -> DtlResult<()>;
}

/// Producer half of a transport, shared by all transfers in flight.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    fn mode(&self) -> DtlMode;

    fn unpack_request(&self, payload: &[u8]) -> DtlResult<FetchRequest>;

    /// Tell the consumer what is coming, before the payload is sent.
    async fn respond(&self, request: &FetchRequest, payload_size: u64, responder: &Responder) -> DtlResult<()>;

    /// Fresh connection state for one transfer.
    async fn establish_connection(
        &self,
        request: &FetchRequest,
        responder: &Responder,
    ) -> DtlResult<Box<dyn ServerConnection>>;

    async fn finalize(&self) -> DtlResult<()>;
}

/// One producer-side transfer.
#[async_trait]
pub trait ServerConnection: Send {
    async fn send(&mut self, data: Bytes) -> DtlResult<()>;

    /// Idempotent; `send` after `close` fails.
    async fn close(&mut self) -> DtlResult<()>;
}

fn parse_bind(config: &DtlConfig) -> DtlResult<Address> {
    config
        .rma_bind
        .parse()
        .map_err(|e| DtlError::BadConfig(format!("rma_bind {:?}: {}", config.rma_bind, e)))
}

pub async fn client_transport(
    mode: DtlMode,
    config: &DtlConfig,
    self_id: ParticipantId,
) -> DtlResult<Box<dyn ClientTransport>> {
    tracing::debug!(%mode, %self_id, "creating consumer transport");
    Ok(match mode {
        DtlMode::Rpc => Box::new(RpcClientTransport::new()),
        DtlMode::Rma => Box::new(RmaClientTransport::bind(parse_bind(config)?, self_id).await?),
    })
}

pub async fn server_transport(mode: DtlMode, config: &DtlConfig) -> DtlResult<Arc<dyn ServerTransport>> {
    tracing::debug!(%mode, "creating producer transport");
    Ok(match mode {
        DtlMode::Rpc => Arc::new(RpcServerTransport::new()),
        DtlMode::Rma => Arc::new(RmaServerTransport::bind(parse_bind(config)?).await?),
    })
}
