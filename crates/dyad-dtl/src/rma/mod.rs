//! Payload as a tag-matched message to the consumer's worker.
//!
//! The consumer sends its worker address, the transfer tag and a fetch
//! sequence number inside the fetch request. The producer acknowledges with
//! the payload size on the response stream, then sends the file to that
//! address under that tag, prefixed with the sequence number.

pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dyad_kvs::{Responder, RpcStream};
use dyad_storage::StorageEntry;
use dyad_types::{Address, ParticipantId};

use crate::error::{DtlError, DtlResult};
use crate::mode::DtlMode;
use crate::request::{FetchRequest, RmaAck, RmaInfo};
use crate::rpc::stream_failure;
use crate::transport::{ClientTransport, Received, ServerConnection, ServerTransport};
use worker::{wait_request, CloseStatus, Endpoint, TagWorker, FULL_TAG_MASK};

const SEQ_HEADER_LEN: usize = 8;

fn frame_payload(seq: u64, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQ_HEADER_LEN + data.len());
    buf.put_u64_le(seq);
    buf.put_slice(data);
    buf.freeze()
}

fn split_payload(mut body: Bytes) -> DtlResult<(u64, Bytes)> {
    if body.len() < SEQ_HEADER_LEN {
        return Err(DtlError::CommFail(format!("tagged message of {} bytes has no header", body.len())));
    }
    let seq = body.get_u64_le();
    Ok((seq, body))
}

pub struct RmaClientTransport {
    worker: Arc<TagWorker>,
    self_id: ParticipantId,
    /// Zero when no connection is established; a producer never sends to
    /// itself so a real tag is never zero.
    tag: u64,
    /// Sequence number of the current fetch; zero when idle.
    seq: u64,
    last_seq: u64,
}

impl RmaClientTransport {
    pub async fn bind(bind: Address, self_id: ParticipantId) -> DtlResult<Self> {
        let worker = TagWorker::bind(bind)
            .await
            .map_err(|e| DtlError::InitFail(e.to_string()))?;
        Ok(Self {
            worker: Arc::new(worker),
            self_id,
            tag: 0,
            seq: 0,
            last_seq: 0,
        })
    }

    pub fn worker(&self) -> &Arc<TagWorker> {
        &self.worker
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Drop payloads left on the current tag by earlier, abandoned fetches.
    fn discard_stale(&self) {
        if self.tag == 0 {
            return;
        }
        let dropped = self.worker.discard(self.tag, FULL_TAG_MASK);
        if dropped > 0 {
            tracing::debug!(tag = self.tag, dropped, "discarded stale payloads");
        }
    }

    async fn recv_tagged(&self, stream: &mut RpcStream) -> DtlResult<Bytes> {
        let worker = &self.worker;
        let mut stream_open = true;
        loop {
            if let Some(msg) = worker.probe(self.tag, FULL_TAG_MASK, true) {
                let request = worker.recv_message_nb(&msg);
                let body = wait_request(worker, &request)
                    .await
                    .map_err(|e| DtlError::CommFail(e.to_string()))?;
                let (seq, payload) = split_payload(body)?;
                if seq == self.seq {
                    return Ok(payload);
                }
                tracing::debug!(tag = self.tag, seq, expected = self.seq, "dropped payload of an earlier fetch");
                continue;
            }
            if worker.progress() > 0 {
                continue;
            }
            if !stream_open {
                worker.wait().await;
                continue;
            }
            // The producer may fail after acknowledging; watch the stream so
            // that does not leave us waiting forever.
            tokio::select! {
                _ = worker.wait() => {}
                next = stream.next() => match next {
                    Ok(Some(_)) => {
                        return Err(DtlError::CommFail("unexpected data after acknowledgement".to_string()));
                    }
                    Ok(None) => stream_open = false,
                    Err(status) => {
                        return Err(DtlError::CommFail(format!("producer answered {}", status)));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ClientTransport for RmaClientTransport {
    fn mode(&self) -> DtlMode {
        DtlMode::Rma
    }

    async fn establish_connection(&mut self, owner: ParticipantId) -> DtlResult<()> {
        self.tag = ParticipantId::transfer_tag(owner, self.self_id);
        self.discard_stale();
        self.last_seq = self.last_seq.wrapping_add(1).max(1);
        self.seq = self.last_seq;
        tracing::debug!(%owner, tag = self.tag, seq = self.seq, "rma connection established");
        Ok(())
    }

    fn pack_request(&self, rel_path: &str, storage: Option<&StorageEntry>) -> DtlResult<Bytes> {
        if self.tag == 0 {
            return Err(DtlError::PackFail("no connection established".to_string()));
        }
        FetchRequest {
            path: rel_path.to_string(),
            rma: Some(RmaInfo::new(self.tag, self.seq, &self.worker.address_bytes())),
            storage: storage.cloned(),
        }
        .pack()
    }

    async fn recv(&mut self, stream: &mut RpcStream) -> DtlResult<Received> {
        if self.tag == 0 {
            return Err(DtlError::CommFail("recv without an established connection".to_string()));
        }
        let ack = match stream.next().await {
            Ok(Some(body)) => RmaAck::unpack(&body)?,
            Ok(None) => return Err(DtlError::CommFail("fetch ended without an acknowledgement".to_string())),
            Err(status) => return stream_failure(status),
        };
        if ack.tag != self.tag || ack.seq != self.seq {
            return Err(DtlError::CommFail(format!(
                "acknowledged tag {:#x} seq {}, expected {:#x} seq {}",
                ack.tag, ack.seq, self.tag, self.seq
            )));
        }

        let payload = self.recv_tagged(stream).await?;
        if payload.len() as u64 != ack.payload_size {
            return Err(DtlError::CommFail(format!(
                "received {} bytes, producer announced {}",
                payload.len(),
                ack.payload_size
            )));
        }
        tracing::debug!(len = payload.len(), tag = self.tag, "payload received on tag");
        Ok(Received::Payload(payload))
    }

    async fn close_connection(&mut self) -> DtlResult<()> {
        self.discard_stale();
        self.tag = 0;
        self.seq = 0;
        Ok(())
    }

    async fn finalize(&mut self) -> DtlResult<()> {
        self.tag = 0;
        self.seq = 0;
        self.worker.shutdown();
        Ok(())
    }
}

pub struct RmaServerTransport {
    worker: Arc<TagWorker>,
}

impl RmaServerTransport {
    pub async fn bind(bind: Address) -> DtlResult<Self> {
        let worker = TagWorker::bind(bind)
            .await
            .map_err(|e| DtlError::InitFail(e.to_string()))?;
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    fn rma_info(request: &FetchRequest) -> DtlResult<&RmaInfo> {
        request
            .rma
            .as_ref()
            .ok_or_else(|| DtlError::PackFail("request carries no worker address".to_string()))
    }
}

#[async_trait]
impl ServerTransport for RmaServerTransport {
    fn mode(&self) -> DtlMode {
        DtlMode::Rma
    }

    fn unpack_request(&self, payload: &[u8]) -> DtlResult<FetchRequest> {
        let request = FetchRequest::unpack(payload)?;
        Self::rma_info(&request)?.worker_address()?;
        Ok(request)
    }

    async fn respond(&self, request: &FetchRequest, payload_size: u64, responder: &Responder) -> DtlResult<()> {
        let info = Self::rma_info(request)?;
        let ack = RmaAck {
            payload_size,
            tag: info.tag,
            seq: info.seq,
            address: info.address.clone(),
        };
        responder
            .respond(ack.pack()?)
            .await
            .map_err(|status| DtlError::CommFail(status.to_string()))
    }

    async fn establish_connection(
        &self,
        request: &FetchRequest,
        _responder: &Responder,
    ) -> DtlResult<Box<dyn ServerConnection>> {
        let info = Self::rma_info(request)?;
        let remote = info.worker_address()?;
        let endpoint = self
            .worker
            .create_endpoint(remote)
            .map_err(|e| DtlError::ConnectFail(e.to_string()))?;
        tracing::debug!(%remote, tag = info.tag, seq = info.seq, "endpoint created");
        Ok(Box::new(RmaConnection {
            worker: Arc::clone(&self.worker),
            endpoint,
            tag: info.tag,
            seq: info.seq,
        }))
    }

    async fn finalize(&self) -> DtlResult<()> {
        self.worker.shutdown();
        Ok(())
    }
}

pub struct RmaConnection {
    worker: Arc<TagWorker>,
    endpoint: Endpoint,
    tag: u64,
    seq: u64,
}

#[async_trait]
impl ServerConnection for RmaConnection {
    async fn send(&mut self, data: Bytes) -> DtlResult<()> {
        let len = data.len();
        let request = self.endpoint.send_nb(self.tag, frame_payload(self.seq, &data));
        match wait_request(&self.worker, &request).await {
            Ok(_) => {
                tracing::debug!(len, tag = self.tag, "payload sent");
                Ok(())
            }
            Err(e) => {
                self.endpoint.mark_error();
                Err(DtlError::CommFail(e.to_string()))
            }
        }
    }

    async fn close(&mut self) -> DtlResult<()> {
        if let CloseStatus::InProgress(request) = self.endpoint.close_nb() {
            let ok = match wait_request(&self.worker, &request).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(remote = %self.endpoint.remote(), "could not close endpoint, released anyway: {}", e);
                    false
                }
            };
            self.endpoint.close_finished(ok);
        }
        Ok(())
    }
}
