//! Networked store services hosted on a `dyad_net::Server`.
//!
//! [`BrokerService`] runs inside `dyad-broker`: it owns the key-value state
//! and the directory that maps a participant to the address where it hosts
//! its topic handlers. [`TopicService`] runs inside every participant that
//! registers a handler and turns incoming calls into [`Request`]s.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dyad_net::{CallContext, ResponseSink, ServiceHandler};
use dyad_types::{Address, ParticipantId, RPCCode, Status};

use crate::local::LocalBroker;
use crate::store::{Request, RequestHandler, Responder};
use crate::wire::{
    decode_call, from_json, BrokerMethod, CommitReq, LookupReq, RegisterReq, ResolveReq,
    BROKER_SERVICE_ID, TOPIC_SERVICE_ID,
};

pub struct BrokerService {
    store: LocalBroker,
    directory: DashMap<ParticipantId, Address>,
}

impl BrokerService {
    pub fn new() -> Self {
        Self {
            store: LocalBroker::new(),
            directory: DashMap::new(),
        }
    }

    pub fn store(&self) -> &LocalBroker {
        &self.store
    }

    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }
}

impl Default for BrokerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceHandler for BrokerService {
    fn service_id(&self) -> u16 {
        BROKER_SERVICE_ID
    }

    fn service_name(&self) -> &str {
        "dyad.broker"
    }

    async fn handle(
        &self,
        ctx: CallContext,
        method_id: u16,
        request: Bytes,
        sink: ResponseSink,
    ) -> Result<(), Status> {
        let method = BrokerMethod::try_from(method_id)
            .map_err(|_| Status::new(RPCCode::INVALID_METHOD_ID))?;

        match method {
            BrokerMethod::Commit => {
                let req: CommitReq = from_json(&request)?;
                self.store.commit(&req.namespace, &req.key, req.value_bytes()?)
            }
            BrokerMethod::Lookup => {
                let req: LookupReq = from_json(&request)?;
                let value = self
                    .store
                    .lookup(&req.namespace, &req.key, req.wait_for_create)
                    .await?;
                sink.send(value).await
            }
            BrokerMethod::Register => {
                let req: RegisterReq = from_json(&request)?;
                let addr: Address = req
                    .address
                    .parse()
                    .map_err(|e| Status::with_message(RPCCode::INVALID_ADDR, format!("{}", e)))?;
                tracing::info!(rank = %req.rank, %addr, peer = %ctx.peer, "participant registered");
                self.directory.insert(req.rank, addr);
                Ok(())
            }
            BrokerMethod::Resolve => {
                let req: ResolveReq = from_json(&request)?;
                let addr = self
                    .directory
                    .get(&req.rank)
                    .map(|e| *e.value())
                    .ok_or_else(|| {
                        Status::with_message(
                            RPCCode::NO_SUCH_PARTICIPANT,
                            format!("participant {} not registered", req.rank),
                        )
                    })?;
                sink.send(Bytes::from(addr.to_string())).await
            }
        }
    }
}

/// Topic handlers of one participant, reachable over the network.
#[derive(Default)]
pub struct TopicService {
    topics: DashMap<String, Arc<dyn RequestHandler>>,
}

impl TopicService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: &str, handler: Arc<dyn RequestHandler>) {
        self.topics.insert(topic.to_string(), handler);
    }
}

#[async_trait]
impl ServiceHandler for TopicService {
    fn service_id(&self) -> u16 {
        TOPIC_SERVICE_ID
    }

    fn service_name(&self) -> &str {
        "dyad.topics"
    }

    async fn handle(
        &self,
        _ctx: CallContext,
        _method_id: u16,
        request: Bytes,
        sink: ResponseSink,
    ) -> Result<(), Status> {
        let (sender, topic, payload) = decode_call(request)?;
        let handler = self
            .topics
            .get(&topic)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Status::with_message(RPCCode::INVALID_SERVICE_NAME, topic.clone()))?;
        tracing::debug!(%sender, %topic, "topic call");
        handler
            .handle(
                Request {
                    sender,
                    topic,
                    payload,
                },
                Responder::wire(sink),
            )
            .await
    }
}
