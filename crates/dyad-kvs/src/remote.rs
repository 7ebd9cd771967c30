//! Client side of the networked store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dyad_net::{NetError, RpcClient, Server};
use dyad_net_tcp::{TcpConnector, TcpListener, TcpSocket};
use dyad_types::{make_error_msg, Address, ParticipantId, RPCCode, Result, Status};
use tokio::sync::Mutex;

use crate::broker::TopicService;
use crate::store::{MetadataStore, RequestHandler, RpcEvent, RpcStream, RPC_STREAM_DEPTH};
use crate::wire::{
    encode_call, to_json, BrokerMethod, CommitReq, LookupReq, RegisterReq, ResolveReq,
    BROKER_SERVICE_ID, TOPIC_SERVICE_ID,
};

struct ServiceHost {
    server: Server,
    addr: Address,
}

/// [`MetadataStore`] backed by a `dyad-broker` reached over TCP.
///
/// Handlers registered through this store are served from a local server
/// bound on `service_bind`; its address is published in the broker's
/// directory so other participants can call it directly.
pub struct RemoteStore {
    rank: ParticipantId,
    broker: Address,
    service_bind: Address,
    client: RpcClient<TcpConnector>,
    topics: Arc<TopicService>,
    host: Mutex<Option<ServiceHost>>,
    peers: DashMap<ParticipantId, Address>,
}

impl RemoteStore {
    pub fn new(rank: ParticipantId, broker: Address, service_bind: Address) -> Self {
        Self {
            rank,
            broker,
            service_bind,
            client: RpcClient::new(TcpConnector::new()),
            topics: Arc::new(TopicService::new()),
            host: Mutex::new(None),
            peers: DashMap::new(),
        }
    }

    pub fn broker_addr(&self) -> Address {
        self.broker
    }

    /// Address this participant's topic handlers are served on, once any
    /// handler has been registered.
    pub async fn service_addr(&self) -> Option<Address> {
        self.host.lock().await.as_ref().map(|h| h.addr)
    }

    /// Stop serving topic handlers.
    pub async fn shutdown(&self) {
        if let Some(mut host) = self.host.lock().await.take() {
            host.server.stop();
        }
    }

    async fn broker_call(&self, method: BrokerMethod, body: Bytes) -> Result<Bytes> {
        self.client
            .call_unary::<TcpSocket>(self.broker, BROKER_SERVICE_ID, method.into(), body)
            .await
            .map_err(Status::from)
    }

    async fn resolve_peer(&self, target: ParticipantId) -> Result<Address> {
        if let Some(addr) = self.peers.get(&target) {
            return Ok(*addr.value());
        }
        let body = self
            .broker_call(BrokerMethod::Resolve, to_json(&ResolveReq { rank: target })?)
            .await?;
        let text = std::str::from_utf8(&body)
            .map_err(|_| Status::with_message(RPCCode::INVALID_ADDR, "address is not utf-8"))?;
        let addr: Address = match text.parse() {
            Ok(addr) => addr,
            Err(e) => return make_error_msg(RPCCode::INVALID_ADDR, format!("{}: {}", text, e)),
        };
        self.peers.insert(target, addr);
        Ok(addr)
    }
}

#[async_trait]
impl MetadataStore for RemoteStore {
    fn rank(&self) -> ParticipantId {
        self.rank
    }

    async fn commit(&self, namespace: &str, key: &str, value: Bytes) -> Result<()> {
        let body = to_json(&CommitReq::new(namespace, key, &value))?;
        self.broker_call(BrokerMethod::Commit, body).await?;
        Ok(())
    }

    async fn lookup(&self, namespace: &str, key: &str, wait_for_create: bool) -> Result<Bytes> {
        let body = to_json(&LookupReq {
            namespace: namespace.to_string(),
            key: key.to_string(),
            wait_for_create,
        })?;
        self.broker_call(BrokerMethod::Lookup, body).await
    }

    async fn rpc(&self, target: ParticipantId, topic: &str, payload: Bytes) -> Result<RpcStream> {
        let body = encode_call(self.rank, topic, &payload)?;
        let addr = self.resolve_peer(target).await?;
        let mut responses = self
            .client
            .call::<TcpSocket>(addr, TOPIC_SERVICE_ID, 0, body)
            .await
            .map_err(Status::from)?;

        let (tx, stream) = RpcStream::channel(RPC_STREAM_DEPTH);
        tokio::spawn(async move {
            loop {
                let event = match responses.next().await {
                    Ok(Some(body)) => RpcEvent::Data(body),
                    Ok(None) => RpcEvent::End,
                    Err(NetError::Remote(status)) => RpcEvent::Error(status),
                    Err(e) => RpcEvent::Error(e.to_status()),
                };
                let terminal = !matches!(event, RpcEvent::Data(_));
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
        });
        Ok(stream)
    }

    async fn register_service(&self, topic: &str, handler: Arc<dyn RequestHandler>) -> Result<()> {
        self.topics.register(topic, handler);

        let mut host = self.host.lock().await;
        if host.is_none() {
            let listener = TcpListener::bind(self.service_bind).await.map_err(|e| {
                Status::with_message(RPCCode::LISTEN_FAILED, format!("{}: {}", self.service_bind, e))
            })?;
            let mut server = Server::new();
            server.register_service(self.topics.clone());
            let addr = server.start(listener);

            let register = RegisterReq {
                rank: self.rank,
                address: addr.to_string(),
            };
            if let Err(e) = self.broker_call(BrokerMethod::Register, to_json(&register)?).await {
                server.stop();
                return Err(e);
            }
            tracing::info!(rank = %self.rank, %addr, "serving topics");
            *host = Some(ServiceHost { server, addr });
        }
        Ok(())
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        if let Some(host) = self.host.get_mut().as_mut() {
            host.server.stop();
        }
    }
}
