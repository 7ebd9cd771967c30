//! In-process metadata store.
//!
//! [`LocalBroker`] keeps every namespace in a shared map behind a
//! `parking_lot::RwLock`. Blocking lookups park on a `tokio::sync::Notify`
//! that every commit wakes, so a consumer started before its producer
//! resumes as soon as the record lands. Each participant talks to the
//! broker through its own [`LocalStore`] handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dyad_types::{make_error_msg, ParticipantId, RPCCode, Result, Status, StatusCode};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::store::{spawn_request, MetadataStore, Request, RequestHandler, RpcStream};

type Namespace = HashMap<String, Bytes>;

struct BrokerState {
    namespaces: RwLock<HashMap<String, Namespace>>,
    changed: Notify,
    services: DashMap<(ParticipantId, String), Arc<dyn RequestHandler>>,
    available: AtomicBool,
}

/// Shared key-value state plus the service table of all local participants.
#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<BrokerState>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                namespaces: RwLock::new(HashMap::new()),
                changed: Notify::new(),
                services: DashMap::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Store handle acting as participant `rank`.
    pub fn handle(&self, rank: ParticipantId) -> LocalStore {
        LocalStore {
            broker: self.clone(),
            rank,
        }
    }

    /// Simulate the store going down (or coming back). Parked lookups wake
    /// up and fail while it is down.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        self.state.changed.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Number of keys in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.state
            .namespaces
            .read()
            .get(namespace)
            .map_or(0, HashMap::len)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            make_error_msg(StatusCode::KV_STORE_UNAVAILABLE, "metadata store unavailable")
        }
    }

    pub fn commit(&self, namespace: &str, key: &str, value: Bytes) -> Result<()> {
        self.check_available()?;
        self.state
            .namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        tracing::trace!(namespace, key, "committed");
        self.state.changed.notify_waiters();
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Option<Bytes> {
        self.state
            .namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned())
    }

    pub async fn lookup(&self, namespace: &str, key: &str, wait_for_create: bool) -> Result<Bytes> {
        loop {
            // Register interest before checking so a commit between the
            // check and the await is not lost.
            let notified = self.state.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_available()?;
            if let Some(value) = self.get(namespace, key) {
                return Ok(value);
            }
            if !wait_for_create {
                return make_error_msg(
                    StatusCode::KV_STORE_NOT_FOUND,
                    format!("{}/{}", namespace, key),
                );
            }
            tracing::trace!(namespace, key, "waiting for key to be created");
            notified.await;
        }
    }

    fn register(&self, rank: ParticipantId, topic: &str, handler: Arc<dyn RequestHandler>) {
        self.state.services.insert((rank, topic.to_string()), handler);
    }

    fn call(&self, sender: ParticipantId, target: ParticipantId, topic: &str, payload: Bytes) -> Result<RpcStream> {
        self.check_available()?;
        let handler = self
            .state
            .services
            .get(&(target, topic.to_string()))
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                Status::with_message(
                    RPCCode::NO_SUCH_PARTICIPANT,
                    format!("participant {} serves no {}", target, topic),
                )
            })?;
        let request = Request {
            sender,
            topic: topic.to_string(),
            payload,
        };
        Ok(spawn_request(handler, request))
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's view of a [`LocalBroker`].
#[derive(Clone)]
pub struct LocalStore {
    broker: LocalBroker,
    rank: ParticipantId,
}

impl LocalStore {
    pub fn broker(&self) -> &LocalBroker {
        &self.broker
    }
}

#[async_trait]
impl MetadataStore for LocalStore {
    fn rank(&self) -> ParticipantId {
        self.rank
    }

    async fn commit(&self, namespace: &str, key: &str, value: Bytes) -> Result<()> {
        self.broker.commit(namespace, key, value)
    }

    async fn lookup(&self, namespace: &str, key: &str, wait_for_create: bool) -> Result<Bytes> {
        self.broker.lookup(namespace, key, wait_for_create).await
    }

    async fn rpc(&self, target: ParticipantId, topic: &str, payload: Bytes) -> Result<RpcStream> {
        self.broker.call(self.rank, target, topic, payload)
    }

    async fn register_service(&self, topic: &str, handler: Arc<dyn RequestHandler>) -> Result<()> {
        self.broker.register(self.rank, topic, handler);
        Ok(())
    }
}
