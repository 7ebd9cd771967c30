//! Produce and consume: the write-then-publish and wait-then-fetch halves of
//! the handoff.

use std::fmt;
use std::path::{Path, PathBuf};

use dyad_dtl::{ClientTransport, Received, FETCH_TOPIC};
use dyad_kvs::MetadataStore;
use dyad_storage::StorageEntry;
use dyad_types::{ParticipantId, StatusCode};
use dyad_utils::{derive_key, managed_relative_path, resolve_under_root, write_file_atomic};

use crate::context::ManagedContext;
use crate::error::DyadError;
use crate::record::LocationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceOutcome {
    /// Not below the producer root; nothing was published.
    NotManaged,
    Published { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Not below the consumer root; the caller reads the path as is.
    NotManaged,
    /// The file is already visible here.
    Local { owner: ParticipantId },
    Fetched { owner: ParticipantId, bytes: u64 },
    /// The producer's copy sits on a device this participant mounts too.
    SharedDevice { owner: ParticipantId },
}

/// Where a consume is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeState {
    Init,
    Resolving,
    Blocked,
    LocalHit,
    RemoteHit,
    Connecting,
    Transferring,
    Writing,
    Done,
}

impl fmt::Display for ConsumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct ConsumeTrace<'a> {
    path: &'a Path,
    state: ConsumeState,
}

impl<'a> ConsumeTrace<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            state: ConsumeState::Init,
        }
    }

    fn advance(&mut self, next: ConsumeState) {
        tracing::debug!(path = %self.path.display(), from = %self.state, to = %next, "consume");
        self.state = next;
    }
}

impl ManagedContext {
    /// Publish where `path` lives. Call after the file is closed.
    pub async fn produce(&self, path: impl AsRef<Path>) -> Result<ProduceOutcome, DyadError> {
        let path = path.as_ref();
        let _guard = self.enter();
        self.ensure_initialized()?;

        let Some(rel) = self
            .producer_root()
            .and_then(|root| managed_relative_path(root, path))
        else {
            tracing::trace!(path = %path.display(), "produce: not managed");
            return Ok(ProduceOutcome::NotManaged);
        };

        let key = derive_key(&rel, self.config().key_depth, self.config().key_bins);
        let record = LocationRecord::new(self.self_id(), rel);
        self.store()
            .commit(self.namespace(), &key, record.pack()?)
            .await
            .map_err(DyadError::Store)?;

        tracing::info!(path = %path.display(), %key, owner = %self.self_id(), "published");
        self.record_health();
        Ok(ProduceOutcome::Published { key })
    }

    /// Make sure `path` is readable here, waiting for its producer and
    /// fetching the contents if they live elsewhere.
    pub async fn consume(&self, path: impl AsRef<Path>) -> Result<ConsumeOutcome, DyadError> {
        let path = path.as_ref();
        let _guard = self.enter();
        self.ensure_initialized()?;
        let mut trace = ConsumeTrace::new(path);

        let Some(root) = self.consumer_root() else {
            return Ok(ConsumeOutcome::NotManaged);
        };
        let Some(rel) = managed_relative_path(root, path) else {
            tracing::trace!(path = %path.display(), "consume: not managed");
            return Ok(ConsumeOutcome::NotManaged);
        };

        trace.advance(ConsumeState::Resolving);
        let key = derive_key(&rel, self.config().key_depth, self.config().key_bins);
        let record = self.resolve(&key, &mut trace).await?;
        let owner = record.owner;

        let outcome = if owner == self.self_id() || self.config().shared_storage {
            trace.advance(ConsumeState::LocalHit);
            ConsumeOutcome::Local { owner }
        } else {
            trace.advance(ConsumeState::RemoteHit);
            let dest = staged_path(root, &record).ok_or_else(|| DyadError::NotFound {
                key: key.clone(),
                reason: format!("record path {:?} leaves the consumer root", record.path),
            })?;
            self.fetch(owner, &record.path, &dest, &mut trace).await?
        };

        trace.advance(ConsumeState::Done);
        self.record_health();
        Ok(outcome)
    }

    async fn resolve(&self, key: &str, trace: &mut ConsumeTrace<'_>) -> Result<LocationRecord, DyadError> {
        let store = self.store();
        let value = match store.lookup(self.namespace(), key, false).await {
            Ok(value) => value,
            Err(status) if status.code() == StatusCode::KV_STORE_NOT_FOUND => {
                trace.advance(ConsumeState::Blocked);
                let value = store
                    .lookup(self.namespace(), key, true)
                    .await
                    .map_err(DyadError::Store)?;
                trace.advance(ConsumeState::Resolving);
                value
            }
            Err(status) => return Err(DyadError::Store(status)),
        };
        LocationRecord::unpack(key, &value)
    }

    async fn fetch(
        &self,
        owner: ParticipantId,
        rel: &str,
        dest: &Path,
        trace: &mut ConsumeTrace<'_>,
    ) -> Result<ConsumeOutcome, DyadError> {
        let storage = self.storage_view().map(|view| view.check_if_local_storage(dest));

        let received = {
            let mut transport = self.transport.lock().await;
            trace.advance(ConsumeState::Connecting);
            let result = match transport.establish_connection(owner).await {
                Ok(()) => {
                    transfer(&mut **transport, self.store().as_ref(), owner, rel, storage.as_ref(), trace)
                        .await
                }
                Err(err) => Err(err.into()),
            };
            let closed = transport.close_connection().await;
            let received = result?;
            closed?;
            received
        };

        match received {
            Received::SharedDevice => {
                tracing::info!(%owner, path = %dest.display(), "producer shares the device, no copy");
                Ok(ConsumeOutcome::SharedDevice { owner })
            }
            Received::Payload(data) => {
                trace.advance(ConsumeState::Writing);
                write_file_atomic(dest, &data).map_err(DyadError::Io)?;
                tracing::info!(%owner, path = %dest.display(), bytes = data.len(), "fetched");
                Ok(ConsumeOutcome::Fetched {
                    owner,
                    bytes: data.len() as u64,
                })
            }
        }
    }
}

async fn transfer(
    transport: &mut dyn ClientTransport,
    store: &dyn MetadataStore,
    owner: ParticipantId,
    rel: &str,
    storage: Option<&StorageEntry>,
    trace: &mut ConsumeTrace<'_>,
) -> Result<Received, DyadError> {
    let body = transport.pack_request(rel, storage)?;
    let mut stream = store
        .rpc(owner, FETCH_TOPIC, body)
        .await
        .map_err(DyadError::Rpc)?;
    trace.advance(ConsumeState::Transferring);
    Ok(transport.recv(&mut stream).await?)
}

/// Absolute path a record's relative path maps to under `root`.
pub fn staged_path(root: &Path, record: &LocationRecord) -> Option<PathBuf> {
    resolve_under_root(root, &record.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use dyad_dtl::{DtlError, DtlMode, DtlResult};
    use dyad_kvs::{LocalBroker, RpcStream};

    use crate::config::DyadConfig;
    use crate::error::ErrorKind;

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    /// Transport that fails the way it is told to and remembers every call.
    #[derive(Default)]
    struct Scripted {
        fail_connect: bool,
        calls: Calls,
    }

    impl Scripted {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ClientTransport for Scripted {
        fn mode(&self) -> DtlMode {
            DtlMode::Rpc
        }

        async fn establish_connection(&mut self, _owner: ParticipantId) -> DtlResult<()> {
            self.record("establish");
            if self.fail_connect {
                return Err(DtlError::ConnectFail("scripted".into()));
            }
            Ok(())
        }

        fn pack_request(&self, rel_path: &str, _storage: Option<&StorageEntry>) -> DtlResult<Bytes> {
            self.record("pack");
            Ok(Bytes::from(rel_path.to_string()))
        }

        async fn recv(&mut self, stream: &mut RpcStream) -> DtlResult<Received> {
            self.record("recv");
            match stream.next().await {
                Ok(Some(data)) => Ok(Received::Payload(data)),
                Ok(None) => Err(DtlError::CommFail("empty".into())),
                Err(status) => Err(DtlError::CommFail(status.to_string())),
            }
        }

        async fn close_connection(&mut self) -> DtlResult<()> {
            self.record("close");
            Ok(())
        }

        async fn finalize(&mut self) -> DtlResult<()> {
            Ok(())
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dyad-protocol-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn context(broker: &LocalBroker, rank: u32, root: &Path, transport: Scripted) -> ManagedContext {
        let config = DyadConfig {
            producer_path: Some(root.join("prod")),
            consumer_path: Some(root.join("cons")),
            ..Default::default()
        };
        ManagedContext::with_transport(config, Arc::new(broker.handle(ParticipantId(rank))), Box::new(transport))
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_managed_paths() {
        let root = scratch("unmanaged");
        let broker = LocalBroker::new();
        let ctx = context(&broker, 1, &root, Scripted::default());

        assert_eq!(ctx.produce("/elsewhere/file").await.unwrap(), ProduceOutcome::NotManaged);
        assert_eq!(ctx.produce(root.join("prod")).await.unwrap(), ProduceOutcome::NotManaged);
        assert_eq!(ctx.consume("/elsewhere/file").await.unwrap(), ConsumeOutcome::NotManaged);
        assert_eq!(broker.len("dyad"), 0);
        assert!(ctx.reenter());
    }

    #[tokio::test]
    async fn test_connect_failure_still_closes() {
        let root = scratch("connect-fail");
        let broker = LocalBroker::new();
        let producer = context(&broker, 3, &root, Scripted::default());
        producer.produce(root.join("prod/x.bin")).await.unwrap();

        let calls = Calls::default();
        let consumer = context(
            &broker,
            7,
            &root,
            Scripted {
                fail_connect: true,
                calls: calls.clone(),
            },
        );
        let err = consumer.consume(root.join("cons/x.bin")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportConnectFail);
        assert_eq!(*calls.lock().unwrap(), vec!["establish", "close"]);
        assert!(!root.join("cons/x.bin").exists());
        assert!(consumer.reenter());
    }

    #[tokio::test]
    async fn test_producer_unreachable_is_rpc_error() {
        let root = scratch("no-service");
        let broker = LocalBroker::new();
        let producer = context(&broker, 3, &root, Scripted::default());
        producer.produce(root.join("prod/y.bin")).await.unwrap();

        let calls = Calls::default();
        let consumer = context(
            &broker,
            7,
            &root,
            Scripted {
                fail_connect: false,
                calls: calls.clone(),
            },
        );
        let err = consumer.consume(root.join("cons/y.bin")).await.unwrap_err();
        assert!(matches!(err, DyadError::Rpc(_)));
        assert_eq!(*calls.lock().unwrap(), vec!["establish", "pack", "close"]);
        assert!(!root.join("cons/y.bin").exists());
    }

    #[tokio::test]
    async fn test_publish_records_health() {
        let root = scratch("produce-health");
        let broker = LocalBroker::new();
        let config = DyadConfig {
            producer_path: Some(root.join("prod")),
            check: true,
            ..Default::default()
        };
        let ctx = ManagedContext::with_transport(
            config,
            Arc::new(broker.handle(ParticipantId(2))),
            Box::new(Scripted::default()),
        )
        .unwrap();

        ctx.produce("/elsewhere/file").await.unwrap();
        assert!(!ctx.sync_health());
        ctx.produce(root.join("prod/out.bin")).await.unwrap();
        assert!(ctx.sync_health());
    }

    #[tokio::test]
    async fn test_consume_after_finalize() {
        let root = scratch("finalized");
        let broker = LocalBroker::new();
        let ctx = context(&broker, 1, &root, Scripted::default());
        ctx.finalize().await.unwrap();
        let err = ctx.consume(root.join("cons/z")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SysFail);
        assert!(ctx.reenter());
    }

    #[test]
    fn test_staged_path_stays_under_root() {
        let root = Path::new("/data/cons");
        let ok = LocationRecord::new(ParticipantId(1), "a/b.txt");
        assert_eq!(staged_path(root, &ok), Some(PathBuf::from("/data/cons/a/b.txt")));
        let escape = LocationRecord::new(ParticipantId(1), "../etc/passwd");
        assert_eq!(staged_path(root, &escape), None);
    }
}
