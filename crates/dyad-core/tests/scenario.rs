//! End-to-end handoffs between participants, over an in-process store and
//! over a networked broker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dyad_core::{ConsumeOutcome, DyadConfig, ErrorKind, LocationRecord, ManagedContext, ProduceOutcome};
use dyad_dtl::{
    server_transport, ClientTransport, DtlConfig, DtlMode, DtlResult, FetchRequest, Received,
    RpcClientTransport, ServerConnection, ServerTransport,
};
use dyad_kvs::{BrokerService, LocalBroker, RemoteStore, Responder, RpcStream};
use dyad_net::Server;
use dyad_net_tcp::TcpListener;
use dyad_service::FetchService;
use dyad_storage::StorageEntry;
use dyad_types::{Address, ParticipantId};
use dyad_utils::derive_key;

const PRODUCER: ParticipantId = ParticipantId(3);
const CONSUMER: ParticipantId = ParticipantId(7);

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dyad-scenario-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(root: &Path, mode: DtlMode) -> DyadConfig {
    DyadConfig {
        producer_path: Some(root.join("prod")),
        consumer_path: Some(root.join("cons")),
        kvs_namespace: "scenario".into(),
        check: true,
        dtl: DtlConfig {
            mode,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Ten little-endian i32 values `seed*10 .. seed*10+9`.
fn generated(seed: i32) -> Vec<u8> {
    (seed * 10..seed * 10 + 10).flat_map(|v| v.to_le_bytes()).collect()
}

/// Counts every transport operation and refuses to move data.
#[derive(Default)]
struct CountingTransport {
    ops: Arc<AtomicUsize>,
}

#[async_trait]
impl ClientTransport for CountingTransport {
    fn mode(&self) -> DtlMode {
        DtlMode::Rpc
    }

    async fn establish_connection(&mut self, _owner: ParticipantId) -> DtlResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pack_request(&self, _rel_path: &str, _storage: Option<&StorageEntry>) -> DtlResult<Bytes> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::new())
    }

    async fn recv(&mut self, _stream: &mut RpcStream) -> DtlResult<Received> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok(Received::Payload(Bytes::new()))
    }

    async fn close_connection(&mut self) -> DtlResult<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&mut self) -> DtlResult<()> {
        Ok(())
    }
}

async fn producer_with_service(broker: &LocalBroker, root: &Path, mode: DtlMode) -> ManagedContext {
    let cfg = config(root, mode);
    let store = broker.handle(PRODUCER);
    let transport = server_transport(mode, &cfg.dtl).await.unwrap();
    Arc::new(FetchService::new(transport, root.join("prod")))
        .register(&store)
        .await
        .unwrap();
    ManagedContext::init(cfg, Arc::new(store)).await.unwrap()
}

async fn handoff(mode: DtlMode) {
    let root = scratch(&format!("handoff-{}", mode));
    let broker = LocalBroker::new();
    let producer = producer_with_service(&broker, &root, mode).await;
    let consumer = ManagedContext::init(config(&root, mode), Arc::new(broker.handle(CONSUMER)))
        .await
        .unwrap();

    let content = generated(0);
    assert_eq!(content.len(), 40);
    std::fs::create_dir_all(root.join("prod")).unwrap();
    std::fs::write(root.join("prod/data0.txt"), &content).unwrap();

    let published = producer.produce(root.join("prod/data0.txt")).await.unwrap();
    assert!(matches!(published, ProduceOutcome::Published { .. }));

    let outcome = consumer.consume(root.join("cons/data0.txt")).await.unwrap();
    assert_eq!(
        outcome,
        ConsumeOutcome::Fetched {
            owner: PRODUCER,
            bytes: 40
        }
    );
    assert_eq!(std::fs::read(root.join("cons/data0.txt")).unwrap(), content);
    assert!(consumer.sync_health());
    assert!(consumer.reenter());

    consumer.finalize().await.unwrap();
    producer.finalize().await.unwrap();
}

#[tokio::test]
async fn test_handoff_over_rpc() {
    handoff(DtlMode::Rpc).await;
}

#[tokio::test]
async fn test_handoff_over_rma() {
    handoff(DtlMode::Rma).await;
}

#[tokio::test]
async fn test_publish_then_resolve() {
    let root = scratch("publish");
    let broker = LocalBroker::new();
    let producer = ManagedContext::init(config(&root, DtlMode::Rpc), Arc::new(broker.handle(PRODUCER)))
        .await
        .unwrap();

    let outcome = producer.produce(root.join("prod/run1/out.h5")).await.unwrap();
    let ProduceOutcome::Published { key } = outcome else {
        panic!("expected a publish, got {:?}", outcome);
    };
    let cfg = producer.config();
    assert_eq!(key, derive_key("run1/out.h5", cfg.key_depth, cfg.key_bins));

    let value = broker.lookup("scenario", &key, false).await.unwrap();
    assert_eq!(
        LocationRecord::unpack(&key, &value).unwrap(),
        LocationRecord::new(PRODUCER, "run1/out.h5")
    );
}

#[tokio::test]
async fn test_consume_waits_for_produce() {
    let root = scratch("wait");
    let broker = LocalBroker::new();
    let producer = producer_with_service(&broker, &root, DtlMode::Rpc).await;
    let consumer = ManagedContext::init(config(&root, DtlMode::Rpc), Arc::new(broker.handle(CONSUMER)))
        .await
        .unwrap();

    let target = root.join("cons/late.bin");
    let waiting = tokio::spawn(async move { consumer.consume(&target).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    std::fs::create_dir_all(root.join("prod")).unwrap();
    std::fs::write(root.join("prod/late.bin"), b"late").unwrap();
    producer.produce(root.join("prod/late.bin")).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ConsumeOutcome::Fetched { owner: PRODUCER, bytes: 4 });
    assert_eq!(std::fs::read(root.join("cons/late.bin")).unwrap(), b"late");
}

#[tokio::test]
async fn test_local_owner_skips_transport() {
    let root = scratch("local");
    let broker = LocalBroker::new();
    let ops = Arc::new(AtomicUsize::new(0));
    let ctx = ManagedContext::with_transport(
        config(&root, DtlMode::Rpc),
        Arc::new(broker.handle(PRODUCER)),
        Box::new(CountingTransport { ops: ops.clone() }),
    )
    .unwrap();

    ctx.produce(root.join("prod/self.txt")).await.unwrap();
    let outcome = ctx.consume(root.join("cons/self.txt")).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Local { owner: PRODUCER });
    assert_eq!(ops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shared_storage_skips_transport() {
    let root = scratch("shared");
    let broker = LocalBroker::new();
    let producer = ManagedContext::with_transport(
        config(&root, DtlMode::Rpc),
        Arc::new(broker.handle(PRODUCER)),
        Box::new(RpcClientTransport::new()),
    )
    .unwrap();
    let ops = Arc::new(AtomicUsize::new(0));
    let consumer = ManagedContext::with_transport(
        DyadConfig {
            shared_storage: true,
            ..config(&root, DtlMode::Rpc)
        },
        Arc::new(broker.handle(CONSUMER)),
        Box::new(CountingTransport { ops: ops.clone() }),
    )
    .unwrap();

    producer.produce(root.join("prod/shared.txt")).await.unwrap();
    let outcome = consumer.consume(root.join("cons/shared.txt")).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Local { owner: PRODUCER });
    assert_eq!(ops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unavailable_store() {
    let root = scratch("unavailable");
    let broker = LocalBroker::new();
    let producer = ManagedContext::init(config(&root, DtlMode::Rpc), Arc::new(broker.handle(PRODUCER)))
        .await
        .unwrap();
    let consumer = ManagedContext::init(config(&root, DtlMode::Rpc), Arc::new(broker.handle(CONSUMER)))
        .await
        .unwrap();
    broker.set_available(false);

    let err = producer.produce(root.join("prod/x.dat")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFail);

    let err = consumer.consume(root.join("cons/x.dat")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFail);
    assert!(!root.join("cons/x.dat").exists());
    assert!(!consumer.sync_health());
    assert!(consumer.reenter());
}

#[tokio::test]
async fn test_missing_producer_file() {
    let root = scratch("missing");
    let broker = LocalBroker::new();
    let producer = producer_with_service(&broker, &root, DtlMode::Rpc).await;
    let consumer = ManagedContext::init(config(&root, DtlMode::Rpc), Arc::new(broker.handle(CONSUMER)))
        .await
        .unwrap();

    // Published without the file ever being written.
    producer.produce(root.join("prod/ghost.txt")).await.unwrap();
    let err = consumer.consume(root.join("cons/ghost.txt")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportCommFail);
    assert!(!root.join("cons/ghost.txt").exists());
}

/// Holds every transfer back for `delay` after the acknowledgement.
struct SlowTransfers {
    inner: Arc<dyn ServerTransport>,
    delay: Duration,
}

#[async_trait]
impl ServerTransport for SlowTransfers {
    fn mode(&self) -> DtlMode {
        self.inner.mode()
    }

    fn unpack_request(&self, payload: &[u8]) -> DtlResult<FetchRequest> {
        self.inner.unpack_request(payload)
    }

    async fn respond(&self, request: &FetchRequest, payload_size: u64, responder: &Responder) -> DtlResult<()> {
        self.inner.respond(request, payload_size, responder).await
    }

    async fn establish_connection(
        &self,
        request: &FetchRequest,
        responder: &Responder,
    ) -> DtlResult<Box<dyn ServerConnection>> {
        tokio::time::sleep(self.delay).await;
        self.inner.establish_connection(request, responder).await
    }

    async fn finalize(&self) -> DtlResult<()> {
        self.inner.finalize().await
    }
}

#[tokio::test]
async fn test_cancelled_consume_then_consume_again() {
    let root = scratch("cancelled");
    let broker = LocalBroker::new();
    let cfg = config(&root, DtlMode::Rma);
    let store = broker.handle(PRODUCER);
    let slow = SlowTransfers {
        inner: server_transport(DtlMode::Rma, &cfg.dtl).await.unwrap(),
        delay: Duration::from_millis(300),
    };
    Arc::new(FetchService::new(Arc::new(slow), root.join("prod")))
        .register(&store)
        .await
        .unwrap();
    let producer = ManagedContext::init(cfg, Arc::new(store)).await.unwrap();
    let consumer = ManagedContext::init(config(&root, DtlMode::Rma), Arc::new(broker.handle(CONSUMER)))
        .await
        .unwrap();

    // Same size, different contents.
    std::fs::create_dir_all(root.join("prod")).unwrap();
    for seed in 0..2 {
        let file = root.join(format!("prod/data{}.txt", seed));
        std::fs::write(&file, generated(seed)).unwrap();
        producer.produce(&file).await.unwrap();
    }

    // The caller gives up after the acknowledgement; the payload is sent
    // to its worker anyway.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        consumer.consume(root.join("cons/data0.txt")),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(consumer.reenter());
    assert!(!root.join("cons/data0.txt").exists());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        consumer.consume(root.join("cons/data1.txt")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        outcome,
        ConsumeOutcome::Fetched {
            owner: PRODUCER,
            bytes: 40
        }
    );
    assert_eq!(std::fs::read(root.join("cons/data1.txt")).unwrap(), generated(1));
    assert!(!root.join("cons/data0.txt").exists());

    consumer.finalize().await.unwrap();
    producer.finalize().await.unwrap();
}

fn loopback() -> Address {
    "127.0.0.1:0".parse().unwrap()
}

async fn start_broker() -> (Server, Address) {
    let mut server = Server::new();
    server.register_service(Arc::new(BrokerService::new()));
    let addr = server.start(TcpListener::bind(loopback()).await.unwrap());
    (server, addr)
}

async fn networked_handoff(mode: DtlMode) {
    let root = scratch(&format!("networked-{}", mode));
    let (mut broker, broker_addr) = start_broker().await;

    let producer_store = Arc::new(RemoteStore::new(PRODUCER, broker_addr, loopback()));
    let cfg = DyadConfig {
        rank: PRODUCER.0,
        ..config(&root, mode)
    };
    let transport = server_transport(mode, &cfg.dtl).await.unwrap();
    Arc::new(FetchService::new(transport, root.join("prod")))
        .register(producer_store.as_ref())
        .await
        .unwrap();
    let producer = ManagedContext::init(cfg, producer_store.clone()).await.unwrap();

    let consumer_store = Arc::new(RemoteStore::new(CONSUMER, broker_addr, loopback()));
    let consumer = ManagedContext::init(
        DyadConfig {
            rank: CONSUMER.0,
            ..config(&root, mode)
        },
        consumer_store,
    )
    .await
    .unwrap();

    // The consumer blocks on the broker until the record shows up.
    let target = root.join("cons/net/data2.txt");
    let waiting = tokio::spawn(async move {
        let outcome = consumer.consume(&target).await;
        consumer.finalize().await.unwrap();
        outcome
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    std::fs::create_dir_all(root.join("prod/net")).unwrap();
    std::fs::write(root.join("prod/net/data2.txt"), generated(2)).unwrap();
    producer.produce(root.join("prod/net/data2.txt")).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        ConsumeOutcome::Fetched {
            owner: PRODUCER,
            bytes: 40
        }
    );
    assert_eq!(std::fs::read(root.join("cons/net/data2.txt")).unwrap(), generated(2));

    producer.finalize().await.unwrap();
    producer_store.shutdown().await;
    broker.stop();
}

#[tokio::test]
async fn test_networked_handoff_over_rpc() {
    networked_handoff(DtlMode::Rpc).await;
}

#[tokio::test]
async fn test_networked_handoff_over_rma() {
    networked_handoff(DtlMode::Rma).await;
}
