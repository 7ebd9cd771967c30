//! Tag-matching message runtime over TCP.
//!
//! A [`TagWorker`] accepts connections from remote endpoints and collects
//! every tagged frame they send. Nothing becomes visible to callers until
//! [`TagWorker::progress`] runs: inbound messages move into the
//! unexpected-message queue where [`TagWorker::probe`] can match them, and
//! completions of sends and closes are applied to their [`Request`]s.
//! [`TagWorker::wait`] parks the caller until there is something to
//! progress.
//!
//! One task at a time may wait for inbound messages on a worker. Any number
//! of tasks may wait on send and close requests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dyad_net::{Frame, FrameKind, Listener, NetError, Socket};
use dyad_net_tcp::{TcpListener, TcpSocket};
use dyad_types::{Address, AddressType};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;

/// Mask matching every tag bit.
pub const FULL_TAG_MASK: u64 = u64::MAX;

/// Unmatched inbound messages a worker keeps before dropping the oldest.
pub const DEFAULT_UNEXPECTED_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("bind failed: {0}")]
    Bind(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("endpoint is {0:?}")]
    NotReady(EndpointState),
    #[error("message {0} is no longer available")]
    NoMessage(u64),
    #[error("worker shut down")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

struct RequestInner {
    completed: AtomicBool,
    result: Mutex<Option<Result<Bytes, WorkerError>>>,
    done: Notify,
}

/// Handle to a non-blocking operation.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    fn pending() -> Self {
        Self {
            inner: Arc::new(RequestInner {
                completed: AtomicBool::new(false),
                result: Mutex::new(None),
                done: Notify::new(),
            }),
        }
    }

    fn ready(result: Result<Bytes, WorkerError>) -> Self {
        let request = Self::pending();
        request.complete(result);
        request
    }

    fn complete(&self, result: Result<Bytes, WorkerError>) {
        *self.inner.result.lock() = Some(result);
        self.inner.completed.store(true, Ordering::Release);
        self.inner.done.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Result of a completed request. Received data is handed out once.
    pub fn take_result(&self) -> Option<Result<Bytes, WorkerError>> {
        if !self.is_completed() {
            return None;
        }
        self.inner.result.lock().take()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Drive `worker` until `request` completes.
pub async fn wait_request(worker: &TagWorker, request: &Request) -> Result<Bytes, WorkerError> {
    loop {
        if request.is_completed() {
            return request.take_result().unwrap_or(Ok(Bytes::new()));
        }
        if worker.progress() > 0 {
            continue;
        }
        tokio::select! {
            _ = worker.wait() => {}
            _ = request.inner.done.notified() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Event {
    Message { tag: u64, body: Bytes },
    Completed { request: Request, result: Result<Bytes, WorkerError> },
}

struct Shared {
    events: mpsc::UnboundedSender<Event>,
    wakeup: Notify,
    shutdown: Notify,
}

impl Shared {
    fn post(&self, event: Event) {
        if self.events.send(event).is_ok() {
            self.wakeup.notify_one();
        }
    }
}

struct Message {
    id: u64,
    tag: u64,
    body: Bytes,
}

/// A matched message, not yet received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedMessage {
    pub id: u64,
    pub tag: u64,
    pub length: usize,
}

pub struct TagWorker {
    address: Address,
    shared: Arc<Shared>,
    events: Mutex<mpsc::UnboundedReceiver<Event>>,
    unexpected: Mutex<VecDeque<Message>>,
    unexpected_limit: usize,
    claimed: Mutex<HashMap<u64, Bytes>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl TagWorker {
    /// Listen on `bind` and start collecting inbound messages.
    pub async fn bind(bind: Address) -> Result<Self, WorkerError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| WorkerError::Bind(format!("{}: {}", bind, e)))?;
        let address = listener.local_addr().with_type(AddressType::RMA);

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: tx,
            wakeup: Notify::new(),
            shutdown: Notify::new(),
        });
        tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        tracing::debug!(%address, "tag worker listening");

        Ok(Self {
            address,
            shared,
            events: Mutex::new(rx),
            unexpected: Mutex::new(VecDeque::new()),
            unexpected_limit: DEFAULT_UNEXPECTED_LIMIT,
            claimed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Opaque worker address handed to peers.
    pub fn address_bytes(&self) -> Vec<u8> {
        self.address.to_bytes().to_vec()
    }

    /// Apply pending events. Returns how many were processed.
    pub fn progress(&self) -> usize {
        let mut events = self.events.lock();
        let mut n = 0;
        while let Ok(event) = events.try_recv() {
            n += 1;
            match event {
                Event::Message { tag, body } => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(id, tag, len = body.len(), "tagged message arrived");
                    let mut queue = self.unexpected.lock();
                    while queue.len() >= self.unexpected_limit.max(1) {
                        if let Some(old) = queue.pop_front() {
                            tracing::warn!(tag = old.tag, len = old.body.len(), "unexpected queue full, dropped oldest message");
                        }
                    }
                    queue.push_back(Message { id, tag, body });
                }
                Event::Completed { request, result } => request.complete(result),
            }
        }
        n
    }

    /// Block until there may be new events to progress.
    pub async fn wait(&self) {
        self.shared.wakeup.notified().await;
    }

    /// Find the oldest message whose tag matches `tag` under `mask`. With
    /// `remove`, later probes no longer see it and it must be received with
    /// [`TagWorker::recv_message_nb`].
    pub fn probe(&self, tag: u64, mask: u64, remove: bool) -> Option<ProbedMessage> {
        let mut queue = self.unexpected.lock();
        let pos = queue.iter().position(|m| m.tag & mask == tag & mask)?;
        let probed = ProbedMessage {
            id: queue[pos].id,
            tag: queue[pos].tag,
            length: queue[pos].body.len(),
        };
        if remove {
            if let Some(msg) = queue.remove(pos) {
                self.claimed.lock().insert(msg.id, msg.body);
            }
        }
        Some(probed)
    }

    pub fn recv_message_nb(&self, msg: &ProbedMessage) -> Request {
        if let Some(body) = self.claimed.lock().remove(&msg.id) {
            return Request::ready(Ok(body));
        }
        let mut queue = self.unexpected.lock();
        match queue.iter().position(|m| m.id == msg.id) {
            Some(pos) => match queue.remove(pos) {
                Some(m) => Request::ready(Ok(m.body)),
                None => Request::ready(Err(WorkerError::NoMessage(msg.id))),
            },
            None => Request::ready(Err(WorkerError::NoMessage(msg.id))),
        }
    }

    /// Endpoint sending to the worker listening at `remote`. The connection
    /// is made in the background; a failure surfaces on the first request.
    pub fn create_endpoint(&self, remote: Address) -> Result<Endpoint, WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::Shutdown);
        }
        let mut endpoint = Endpoint {
            remote,
            state: EndpointState::Init,
            ops: None,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_endpoint(remote, rx, Arc::clone(&self.shared)));
        endpoint.ops = Some(tx);
        endpoint.state = EndpointState::Ready;
        Ok(endpoint)
    }

    /// Progress, then drop every queued message matching `tag` under
    /// `mask`. Returns how many were dropped.
    pub fn discard(&self, tag: u64, mask: u64) -> usize {
        self.progress();
        let mut queue = self.unexpected.lock();
        let before = queue.len();
        queue.retain(|m| m.tag & mask != tag & mask);
        before - queue.len()
    }

    /// Number of inbound messages waiting to be matched.
    pub fn unexpected_len(&self) -> usize {
        self.unexpected.lock().len()
    }

    /// Stop accepting connections. Idempotent.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.shutdown.notify_one();
            tracing::debug!(address = %self.address, "tag worker shut down");
        }
    }
}

impl Drop for TagWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.notified() => break,

            res = listener.accept() => match res {
                Ok(socket) => {
                    readers.spawn(read_tagged(socket, Arc::clone(&shared)));
                }
                Err(e) => {
                    tracing::warn!("tag worker accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            },

            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
    readers.shutdown().await;
}

async fn read_tagged(socket: TcpSocket, shared: Arc<Shared>) {
    let peer = socket.peer_addr();
    loop {
        match socket.recv_frame().await {
            Ok(frame) if frame.kind == FrameKind::Tagged => shared.post(Event::Message {
                tag: frame.word,
                body: frame.body,
            }),
            Ok(frame) => tracing::warn!(%peer, kind = ?frame.kind, "ignoring untagged frame"),
            Err(NetError::ConnectionClosed) => break,
            Err(e) => {
                tracing::debug!(%peer, "tagged stream failed: {}", e);
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Init,
    Ready,
    Closing,
    Closed,
    Error,
}

pub enum CloseStatus {
    Done,
    InProgress(Request),
}

enum Outbound {
    Send { tag: u64, body: Bytes, request: Request },
    Close { request: Request },
}

pub struct Endpoint {
    remote: Address,
    state: EndpointState,
    ops: Option<mpsc::UnboundedSender<Outbound>>,
}

impl Endpoint {
    pub fn remote(&self) -> Address {
        self.remote
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn send_nb(&self, tag: u64, body: Bytes) -> Request {
        let ops = match (&self.ops, self.state) {
            (Some(ops), EndpointState::Ready) => ops,
            _ => return Request::ready(Err(WorkerError::NotReady(self.state))),
        };
        let request = Request::pending();
        let op = Outbound::Send {
            tag,
            body,
            request: request.clone(),
        };
        if ops.send(op).is_err() {
            request.complete(Err(WorkerError::Shutdown));
        }
        request
    }

    /// Start closing. Only a ready endpoint has anything to close; every
    /// other state reports `Done` straight away.
    pub fn close_nb(&mut self) -> CloseStatus {
        if self.state != EndpointState::Ready {
            return CloseStatus::Done;
        }
        self.state = EndpointState::Closing;
        let request = Request::pending();
        match self.ops.take() {
            Some(ops) if ops.send(Outbound::Close { request: request.clone() }).is_ok() => {
                CloseStatus::InProgress(request)
            }
            _ => {
                self.state = EndpointState::Closed;
                CloseStatus::Done
            }
        }
    }

    /// Record how an in-progress close ended.
    pub fn close_finished(&mut self, ok: bool) {
        self.state = if ok {
            EndpointState::Closed
        } else {
            EndpointState::Error
        };
    }

    pub fn mark_error(&mut self) {
        self.state = EndpointState::Error;
        self.ops = None;
    }
}

async fn run_endpoint(
    remote: Address,
    mut ops: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) {
    let socket = dyad_net_tcp::connect(remote).await.map_err(|e| {
        tracing::warn!(%remote, "endpoint connect failed: {}", e);
        WorkerError::Connect(e.to_string())
    });

    while let Some(op) = ops.recv().await {
        match op {
            Outbound::Send { tag, body, request } => {
                let result = match &socket {
                    Ok(s) => s
                        .send_frame(&Frame::tagged(tag, body))
                        .await
                        .map(|_| Bytes::new())
                        .map_err(|e| WorkerError::Send(e.to_string())),
                    Err(e) => Err(e.clone()),
                };
                shared.post(Event::Completed { request, result });
            }
            Outbound::Close { request } => {
                let result = match &socket {
                    Ok(s) => {
                        s.close().await;
                        Ok(Bytes::new())
                    }
                    Err(e) => Err(e.clone()),
                };
                shared.post(Event::Completed { request, result });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Address {
        Address::from_octets(127, 0, 0, 1, 0, AddressType::TCP)
    }

    async fn recv_tag(worker: &TagWorker, tag: u64) -> Bytes {
        loop {
            if let Some(msg) = worker.probe(tag, FULL_TAG_MASK, true) {
                let request = worker.recv_message_nb(&msg);
                return wait_request(worker, &request).await.unwrap();
            }
            if worker.progress() == 0 {
                worker.wait().await;
            }
        }
    }

    #[tokio::test]
    async fn test_send_and_match_by_tag() {
        let receiver = TagWorker::bind(loopback()).await.unwrap();
        let sender = TagWorker::bind(loopback()).await.unwrap();
        let mut ep = sender.create_endpoint(receiver.address()).unwrap();
        assert_eq!(ep.state(), EndpointState::Ready);

        let a = ep.send_nb(1, Bytes::from_static(b"one"));
        wait_request(&sender, &a).await.unwrap();
        let b = ep.send_nb(2, Bytes::from_static(b"two"));
        wait_request(&sender, &b).await.unwrap();

        // Matching is by tag, not arrival order.
        assert_eq!(recv_tag(&receiver, 2).await, Bytes::from_static(b"two"));
        assert_eq!(recv_tag(&receiver, 1).await, Bytes::from_static(b"one"));

        match ep.close_nb() {
            CloseStatus::InProgress(req) => {
                wait_request(&sender, &req).await.unwrap();
                ep.close_finished(true);
            }
            CloseStatus::Done => panic!("ready endpoint must close asynchronously"),
        }
        assert_eq!(ep.state(), EndpointState::Closed);
        assert!(matches!(ep.close_nb(), CloseStatus::Done));
    }

    #[tokio::test]
    async fn test_probe_without_remove() {
        let receiver = TagWorker::bind(loopback()).await.unwrap();
        let sender = TagWorker::bind(loopback()).await.unwrap();
        let ep = sender.create_endpoint(receiver.address()).unwrap();
        let req = ep.send_nb(0xAB00_0007, Bytes::from_static(b"xyz"));
        wait_request(&sender, &req).await.unwrap();

        let msg = loop {
            if let Some(msg) = receiver.probe(0xAB00_0000, 0xFFFF_0000, false) {
                break msg;
            }
            if receiver.progress() == 0 {
                receiver.wait().await;
            }
        };
        assert_eq!(msg.length, 3);
        assert_eq!(receiver.probe(0xAB00_0007, FULL_TAG_MASK, false), Some(msg));

        let req = receiver.recv_message_nb(&msg);
        assert!(req.is_completed());
        assert_eq!(req.take_result().unwrap().unwrap(), Bytes::from_static(b"xyz"));
        assert_eq!(receiver.unexpected_len(), 0);
        assert!(receiver.recv_message_nb(&msg).take_result().unwrap().is_err());
    }

    async fn await_queued(worker: &TagWorker, count: usize) {
        while worker.unexpected_len() < count {
            if worker.progress() == 0 {
                worker.wait().await;
            }
        }
    }

    #[tokio::test]
    async fn test_discard_by_tag() {
        let receiver = TagWorker::bind(loopback()).await.unwrap();
        let sender = TagWorker::bind(loopback()).await.unwrap();
        let ep = sender.create_endpoint(receiver.address()).unwrap();
        for (tag, body) in [(7, "a"), (8, "b"), (7, "c")] {
            let req = ep.send_nb(tag, Bytes::from(body));
            wait_request(&sender, &req).await.unwrap();
        }
        await_queued(&receiver, 3).await;

        assert_eq!(receiver.discard(7, FULL_TAG_MASK), 2);
        assert_eq!(receiver.unexpected_len(), 1);
        assert_eq!(recv_tag(&receiver, 8).await, Bytes::from_static(b"b"));
        assert_eq!(receiver.discard(7, FULL_TAG_MASK), 0);
    }

    #[tokio::test]
    async fn test_unexpected_queue_is_bounded() {
        let mut receiver = TagWorker::bind(loopback()).await.unwrap();
        receiver.unexpected_limit = 2;
        let sender = TagWorker::bind(loopback()).await.unwrap();
        let ep = sender.create_endpoint(receiver.address()).unwrap();
        for tag in 1..=3u64 {
            let req = ep.send_nb(tag, Bytes::from(vec![tag as u8]));
            wait_request(&sender, &req).await.unwrap();
        }

        // The oldest is dropped once the third message is progressed.
        while receiver.probe(3, FULL_TAG_MASK, false).is_none() {
            if receiver.progress() == 0 {
                receiver.wait().await;
            }
        }
        assert_eq!(receiver.unexpected_len(), 2);
        assert!(receiver.probe(1, FULL_TAG_MASK, false).is_none());
        assert_eq!(recv_tag(&receiver, 2).await, Bytes::from_static(&[2]));
    }

    #[tokio::test]
    async fn test_send_to_dead_address() {
        let gone = TagWorker::bind(loopback()).await.unwrap();
        let addr = gone.address();
        drop(gone);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let sender = TagWorker::bind(loopback()).await.unwrap();
        let mut ep = sender.create_endpoint(addr).unwrap();
        let req = ep.send_nb(1, Bytes::from_static(b"lost"));
        assert!(matches!(
            wait_request(&sender, &req).await,
            Err(WorkerError::Connect(_))
        ));

        ep.mark_error();
        assert!(matches!(ep.close_nb(), CloseStatus::Done));
        assert!(matches!(
            ep.send_nb(1, Bytes::new()).take_result(),
            Some(Err(WorkerError::NotReady(EndpointState::Error)))
        ));
    }

    #[tokio::test]
    async fn test_address_bytes() {
        let worker = TagWorker::bind(loopback()).await.unwrap();
        let bytes = worker.address_bytes();
        assert_eq!(Address::from_bytes(&bytes), Some(worker.address()));
        worker.shutdown();
        assert!(matches!(
            worker.create_endpoint(worker.address()),
            Err(WorkerError::Shutdown)
        ));
    }
}
