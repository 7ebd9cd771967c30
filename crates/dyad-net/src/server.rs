use std::sync::Arc;

use bytes::Bytes;
use dyad_types::{Address, RPCCode, Status};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::error::NetError;
use crate::message::{Frame, FrameKind};
use crate::service::{CallContext, ResponseSink, ServiceHandler, ServiceRegistry};
use crate::socket::{Listener, Socket};

/// Responses a handler may queue before it is backpressured by the socket.
const RESPONSE_QUEUE_DEPTH: usize = 16;

/// RPC server hosting registered services.
///
/// Each accepted connection is served by its own task. Calls on one
/// connection are handled in order; every call is answered by zero or more
/// `Data` frames followed by exactly one `End` or `Error` frame.
pub struct Server {
    services: Arc<ServiceRegistry>,
    shutdown: Arc<Notify>,
    local_addr: Option<Address>,
}

impl Server {
    pub fn new() -> Self {
        Self::with_registry(ServiceRegistry::new())
    }

    pub fn with_registry(registry: ServiceRegistry) -> Self {
        Self {
            services: Arc::new(registry),
            shutdown: Arc::new(Notify::new()),
            local_addr: None,
        }
    }

    pub fn register_service(&self, service: Arc<dyn ServiceHandler>) {
        self.services.register(service);
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Address the server is listening on once started.
    pub fn local_addr(&self) -> Option<Address> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some()
    }

    /// Start accepting connections in a background task.
    pub fn start<L: Listener + 'static>(&mut self, listener: L) -> Address {
        let addr = listener.local_addr();
        if let Some(running) = self.local_addr {
            tracing::warn!(%running, "server already running, ignoring duplicate start");
            return running;
        }
        self.local_addr = Some(addr);

        let services = Arc::clone(&self.services);
        let shutdown = Arc::clone(&self.shutdown);

        tracing::info!(%addr, "server starting");
        tokio::spawn(async move {
            Self::accept_loop(listener, services, shutdown).await;
            tracing::info!(%addr, "server accept loop exited");
        });
        addr
    }

    /// Stop accepting and cancel all connection tasks.
    pub fn stop(&mut self) {
        if self.local_addr.take().is_some() {
            tracing::info!("server stopping");
            self.shutdown.notify_waiters();
        }
    }

    // -----------------------------------------------------------------------
    // Internal implementation
    // -----------------------------------------------------------------------

    async fn accept_loop<L: Listener>(
        listener: L,
        services: Arc<ServiceRegistry>,
        shutdown: Arc<Notify>,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,

                result = listener.accept() => match result {
                    Ok(socket) => {
                        let services = Arc::clone(&services);
                        tasks.spawn(async move {
                            if let Err(e) = Self::handle_connection(socket, services).await {
                                tracing::debug!("connection handler finished: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                },

                // Reap finished connections so the set does not grow unbounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
    }

    async fn handle_connection<S: Socket>(
        socket: S,
        services: Arc<ServiceRegistry>,
    ) -> Result<(), NetError> {
        let peer = socket.peer_addr();
        tracing::debug!(%peer, "new connection");

        let mut pending = None;
        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => socket.recv_frame().await?,
            };
            if frame.kind != FrameKind::Request {
                tracing::warn!(%peer, kind = ?frame.kind, "expected a request frame");
                socket
                    .send_frame(&Frame::error(&Status::new(RPCCode::INVALID_MESSAGE_TYPE)))
                    .await?;
                continue;
            }

            let (service_id, method_id) = frame.service_method();
            tracing::debug!(
                %peer,
                service_id,
                method_id,
                body_len = frame.body.len(),
                "dispatching request"
            );

            let terminal = match services.get(service_id) {
                Some(handler) => {
                    let ctx = CallContext { peer };
                    match Self::dispatch(&socket, handler, ctx, method_id, frame.body, &mut pending).await? {
                        Ok(()) => Frame::end(),
                        Err(status) => {
                            tracing::debug!(%peer, service_id, method_id, %status, "handler returned error");
                            Frame::error(&status)
                        }
                    }
                }
                None => {
                    tracing::warn!(%peer, service_id, "service not found");
                    Frame::error(&Status::new(RPCCode::INVALID_SERVICE_ID))
                }
            };
            socket.send_frame(&terminal).await?;
        }
    }

    /// Run one call, forwarding its responses to the socket as they arrive.
    ///
    /// The socket is read while the handler runs. A caller that hangs up
    /// cancels the call; a frame that arrives early is parked in `pending`.
    async fn dispatch<S: Socket>(
        socket: &S,
        handler: Arc<dyn ServiceHandler>,
        ctx: CallContext,
        method_id: u16,
        body: Bytes,
        pending: &mut Option<Frame>,
    ) -> Result<Result<(), Status>, NetError> {
        let (sink, mut rx) = ResponseSink::channel(RESPONSE_QUEUE_DEPTH);
        let call = handler.handle(ctx, method_id, body, sink);
        tokio::pin!(call);

        let mut outcome = None;
        loop {
            tokio::select! {
                biased;

                res = &mut call, if outcome.is_none() => outcome = Some(res),
                body = rx.recv() => match body {
                    Some(body) => socket.send_frame(&Frame::data(body)).await?,
                    None => break,
                },
                next = socket.recv_frame(), if outcome.is_none() && pending.is_none() => match next {
                    Ok(frame) => *pending = Some(frame),
                    Err(e) => {
                        tracing::debug!(peer = %ctx.peer, "caller hung up, call cancelled: {}", e);
                        return Err(e);
                    }
                },
            }
        }

        Ok(match outcome {
            Some(res) => res,
            None => call.await,
        })
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
