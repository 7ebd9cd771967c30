pub mod client;
pub mod error;
pub mod message;
pub mod server;
pub mod service;
pub mod socket;

pub use client::{ResponseStream, RpcClient};
pub use error::NetError;
pub use message::{Frame, FrameHeader, FrameKind, FRAME_HEADER_SIZE, FRAME_MAX_SIZE};
pub use server::Server;
pub use service::{CallContext, ResponseSink, ServiceHandler, ServiceRegistry};
pub use socket::{AsyncConnector, Listener, Socket};
