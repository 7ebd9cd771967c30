//! Data transport layer: how file contents move from the producer that owns
//! a file to the consumer that asked for it.

pub mod config;
pub mod error;
pub mod mode;
pub mod request;
pub mod rma;
pub mod rpc;
pub mod transport;

pub use config::DtlConfig;
pub use error::{DtlError, DtlResult};
pub use mode::DtlMode;
pub use request::{FetchRequest, RmaAck, RmaInfo, FETCH_TOPIC};
pub use rma::{RmaClientTransport, RmaServerTransport};
pub use rpc::{RpcClientTransport, RpcServerTransport};
pub use transport::{
    client_transport, server_transport, ClientTransport, Received, ServerConnection,
    ServerTransport,
};
