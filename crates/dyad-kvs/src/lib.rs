//! Metadata store for dyad: the key-value records that say where a file
//! lives, plus the RPC mechanism participants use to reach each other.

pub mod broker;
pub mod local;
pub mod remote;
pub mod store;
pub mod wire;

pub use broker::{BrokerService, TopicService};
pub use local::{LocalBroker, LocalStore};
pub use remote::RemoteStore;
pub use store::{
    spawn_request, MetadataStore, Request, RequestHandler, Responder, RpcEvent, RpcStream,
    RPC_STREAM_DEPTH,
};
