//! Producer/consumer file handoff. A producer publishes where a file it
//! finished writing lives; a consumer waits for that record and pulls the
//! contents over the configured transport when they are not already local.

pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod record;

pub use config::{ConfigError, DyadConfig};
pub use context::{ManagedContext, ReenterGuard};
pub use error::{DyadError, ErrorKind};
pub use protocol::{staged_path, ConsumeOutcome, ConsumeState, ProduceOutcome};
pub use record::LocationRecord;
