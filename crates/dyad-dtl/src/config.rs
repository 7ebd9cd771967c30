use serde::{Deserialize, Serialize};

use crate::mode::DtlMode;

/// Transport settings, the `[dtl]` table of the participant config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtlConfig {
    pub mode: DtlMode,

    /// Where the tag worker listens in RMA mode. Port 0 picks a free port;
    /// the IP must be reachable by producers.
    pub rma_bind: String,
}

impl Default for DtlConfig {
    fn default() -> Self {
        Self {
            mode: DtlMode::Rpc,
            rma_bind: "127.0.0.1:0".to_string(),
        }
    }
}
