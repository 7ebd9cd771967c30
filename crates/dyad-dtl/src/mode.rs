use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DtlError;

/// How file contents travel from producer to consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DtlMode {
    /// Inside the response stream of the fetch RPC.
    #[default]
    Rpc,
    /// Out of band, as a tag-matched message to the consumer's worker.
    Rma,
}

impl DtlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DtlMode::Rpc => "RPC",
            DtlMode::Rma => "RMA",
        }
    }
}

impl FromStr for DtlMode {
    type Err = DtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RPC" | "FLUX_RPC" => Ok(DtlMode::Rpc),
            "RMA" | "UCX" => Ok(DtlMode::Rma),
            other => Err(DtlError::BadConfig(format!("unknown transport mode {:?}", other))),
        }
    }
}

impl TryFrom<String> for DtlMode {
    type Error = DtlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DtlMode> for String {
    fn from(mode: DtlMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for DtlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
