use dyad_types::{DyadCode, Status};
use thiserror::Error;

/// Transport failures. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DtlError {
    #[error("transport init failed: {0}")]
    InitFail(String),
    #[error("could not pack or unpack transport message: {0}")]
    PackFail(String),
    #[error("could not connect: {0}")]
    ConnectFail(String),
    #[error("communication failed: {0}")]
    CommFail(String),
    #[error("transport operation failed: {0}")]
    OpFail(String),
    #[error("bad transport configuration: {0}")]
    BadConfig(String),
}

pub type DtlResult<T> = std::result::Result<T, DtlError>;

impl DtlError {
    pub fn code(&self) -> u16 {
        match self {
            DtlError::InitFail(_) => DyadCode::DTL_INIT_FAIL,
            DtlError::PackFail(_) => DyadCode::BAD_PACK,
            DtlError::ConnectFail(_) => DyadCode::DTL_CONNECT_FAIL,
            DtlError::CommFail(_) => DyadCode::DTL_COMM_FAIL,
            DtlError::OpFail(_) => DyadCode::DTL_OP_FAIL,
            DtlError::BadConfig(_) => DyadCode::BAD_CONFIG,
        }
    }
}

impl From<DtlError> for Status {
    fn from(err: DtlError) -> Self {
        Status::with_message(err.code(), err.to_string())
    }
}
