use dyad_dtl::DtlError;
use dyad_types::{status_code_t, DyadCode, Status, StatusCode};

use crate::config::ConfigError;

/// Coarse classification of a failed produce or consume. A path outside
/// the managed roots is not a failure and is reported as the `NotManaged`
/// outcome instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StoreFail,
    NotFound,
    TransportInitFail,
    TransportConnectFail,
    TransportCommFail,
    TransportPackFail,
    IoFail,
    SysFail,
    BadConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum DyadError {
    #[error("metadata store: {0}")]
    Store(Status),
    #[error("no location record for {key}: {reason}")]
    NotFound { key: String, reason: String },
    #[error("transport: {0}")]
    Transport(#[from] DtlError),
    #[error("fetch rpc to producer: {0}")]
    Rpc(Status),
    #[error("file io: {0}")]
    Io(Status),
    #[error("context is not initialized")]
    NoContext,
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl DyadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DyadError::Store(status) if status.code() == StatusCode::KV_STORE_NOT_FOUND => {
                ErrorKind::NotFound
            }
            DyadError::Store(_) => ErrorKind::StoreFail,
            DyadError::NotFound { .. } => ErrorKind::NotFound,
            DyadError::Transport(err) => match err {
                DtlError::InitFail(_) => ErrorKind::TransportInitFail,
                DtlError::PackFail(_) => ErrorKind::TransportPackFail,
                DtlError::ConnectFail(_) => ErrorKind::TransportConnectFail,
                DtlError::CommFail(_) | DtlError::OpFail(_) => ErrorKind::TransportCommFail,
                DtlError::BadConfig(_) => ErrorKind::BadConfig,
            },
            DyadError::Rpc(_) => ErrorKind::TransportConnectFail,
            DyadError::Io(_) => ErrorKind::IoFail,
            DyadError::NoContext => ErrorKind::SysFail,
            DyadError::Config(_) => ErrorKind::BadConfig,
        }
    }

    /// Numeric code for callers that only speak status codes.
    pub fn code(&self) -> status_code_t {
        match self {
            DyadError::Transport(err) => err.code(),
            DyadError::NoContext => DyadCode::NO_CTX,
            DyadError::Rpc(_) => DyadCode::BAD_RPC,
            _ => match self.kind() {
                ErrorKind::NotFound => DyadCode::NOT_FOUND,
                ErrorKind::StoreFail => DyadCode::STORE_FAIL,
                ErrorKind::IoFail => DyadCode::BAD_FIO,
                ErrorKind::BadConfig => DyadCode::BAD_CONFIG,
                _ => DyadCode::SYS_FAIL,
            },
        }
    }
}

impl From<DyadError> for Status {
    fn from(err: DyadError) -> Self {
        Status::with_message(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let missing = DyadError::Store(Status::new(StatusCode::KV_STORE_NOT_FOUND));
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let down = DyadError::Store(Status::new(StatusCode::KV_STORE_UNAVAILABLE));
        assert_eq!(down.kind(), ErrorKind::StoreFail);
        assert_eq!(down.code(), DyadCode::STORE_FAIL);

        let comm = DyadError::from(DtlError::CommFail("reset".into()));
        assert_eq!(comm.kind(), ErrorKind::TransportCommFail);
        assert_eq!(comm.code(), DyadCode::DTL_COMM_FAIL);
        assert_eq!(
            DyadError::from(DtlError::PackFail("x".into())).kind(),
            ErrorKind::TransportPackFail
        );

        let io = DyadError::Io(Status::new(DyadCode::BAD_FIO));
        assert_eq!(io.kind(), ErrorKind::IoFail);
        let status: Status = io.into();
        assert_eq!(status.code(), DyadCode::BAD_FIO);
    }
}
