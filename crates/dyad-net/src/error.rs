use dyad_types::{RPCCode, Status, StatusCode};
use thiserror::Error;

/// Errors that can occur in the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid frame: bad magic (checksum low byte: {0:#04x})")]
    InvalidMagic(u8),

    #[error("invalid frame kind: {0}")]
    InvalidFrameKind(u8),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("incomplete header: need {need} bytes, have {have}")]
    IncompleteHeader { need: usize, have: usize },

    #[error("incomplete body: need {need} bytes, have {have}")]
    IncompleteBody { need: u64, have: u64 },

    #[error("service not found: service_id={0}")]
    ServiceNotFound(u16),

    #[error("server shutting down")]
    ShuttingDown,

    /// The remote side answered the call with an error status.
    #[error("remote error: {0}")]
    Remote(Status),
}

impl NetError {
    /// Status to report for this error, preserving remote statuses as-is.
    pub fn to_status(&self) -> Status {
        let code = match self {
            NetError::Remote(status) => return status.clone(),
            NetError::ConnectionClosed => RPCCode::SOCKET_CLOSED,
            NetError::ConnectFailed { .. } => RPCCode::CONNECT_FAILED,
            NetError::Io(_) => RPCCode::SOCKET_ERROR,
            NetError::ChecksumMismatch { .. } => StatusCode::DATA_CORRUPTION,
            NetError::InvalidMagic(_) | NetError::InvalidFrameKind(_) | NetError::UnexpectedFrame(_) => {
                RPCCode::INVALID_MESSAGE_TYPE
            }
            NetError::MessageTooLarge { .. }
            | NetError::IncompleteHeader { .. }
            | NetError::IncompleteBody { .. } => StatusCode::INVALID_FORMAT,
            NetError::ServiceNotFound(_) => RPCCode::INVALID_SERVICE_ID,
            NetError::ShuttingDown => RPCCode::SOCKET_CLOSED,
        };
        Status::with_message(code, self.to_string())
    }
}

impl From<NetError> for Status {
    fn from(err: NetError) -> Self {
        err.to_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyad_types::DyadCode;

    #[test]
    fn test_display_checksum_mismatch() {
        let err = NetError::ChecksumMismatch {
            expected: 0xAABBCC86,
            actual: 0x11223386,
        };
        let s = err.to_string();
        assert!(s.contains("0xaabbcc86"));
        assert!(s.contains("0x11223386"));
    }

    #[test]
    fn test_remote_status_preserved() {
        let status = Status::new(DyadCode::NO_TRANSFER_NEEDED);
        let err = NetError::Remote(status.clone());
        assert_eq!(err.to_status(), status);
    }

    #[test]
    fn test_io_maps_to_socket_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let net_err: NetError = io_err.into();
        let status: Status = net_err.into();
        assert_eq!(status.code(), RPCCode::SOCKET_ERROR);
        assert!(status.message().unwrap().contains("pipe broke"));
    }
}
