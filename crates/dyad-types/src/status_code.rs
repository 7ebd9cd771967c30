/// Status code type alias. Codes travel on the wire as a `u16`.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INVALID_FORMAT: status_code_t = 33;
    pub const SERDE_INVALID_JSON: status_code_t = 50;
    pub const SERDE_INVALID_TOML: status_code_t = 51;
    pub const KV_STORE_NOT_FOUND: status_code_t = 60;
    pub const KV_STORE_GET_ERROR: status_code_t = 61;
    pub const KV_STORE_SET_ERROR: status_code_t = 62;
    pub const KV_STORE_UNAVAILABLE: status_code_t = 63;
    pub const IO_ERROR: status_code_t = 69;
    pub const OS_ERROR: status_code_t = 72;
    pub const UNKNOWN: status_code_t = 999;
}

/// RPC status codes (2xxx).
pub mod RPCCode {
    use super::status_code_t;

    pub const INVALID_MESSAGE_TYPE: status_code_t = 2000;
    pub const REQUEST_IS_EMPTY: status_code_t = 2001;
    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const SEND_FAILED: status_code_t = 2007;
    pub const INVALID_SERVICE_ID: status_code_t = 2008;
    pub const INVALID_METHOD_ID: status_code_t = 2009;
    pub const SOCKET_ERROR: status_code_t = 2010;
    pub const LISTEN_FAILED: status_code_t = 2011;
    pub const SOCKET_CLOSED: status_code_t = 2013;
    pub const CONNECT_FAILED: status_code_t = 2014;
    pub const INVALID_SERVICE_NAME: status_code_t = 2020;
    pub const NO_SUCH_PARTICIPANT: status_code_t = 2021;
}

/// File staging status codes (3xxx).
///
/// These are what a fetch requester sees when the producer side fails, and
/// what the staging layer maps its error kinds onto.
pub mod DyadCode {
    use super::status_code_t;

    pub const SYS_FAIL: status_code_t = 3000;
    pub const NO_CTX: status_code_t = 3001;
    pub const STORE_FAIL: status_code_t = 3002;
    pub const NOT_FOUND: status_code_t = 3003;
    pub const BAD_RPC: status_code_t = 3004;
    pub const BAD_FIO: status_code_t = 3005;
    pub const BAD_MANAGED_PATH: status_code_t = 3006;
    pub const BAD_PACK: status_code_t = 3007;
    pub const DTL_INIT_FAIL: status_code_t = 3008;
    pub const DTL_CONNECT_FAIL: status_code_t = 3009;
    pub const DTL_COMM_FAIL: status_code_t = 3010;
    pub const DTL_OP_FAIL: status_code_t = 3011;
    pub const BAD_CONFIG: status_code_t = 3012;
    /// Producer and consumer see the same device; nothing is sent.
    pub const NO_TRANSFER_NEEDED: status_code_t = 3020;
    /// Terminal response closing a streaming RPC.
    pub const NO_DATA: status_code_t = 3021;
}

/// Classification of status code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCodeType {
    Invalid = -1,
    Common = 0,
    RPC = 2,
    Dyad = 3,
}

/// Determine the type/category of a status code.
pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        2000..=2999 => StatusCodeType::RPC,
        3000..=3999 => StatusCodeType::Dyad,
        _ => StatusCodeType::Invalid,
    }
}

/// Convert a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::SERDE_INVALID_JSON => "SerdeInvalidJson",
        StatusCode::SERDE_INVALID_TOML => "SerdeInvalidToml",
        StatusCode::KV_STORE_NOT_FOUND => "KVStoreNotFound",
        StatusCode::KV_STORE_GET_ERROR => "KVStoreGetError",
        StatusCode::KV_STORE_SET_ERROR => "KVStoreSetError",
        StatusCode::KV_STORE_UNAVAILABLE => "KVStoreUnavailable",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::OS_ERROR => "OSError",
        StatusCode::UNKNOWN => "Unknown",

        RPCCode::INVALID_MESSAGE_TYPE => "RPC::InvalidMessageType",
        RPCCode::REQUEST_IS_EMPTY => "RPC::RequestIsEmpty",
        RPCCode::TIMEOUT => "RPC::Timeout",
        RPCCode::INVALID_ADDR => "RPC::InvalidAddr",
        RPCCode::SEND_FAILED => "RPC::SendFailed",
        RPCCode::INVALID_SERVICE_ID => "RPC::InvalidServiceId",
        RPCCode::INVALID_METHOD_ID => "RPC::InvalidMethodId",
        RPCCode::SOCKET_ERROR => "RPC::SocketError",
        RPCCode::LISTEN_FAILED => "RPC::ListenFailed",
        RPCCode::SOCKET_CLOSED => "RPC::SocketClosed",
        RPCCode::CONNECT_FAILED => "RPC::ConnectFailed",
        RPCCode::INVALID_SERVICE_NAME => "RPC::InvalidServiceName",
        RPCCode::NO_SUCH_PARTICIPANT => "RPC::NoSuchParticipant",

        DyadCode::SYS_FAIL => "Dyad::SysFail",
        DyadCode::NO_CTX => "Dyad::NoCtx",
        DyadCode::STORE_FAIL => "Dyad::StoreFail",
        DyadCode::NOT_FOUND => "Dyad::NotFound",
        DyadCode::BAD_RPC => "Dyad::BadRpc",
        DyadCode::BAD_FIO => "Dyad::BadFio",
        DyadCode::BAD_MANAGED_PATH => "Dyad::BadManagedPath",
        DyadCode::BAD_PACK => "Dyad::BadPack",
        DyadCode::DTL_INIT_FAIL => "Dyad::DtlInitFail",
        DyadCode::DTL_CONNECT_FAIL => "Dyad::DtlConnectFail",
        DyadCode::DTL_COMM_FAIL => "Dyad::DtlCommFail",
        DyadCode::DTL_OP_FAIL => "Dyad::DtlOpFail",
        DyadCode::BAD_CONFIG => "Dyad::BadConfig",
        DyadCode::NO_TRANSFER_NEEDED => "Dyad::NoTransferNeeded",
        DyadCode::NO_DATA => "Dyad::NoData",

        _ => "Unknown",
    }
}
