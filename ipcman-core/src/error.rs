use ipcman_model::{DeviceId, ModelError};
use thiserror::Error;

/// Symbolic classification of a device-reported error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    MethodNotFound,
    InterfaceNotFound,
    NoData,
    InvalidSession,
    Unknown,
}

impl ErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            268_894_209 => ErrorKind::InvalidRequest,
            268_894_210 => ErrorKind::MethodNotFound,
            268_632_064 => ErrorKind::InterfaceNotFound,
            285_409_284 => ErrorKind::NoData,
            287_637_505 | 287_637_504 => ErrorKind::InvalidSession,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Error object carried inside a response envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code}, {kind:?})")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    pub kind: ErrorKind,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: ErrorKind::from_code(code),
        }
    }
}

/// Second-login rejections that retrying cannot fix.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    #[error("User or password not valid")]
    UserOrPasswordNotValid,
    #[error("User not valid")]
    UserNotValid,
    #[error("Password not valid")]
    PasswordNotValid,
    #[error("User in blackList")]
    InBlackList,
    #[error("User has be used")]
    HasBeenUsed,
    #[error("User locked")]
    Locked,
}

impl LoginError {
    pub fn from_response(err: &ResponseError) -> Option<Self> {
        match err.code {
            268_632_085 => return Some(LoginError::UserOrPasswordNotValid),
            268_632_081 => return Some(LoginError::Locked),
            _ => {}
        }

        match err.message.as_str() {
            "UserNotValidt" => Some(LoginError::UserNotValid),
            "PasswordNotValid" => Some(LoginError::PasswordNotValid),
            "InBlackList" => Some(LoginError::InBlackList),
            "HasBeedUsed" => Some(LoginError::HasBeenUsed),
            "HasBeenLocked" => Some(LoginError::Locked),
            _ => None,
        }
    }
}

/// Failure of a single RPC exchange or of the session behind it.
///
/// Cloneable so a retained permanent login failure can be handed to every
/// caller verbatim.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("client request failed: {0}")]
    RequestFailed(String),

    #[error("device error: {0}")]
    Response(#[from] ResponseError),

    #[error("login rejected: {0}")]
    Login(#[from] LoginError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("session closed")]
    SessionClosed,

    #[error("device worker closed")]
    WorkerClosed,

    #[error("request cancelled")]
    Cancelled,
}

impl RpcError {
    pub fn is_request_failed(&self) -> bool {
        matches!(self, RpcError::RequestFailed(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RpcError::Response(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Decode(err.to_string())
    }
}

/// Errors from the plain HTTP (CGI) endpoints.
#[derive(Error, Debug, Clone)]
pub enum CgiError {
    #[error("client request failed: {0}")]
    RequestFailed(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Protocol(String),
}

impl CgiError {
    /// Credentials or endpoint are wrong; reconnecting cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CgiError::Status(401 | 403 | 404))
    }
}

#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("scan lock for device {0} is held by another owner")]
    LockHeld(DeviceId),

    #[error("scan lock for device {0} is no longer owned")]
    LockLost(DeviceId),

    #[error("catalog backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("invalid device timestamp: {0}")]
    Timestamp(String),

    #[error("scan cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker for device {0} already exists")]
    AlreadyExists(DeviceId),

    #[error("no worker for device {0}")]
    NotFound(DeviceId),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Cgi(#[from] CgiError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Every device that could not be started, in catalog order.
    #[error("{} of {total} devices failed to start", .failures.len())]
    Bootstrap {
        total: usize,
        failures: Vec<(DeviceId, WorkerError)>,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;
