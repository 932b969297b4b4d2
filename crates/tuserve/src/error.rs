use salvo_core::http::StatusCode;

use crate::lockers::LockError;

pub type TusResult<T> = Result<T, TusError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures produced by a data store.
///
/// Everything a concrete back-end cannot express with the first three
/// variants is reported as an opaque [`StoreError::Other`] and surfaces as a
/// 500 to the client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upload not found")]
    NotFound,

    #[error("write offset mismatch: upload is at {expected}, request sent {got}")]
    OffsetMismatch { expected: u64, got: u64 },

    /// Reported by stores with an embedded lock.
    #[error("upload is currently locked by another request")]
    AlreadyLocked,

    #[error("storage failure: {0}")]
    Other(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound,
            _ => StoreError::Other(e.to_string()),
        }
    }
}

/// Header and precondition failures detected before the store is touched.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing tus-resumable header")]
    MissingTusResumable,
    #[error("unsupported tus version: {0}")]
    UnsupportedTusVersion(String),
    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("invalid integer header: {0}")]
    InvalidInt(&'static str),
    #[error("request content-type must be application/offset+octet-stream")]
    InvalidContentType,
    #[error("exactly one of Upload-Length and Upload-Defer-Length is required")]
    InvalidUploadLength,
    #[error("missing or invalid Upload-Offset header")]
    InvalidOffset,
    #[error("invalid Upload-Concat header")]
    InvalidConcat,
    #[error("maximum size exceeded")]
    MaxSizeExceeded,
}

#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("upload not found")]
    NotFound,

    #[error("offset mismatch: upload is at {current}, request sent {sent}")]
    MismatchOffset { current: u64, sent: u64 },

    #[error("upload is currently locked by another request")]
    FileLocked,

    #[error("one or more partial uploads are not finished yet")]
    UploadNotFinished,

    #[error("modifying a final upload is not allowed")]
    ModifyFinal,

    #[error("{0} is not supported by the configured store")]
    UnsupportedByStore(&'static str),

    #[error("termination is not supported by the configured store")]
    TerminationUnsupported,

    #[error("upload has been stopped by the server")]
    UploadStopped,

    #[error("failed to generate upload id")]
    GenerateId,

    #[error("failed to generate upload url, check your generate url function")]
    GenerateUploadUrl,

    #[error("storage failure: {0}")]
    StoreFailed(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<StoreError> for TusError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => TusError::NotFound,
            StoreError::OffsetMismatch { expected, got } => TusError::MismatchOffset {
                current: expected,
                sent: got,
            },
            StoreError::AlreadyLocked => TusError::FileLocked,
            StoreError::Other(msg) => TusError::StoreFailed(msg),
        }
    }
}

impl From<LockError> for TusError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyLocked => TusError::FileLocked,
            LockError::Other(msg) => TusError::Internal(msg),
        }
    }
}

impl TusError {
    pub fn status(&self) -> StatusCode {
        match self {
            TusError::Protocol(ProtocolError::MissingTusResumable)
            | TusError::Protocol(ProtocolError::UnsupportedTusVersion(_)) => {
                StatusCode::PRECONDITION_FAILED
            }
            TusError::Protocol(ProtocolError::MaxSizeExceeded) => StatusCode::PAYLOAD_TOO_LARGE,
            TusError::Protocol(_) => StatusCode::BAD_REQUEST,

            TusError::NotFound => StatusCode::NOT_FOUND,
            TusError::MismatchOffset { .. } => StatusCode::CONFLICT,
            TusError::FileLocked => StatusCode::LOCKED,
            TusError::UploadNotFinished => StatusCode::BAD_REQUEST,
            TusError::ModifyFinal => StatusCode::FORBIDDEN,
            TusError::UnsupportedByStore(_) => StatusCode::NOT_IMPLEMENTED,
            TusError::TerminationUnsupported => StatusCode::METHOD_NOT_ALLOWED,
            TusError::UploadStopped => StatusCode::BAD_REQUEST,
            TusError::GenerateId | TusError::GenerateUploadUrl => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            TusError::StoreFailed(_) | TusError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
