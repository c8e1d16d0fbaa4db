use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 32-bit status code reported by a media or graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const FAIL: ErrorCode = ErrorCode(0x8000_4005);
    pub const UNEXPECTED: ErrorCode = ErrorCode(0x8000_FFFF);
    pub const ILLEGAL_METHOD_CALL: ErrorCode = ErrorCode(0x8000_000E);
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode(0x8007_0002);
    pub const INVALID_STATE: ErrorCode = ErrorCode(0xC00D_36B2);

    pub fn is_failure(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Failure returned by a collaborator call (media backend, graphics device, audio graph).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FAIL, message)
    }
}

/// Errors surfaced synchronously by the playback controller.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Operation attempted before `initialize()`. Reported as not ready.
    #[error("player has not been initialized")]
    NotInitialized,
    /// Operation attempted with no active player, session or device.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// Operation attempted before the data it depends on is known.
    #[error("not ready: {0}")]
    NotReady(&'static str),
    /// Local file path was never granted access.
    #[error("not found: {0}")]
    NotFound(String),
    /// A backend call or decode reported a failure.
    #[error("backend failure {code}: {message}")]
    BackendFailure { code: ErrorCode, message: String },
    /// An awaited backend operation finished without success.
    #[error("{operation} did not complete: {status}")]
    AsyncFailure {
        operation: &'static str,
        status: String,
    },
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
}

impl PlaybackError {
    /// Backend code equivalent, used when reporting through the event stream.
    pub fn code(&self) -> ErrorCode {
        match self {
            PlaybackError::IllegalState(_) => ErrorCode::ILLEGAL_METHOD_CALL,
            PlaybackError::NotInitialized | PlaybackError::NotReady(_) => ErrorCode::UNEXPECTED,
            PlaybackError::NotFound(_) => ErrorCode::FILE_NOT_FOUND,
            PlaybackError::BackendFailure { code, .. } => *code,
            PlaybackError::AsyncFailure { .. } | PlaybackError::InvalidUrl(_) => ErrorCode::FAIL,
        }
    }
}

impl From<BackendError> for PlaybackError {
    fn from(e: BackendError) -> Self {
        PlaybackError::BackendFailure {
            code: e.code,
            message: e.message,
        }
    }
}

pub type Result<T, E = PlaybackError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_displays_as_hex() {
        assert_eq!(ErrorCode(0x80000001).to_string(), "0x80000001");
        assert_eq!(ErrorCode::FILE_NOT_FOUND.to_string(), "0x80070002");
    }

    #[test]
    fn failure_bit() {
        assert!(ErrorCode::FAIL.is_failure());
        assert!(!ErrorCode(0).is_failure());
    }

    #[test]
    fn backend_error_converts_with_code() {
        let e: PlaybackError = BackendError::new(ErrorCode(0x80000001), "decode").into();
        assert_eq!(e.code(), ErrorCode(0x80000001));
        assert!(e.to_string().contains("decode"));
    }

    #[test]
    fn kinds_map_to_codes() {
        assert_eq!(PlaybackError::NotInitialized.code(), ErrorCode::UNEXPECTED);
        assert_eq!(
            PlaybackError::IllegalState("no player").code(),
            ErrorCode::ILLEGAL_METHOD_CALL
        );
        assert_eq!(
            PlaybackError::NotFound("clip.mp4".into()).code(),
            ErrorCode::FILE_NOT_FOUND
        );
        assert_eq!(PlaybackError::NotReady("size").code(), ErrorCode::UNEXPECTED);
    }
}
