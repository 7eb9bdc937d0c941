use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;
use stratus_core::wire::DecodeError;

/// Failure taxonomy delivered to the listener. None of these are fatal to
/// the process; every variant ends up inside a failure event.
///
/// A 304 "not modified" is not represented here: conditional metadata
/// reads surface it as a distinct success shape.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("authentication failed: service returned {status}")]
    AuthenticationFailed { status: u16 },
    #[error("api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response did not decode as expected: {0}")]
    InvalidResponse(#[from] DecodeError),
    #[error("local file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("not an uploadable file: {0}")]
    IllegalFileType(PathBuf),
    #[error("response worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthenticationFailed { .. })
    }
}
