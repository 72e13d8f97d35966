//! Errors raised at the backend boundary

use thiserror::Error;

/// Failure of a single backend request
#[derive(Debug, Error)]
pub enum BackendError {
    /// No signed-in user, or the backend rejected the access token
    #[error("not authenticated")]
    NotAuthenticated,
    /// A single-row request matched no row
    #[error("record not found")]
    NotFound,
    /// Row-level policy rejected the request
    #[error("operation not permitted for this user")]
    Forbidden,
    #[error("invalid login credentials")]
    InvalidCredentials,
    /// Sign-up or token refresh was refused
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("backend returned {status}: {message}")]
    Http { status: i32, message: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    /// Local snapshot or session file could not be read or written
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<minreq::Error> for BackendError {
    fn from(err: minreq::Error) -> Self {
        match err {
            minreq::Error::SerdeJsonError(e) => BackendError::Decode(e.to_string()),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Storage(err.to_string())
    }
}
