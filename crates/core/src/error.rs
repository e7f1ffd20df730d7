use thiserror::Error as ThisError;
use toolchat_model::{ErrorKind as ModelErrorKind, ModelProviderError};

/// Errors that end a turn without an answer.
///
/// Tool failures never show up here, they are reported to the model as
/// tool results instead.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The model backend failed (network, authentication, rate limit,
    /// unreadable response).
    #[error("{message}")]
    BackendUnavailable {
        /// Human-readable description from the backend.
        message: String,
        /// What kind of failure it was.
        kind: ModelErrorKind,
        /// The backend's status code, if it reported one.
        status: Option<u16>,
    },
    /// The caller cancelled the turn.
    #[error("the turn was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the status code associated with this error, if any.
    #[inline]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::BackendUnavailable { status, .. } => *status,
            Error::Cancelled => None,
        }
    }
}

impl From<Box<dyn ModelProviderError>> for Error {
    fn from(err: Box<dyn ModelProviderError>) -> Self {
        Error::BackendUnavailable {
            message: err.to_string(),
            kind: err.kind(),
            status: err.status_code(),
        }
    }
}
