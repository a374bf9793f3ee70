use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Transport`](crate::Transport) and SDK construction.
///
/// Failures inside code wrapped by the [`ErrorBoundary`](crate::ErrorBoundary) never surface as
/// an `Error`; they are recovered and reported instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid `api` or collector base URL configuration.
    #[error("invalid base url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// SDK key or SDK metadata cannot be sent as an HTTP header.
    #[error("invalid value for header {0}")]
    InvalidHeader(reqwest::header::HeaderName),

    /// The server answered with a non-2xx status code.
    #[error("http response error code: {}", .0.as_u16())]
    UnexpectedStatus(StatusCode),

    /// Network error: connection failure, timeout, or malformed response body.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Request payload or response body is not valid JSON for the requested type.
    #[error(transparent)]
    Serialization(Arc<serde_json::Error>),

    /// The OS refused a resource, such as spawning the sync thread.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// Indicates that the sync thread panicked outside of the error boundary.
    #[error("sync thread panicked")]
    SyncThreadPanicked,
}

impl Error {
    /// HTTP status code associated with the error, if the server responded at all.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::UnexpectedStatus(status) => Some(*status),
            Error::Network(err) => err.status(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(value))
    }
}
