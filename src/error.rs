//! Error taxonomy for the driver, scoped entirely to network-sourced errors.

use thiserror::Error;

/// The two error kinds a network endpoint can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Unexpected stack or runtime failure: alloc failure, a `tcp_write`
    /// error other than `ERR_MEM`, an unexpected `err` code, shutdown
    /// failure.
    Internal,
    /// The stack delivered `err(ERR_RST)`.
    RemoteReset,
}

impl NetworkErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkErrorKind::Internal => "internal",
            NetworkErrorKind::RemoteReset => "remote_reset",
        }
    }
}

/// An error recorded on an endpoint or surfaced to the driver's caller.
#[derive(Debug, Error, Clone)]
#[error("network error ({kind}): {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

impl NetworkError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: NetworkErrorKind::Internal,
            message: message.into(),
        }
    }

    pub fn remote_reset(message: impl Into<String>) -> Self {
        Self {
            kind: NetworkErrorKind::RemoteReset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
