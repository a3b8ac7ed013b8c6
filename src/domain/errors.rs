use crate::domain::models::{ErrorKind, ErrorReport};
use thiserror::Error;

/// Failures raised by a serial transport or its connector.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid peer identifier `{0}`")]
    InvalidPeerId(String),

    #[error("peer does not offer service {0}")]
    ServiceNotFound(String),

    #[error("transport requires {0}")]
    Unsupported(&'static str),

    #[error("peer stopped draining writes (no completion within {0:?})")]
    Stalled(std::time::Duration),

    #[error("previous link is still being disposed")]
    PreviousLinkBusy,

    #[cfg(windows)]
    #[error("platform error: {0}")]
    Platform(#[from] windows::core::Error),
}

/// Link lifecycle errors reported by the connection manager.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no device selected")]
    NoDeviceSelected,

    #[error("connect to {peer} failed: {source}")]
    ConnectFailed {
        peer: String,
        #[source]
        source: TransportError,
    },

    #[error("write failed: {0}")]
    WriteFailed(#[source] TransportError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("capability `{0}` not granted")]
    CapabilityDenied(&'static str),

    #[error("speed source {path} unavailable: {source}")]
    SourceUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoDeviceSelected => ErrorKind::NoDeviceSelected,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::WriteFailed(_) => ErrorKind::WriteFailed,
        }
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapabilityDenied(_) => ErrorKind::CapabilityDenied,
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
        }
    }
}

impl From<&LinkError> for ErrorReport {
    fn from(err: &LinkError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&ProviderError> for ErrorReport {
    fn from(err: &ProviderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
