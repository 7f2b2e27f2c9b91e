use std::time::Duration;

use thiserror::Error;

use crate::{directory::NamingError, transport::TransportError};

/// Error surfaced by every client-side directory operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid call, rejected before any I/O.
    #[error("invalid arguments for '{operation}': {reason}")]
    Argument {
        operation: &'static str,
        reason: String,
    },

    /// Domain failure reported by the remote directory, passed on verbatim.
    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("naming operation failed: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to connect to any server. Servers tried: [{}]", .attempts.join(", "))]
    Communication {
        attempts: Vec<String>,
        #[source]
        cause: Option<TransportError>,
    },

    #[error("failed to connect to any server. Servers tried: [{}]", .attempts.join(", "))]
    Authentication {
        attempts: Vec<String>,
        #[source]
        cause: Option<TransportError>,
    },

    #[error("no response received within {0:?}")]
    Timeout(Duration),

    #[error("NamingStore has been closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn argument(operation: &'static str, reason: impl Into<String>) -> Self {
        Error::Argument {
            operation,
            reason: reason.into(),
        }
    }

    /// Failures that warrant switching to another server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn naming(&self) -> Option<&NamingError> {
        match self {
            Error::Naming(e) => Some(e),
            _ => None,
        }
    }
}
