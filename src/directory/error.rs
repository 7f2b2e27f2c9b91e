use bincode::{Decode, Encode};
use thiserror::Error;

use super::Name;

/// Errors meaningful to the directory itself. They travel over the wire
/// verbatim inside FAILURE frames and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Encode, Decode)]
pub enum NamingError {
    #[error("name not found: '{name}'")]
    NameNotFound { name: String },

    #[error("name already bound: '{name}'")]
    NameAlreadyBound { name: String },

    #[error("invalid name '{name}', {reason}")]
    InvalidName { name: String, reason: String },

    #[error("'{name}' is not a context")]
    NotContext { name: String },

    #[error("context '{name}' is not empty")]
    ContextNotEmpty { name: String },

    #[error("internal server error: {message}")]
    Internal { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl NamingError {
    pub fn not_found(name: &Name) -> Self {
        Self::NameNotFound {
            name: name.to_string(),
        }
    }

    pub fn already_bound(name: &Name) -> Self {
        Self::NameAlreadyBound {
            name: name.to_string(),
        }
    }

    pub fn not_context(name: &Name) -> Self {
        Self::NotContext {
            name: name.to_string(),
        }
    }

    pub fn invalid(name: &Name, reason: &str) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
