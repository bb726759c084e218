//! Top-level error taxonomy for the configuration client.
//!
//! Each layer keeps its own error enum ([`HttpError`], [`PersistenceError`]);
//! [`ClientError`] wraps them and tags every failure with one of the
//! [`ErrorKind`]s callers are expected to branch on.

use std::fmt;

use thiserror::Error;

use crate::http::HttpError;
use crate::persistence::PersistenceError;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or missing construction parameters; fatal and never retried.
    Configuration,
    /// The startup fetch failed; recovered from the local snapshot when enabled.
    InitialSync,
    /// Network, timeout, or unexpected status from any fetch.
    Transport,
    /// Snapshot read or write failure.
    Persistence,
    /// A stored value could not be parsed as the requested type.
    TypeConversion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::InitialSync => "initial-sync",
            ErrorKind::Transport => "transport",
            ErrorKind::Persistence => "persistence",
            ErrorKind::TypeConversion => "type-conversion",
        };
        f.write_str(label)
    }
}

/// Error surfaced by the public client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client configuration: {0}")]
    Configuration(String),
    #[error("initial sync of namespace `{namespace}` failed: {source}")]
    InitialSync {
        namespace: String,
        #[source]
        source: HttpError,
    },
    #[error("transport error: {0}")]
    Transport(#[from] HttpError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("cannot read `{key}` as {target}: {message}")]
    TypeConversion {
        key: String,
        target: &'static str,
        message: String,
    },
}

impl ClientError {
    /// Returns the tag associated with this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Configuration(_) => ErrorKind::Configuration,
            ClientError::InitialSync { .. } => ErrorKind::InitialSync,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Persistence(_) => ErrorKind::Persistence,
            ClientError::TypeConversion { .. } => ErrorKind::TypeConversion,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ClientError::Configuration(message.into())
    }

    pub(crate) fn conversion(
        key: &str,
        target: &'static str,
        message: impl fmt::Display,
    ) -> Self {
        ClientError::TypeConversion {
            key: key.to_string(),
            target,
            message: message.to_string(),
        }
    }
}
