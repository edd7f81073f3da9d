// src/error.rs

//! Crate-level error type
//!
//! Every failure surfaced by the engine carries one of a small set of kinds
//! so callers can map it to an exit code and users get a short imperative
//! message plus, where one exists, a mitigation hint.

use std::fmt;
use thiserror::Error;

/// Classification of an engine failure, used for exit codes and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest or schema validation failed
    Validation,
    /// Checksum or signature mismatch
    Integrity,
    /// Import chain could not be resolved
    Composition,
    /// Local I/O or path failure
    Resource,
    /// Registry, git, or webhook transport failure
    Network,
    /// Kubernetes API call or wait timeout
    Cluster,
    /// A user-supplied action command failed
    Action,
    /// The operation was cancelled by the caller
    Cancelled,
    /// A bug in the engine
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Integrity => "integrity",
            Self::Composition => "composition",
            Self::Resource => "resource",
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::Action => "action",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Integrity { message: String },

    #[error("{message}")]
    Composition { message: String },

    #[error("{message}")]
    Resource {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{message}")]
    Network { message: String },

    #[error("{message}")]
    Cluster { message: String, unreachable: bool },

    #[error("action {description:?} failed: {message}")]
    Action { description: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            unreachable: false,
        }
    }

    pub fn cluster_unreachable(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            unreachable: true,
        }
    }

    pub fn action(description: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            description: description.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Composition { .. } => ErrorKind::Composition,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::Network { .. } => ErrorKind::Network,
            Self::Cluster { .. } => ErrorKind::Cluster,
            Self::Action { .. } => ErrorKind::Action,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Process exit code for this failure.
    ///
    /// 0 is success, 1 generic, 2 validation, 3 integrity, 4 cluster
    /// unreachable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Composition { .. } => 2,
            Self::Integrity { .. } => 3,
            Self::Cluster {
                unreachable: true, ..
            } => 4,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Resource {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Map an arbitrary error chain to a process exit code by looking for an
/// engine [`Error`] anywhere in the chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(engine) = cause.downcast_ref::<Error>() {
            return engine.exit_code();
        }
    }
    1
}
