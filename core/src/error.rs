//! Error types for the session core

use thiserror::Error;

/// Main error type for the session core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    #[error("Duplicate UID {0} in directory")]
    DuplicateIdentifier(String),

    #[error("No such session: {0}")]
    UnknownSession(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Reasons a connection attempt is refused.
///
/// All of these are fatal to the attempt: the transport writes the rejection
/// line and closes the socket, nothing is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Unauthorised connection")]
    NoClass,

    #[error("Unauthorised connection")]
    Denied { class: String },

    #[error("Invalid password")]
    PasswordRequired,

    #[error("No more connections allowed from your host via this connect class ({scope})")]
    LimitExceeded { scope: LimitScope, limit: usize },
}

/// Which per-address ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Local,
    Global,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Local => write!(f, "local"),
            LimitScope::Global => write!(f, "global"),
        }
    }
}

impl AdmissionError {
    /// Line written to the peer before the transport closes the connection
    pub fn rejection_line(&self, host: &str) -> String {
        format!("ERROR :Closing link: ({}) [{}]", host, self)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
