use std::path::PathBuf;

/// Core error type for the Telegram REST façade.
///
/// Adapter crates (HTTP layer, MTProto backend) map their specific errors into
/// this type so every failure lands in one taxonomy: bad input, stale session,
/// handshake fault, missing authorization, or an infrastructure problem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Request input failed validation; nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The remote service rejected a stored session.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The wrapped client library reported an unrecoverable login fault.
    #[error("{0}")]
    AuthFault(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn not_authorized(name: &str) -> Self {
        Error::NotAuthorized(format!(
            "No session for \"{name}\". Login first via /auth/qr/start"
        ))
    }

    /// True when the failure means the stored session can no longer be used.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Error::SessionInvalid(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
