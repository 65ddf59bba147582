//! Error types for mailsync
//!
//! Every public operation returns [`Result`], so callers get back
//! either a full typed payload or exactly one [`Error`]. Connection
//! and credential failures are separate variants because user-facing
//! messaging differs between "could not connect" and "credentials
//! rejected".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Resolution, handshake, transport failure, or timeout.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected the account credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for every failure to obtain a usable session, including
    /// rejected credentials.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authentication(_) | Self::Send(SendError::Authentication(_))
        )
    }

    /// True when the store or relay rejected the credentials.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Send(SendError::Authentication(_))
        )
    }

    /// True when the requested folder, message, or thread does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Fetch(
                FetchError::FolderNotFound(_)
                    | FetchError::MessageNotFound { .. }
                    | FetchError::ThreadNotFound(_)
            )
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Connection("operation timed out".into())
    }
}

/// Failures reading from the mail store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("message {uid} not found in {folder}")]
    MessageNotFound { folder: String, uid: u32 },

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The store answered a command with NO or BAD.
    #[error("store refused command: {0}")]
    Protocol(String),
}

/// Failures composing or delivering an outbound message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("could not compose message: {0}")]
    Compose(String),

    #[error("relay rejected credentials: {0}")]
    Authentication(String),

    #[error("delivery failed: {0}")]
    Transport(String),
}

/// A single item in a fetch batch that could not be turned into a
/// message. Recovered by the fetcher and never returned from
/// [`MailEngine`](crate::MailEngine) calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("skipped item {}: {reason}", uid.map_or_else(|| "?".to_string(), |u| u.to_string()))]
pub struct PartialItemError {
    pub uid: Option<u32>,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, Error>;
