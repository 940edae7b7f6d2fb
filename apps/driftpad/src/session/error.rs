use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("host rejected the credential")]
    AuthenticationFailed,
    #[error("host protocol revision {version} is unsupported")]
    ServerOutOfDate {
        version: String,
        /// False on the legacy path where the host cannot be asked to
        /// self-update.
        supports_update: bool,
    },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("no live connection")]
    NotConnected,
}

impl SessionError {
    /// Transport failures may be retried; everything else is terminal for
    /// the connect attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}
