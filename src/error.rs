//! Error types for the relay.
//!
//! Each variant maps to exactly one HTTP status so the request handler can
//! turn a failure into a response without inspecting error text.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur while accepting or serving a relay request
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Forbidden source IP")]
    Forbidden,

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to join multicast group {group}: {source}")]
    Join {
        group: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("stream read failed: {0}")]
    Read(io::Error),

    #[error("stream write failed: {0}")]
    Write(io::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    /// HTTP status code reported to the client for this error.
    pub fn status(&self) -> u16 {
        match self {
            RelayError::Forbidden => 403,
            RelayError::InvalidAddress { .. } | RelayError::Join { .. } => 503,
            RelayError::BadRequest(_) => 400,
            RelayError::Read(_)
            | RelayError::Write(_)
            | RelayError::Config(_)
            | RelayError::Io(_) => 500,
        }
    }

    pub(crate) fn join(group: SocketAddr, source: io::Error) -> Self {
        RelayError::Join { group, source }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::Forbidden.status(), 403);
        let invalid = RelayError::InvalidAddress {
            address: "not-an-address".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(invalid.status(), 503);
        let join = RelayError::join(
            "239.1.1.1:5000".parse().unwrap(),
            io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(join.status(), 503);
        assert_eq!(RelayError::BadRequest("x".into()).status(), 400);
    }

    #[test]
    fn test_forbidden_message() {
        assert_eq!(RelayError::Forbidden.to_string(), "Forbidden source IP");
    }
}
