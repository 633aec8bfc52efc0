//! Error types for the message model and the protocol contract.
//!
//! The taxonomy mirrors how the main loop reacts to a failure:
//!
//! | Variant | Reaction |
//! |---------|----------|
//! | [`ProtocolError::ConnectFailure`] | back off, then retry |
//! | [`ProtocolError::AuthFailure`] | disable the protocol, never retry |
//! | [`ProtocolError::PingTimeout`] | disconnect, back off, reconnect |
//! | [`ProtocolError::ServerShutdown`] | disconnect, back off, reconnect |
//! | anything else | logged at the call site |

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Model errors
// ============================================================================

/// Errors raised while constructing model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A message type tag outside the closed set.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    /// A presence status outside the closed set.
    #[error("unknown status: {0}")]
    UnknownStatus(String),

    /// A message's text may only be assigned once.
    #[error("message text has already been set")]
    TextAlreadySet,

    /// A group message was built without its originating room.
    #[error("group message requires an originating room")]
    MissingRoom,

    /// Two halves of a value belong to different protocols.
    #[error("protocol mismatch: expected '{expected}', got '{got}'")]
    ProtocolMismatch {
        /// Protocol the value was expected to belong to.
        expected: String,
        /// Protocol it actually belongs to.
        got: String,
    },
}

// ============================================================================
// Protocol errors
// ============================================================================

/// Errors reported by protocol adapters.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The server could not be reached. Transient.
    #[error("connection failed: {0}")]
    ConnectFailure(String),

    /// The server rejected our credentials. Permanent for the current config.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The connection stopped answering within the allotted time.
    #[error("ping timeout after {0:?}")]
    PingTimeout(Duration),

    /// The server closed the session.
    #[error("server shut down: {0}")]
    ServerShutdown(String),

    /// An operation that needs a live session was attempted without one.
    #[error("not connected")]
    NotConnected,

    /// The adapter does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl ProtocolError {
    /// Creates an [`Other`](Self::Other) error from any displayable value.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error means the session is gone and must be re-established.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure(_) | Self::PingTimeout(_) | Self::ServerShutdown(_) | Self::NotConnected
        )
    }

    /// Whether reconnecting may succeed without a configuration change.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::AuthFailure(_))
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_is_not_retried() {
        assert!(!ProtocolError::AuthFailure("bad password".into()).should_retry());
        assert!(ProtocolError::ConnectFailure("refused".into()).should_retry());
        assert!(ProtocolError::PingTimeout(Duration::from_secs(5)).should_retry());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(ProtocolError::ServerShutdown("bye".into()).is_disconnect());
        assert!(ProtocolError::PingTimeout(Duration::from_secs(1)).is_disconnect());
        assert!(!ProtocolError::AuthFailure("nope".into()).is_disconnect());
        assert!(!ProtocolError::Unsupported("join_room").is_disconnect());
    }
}
