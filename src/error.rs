//! Engine-level error taxonomy.
//!
//! Splits failures by propagation policy:
//! - `EngineError`: surfaced synchronously to command-surface callers
//!   (validation, illegal state transitions, missing wallet, bad config).
//! - `VenueError` (in `execution::traits`): submission/confirmation
//!   failures, classified retryable vs. terminal.
//! - Evaluation failures are contained per element and never become an
//!   `EngineError`; risk rejections are policy outcomes, not faults.

use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionStatus;
use crate::strategy::ValidationReport;

/// Errors surfaced to callers of the session command surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The bound strategy failed graph validation; a session may not start.
    #[error("strategy validation failed: {0}")]
    InvalidStrategy(ValidationReport),

    /// A command that is illegal for the session's current status.
    #[error("command '{command}' is not allowed while session is {status}")]
    StateTransition {
        status: SessionStatus,
        command: &'static str,
    },

    /// Real-mode sessions must have a wallet bound before start.
    #[error("real-mode execution requires a bound wallet")]
    WalletRequired,

    /// Configuration rejected by validation.
    #[error("invalid execution config: {0}")]
    InvalidConfig(String),

    /// No session registered under this id.
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    /// A scheduling loop already owns this session id.
    #[error("session {0} is already owned by a running controller")]
    SessionBusy(Uuid),

    /// Session must reach a terminal status before deletion.
    #[error("session {0} must be stopped before it can be deleted")]
    SessionStillActive(Uuid),

    /// The controller task is gone; the command could not be delivered.
    #[error("session {0} controller is no longer running")]
    ControllerGone(Uuid),

    /// A trade record was mutated after reaching a terminal status.
    #[error("trade {0} is already terminal and cannot transition")]
    TradeAlreadyTerminal(Uuid),

    /// Ledger or session-store failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Serialization failure while persisting or restoring state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for command-surface operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transition_message_names_command_and_status() {
        let err = EngineError::StateTransition {
            status: SessionStatus::Stopped,
            command: "pause",
        };
        let msg = err.to_string();
        assert!(msg.contains("pause"));
        assert!(msg.contains("stopped"));
    }
}
