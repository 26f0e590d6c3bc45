//! Crate level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Call Layer ([`RpcError`])
//!
//! Errors raised directly to the caller of the service API: state machine
//! violations, configuration problems, transport breakdowns and, for
//! coordinator-only calls, the per-member failure that hit the coordinator.
//!
//! ## Per-Member Layer ([`MemberFailure`])
//!
//! Failures captured in a single member's result slot during a broadcast
//! call. These travel over the wire, so they are serializable and carry the
//! failing member and command id as plain strings. A broadcast call never
//! raises a `MemberFailure` to the caller; one node's failure must not
//! abort collection of the other nodes' outcomes.
//!
//! ## Conversion
//!
//! `MemberFailure` converts into `RpcError` via `From`, which is how a
//! coordinator-only call raises the single slot failure as its own error.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::types::ServiceState;

pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors raised directly to callers of the service API.
#[derive(Debug, Clone, ThisError)]
pub enum RpcError {
    /// The service is not in the state required by the operation.
    #[error("cannot perform the operation, the current state of the service is {0}")]
    InvalidState(ServiceState),

    /// No coordinator is currently known.
    #[error("no coordinator is known for the cluster")]
    NoCoordinator,

    /// A command adapter could not be constructed from its inputs.
    #[error("invalid command adapter: {0}")]
    InvalidAdapter(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport could not deliver or collect messages.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call was cut short by a service shutdown.
    #[error("the call was interrupted, the service is shutting down")]
    Interrupted,

    /// The failure of the targeted member, raised as the call's own error.
    #[error(transparent)]
    Member(#[from] MemberFailure),
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

/// A failure captured in one member's result slot.
///
/// For `execute_on_all` each of these is recorded at the failing member's
/// position in the outcome list. For `execute_on_coordinator` the single
/// failure is converted to [`RpcError`] and raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum MemberFailure {
    /// The command id was not registered on the executing member.
    #[error("command {id} unknown, register the command first")]
    UnknownCommand { id: String },

    /// The command handler returned an error.
    #[error("command {id} failed on {member}: {message}")]
    Execution {
        id: String,
        member: String,
        message: String,
    },

    /// The command handler panicked.
    #[error("command {id} aborted on {member}: {message}")]
    Fatal {
        id: String,
        member: String,
        message: String,
    },

    /// No reply arrived within the requested bound.
    #[error("replication timeout for {member}")]
    Timeout { member: String },

    /// The member departed the view before or while awaiting its reply.
    #[error("no response from {member}, the member has probably left the cluster")]
    MemberLeft { member: String },
}

impl MemberFailure {
    /// True when the failure means the member is gone rather than slow.
    pub fn is_member_left(&self) -> bool {
        matches!(self, MemberFailure::MemberLeft { .. })
    }
}

/// Error returned by a command handler body.
///
/// This is the application-level failure of one command execution; the
/// engine wraps it into [`MemberFailure::Execution`] for the slot of the
/// member it occurred on.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        CommandError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        CommandError { message }
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        CommandError {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_failure_display() {
        let f = MemberFailure::Timeout {
            member: "node-1@127.0.0.1:7400".to_string(),
        };
        assert!(f.to_string().contains("timeout"));
        assert!(f.to_string().contains("node-1@127.0.0.1:7400"));
    }

    #[test]
    fn test_member_failure_roundtrip() {
        let f = MemberFailure::Execution {
            id: "cache.clear".to_string(),
            member: "a@127.0.0.1:1".to_string(),
            message: "boom".to_string(),
        };
        let bytes = bincode::serialize(&f).unwrap();
        let back: MemberFailure = bincode::deserialize(&bytes).unwrap();
        assert_eq!(f, back);
    }

    #[test]
    fn test_member_left_predicate() {
        let left = MemberFailure::MemberLeft {
            member: "x".to_string(),
        };
        assert!(left.is_member_left());
        let timeout = MemberFailure::Timeout {
            member: "x".to_string(),
        };
        assert!(!timeout.is_member_left());
    }

    #[test]
    fn test_rpc_error_from_member_failure() {
        let err: RpcError = MemberFailure::UnknownCommand {
            id: "missing".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            RpcError::Member(MemberFailure::UnknownCommand { .. })
        ));
    }
}
