//! # Error Taxonomy
//!
//! Every failure that can end a benchmark session is expressed as a
//! `ControlError`. The variants map onto the failure classes both roles
//! have to reason about:
//!
//! - **Transport**: the control connection was refused, reset, or closed
//!   mid-session. Always fatal, never retried.
//! - **Protocol**: a message arrived that the state machine did not expect,
//!   or could not be decoded. Treated as desynchronization.
//! - **Spawn**: the server-under-test could not be launched or never became
//!   ready.
//! - **RemoteAbort**: the Controller gave up and told the Driver why.
//!
//! Benign races (signalling a server that already exited) are not errors
//! and never surface here.

use crate::protocol::ControlMessage;
use crate::sweep::SweepError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the control plane, the process supervisor, and the
/// two session loops.
#[derive(Debug, Error)]
pub enum ControlError {
    /// IO failure on the control connection
    #[error("control transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the control connection
    #[error("control connection closed by peer")]
    ConnectionClosed,

    /// Unexpected or malformed control message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server-under-test could not be started or never became ready
    #[error("failed to start server `{}`: {reason}", .executable.display())]
    Spawn { executable: PathBuf, reason: String },

    /// Supervisor misuse or signal delivery failure
    #[error("process supervision error: {0}")]
    Process(String),

    /// The Controller aborted the session
    #[error("controller aborted the session: {0}")]
    RemoteAbort(String),

    /// A client benchmark run failed and the failure policy is to abort
    #[error("client benchmark for test case {index} exited with {}", describe_exit(.exit_code))]
    ClientFailed { index: usize, exit_code: Option<i32> },

    /// The campaign produced an invalid test case
    #[error(transparent)]
    Sweep(#[from] SweepError),
}

impl ControlError {
    /// Build a protocol error for a message that arrived in the wrong place.
    pub fn unexpected(expected: &str, received: &ControlMessage) -> Self {
        ControlError::Protocol(format!("expected {}, received {}", expected, received))
    }

    /// Whether this error means the control connection itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ControlError::Transport(_) | ControlError::ConnectionClosed
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
