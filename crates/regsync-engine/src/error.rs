//! Engine error model.
//!
//! [`PollerError`] is the only error that escapes an endpoint loop.
//! [`CycleError`] abandons one poll cycle and sends the loop into recovery.

use regsync_state::StateError;
use regsync_types::error::{ConnectionError, LoadError};

/// Fatal endpoint error.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Initial connection exhausted its retry budget.
    #[error("failed to connect after {attempts} attempts: {last}")]
    ConnectExhausted {
        attempts: u32,
        last: ConnectionError,
    },

    #[error("cursor store error: {0}")]
    State(#[from] StateError),

    /// A blocking task panicked or was cancelled.
    #[error("{task} task panicked: {message}")]
    TaskPanicked { task: &'static str, message: String },
}

impl PollerError {
    pub(crate) fn panicked(task: &'static str, err: &tokio::task::JoinError) -> Self {
        Self::TaskPanicked {
            task,
            message: err.to_string(),
        }
    }
}

/// Reason a poll cycle was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Load(LoadError),

    #[error("cursor store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Poller(#[from] PollerError),
}

impl From<LoadError> for CycleError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Connection(conn) => Self::Connection(conn),
            other => Self::Load(other),
        }
    }
}
