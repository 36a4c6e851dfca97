//! Error taxonomy for tasks and the public operation error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// High-level classification of a transfer failure.
///
/// Stored on the task while it is Failed and consulted by the
/// reconnect auto-retry sweep, which only re-enqueues network-class
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or unsupported input (bad URL scheme etc.).
    InvalidInput,
    /// Connectivity-level failure (connection reset, DNS, unreachable).
    Network,
    /// Not enough free disk space for the expected payload.
    InsufficientStorage,
    /// Local disk write/rename failure.
    FileSystem,
    /// The transfer exceeded its time budget.
    Timeout,
    /// Anything else.
    Unknown,
}

impl ErrorClass {
    /// Whether this failure is attributed to connectivity loss and is
    /// therefore eligible for auto-retry when the network comes back.
    pub fn is_network_class(self) -> bool {
        matches!(self, ErrorClass::Network | ErrorClass::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::InvalidInput => "invalid_input",
            ErrorClass::Network => "network",
            ErrorClass::InsufficientStorage => "insufficient_storage",
            ErrorClass::FileSystem => "file_system",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "invalid_input" => ErrorClass::InvalidInput,
            "network" => ErrorClass::Network,
            "insufficient_storage" => ErrorClass::InsufficientStorage,
            "file_system" => ErrorClass::FileSystem,
            "timeout" => ErrorClass::Timeout,
            _ => ErrorClass::Unknown,
        }
    }
}

/// Failure record kept on a task while it is in the Failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: ErrorClass,
    pub message: String,
    /// Unix seconds at which the failure was recorded.
    pub at: i64,
}

impl TaskError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        TaskError {
            class,
            message: message.into(),
            at: crate::task::unix_timestamp(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class.as_str(), self.message)
    }
}

/// Error returned by coordinator operations (submit/pause/resume/cancel).
///
/// Failures of an in-flight transfer never surface here; they are recorded
/// on the task and emitted as an `Event::Error`.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no such task: {0}")]
    NotFound(TaskId),

    #[error("task {id} is {state}: {op} not allowed")]
    InvalidState {
        id: TaskId,
        state: TaskState,
        op: &'static str,
    },

    #[error("network is offline")]
    Offline,

    #[error("coordinator is shut down")]
    Closed,
}
