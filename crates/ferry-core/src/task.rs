//! Task model: the unit of work tracked by the coordinator.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Task identifier, allocated by the engine at creation and immutable.
pub type TaskId = i64;

/// Lifecycle state of a task. Completed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => TaskState::Pending,
            "active" => TaskState::Active,
            "paused" => TaskState::Paused,
            "completed" => TaskState::Completed,
            "cancelled" => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    /// No transitions exist out of a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque driver-specific data letting a paused transfer continue without
/// re-fetching bytes already received. The engine never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ResumeToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// One requested transfer and its lifecycle state.
///
/// Mutated only by the engine's orchestration loop; values handed to callers
/// are snapshots and must be treated as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Source URL; immutable after creation.
    pub url: String,
    /// Sanitized destination filename, derived at creation.
    pub file_name: String,
    /// Full destination path, derived at creation.
    pub dest_path: PathBuf,
    pub state: TaskState,
    /// Whole percent in 0..=100. Indeterminate while `bytes_total` is 0.
    pub progress_pct: u8,
    pub bytes_done: u64,
    /// 0 until the first progress callback reveals the size.
    pub bytes_total: u64,
    /// Admission priority requested at submit time.
    pub priority: i32,
    /// Number of automatic reconnect retries performed so far.
    pub retry_count: u32,
    /// Extra request headers passed through to the transfer driver.
    pub headers: Vec<(String, String)>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Present only while the task is Failed.
    pub last_error: Option<TaskError>,
    /// Present only while the task is Paused.
    pub resume_token: Option<ResumeToken>,
}

impl Task {
    pub fn new(
        id: TaskId,
        url: String,
        file_name: String,
        dest_path: PathBuf,
        priority: i32,
        headers: Vec<(String, String)>,
    ) -> Self {
        Task {
            id,
            url,
            file_name,
            dest_path,
            state: TaskState::Pending,
            progress_pct: 0,
            bytes_done: 0,
            bytes_total: 0,
            priority,
            retry_count: 0,
            headers,
            created_at: unix_timestamp(),
            started_at: None,
            completed_at: None,
            last_error: None,
            resume_token: None,
        }
    }
}

/// Whole-percent progress. When the total is still unknown (0) the fraction
/// is indeterminate and the prior value is kept rather than dividing by zero.
pub fn progress_pct(bytes_done: u64, bytes_total: u64, prior: u8) -> u8 {
    if bytes_total == 0 {
        return prior;
    }
    let pct = (bytes_done as f64 / bytes_total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Current time as Unix seconds (for task timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
