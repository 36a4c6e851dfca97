//! Persistence gateway: save/load of the task registry and per-task metadata.
//!
//! The engine treats the store as fire-and-forget safe: a failed save is
//! logged and does not roll back the in-memory state change. Disk is a
//! restart-recovery aid, never the live source of truth.

mod mem;
mod sqlite;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId};

pub use mem::MemoryStore;
pub use sqlite::SqliteStore;

/// Auxiliary per-task metadata kept alongside the registry snapshot.
/// Written when a transfer starts, removed when the task completes or is
/// cancelled; lets offline tooling locate the partial file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Path of the in-progress partial file.
    pub part_path: String,
    /// Expected total size in bytes (0 if unknown).
    pub bytes_total: u64,
}

/// Key-value persistence contract for task records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Idempotent: ensure the storage location and schema exist.
    async fn initialize(&self) -> Result<()>;

    /// Load every persisted task record, oldest first.
    async fn load_all(&self) -> Result<Vec<Task>>;

    /// Overwrite the full registry snapshot. Called after every
    /// state-affecting event.
    async fn save_all(&self, snapshot: &[Task]) -> Result<()>;

    async fn save_meta(&self, id: TaskId, meta: &TaskMeta) -> Result<()>;
    async fn get_meta(&self, id: TaskId) -> Result<Option<TaskMeta>>;
    async fn delete_meta(&self, id: TaskId) -> Result<()>;

    /// Remove a file belonging to a task. Returns true if a file was deleted,
    /// false if none existed.
    async fn delete_file(&self, path: &Path) -> Result<bool>;
}
