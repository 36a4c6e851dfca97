//! In-memory state store for tests and ephemeral sessions.
//!
//! Records collaborator calls (file and metadata deletions) so tests can
//! assert the engine's persistence contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::task::{Task, TaskId};

use super::{StateStore, TaskMeta};

#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<Vec<Task>>,
    meta: Mutex<HashMap<TaskId, TaskMeta>>,
    deleted_files: Mutex<Vec<PathBuf>>,
    deleted_meta: Mutex<Vec<TaskId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with records, as if left over from a previous session.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::default();
        *store.tasks.lock().unwrap() = tasks;
        store
    }

    /// Every path the engine asked to delete, in call order.
    pub fn deleted_files(&self) -> Vec<PathBuf> {
        self.deleted_files.lock().unwrap().clone()
    }

    /// Every task id whose metadata the engine asked to delete, in call order.
    pub fn deleted_meta(&self) -> Vec<TaskId> {
        self.deleted_meta.lock().unwrap().clone()
    }

    /// The most recently saved snapshot.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn save_all(&self, snapshot: &[Task]) -> Result<()> {
        *self.tasks.lock().unwrap() = snapshot.to_vec();
        Ok(())
    }

    async fn save_meta(&self, id: TaskId, meta: &TaskMeta) -> Result<()> {
        self.meta.lock().unwrap().insert(id, meta.clone());
        Ok(())
    }

    async fn get_meta(&self, id: TaskId) -> Result<Option<TaskMeta>> {
        Ok(self.meta.lock().unwrap().get(&id).cloned())
    }

    async fn delete_meta(&self, id: TaskId) -> Result<()> {
        self.meta.lock().unwrap().remove(&id);
        self.deleted_meta.lock().unwrap().push(id);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<bool> {
        self.deleted_files.lock().unwrap().push(path.to_path_buf());
        Ok(true)
    }
}
