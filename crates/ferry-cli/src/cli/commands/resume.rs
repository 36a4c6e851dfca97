//! `ferry resume <id>` – put a paused or failed task back in the queue.

use anyhow::Result;
use ferry_core::store::{SqliteStore, StateStore};
use ferry_core::task::TaskState;

use super::load_tasks;

pub async fn run_resume(store: &SqliteStore, id: i64) -> Result<()> {
    let mut tasks = load_tasks(store).await?;
    let task = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| anyhow::anyhow!("no such task: {id}"))?;
    match task.state {
        TaskState::Paused | TaskState::Failed => {
            task.state = TaskState::Pending;
            task.last_error = None;
            store.save_all(&tasks).await?;
            println!("Task {id} queued; start it with `ferry run`");
        }
        TaskState::Pending => println!("Task {id} is already queued"),
        state => anyhow::bail!("task {id} is {state}; resume not allowed"),
    }
    Ok(())
}
