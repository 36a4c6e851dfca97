//! `ferry pause <id>` – park a task so `ferry run` will not pick it up.

use anyhow::Result;
use ferry_core::store::{SqliteStore, StateStore};
use ferry_core::task::TaskState;

use super::load_tasks;

pub async fn run_pause(store: &SqliteStore, id: i64) -> Result<()> {
    let mut tasks = load_tasks(store).await?;
    let task = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| anyhow::anyhow!("no such task: {id}"))?;
    match task.state {
        TaskState::Pending | TaskState::Active | TaskState::Failed => {
            task.state = TaskState::Paused;
            store.save_all(&tasks).await?;
            println!("Paused task {id}");
        }
        TaskState::Paused => println!("Task {id} is already paused"),
        state => anyhow::bail!("task {id} is {state}; pause not allowed"),
    }
    Ok(())
}
