//! `ferry cancel <id>` – drop a task and delete its partial data.

use anyhow::Result;
use ferry_core::store::{SqliteStore, StateStore};
use ferry_core::transfer::part_path;

use super::load_tasks;

pub async fn run_cancel(store: &SqliteStore, id: i64) -> Result<()> {
    let mut tasks = load_tasks(store).await?;
    let Some(pos) = tasks.iter().position(|t| t.id == id) else {
        anyhow::bail!("no such task: {id}");
    };
    let task = tasks.remove(pos);

    let part = part_path(&task.dest_path);
    for path in [task.dest_path.as_path(), part.as_path()] {
        if let Err(e) = store.delete_file(path).await {
            tracing::warn!("could not delete {}: {:#}", path.display(), e);
        }
    }
    store.delete_meta(id).await?;
    store.save_all(&tasks).await?;
    println!("Cancelled task {id}");
    Ok(())
}
