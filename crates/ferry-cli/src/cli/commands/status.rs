//! `ferry status` – show the status of all tasks.

use anyhow::Result;
use ferry_core::store::SqliteStore;

use super::load_tasks;

pub async fn run_status(store: &SqliteStore) -> Result<()> {
    let tasks = load_tasks(store).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    println!(
        "{:<6} {:<10} {:<5} {:<12} {}",
        "ID", "STATE", "PCT", "SIZE", "URL"
    );
    for t in tasks {
        let size = if t.bytes_total > 0 {
            format!("{}", t.bytes_total)
        } else {
            "-".to_string()
        };
        println!(
            "{:<6} {:<10} {:<5} {:<12} {}",
            t.id,
            t.state.as_str(),
            format!("{}%", t.progress_pct),
            size,
            t.url
        );
        if let Some(err) = &t.last_error {
            println!("       last error: {err}");
        }
    }
    Ok(())
}
