//! `ferry add <url>` – register a new transfer.

use anyhow::Result;
use ferry_core::config::FerryConfig;
use ferry_core::filename;
use ferry_core::store::{SqliteStore, StateStore};
use ferry_core::task::Task;

use super::{load_tasks, parse_header};

pub async fn run_add(
    store: &SqliteStore,
    cfg: &FerryConfig,
    url: &str,
    name: Option<String>,
    priority: i32,
    headers: &[String],
) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("only http(s) URLs are supported: {url}");
    }
    let headers = headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Vec<_>>>()?;

    let mut tasks = load_tasks(store).await?;
    let id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;

    let file_name = filename::derive_file_name(url, name.as_deref());
    let dir = match &cfg.download_dir {
        Some(d) => d.clone(),
        None => std::env::current_dir()?,
    };
    let dest_path = dir.join(&file_name);

    tasks.push(Task::new(
        id,
        url.to_string(),
        file_name.clone(),
        dest_path,
        priority,
        headers,
    ));
    store.save_all(&tasks).await?;
    println!("Added task {id} ({file_name}) for URL: {url}");
    Ok(())
}
