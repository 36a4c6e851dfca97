//! CLI command handlers. Each command is in its own file for clarity.

mod add;
mod cancel;
mod pause;
mod resume;
mod run;
mod status;

pub use add::run_add;
pub use cancel::run_cancel;
pub use pause::run_pause;
pub use resume::run_resume;
pub use run::run_coordinator;
pub use status::run_status;

use anyhow::{Context, Result};
use ferry_core::store::{SqliteStore, StateStore};
use ferry_core::task::Task;

/// Load the persisted snapshot, ensuring the store exists first.
pub(crate) async fn load_tasks(store: &SqliteStore) -> Result<Vec<Task>> {
    store.initialize().await?;
    store.load_all().await
}

/// Parse a repeatable `--header "Name: value"` argument.
pub(crate) fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not in \"Name: value\" form"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header {raw:?} has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
