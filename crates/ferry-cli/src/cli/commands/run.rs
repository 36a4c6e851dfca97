//! `ferry run` – host the coordinator until no task is pending or active.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ferry_core::config::FerryConfig;
use ferry_core::coordinator::{Coordinator, Event};
use ferry_core::net::TcpProbe;
use ferry_core::store::SqliteStore;
use ferry_core::task::TaskState;
use ferry_core::transfer::CurlDriver;
use tokio::sync::broadcast::error::RecvError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_coordinator(
    store: SqliteStore,
    mut cfg: FerryConfig,
    jobs: Option<usize>,
) -> Result<()> {
    if let Some(jobs) = jobs {
        cfg.max_concurrent = jobs;
    }
    if cfg.download_dir.is_none() {
        cfg.download_dir = Some(std::env::current_dir()?);
    }

    let probe = Arc::new(TcpProbe::new(&cfg.probe_addr, PROBE_TIMEOUT)?);
    let coord = Coordinator::start(cfg, Arc::new(store), Arc::new(CurlDriver::new()), probe).await?;
    let mut events = coord.subscribe();

    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(ev)) => print_event(&ev),
            Ok(Err(RecvError::Lagged(n))) => {
                tracing::debug!("event stream lagged by {n}");
                continue;
            }
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {} // idle; fall through to the exit check
        }
        let tasks = coord.list_tasks().await?;
        let runnable = tasks
            .iter()
            .any(|t| matches!(t.state, TaskState::Pending | TaskState::Active));
        if !runnable {
            break;
        }
    }

    let tasks = coord.list_tasks().await?;
    coord.shutdown().await?;

    let done = tasks
        .iter()
        .filter(|t| t.state == TaskState::Completed)
        .count();
    let failed = tasks
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .count();
    let paused = tasks
        .iter()
        .filter(|t| t.state == TaskState::Paused)
        .count();
    println!("Done: {done} completed, {failed} failed, {paused} paused.");
    Ok(())
}

fn print_event(ev: &Event) {
    match ev {
        Event::Progress {
            id,
            bytes_done,
            bytes_total,
            pct,
        } => {
            let done_mib = *bytes_done as f64 / 1_048_576.0;
            if *bytes_total > 0 {
                let total_mib = *bytes_total as f64 / 1_048_576.0;
                println!("  task {id}: {done_mib:.1} / {total_mib:.1} MiB ({pct}%)");
            } else {
                println!("  task {id}: {done_mib:.1} MiB");
            }
        }
        Event::StatusChanged { id, from, to } => {
            println!("task {id}: {from} -> {to}");
        }
        Event::Completed { id } => println!("task {id}: completed"),
        Event::Error { id, error } => println!("task {id}: failed ({error})"),
        Event::Cancelled { id } => println!("task {id}: cancelled"),
    }
}
