//! CLI for the ferry transfer coordinator.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ferry_core::config;
use ferry_core::store::SqliteStore;

use commands::{run_add, run_cancel, run_coordinator, run_pause, run_resume, run_status};

/// Top-level CLI for the ferry transfer coordinator.
#[derive(Debug, Parser)]
#[command(name = "ferry")]
#[command(about = "ferry: coordinator for resumable network transfers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Register a new transfer.
    Add {
        /// Direct HTTP/HTTPS URL to fetch.
        url: String,
        /// Destination file name (derived from the URL when omitted).
        #[arg(long)]
        name: Option<String>,
        /// Admission priority; higher runs earlier.
        #[arg(long, default_value = "0")]
        priority: i32,
        /// Extra request header as "Name: value". Repeatable.
        #[arg(long = "header", value_name = "HEADER")]
        headers: Vec<String>,
    },

    /// Run the coordinator until no task is pending or active.
    Run {
        /// Run up to N transfers concurrently (overrides the config value).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show the status of all tasks.
    Status,

    /// Pause a task by its ID.
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Put a paused or failed task back in the queue.
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Cancel a task and delete its partial data.
    Cancel {
        /// Task identifier.
        id: i64,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = SqliteStore::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                name,
                priority,
                headers,
            } => run_add(&store, &cfg, &url, name, priority, &headers).await?,
            CliCommand::Run { jobs } => run_coordinator(store, cfg, jobs).await?,
            CliCommand::Status => run_status(&store).await?,
            CliCommand::Pause { id } => run_pause(&store, id).await?,
            CliCommand::Resume { id } => run_resume(&store, id).await?,
            CliCommand::Cancel { id } => run_cancel(&store, id).await?,
        }

        Ok(())
    }
}
