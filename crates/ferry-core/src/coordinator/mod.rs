//! Public coordinator API.
//!
//! `Coordinator` is a cheap cloneable handle; all state lives in an engine
//! task spawned by [`Coordinator::start`]. Operations are commands over a
//! channel with oneshot replies, so callers get real results (not just
//! fire-and-forget) without sharing any locks with the engine.

mod engine;
mod events;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::FerryConfig;
use crate::error::CoordinatorError;
use crate::net::NetworkProbe;
use crate::store::StateStore;
use crate::task::{Task, TaskId};
use crate::transfer::TransferDriver;

pub use events::Event;

/// Optional knobs for a new task.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Destination file name; derived from the URL when absent.
    pub file_name: Option<String>,
    /// Higher runs earlier; equal priorities keep submission order.
    pub priority: i32,
    /// Extra request headers passed to the driver.
    pub headers: Vec<(String, String)>,
}

pub(crate) enum Command {
    Submit {
        url: String,
        opts: SubmitOptions,
        reply: oneshot::Sender<Result<TaskId, CoordinatorError>>,
    },
    Pause {
        id: TaskId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Resume {
        id: TaskId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Get {
        id: TaskId,
        reply: oneshot::Sender<Option<Task>>,
    },
    List {
        reply: oneshot::Sender<Vec<Task>>,
    },
    ListActive {
        reply: oneshot::Sender<Vec<Task>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct Coordinator {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl Coordinator {
    /// Restore persisted tasks and spawn the engine. Interrupted (Active)
    /// tasks come back Paused; Pending ones are re-enqueued immediately.
    pub async fn start(
        cfg: FerryConfig,
        store: Arc<dyn StateStore>,
        driver: Arc<dyn TransferDriver>,
        probe: Arc<dyn NetworkProbe>,
    ) -> anyhow::Result<Coordinator> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(256);
        let engine =
            engine::Engine::restore(cfg, store, driver, probe, cmd_rx, events.clone()).await?;
        tokio::spawn(engine.run());
        Ok(Coordinator { cmd_tx, events })
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Register a new transfer. Returns its id; the task starts as soon as a
    /// concurrency slot is free.
    pub async fn submit(
        &self,
        url: impl Into<String>,
        opts: SubmitOptions,
    ) -> Result<TaskId, CoordinatorError> {
        let url = url.into();
        self.call(|reply| Command::Submit { url, opts, reply }).await?
    }

    /// Ask an active task to stop and keep its resume data. Resolves once the
    /// transfer has actually unwound; a no-op for non-active tasks.
    pub async fn pause(&self, id: TaskId) -> Result<(), CoordinatorError> {
        self.call(|reply| Command::Pause { id, reply }).await?
    }

    /// Put a Paused or Failed task back in the queue. Fails with `Offline`
    /// when connectivity is confirmed down.
    pub async fn resume(&self, id: TaskId) -> Result<(), CoordinatorError> {
        self.call(|reply| Command::Resume { id, reply }).await?
    }

    /// Abort a task and delete its partial data. The id is forgotten.
    pub async fn cancel(&self, id: TaskId) -> Result<(), CoordinatorError> {
        self.call(|reply| Command::Cancel { id, reply }).await?
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, CoordinatorError> {
        self.call(|reply| Command::Get { id, reply }).await
    }

    /// All known tasks in creation order.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, CoordinatorError> {
        self.call(|reply| Command::List { reply }).await
    }

    pub async fn list_active(&self) -> Result<Vec<Task>, CoordinatorError> {
        self.call(|reply| Command::ListActive { reply }).await
    }

    /// Subscribe to lifecycle events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop the engine loop. In-flight transfers are detached, not awaited;
    /// they were persisted as Active and will restore as Paused.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
