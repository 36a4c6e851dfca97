//! The orchestration loop: single owner of the registry, queue, and tracker.
//!
//! All state mutation happens on this task. Driver completions, progress
//! callbacks, and trailing progress flushes arrive over an internal channel;
//! public operations arrive as commands with oneshot replies. The engine
//! never blocks on one task's transfer while others make progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::FerryConfig;
use crate::disk;
use crate::error::{CoordinatorError, ErrorClass, TaskError};
use crate::filename;
use crate::net::{NetTransition, NetworkProbe, NetworkTracker};
use crate::queue::AdmissionQueue;
use crate::store::{StateStore, TaskMeta};
use crate::task::{progress_pct, unix_timestamp, ResumeToken, Task, TaskId, TaskState};
use crate::transfer::{
    part_path, AbortToken, ProgressUpdate, TransferDriver, TransferOutcome, TransferRequest,
};

use super::events::{Event, GateDecision, ProgressGate};
use super::{Command, SubmitOptions};

/// Messages delivered back into the orchestration loop by spawned work.
#[derive(Debug)]
pub(super) enum EngineMsg {
    Progress {
        id: TaskId,
        update: ProgressUpdate,
    },
    Done {
        id: TaskId,
        result: Result<TransferOutcome, TaskError>,
    },
    /// Trailing progress-throttle timer fired.
    FlushProgress { id: TaskId },
}

type Reply = oneshot::Sender<Result<(), CoordinatorError>>;

pub(super) struct Engine {
    cfg: FerryConfig,
    store: Arc<dyn StateStore>,
    driver: Arc<dyn TransferDriver>,
    tracker: NetworkTracker,
    registry: HashMap<TaskId, Task>,
    queue: AdmissionQueue,
    /// Abort tokens for in-flight transfers, one per Active task.
    controls: HashMap<TaskId, AbortToken>,
    /// Progress rate limiters, one per Active task.
    gates: HashMap<TaskId, ProgressGate>,
    /// Pause requests waiting for the driver to unwind. `None` for pauses the
    /// engine initiated itself (offline sweep).
    pending_pause: HashMap<TaskId, Option<Reply>>,
    next_id: TaskId,
    cmd_rx: mpsc::Receiver<Command>,
    msg_tx: mpsc::Sender<EngineMsg>,
    msg_rx: mpsc::Receiver<EngineMsg>,
    events: broadcast::Sender<Event>,
}

impl Engine {
    /// Load persisted tasks and build the engine. Tasks persisted as Active
    /// are reset to Paused (no in-flight handle survives a restart); Pending
    /// tasks are re-enqueued in creation order.
    pub(super) async fn restore(
        cfg: FerryConfig,
        store: Arc<dyn StateStore>,
        driver: Arc<dyn TransferDriver>,
        probe: Arc<dyn NetworkProbe>,
        cmd_rx: mpsc::Receiver<Command>,
        events: broadcast::Sender<Event>,
    ) -> anyhow::Result<Engine> {
        store.initialize().await.context("initialize state store")?;
        let records = store.load_all().await.context("load persisted tasks")?;

        let mut registry = HashMap::with_capacity(records.len());
        let mut queue = AdmissionQueue::new(cfg.max_concurrent);
        let mut next_id: TaskId = 1;
        let mut reset = 0usize;
        for mut task in records {
            if task.state == TaskState::Active {
                task.state = TaskState::Paused;
                reset += 1;
            }
            next_id = next_id.max(task.id + 1);
            if task.state == TaskState::Pending {
                queue.enqueue(task.id, task.priority);
            }
            registry.insert(task.id, task);
        }
        if reset > 0 {
            tracing::info!("reset {} interrupted task(s) to paused after restart", reset);
        }

        let (msg_tx, msg_rx) = mpsc::channel(256);
        Ok(Engine {
            tracker: NetworkTracker::new(probe),
            cfg,
            store,
            driver,
            registry,
            queue,
            controls: HashMap::new(),
            gates: HashMap::new(),
            pending_pause: HashMap::new(),
            next_id,
            cmd_rx,
            msg_tx,
            msg_rx,
            events,
        })
    }

    pub(super) async fn run(mut self) {
        // Make restore-time resets durable, confirm connectivity eagerly,
        // then admit whatever fits.
        self.persist().await;
        if let Some(tr) = self.tracker.poll_once().await {
            self.on_net_transition(tr).await;
        }
        self.pump_queue().await;

        let mut poll = tokio::time::interval(self.cfg.net_poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.tick().await; // consume the immediate tick; we already polled

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown { reply }) => {
                            let _ = reply.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                Some(msg) = self.msg_rx.recv() => self.handle_msg(msg).await,
                _ = poll.tick() => {
                    if let Some(tr) = self.tracker.poll_once().await {
                        self.on_net_transition(tr).await;
                    }
                }
            }
        }
        tracing::info!("coordinator engine stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { url, opts, reply } => {
                let res = self.submit(url, opts).await;
                let _ = reply.send(res);
            }
            Command::Pause { id, reply } => self.pause(id, Some(reply)).await,
            Command::Resume { id, reply } => {
                let res = self.resume(id).await;
                let _ = reply.send(res);
            }
            Command::Cancel { id, reply } => {
                let res = self.cancel(id).await;
                let _ = reply.send(res);
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.registry.get(&id).cloned());
            }
            Command::List { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ListActive { reply } => {
                let mut active: Vec<Task> = self
                    .registry
                    .values()
                    .filter(|t| t.state == TaskState::Active)
                    .cloned()
                    .collect();
                active.sort_by_key(|t| (t.created_at, t.id));
                let _ = reply.send(active);
            }
            Command::Shutdown { reply } => {
                // Normally intercepted in the run loop.
                let _ = reply.send(());
            }
        }
    }

    async fn handle_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Progress { id, update } => self.on_progress(id, update).await,
            EngineMsg::Done { id, result } => self.on_done(id, result).await,
            EngineMsg::FlushProgress { id } => self.flush_progress(id),
        }
    }

    // ---- public operations ------------------------------------------------

    async fn submit(
        &mut self,
        url: String,
        opts: SubmitOptions,
    ) -> Result<TaskId, CoordinatorError> {
        let parsed = url::Url::parse(&url).map_err(|e| CoordinatorError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CoordinatorError::InvalidUrl {
                url,
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        let file_name = filename::derive_file_name(&url, opts.file_name.as_deref());
        let dir = self
            .cfg
            .download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let dest_path = dir.join(&file_name);

        let id = self.next_id;
        self.next_id += 1;
        let task = Task::new(id, url, file_name, dest_path, opts.priority, opts.headers);
        tracing::info!("task {} submitted: {}", id, task.url);
        self.registry.insert(id, task);
        self.persist().await;
        self.queue.enqueue(id, opts.priority);
        self.pump_queue().await;
        Ok(id)
    }

    /// Pause is a no-op unless the task is currently Active. The reply is
    /// deferred until the driver unwinds with its resume token.
    async fn pause(&mut self, id: TaskId, reply: Option<Reply>) {
        let Some(task) = self.registry.get(&id) else {
            if let Some(r) = reply {
                let _ = r.send(Err(CoordinatorError::NotFound(id)));
            }
            return;
        };
        if task.state != TaskState::Active {
            if let Some(r) = reply {
                let _ = r.send(Ok(()));
            }
            return;
        }
        if self.pending_pause.contains_key(&id) {
            // A pause is already in flight; this one has nothing more to do.
            if let Some(r) = reply {
                let _ = r.send(Ok(()));
            }
            return;
        }
        match self.controls.get(&id) {
            Some(token) => {
                token.set();
                self.pending_pause.insert(id, reply);
            }
            None => {
                tracing::warn!("task {} is active without a control token", id);
                self.park_paused(id, None).await;
                self.pump_queue().await;
                if let Some(r) = reply {
                    let _ = r.send(Ok(()));
                }
            }
        }
    }

    /// Resume a Paused or Failed task back to Pending. Requires connectivity;
    /// a task that is already Pending or Active is rejected so an id can
    /// never hold two queue entries.
    async fn resume(&mut self, id: TaskId) -> Result<(), CoordinatorError> {
        let task = self.registry.get(&id).ok_or(CoordinatorError::NotFound(id))?;
        match task.state {
            TaskState::Paused | TaskState::Failed => {}
            state => {
                return Err(CoordinatorError::InvalidState {
                    id,
                    state,
                    op: "resume",
                })
            }
        }
        if !self.tracker.is_online() {
            return Err(CoordinatorError::Offline);
        }

        let task = self.registry.get_mut(&id).expect("checked above");
        let from = task.state;
        task.state = TaskState::Pending;
        task.last_error = None;
        // Re-enqueued at default priority.
        self.queue.enqueue(id, 0);
        self.emit(Event::StatusChanged {
            id,
            from,
            to: TaskState::Pending,
        });
        self.persist().await;
        self.pump_queue().await;
        Ok(())
    }

    /// Cancel is effective as soon as issued: the task leaves scheduling and
    /// its artifacts are deleted even if stopping the in-flight transfer
    /// fails. The task is removed from the registry entirely.
    async fn cancel(&mut self, id: TaskId) -> Result<(), CoordinatorError> {
        let Some(task) = self.registry.get(&id) else {
            return Err(CoordinatorError::NotFound(id));
        };
        if task.state.is_terminal() {
            return Err(CoordinatorError::InvalidState {
                id,
                state: task.state,
                op: "cancel",
            });
        }

        if let Some(token) = self.controls.remove(&id) {
            token.set();
        }
        if let Some(reply) = self.pending_pause.remove(&id).flatten() {
            let _ = reply.send(Ok(()));
        }
        self.queue.remove(id);
        self.gates.remove(&id);

        let task = self.registry.remove(&id).expect("checked above");
        let part = part_path(&task.dest_path);
        for path in [task.dest_path.as_path(), part.as_path()] {
            if let Err(e) = self.store.delete_file(path).await {
                tracing::warn!(
                    "deleting {} for cancelled task {} failed: {:#}",
                    path.display(),
                    id,
                    e
                );
            }
        }
        if let Err(e) = self.store.delete_meta(id).await {
            tracing::warn!("deleting metadata for cancelled task {} failed: {:#}", id, e);
        }

        self.emit(Event::Cancelled { id });
        self.persist().await;
        self.pump_queue().await;
        tracing::info!("task {} cancelled", id);
        Ok(())
    }

    // ---- admission --------------------------------------------------------

    /// Admit as many Pending tasks as capacity allows, one at a time.
    /// Called after every event that frees a slot.
    async fn pump_queue(&mut self) {
        while let Some(id) = self.queue.dequeue_if_capacity() {
            self.start_task(id).await;
        }
    }

    async fn start_task(&mut self, id: TaskId) {
        let (remaining, dir) = match self.registry.get(&id) {
            // Without a resume token the next attempt re-fetches everything.
            Some(t) => (
                if t.resume_token.is_some() {
                    t.bytes_total.saturating_sub(t.bytes_done)
                } else {
                    t.bytes_total
                },
                t.dest_path
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".")),
            ),
            None => {
                self.queue.release(id);
                return;
            }
        };

        // Expected size known: require room for the rest plus the margin.
        // Unknown sizes are allowed through.
        let fits = disk::has_room_for(&dir, remaining).unwrap_or_else(|e| {
            tracing::warn!("free-space check failed for task {}: {:#}", id, e);
            true
        });
        if !fits {
            let err = TaskError::new(
                ErrorClass::InsufficientStorage,
                format!(
                    "{} more bytes (plus margin) needed in {}",
                    remaining,
                    dir.display()
                ),
            );
            self.fail_task(id, err).await;
            return;
        }

        let req;
        let from;
        let bytes_total;
        {
            let task = self.registry.get_mut(&id).expect("present above");
            from = task.state;
            task.state = TaskState::Active;
            if task.started_at.is_none() {
                task.started_at = Some(unix_timestamp());
            }
            let resume_token = task.resume_token.take();
            if resume_token.is_none() {
                // Fresh attempt: the driver starts over at byte zero, so the
                // old high-water mark must not suppress its progress reports.
                task.bytes_done = 0;
                task.progress_pct = 0;
            }
            bytes_total = task.bytes_total;
            req = TransferRequest {
                url: task.url.clone(),
                dest_path: task.dest_path.clone(),
                headers: task.headers.clone(),
                timeout: self.cfg.transfer_timeout(),
                resume_token,
            };
        }

        let token = AbortToken::new();
        self.controls.insert(id, token.clone());
        self.emit(Event::StatusChanged {
            id,
            from,
            to: TaskState::Active,
        });

        let meta = TaskMeta {
            part_path: part_path(&req.dest_path).to_string_lossy().into_owned(),
            bytes_total,
        };
        if let Err(e) = self.store.save_meta(id, &meta).await {
            tracing::warn!("saving metadata for task {} failed: {:#}", id, e);
        }
        self.persist().await;
        self.spawn_transfer(id, req, token);
        tracing::info!("task {} started", id);
    }

    fn spawn_transfer(&self, id: TaskId, req: TransferRequest, abort: AbortToken) {
        let driver = Arc::clone(&self.driver);
        let msg_tx = self.msg_tx.clone();
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressUpdate>(32);
        tokio::spawn(async move {
            let forward = {
                let msg_tx = msg_tx.clone();
                async move {
                    while let Some(update) = progress_rx.recv().await {
                        let _ = msg_tx.send(EngineMsg::Progress { id, update }).await;
                    }
                }
            };
            let (result, ()) = tokio::join!(driver.run(req, progress_tx, abort), forward);
            let _ = msg_tx.send(EngineMsg::Done { id, result }).await;
        });
    }

    // ---- driver feedback --------------------------------------------------

    async fn on_progress(&mut self, id: TaskId, update: ProgressUpdate) {
        let Some(task) = self.registry.get_mut(&id) else {
            return;
        };
        if task.state != TaskState::Active {
            // Stale callback from a transfer that already unwound.
            return;
        }
        if update.bytes_done > task.bytes_done {
            task.bytes_done = update.bytes_done;
        }
        let total_was_unknown = task.bytes_total == 0;
        if update.bytes_total > 0 {
            task.bytes_total = update.bytes_total;
        }
        task.progress_pct = progress_pct(task.bytes_done, task.bytes_total, task.progress_pct);

        let ev = Event::Progress {
            id,
            bytes_done: task.bytes_done,
            bytes_total: task.bytes_total,
            pct: task.progress_pct,
        };
        let new_total = task.bytes_total;
        let dest_path = task.dest_path.clone();

        if total_was_unknown && new_total > 0 {
            let meta = TaskMeta {
                part_path: part_path(&dest_path).to_string_lossy().into_owned(),
                bytes_total: new_total,
            };
            if let Err(e) = self.store.save_meta(id, &meta).await {
                tracing::warn!("saving metadata for task {} failed: {:#}", id, e);
            }
        }
        self.emit_progress(id, ev);
    }

    async fn on_done(&mut self, id: TaskId, result: Result<TransferOutcome, TaskError>) {
        self.controls.remove(&id);
        let pending = self.pending_pause.remove(&id);
        let pause_requested = pending.is_some();
        let reply = pending.flatten();

        if !self.registry.contains_key(&id) {
            // Cancelled while in flight; nothing left to record.
            if let Some(r) = reply {
                let _ = r.send(Ok(()));
            }
            return;
        }

        match result {
            Ok(TransferOutcome::Completed) => {
                // A completion can race a pause request; the transfer wins.
                self.complete_task(id).await;
                if let Some(r) = reply {
                    let _ = r.send(Ok(()));
                }
            }
            Ok(TransferOutcome::Paused(token)) => {
                self.park_paused(id, token).await;
                if let Some(r) = reply {
                    let _ = r.send(Ok(()));
                }
            }
            Err(err) => {
                if pause_requested {
                    // The primitive failed instead of pausing cleanly. Favor
                    // forward progress: park without resume data.
                    tracing::warn!("pause of task {} failed ({}); parked without resume data", id, err);
                    self.park_paused(id, None).await;
                    if let Some(r) = reply {
                        let _ = r.send(Ok(()));
                    }
                } else {
                    self.fail_task(id, err).await;
                }
            }
        }
        self.pump_queue().await;
    }

    fn flush_progress(&mut self, id: TaskId) {
        if let Some(gate) = self.gates.get_mut(&id) {
            if let Some(ev) = gate.flush(Instant::now()) {
                let _ = self.events.send(ev);
            }
        }
    }

    // ---- transitions ------------------------------------------------------

    async fn complete_task(&mut self, id: TaskId) {
        let Some(task) = self.registry.get_mut(&id) else {
            return;
        };
        let from = task.state;
        task.state = TaskState::Completed;
        task.progress_pct = 100;
        if task.bytes_total == 0 {
            task.bytes_total = task.bytes_done;
        }
        task.completed_at = Some(unix_timestamp());
        task.resume_token = None;
        task.last_error = None;

        self.queue.release(id);
        self.gates.remove(&id);
        if let Err(e) = self.store.delete_meta(id).await {
            tracing::warn!("deleting metadata for task {} failed: {:#}", id, e);
        }
        self.emit(Event::StatusChanged {
            id,
            from,
            to: TaskState::Completed,
        });
        self.emit(Event::Completed { id });
        self.persist().await;
        tracing::info!("task {} completed", id);
    }

    async fn park_paused(&mut self, id: TaskId, token: Option<ResumeToken>) {
        let Some(task) = self.registry.get_mut(&id) else {
            return;
        };
        let from = task.state;
        task.state = TaskState::Paused;
        task.resume_token = token;

        self.queue.release(id);
        self.gates.remove(&id);
        self.emit(Event::StatusChanged {
            id,
            from,
            to: TaskState::Paused,
        });
        self.persist().await;
        tracing::info!("task {} paused", id);
    }

    async fn fail_task(&mut self, id: TaskId, err: TaskError) {
        let Some(task) = self.registry.get_mut(&id) else {
            return;
        };
        let from = task.state;
        task.state = TaskState::Failed;
        task.last_error = Some(err.clone());
        task.resume_token = None;

        self.queue.release(id);
        self.gates.remove(&id);
        self.emit(Event::StatusChanged {
            id,
            from,
            to: TaskState::Failed,
        });
        self.emit(Event::Error { id, error: err.clone() });
        self.persist().await;
        tracing::warn!("task {} failed: {}", id, err);
    }

    // ---- network policy ---------------------------------------------------

    async fn on_net_transition(&mut self, tr: NetTransition) {
        if tr.went_offline() {
            let active: Vec<TaskId> = self
                .registry
                .values()
                .filter(|t| t.state == TaskState::Active)
                .map(|t| t.id)
                .collect();
            if !active.is_empty() {
                tracing::info!("network offline; pausing {} active task(s)", active.len());
            }
            for id in active {
                self.pause(id, None).await;
            }
        } else if tr.went_online() && self.cfg.auto_resume_on_reconnect {
            let retryable: Vec<TaskId> = self
                .registry
                .values()
                .filter(|t| t.state == TaskState::Failed)
                .filter(|t| {
                    t.last_error
                        .as_ref()
                        .is_some_and(|e| e.class.is_network_class())
                })
                .filter(|t| t.retry_count < self.cfg.max_retry_attempts)
                .map(|t| t.id)
                .collect();
            if retryable.is_empty() {
                return;
            }
            tracing::info!(
                "network online; re-enqueueing {} failed task(s)",
                retryable.len()
            );
            for &id in &retryable {
                let task = self.registry.get_mut(&id).expect("selected above");
                let from = task.state;
                task.state = TaskState::Pending;
                task.last_error = None;
                task.retry_count += 1;
                self.queue.enqueue(id, 0);
                self.emit(Event::StatusChanged {
                    id,
                    from,
                    to: TaskState::Pending,
                });
            }
            self.persist().await;
            self.pump_queue().await;
        }
    }

    // ---- plumbing ---------------------------------------------------------

    fn emit(&self, ev: Event) {
        // Send only fails with zero subscribers, which is fine.
        let _ = self.events.send(ev);
    }

    fn emit_progress(&mut self, id: TaskId, ev: Event) {
        let interval = self.cfg.progress_interval();
        let gate = self.gates.entry(id).or_default();
        match gate.offer(Instant::now(), interval, ev) {
            GateDecision::Emit(ev) => {
                let _ = self.events.send(ev);
            }
            GateDecision::Defer(deadline) => {
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                    let _ = msg_tx.send(EngineMsg::FlushProgress { id }).await;
                });
            }
            GateDecision::Coalesced => {}
        }
    }

    fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.registry.values().cloned().collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }

    /// Overwrite the persisted snapshot. Failures are logged, never
    /// escalated; the in-memory registry stays authoritative.
    async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save_all(&snapshot).await {
            tracing::warn!("persisting task registry failed: {:#}", e);
        }
    }
}
