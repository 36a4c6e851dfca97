//! Engine behavior tests against scripted collaborators: a mock transfer
//! driver, the in-memory store, and a switchable connectivity probe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use crate::config::FerryConfig;
use crate::error::{CoordinatorError, ErrorClass, TaskError};
use crate::net::NetworkProbe;
use crate::store::MemoryStore;
use crate::task::{ResumeToken, Task, TaskId, TaskState};
use crate::transfer::{
    AbortToken, ProgressUpdate, TransferDriver, TransferOutcome, TransferRequest,
};

use super::{Coordinator, Event, SubmitOptions};

/// Scripted behavior for one driver run, consumed in start order.
enum Behavior {
    /// Report progress, then finish successfully.
    Complete { bytes: u64 },
    /// Report progress, then wait for the notify (complete) or the abort
    /// token (pause without resume data), whichever comes first.
    Hold(Arc<Notify>),
    /// Report progress, then spin until aborted and pause with this token.
    UntilAbort { token: Vec<u8> },
    /// Fail immediately with this class.
    Fail(ErrorClass),
    /// Report progress, then fail with this class.
    ProgressThenFail { bytes: u64, class: ErrorClass },
    /// Report nothing; wait for the notify (complete) or the abort token
    /// (pause without resume data).
    Idle(Arc<Notify>),
}

#[derive(Default)]
struct MockDriver {
    script: Mutex<VecDeque<Behavior>>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl MockDriver {
    fn scripted(behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(MockDriver {
            script: Mutex::new(behaviors.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferDriver for MockDriver {
    async fn run(
        &self,
        req: TransferRequest,
        progress: tokio::sync::mpsc::Sender<ProgressUpdate>,
        abort: AbortToken,
    ) -> Result<TransferOutcome, TaskError> {
        self.requests.lock().unwrap().push(req);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Complete { bytes: 100 });

        match behavior {
            Behavior::Complete { bytes } => {
                let _ = progress
                    .send(ProgressUpdate {
                        bytes_done: bytes,
                        bytes_total: bytes,
                    })
                    .await;
                Ok(TransferOutcome::Completed)
            }
            Behavior::Hold(release) => {
                let _ = progress
                    .send(ProgressUpdate {
                        bytes_done: 10,
                        bytes_total: 100,
                    })
                    .await;
                loop {
                    if abort.is_set() {
                        return Ok(TransferOutcome::Paused(None));
                    }
                    tokio::select! {
                        _ = release.notified() => return Ok(TransferOutcome::Completed),
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                    }
                }
            }
            Behavior::UntilAbort { token } => {
                let _ = progress
                    .send(ProgressUpdate {
                        bytes_done: 50,
                        bytes_total: 200,
                    })
                    .await;
                while !abort.is_set() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(TransferOutcome::Paused(Some(ResumeToken::from_bytes(
                    token,
                ))))
            }
            Behavior::Fail(class) => Err(TaskError::new(class, "scripted failure")),
            Behavior::ProgressThenFail { bytes, class } => {
                let _ = progress
                    .send(ProgressUpdate {
                        bytes_done: bytes,
                        bytes_total: 200,
                    })
                    .await;
                Err(TaskError::new(class, "scripted failure"))
            }
            Behavior::Idle(release) => loop {
                if abort.is_set() {
                    return Ok(TransferOutcome::Paused(None));
                }
                tokio::select! {
                    _ = release.notified() => return Ok(TransferOutcome::Completed),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            },
        }
    }
}

struct SwitchProbe {
    online: AtomicBool,
}

impl SwitchProbe {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(SwitchProbe {
            online: AtomicBool::new(online),
        })
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

#[async_trait]
impl NetworkProbe for SwitchProbe {
    async fn check(&self) -> Result<bool> {
        Ok(self.online.load(Ordering::Relaxed))
    }
}

fn test_cfg(max_concurrent: usize) -> FerryConfig {
    FerryConfig {
        max_concurrent,
        progress_interval_ms: 10,
        net_poll_interval_secs: 1,
        ..FerryConfig::default()
    }
}

async fn wait_for(
    rx: &mut broadcast::Receiver<Event>,
    mut pred: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if pred(&ev) {
                        return ev;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn became(ev: &Event, id: TaskId, state: TaskState) -> bool {
    matches!(ev, Event::StatusChanged { id: i, to, .. } if *i == id && *to == state)
}

fn seeded_task(id: TaskId, state: TaskState) -> Task {
    let mut t = Task::new(
        id,
        format!("https://example.com/file-{id}.bin"),
        format!("file-{id}.bin"),
        std::env::temp_dir().join(format!("file-{id}.bin")),
        0,
        Vec::new(),
    );
    t.state = state;
    t
}

#[tokio::test]
async fn submit_runs_to_completion() {
    let store = Arc::new(MemoryStore::new());
    let driver = MockDriver::scripted(vec![Behavior::Complete { bytes: 2048 }]);
    let coord = Coordinator::start(test_cfg(3), store.clone(), driver, SwitchProbe::new(true))
        .await
        .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/big.iso", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| matches!(ev, Event::Completed { id: i } if *i == id)).await;

    let task = coord.get_task(id).await.unwrap().expect("task exists");
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress_pct, 100);
    assert_eq!(task.bytes_done, 2048);
    assert!(task.completed_at.is_some());
    assert!(task.resume_token.is_none());

    // Completion is durable and the partial-file record is gone.
    let persisted = store.snapshot();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].state, TaskState::Completed);
    assert_eq!(store.deleted_meta(), vec![id]);
}

#[tokio::test]
async fn higher_priority_admitted_first_under_cap() {
    let release = Arc::new(Notify::new());
    let driver = MockDriver::scripted(vec![Behavior::Hold(release.clone())]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let a = coord
        .submit("https://example.com/a", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, a, TaskState::Active)).await;

    let b = coord
        .submit("https://example.com/b", SubmitOptions::default())
        .await
        .unwrap();
    let c = coord
        .submit(
            "https://example.com/c",
            SubmitOptions {
                priority: 5,
                ..SubmitOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        coord.get_task(b).await.unwrap().unwrap().state,
        TaskState::Pending
    );

    release.notify_one();
    // The freed slot goes to the higher-priority latecomer.
    let first = wait_for(&mut events, |ev| {
        became(ev, b, TaskState::Active) || became(ev, c, TaskState::Active)
    })
    .await;
    assert!(became(&first, c, TaskState::Active));
    wait_for(&mut events, |ev| became(ev, b, TaskState::Active)).await;
}

#[tokio::test]
async fn pause_keeps_token_and_resume_hands_it_back() {
    let driver = MockDriver::scripted(vec![
        Behavior::UntilAbort {
            token: b"offset-state".to_vec(),
        },
        Behavior::Complete { bytes: 200 },
    ]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver.clone(),
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/resumable", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, id, TaskState::Active)).await;

    coord.pause(id).await.unwrap();
    let task = coord.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Paused);
    assert_eq!(
        task.resume_token,
        Some(ResumeToken::from_bytes(b"offset-state".to_vec()))
    );
    // Progress made before the pause is kept.
    assert_eq!(task.bytes_done, 50);

    coord.resume(id).await.unwrap();
    wait_for(&mut events, |ev| matches!(ev, Event::Completed { id: i } if *i == id)).await;

    let runs = driver.requests();
    assert_eq!(runs.len(), 2);
    assert!(runs[0].resume_token.is_none());
    assert_eq!(
        runs[1].resume_token,
        Some(ResumeToken::from_bytes(b"offset-state".to_vec()))
    );
}

#[tokio::test]
async fn pause_is_noop_for_non_active_tasks() {
    let release = Arc::new(Notify::new());
    let driver = MockDriver::scripted(vec![Behavior::Hold(release.clone())]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let a = coord
        .submit("https://example.com/a", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, a, TaskState::Active)).await;
    let b = coord
        .submit("https://example.com/b", SubmitOptions::default())
        .await
        .unwrap();

    coord.pause(b).await.unwrap();
    assert_eq!(
        coord.get_task(b).await.unwrap().unwrap().state,
        TaskState::Pending
    );
    assert!(matches!(
        coord.pause(999).await,
        Err(CoordinatorError::NotFound(999))
    ));
}

#[tokio::test]
async fn cancel_removes_task_and_purges_artifacts() {
    let release = Arc::new(Notify::new());
    let store = Arc::new(MemoryStore::new());
    let driver = MockDriver::scripted(vec![Behavior::Hold(release.clone())]);
    let coord = Coordinator::start(test_cfg(1), store.clone(), driver, SwitchProbe::new(true))
        .await
        .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/doomed.bin", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, id, TaskState::Active)).await;
    let dest = coord.get_task(id).await.unwrap().unwrap().dest_path;

    coord.cancel(id).await.unwrap();
    wait_for(&mut events, |ev| matches!(ev, Event::Cancelled { id: i } if *i == id)).await;

    assert!(coord.get_task(id).await.unwrap().is_none());
    assert!(store.snapshot().is_empty());

    let deleted = store.deleted_files();
    assert!(deleted.contains(&dest));
    let part = crate::transfer::part_path(&dest);
    assert!(deleted.contains(&part));
    assert_eq!(store.deleted_meta(), vec![id]);

    // A second cancel targets nothing.
    assert!(matches!(
        coord.cancel(id).await,
        Err(CoordinatorError::NotFound(_))
    ));

    // The in-flight transfer unwinds late; its completion must be ignored.
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coord.get_task(id).await.unwrap().is_none());
}

#[tokio::test]
async fn offline_transition_pauses_active_tasks() {
    let probe = SwitchProbe::new(true);
    let driver = MockDriver::scripted(vec![Behavior::UntilAbort {
        token: b"halfway".to_vec(),
    }]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        probe.clone(),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/wan.bin", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, id, TaskState::Active)).await;

    probe.set_online(false);
    wait_for(&mut events, |ev| became(ev, id, TaskState::Paused)).await;

    let task = coord.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Paused);
    assert!(task.resume_token.is_some());

    // Resuming while confirmed offline is refused.
    assert!(matches!(
        coord.resume(id).await,
        Err(CoordinatorError::Offline)
    ));
}

#[tokio::test]
async fn reconnect_retries_network_failures_only() {
    let probe = SwitchProbe::new(true);
    let driver = MockDriver::scripted(vec![
        Behavior::Fail(ErrorClass::Network),
        Behavior::Fail(ErrorClass::Unknown),
        Behavior::Complete { bytes: 100 },
    ]);
    let coord = Coordinator::start(
        test_cfg(2),
        Arc::new(MemoryStore::new()),
        driver,
        probe.clone(),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let a = coord
        .submit("https://example.com/flaky", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, a, TaskState::Failed)).await;
    let b = coord
        .submit("https://example.com/broken", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, b, TaskState::Failed)).await;

    probe.set_online(false);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    probe.set_online(true);

    wait_for(&mut events, |ev| matches!(ev, Event::Completed { id } if *id == a)).await;

    let a_task = coord.get_task(a).await.unwrap().unwrap();
    assert_eq!(a_task.state, TaskState::Completed);
    assert_eq!(a_task.retry_count, 1);

    // The non-network failure is left alone.
    let b_task = coord.get_task(b).await.unwrap().unwrap();
    assert_eq!(b_task.state, TaskState::Failed);
    assert_eq!(b_task.retry_count, 0);
    assert_eq!(
        b_task.last_error.as_ref().map(|e| e.class),
        Some(ErrorClass::Unknown)
    );
}

#[tokio::test]
async fn restart_without_token_resets_progress() {
    let release = Arc::new(Notify::new());
    let driver = MockDriver::scripted(vec![
        Behavior::ProgressThenFail {
            bytes: 60,
            class: ErrorClass::Network,
        },
        Behavior::Idle(release.clone()),
    ]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/restart", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, id, TaskState::Failed)).await;
    let failed = coord.get_task(id).await.unwrap().unwrap();
    assert_eq!(failed.bytes_done, 60);
    assert_eq!(failed.progress_pct, 30);
    assert!(failed.resume_token.is_none());

    // The retry has no resume data, so the stale high-water mark is dropped
    // before the driver starts over at byte zero.
    coord.resume(id).await.unwrap();
    wait_for(&mut events, |ev| became(ev, id, TaskState::Active)).await;
    let restarted = coord.get_task(id).await.unwrap().unwrap();
    assert_eq!(restarted.bytes_done, 0);
    assert_eq!(restarted.progress_pct, 0);

    release.notify_one();
    wait_for(&mut events, |ev| matches!(ev, Event::Completed { id: i } if *i == id)).await;
}

#[tokio::test]
async fn restore_resets_interrupted_tasks_to_paused() {
    let store = Arc::new(MemoryStore::with_tasks(vec![
        seeded_task(3, TaskState::Completed),
        seeded_task(7, TaskState::Active),
    ]));
    let driver = MockDriver::scripted(vec![]);
    let coord = Coordinator::start(test_cfg(2), store, driver, SwitchProbe::new(true))
        .await
        .unwrap();

    let t7 = coord.get_task(7).await.unwrap().unwrap();
    assert_eq!(t7.state, TaskState::Paused);
    let t3 = coord.get_task(3).await.unwrap().unwrap();
    assert_eq!(t3.state, TaskState::Completed);

    // Id allocation continues past the restored records.
    let id = coord
        .submit("https://example.com/new", SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(id, 8);
}

#[tokio::test]
async fn resume_rejects_pending_and_active_tasks() {
    let release = Arc::new(Notify::new());
    let driver = MockDriver::scripted(vec![Behavior::Hold(release.clone())]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let a = coord
        .submit("https://example.com/a", SubmitOptions::default())
        .await
        .unwrap();
    wait_for(&mut events, |ev| became(ev, a, TaskState::Active)).await;
    let b = coord
        .submit("https://example.com/b", SubmitOptions::default())
        .await
        .unwrap();

    assert!(matches!(
        coord.resume(a).await,
        Err(CoordinatorError::InvalidState {
            state: TaskState::Active,
            ..
        })
    ));
    assert!(matches!(
        coord.resume(b).await,
        Err(CoordinatorError::InvalidState {
            state: TaskState::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn submit_rejects_malformed_and_non_http_urls() {
    let driver = MockDriver::scripted(vec![]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();

    assert!(matches!(
        coord.submit("not a url", SubmitOptions::default()).await,
        Err(CoordinatorError::InvalidUrl { .. })
    ));
    assert!(matches!(
        coord
            .submit("ftp://example.com/file", SubmitOptions::default())
            .await,
        Err(CoordinatorError::InvalidUrl { .. })
    ));
    assert!(coord.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn resume_fails_task_when_disk_space_is_short() {
    // A restored task claiming an absurd remaining size trips the free-space
    // precheck before any transfer starts.
    let mut big = seeded_task(1, TaskState::Paused);
    big.bytes_total = u64::MAX;
    let store = Arc::new(MemoryStore::with_tasks(vec![big]));
    let driver = MockDriver::scripted(vec![]);
    let coord = Coordinator::start(test_cfg(1), store, driver.clone(), SwitchProbe::new(true))
        .await
        .unwrap();
    let mut events = coord.subscribe();

    coord.resume(1).await.unwrap();
    let ev = wait_for(&mut events, |ev| matches!(ev, Event::Error { id, .. } if *id == 1)).await;
    match ev {
        Event::Error { error, .. } => {
            assert_eq!(error.class, ErrorClass::InsufficientStorage)
        }
        _ => unreachable!(),
    }
    assert_eq!(
        coord.get_task(1).await.unwrap().unwrap().state,
        TaskState::Failed
    );
    // The driver was never invoked.
    assert!(driver.requests().is_empty());
}

#[tokio::test]
async fn progress_events_carry_running_totals() {
    let driver = MockDriver::scripted(vec![Behavior::Complete { bytes: 4096 }]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    let mut events = coord.subscribe();

    let id = coord
        .submit("https://example.com/file", SubmitOptions::default())
        .await
        .unwrap();
    let ev = wait_for(&mut events, |ev| matches!(ev, Event::Progress { id: i, .. } if *i == id))
        .await;
    match ev {
        Event::Progress {
            bytes_done,
            bytes_total,
            pct,
            ..
        } => {
            assert_eq!(bytes_done, 4096);
            assert_eq!(bytes_total, 4096);
            assert_eq!(pct, 100);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn shutdown_stops_accepting_commands() {
    let driver = MockDriver::scripted(vec![]);
    let coord = Coordinator::start(
        test_cfg(1),
        Arc::new(MemoryStore::new()),
        driver,
        SwitchProbe::new(true),
    )
    .await
    .unwrap();
    coord.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        coord.submit("https://example.com/x", SubmitOptions::default()).await,
        Err(CoordinatorError::Closed)
    ));
}
