//! Transfer driver contract: the external resumable-download primitive.
//!
//! The engine never performs byte-level I/O itself; it hands a request to a
//! `TransferDriver` together with a progress channel and an abort token. A
//! conforming driver checks the token and, once it is set, unwinds promptly
//! with `TransferOutcome::Paused` carrying a resume token.

mod curl_driver;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TaskError;
use crate::task::ResumeToken;

pub use curl_driver::CurlDriver;

/// Shared flag the engine sets to request pause/cancel of a running transfer.
/// The driver polls it from its progress path.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a driver needs to (re)start one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    /// Final destination; drivers write to a partial file next to it.
    pub dest_path: PathBuf,
    /// Extra request headers, passed through unmodified.
    pub headers: Vec<(String, String)>,
    /// Overall time budget; enforcement belongs to the driver.
    pub timeout: Option<Duration>,
    /// Token from a previous pause of the same task, if any.
    pub resume_token: Option<ResumeToken>,
}

/// Structured progress record delivered over the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_done: u64,
    /// 0 while the total is unknown.
    pub bytes_total: u64,
}

/// How a transfer run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Unwound in response to the abort token; carries the data needed to
    /// continue later without re-fetching received bytes.
    Paused(Option<ResumeToken>),
}

/// The resumable byte-transfer primitive.
#[async_trait]
pub trait TransferDriver: Send + Sync {
    async fn run(
        &self,
        req: TransferRequest,
        progress: mpsc::Sender<ProgressUpdate>,
        abort: AbortToken,
    ) -> Result<TransferOutcome, TaskError>;
}

/// Path of the partial file for a destination: appends `.part`.
pub fn part_path(dest: &std::path::Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}
