//! Resumable single-stream HTTP(S) driver built on curl Easy.
//!
//! Appends the response body to `<dest>.part`, resuming with a Range request
//! from the token's offset (validated with If-Range when an ETag is known).
//! On completion the partial file is synced and atomically renamed to the
//! final destination. The abort token is polled from the progress callback;
//! an aborted run yields `TransferOutcome::Paused` with a fresh token.

use std::fs::File;
use std::io::Write;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ErrorClass, TaskError};
use crate::task::ResumeToken;

use super::{part_path, AbortToken, ProgressUpdate, TransferDriver, TransferOutcome};

/// Contents of this driver's resume token. Opaque to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CurlToken {
    offset: u64,
    etag: Option<String>,
}

impl CurlToken {
    fn decode(token: &ResumeToken) -> Self {
        serde_json::from_slice(token.as_bytes()).unwrap_or_default()
    }

    fn encode(&self) -> ResumeToken {
        ResumeToken::from_bytes(serde_json::to_vec(self).unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct CurlDriver;

impl CurlDriver {
    pub fn new() -> Self {
        CurlDriver
    }
}

#[async_trait]
impl TransferDriver for CurlDriver {
    async fn run(
        &self,
        req: super::TransferRequest,
        progress: mpsc::Sender<ProgressUpdate>,
        abort: AbortToken,
    ) -> Result<TransferOutcome, TaskError> {
        let result = tokio::task::spawn_blocking(move || perform(req, progress, abort)).await;
        match result {
            Ok(r) => r,
            Err(e) => Err(TaskError::new(
                ErrorClass::Unknown,
                format!("transfer task join: {e}"),
            )),
        }
    }
}

fn perform(
    req: super::TransferRequest,
    progress: mpsc::Sender<ProgressUpdate>,
    abort: AbortToken,
) -> Result<TransferOutcome, TaskError> {
    let part = part_path(&req.dest_path);

    // Resume offset: whatever the token claims, capped by what is actually
    // on disk.
    let token = req
        .resume_token
        .as_ref()
        .map(CurlToken::decode)
        .unwrap_or_default();
    let on_disk = std::fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
    let offset = token.offset.min(on_disk);

    let file = open_part(&part, offset)
        .map_err(|e| TaskError::new(ErrorClass::FileSystem, e.to_string()))?;
    let file = Arc::new(file);

    let mut easy = curl::easy::Easy::new();
    easy.url(&req.url)
        .map_err(|e| TaskError::new(ErrorClass::InvalidInput, e.to_string()))?;
    configure_easy(&mut easy, req.timeout, offset)
        .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;

    let mut list = curl::easy::List::new();
    for (k, v) in &req.headers {
        let _ = list.append(&format!("{}: {}", k.trim(), v.trim()));
    }
    if offset > 0 {
        if let Some(etag) = &token.etag {
            let _ = list.append(&format!("If-Range: {etag}"));
        }
    }
    easy.http_headers(list)
        .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;

    let response_etag: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let storage_err: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let done_bytes = Arc::new(AtomicU64::new(offset));

    {
        let file_cb = Arc::clone(&file);
        let etag_cb = Arc::clone(&response_etag);
        let storage_cb = Arc::clone(&storage_err);
        let done_cb = Arc::clone(&done_bytes);
        let abort_cb = abort.clone();
        let progress_tx = progress.clone();

        let mut transfer = easy.transfer();
        transfer
            .header_function(move |line| {
                if let Ok(line) = str::from_utf8(line) {
                    if let Some(v) = line.strip_prefix("ETag:").or_else(|| line.strip_prefix("etag:")) {
                        *etag_cb.lock().unwrap() = Some(v.trim().to_string());
                    }
                }
                true
            })
            .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;
        transfer
            .write_function(move |data| {
                match (&*file_cb).write_all(data) {
                    Ok(()) => {
                        done_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                        Ok(data.len())
                    }
                    Err(e) => {
                        tracing::warn!("partial file write failed: {}", e);
                        *storage_cb.lock().unwrap() = Some(e);
                        Ok(0) // abort transfer
                    }
                }
            })
            .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;
        transfer
            .progress_function(move |dltotal, dlnow, _, _| {
                if abort_cb.is_set() {
                    return false;
                }
                let update = ProgressUpdate {
                    bytes_done: offset + dlnow as u64,
                    bytes_total: if dltotal > 0.0 {
                        offset + dltotal as u64
                    } else {
                        0
                    },
                };
                // Dropped sends are fine; the engine throttles emissions anyway.
                let _ = progress_tx.try_send(update);
                true
            })
            .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;

        let perform_result = transfer.perform();

        if let Err(e) = perform_result {
            if let Some(io_err) = storage_err.lock().unwrap().take() {
                return Err(TaskError::new(ErrorClass::FileSystem, io_err.to_string()));
            }
            if e.is_aborted_by_callback() && abort.is_set() {
                let new_offset = std::fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
                let new_token = CurlToken {
                    offset: new_offset,
                    etag: response_etag.lock().unwrap().clone().or(token.etag),
                };
                return Ok(TransferOutcome::Paused(Some(new_token.encode())));
            }
            return Err(TaskError::new(classify_curl_error(&e), e.to_string()));
        }
    }

    let code = easy
        .response_code()
        .map_err(|e| TaskError::new(classify_curl_error(&e), e.to_string()))?;
    if !(200..300).contains(&code) {
        return Err(TaskError::new(
            classify_http_status(code),
            format!("GET {} returned HTTP {}", req.url, code),
        ));
    }
    if code == 200 && offset > 0 {
        // Server ignored the range request (validator mismatch or no range
        // support): appended bytes are unusable. Discard the partial file so
        // the next attempt starts clean.
        let _ = std::fs::remove_file(&part);
        return Err(TaskError::new(
            ErrorClass::Unknown,
            "resume rejected by server; partial data discarded, resume to restart",
        ));
    }

    file.sync_all()
        .map_err(|e| TaskError::new(ErrorClass::FileSystem, e.to_string()))?;
    let total = done_bytes.load(Ordering::Relaxed);
    std::fs::rename(&part, &req.dest_path)
        .map_err(|e| TaskError::new(ErrorClass::FileSystem, e.to_string()))?;

    let _ = progress.try_send(ProgressUpdate {
        bytes_done: total,
        bytes_total: total,
    });
    Ok(TransferOutcome::Completed)
}

/// Apply transfer options to the handle. Stalls are caught by the low-speed
/// cutoff; an overall time cap is set only when the caller configured one,
/// so long transfers without a budget are never cut short.
fn configure_easy(
    easy: &mut curl::easy::Easy,
    timeout: Option<Duration>,
    offset: u64,
) -> Result<(), curl::Error> {
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    if let Some(timeout) = timeout {
        easy.timeout(timeout)?;
    }
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.progress(true)?;
    if offset > 0 {
        easy.resume_from(offset)?;
    }
    Ok(())
}

/// Open the partial file: truncate on a fresh start, append when resuming.
fn open_part(part: &std::path::Path, offset: u64) -> std::io::Result<File> {
    if offset > 0 {
        let f = File::options().append(true).open(part)?;
        // Drop any trailing bytes past the validated offset.
        f.set_len(offset)?;
        Ok(f)
    } else {
        File::options().write(true).create(true).truncate(true).open(part)
    }
}

/// Classify a curl error for the task error taxonomy.
fn classify_curl_error(e: &curl::Error) -> ErrorClass {
    if e.is_operation_timedout() {
        return ErrorClass::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorClass::Network;
    }
    ErrorClass::Unknown
}

/// Classify an HTTP status code for the task error taxonomy.
fn classify_http_status(code: u32) -> ErrorClass {
    match code {
        408 => ErrorClass::Timeout,
        429 | 500..=599 => ErrorClass::Network,
        _ => ErrorClass::Unknown,
    }
}
