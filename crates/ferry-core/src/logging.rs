//! Logging init: file under the XDG state dir, stderr when that fails.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

enum LogSink {
    File(fs::File),
    Stderr,
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(f) => f.write(buf),
            LogSink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(f) => f.flush(),
            LogSink::Stderr => io::stderr().lock().flush(),
        }
    }
}

/// Hands out a writer per log line: the shared file when one was opened,
/// stderr otherwise (including when the file handle cannot be cloned).
struct SinkMaker(Option<fs::File>);

impl<'a> MakeWriter<'a> for SinkMaker {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        match &self.0 {
            Some(f) => f.try_clone().map(LogSink::File).unwrap_or(LogSink::Stderr),
            None => LogSink::Stderr,
        }
    }
}

/// Path of the log file: `~/.local/state/ferry/ferry.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
    Ok(xdg_dirs.get_state_home().join("ferry").join("ferry.log"))
}

fn open_log_file() -> Result<fs::File> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(fs::OpenOptions::new().create(true).append(true).open(&path)?)
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ferry=debug"))
}

/// Initialize tracing. Prefers the log file under the XDG state dir; when the
/// file cannot be opened (unwritable dir, missing HOME) the subscriber falls
/// back to stderr rather than erroring, so the CLI always has logging.
pub fn init_logging() {
    let file = match open_log_file() {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("ferry: logging to stderr, log file unavailable: {e:#}");
            None
        }
    };
    let to_file = file.is_some();

    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(BoxMakeWriter::new(SinkMaker(file)))
        .with_ansi(false)
        .init();

    if to_file {
        if let Ok(path) = log_file_path() {
            tracing::info!("ferry logging initialized at {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_is_under_ferry_state_dir() {
        let path = log_file_path().unwrap();
        assert!(path.ends_with("ferry/ferry.log"), "{}", path.display());
    }

    #[test]
    fn missing_file_falls_back_to_stderr() {
        let maker = SinkMaker(None);
        assert!(matches!(maker.make_writer(), LogSink::Stderr));
    }

    #[test]
    fn default_filter_builds() {
        // The fallback directive string must always parse.
        let _ = default_filter();
    }
}
