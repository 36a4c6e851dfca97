//! SQLite-backed state store (sqlx).
//!
//! Persists the registry snapshot as one row per task plus a small metadata
//! table keyed by task id. The database file lives under the XDG state
//! directory: `~/.local/state/ferry/tasks.db`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use crate::error::{ErrorClass, TaskError};
use crate::task::{ResumeToken, Task, TaskId, TaskState};

use super::{StateStore, TaskMeta};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special
/// chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed task database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the default task database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ferry")?;
        let state_dir = xdg_dirs.get_state_home().join("ferry");
        let db_path = state_dir.join("tasks.db");

        tokio::fs::create_dir_all(&state_dir).await?;

        let uri = path_to_sqlite_uri(&db_path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;

        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open (or create) the database at a specific path. Creates parent dirs
    /// if needed. Intended for tests so the DB can live in a temp directory.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                dest_path TEXT NOT NULL,
                state TEXT NOT NULL,
                progress_pct INTEGER NOT NULL DEFAULT 0,
                bytes_done INTEGER NOT NULL DEFAULT 0,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                headers_json TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                error_class TEXT,
                error_message TEXT,
                error_at INTEGER,
                resume_token BLOB
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_meta (
                task_id INTEGER PRIMARY KEY,
                part_path TEXT NOT NULL,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let headers_json: Option<String> = row.get("headers_json");
        let headers: Vec<(String, String)> = headers_json
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        let error_class: Option<String> = row.get("error_class");
        let last_error = match error_class {
            Some(class) => {
                let message: Option<String> = row.get("error_message");
                let at: Option<i64> = row.get("error_at");
                Some(TaskError {
                    class: ErrorClass::from_str(&class),
                    message: message.unwrap_or_default(),
                    at: at.unwrap_or_default(),
                })
            }
            None => None,
        };

        let resume_token: Option<Vec<u8>> = row.get("resume_token");
        let state_str: String = row.get("state");
        let dest_path: String = row.get("dest_path");

        Ok(Task {
            id: row.get("id"),
            url: row.get("url"),
            file_name: row.get("file_name"),
            dest_path: PathBuf::from(dest_path),
            state: TaskState::from_str(&state_str),
            progress_pct: row.get::<i64, _>("progress_pct").clamp(0, 100) as u8,
            bytes_done: row.get::<i64, _>("bytes_done").max(0) as u64,
            bytes_total: row.get::<i64, _>("bytes_total").max(0) as u64,
            priority: row.get::<i64, _>("priority") as i32,
            retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
            headers,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            last_error,
            resume_token: resume_token.map(ResumeToken::from_bytes),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        // Schema creation is idempotent; the pool is already connected.
        self.migrate().await
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, file_name, dest_path, state, progress_pct,
                   bytes_done, bytes_total, priority, retry_count, headers_json,
                   created_at, started_at, completed_at,
                   error_class, error_message, error_at, resume_token
            FROM tasks
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_to_task(row)?);
        }
        Ok(out)
    }

    async fn save_all(&self, snapshot: &[Task]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tasks").execute(&mut *tx).await?;

        for task in snapshot {
            let headers_json = serde_json::to_string(&task.headers)?;
            let (error_class, error_message, error_at) = match &task.last_error {
                Some(e) => (
                    Some(e.class.as_str().to_string()),
                    Some(e.message.clone()),
                    Some(e.at),
                ),
                None => (None, None, None),
            };
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    id, url, file_name, dest_path, state, progress_pct,
                    bytes_done, bytes_total, priority, retry_count, headers_json,
                    created_at, started_at, completed_at,
                    error_class, error_message, error_at, resume_token
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                          ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                "#,
            )
            .bind(task.id)
            .bind(&task.url)
            .bind(&task.file_name)
            .bind(task.dest_path.to_string_lossy().into_owned())
            .bind(task.state.as_str())
            .bind(task.progress_pct as i64)
            .bind(task.bytes_done as i64)
            .bind(task.bytes_total as i64)
            .bind(task.priority as i64)
            .bind(task.retry_count as i64)
            .bind(headers_json)
            .bind(task.created_at)
            .bind(task.started_at)
            .bind(task.completed_at)
            .bind(error_class)
            .bind(error_message)
            .bind(error_at)
            .bind(task.resume_token.as_ref().map(|t| t.as_bytes().to_vec()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_meta(&self, id: TaskId, meta: &TaskMeta) -> Result<()> {
        let now = crate::task::unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO task_meta (task_id, part_path, bytes_total, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(task_id) DO UPDATE SET
                part_path = excluded.part_path,
                bytes_total = excluded.bytes_total,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(&meta.part_path)
        .bind(meta.bytes_total as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_meta(&self, id: TaskId) -> Result<Option<TaskMeta>> {
        let row = sqlx::query(
            r#"SELECT part_path, bytes_total FROM task_meta WHERE task_id = ?1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TaskMeta {
            part_path: row.get("part_path"),
            bytes_total: row.get::<i64, _>("bytes_total").max(0) as u64,
        }))
    }

    async fn delete_meta(&self, id: TaskId) -> Result<()> {
        sqlx::query(r#"DELETE FROM task_meta WHERE task_id = ?1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) async fn open_memory() -> Result<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = SqliteStore { pool };
    store.migrate().await?;
    Ok(store)
}
