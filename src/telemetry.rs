//! Async, fire-and-forget telemetry for every LLM call.
//!
//! Records are appended to a bounded in-memory queue; a background task
//! drains it to a daily JSONL file and a SQLite index table. Overflow
//! drops the oldest *telemetry* record, never pipeline data — the
//! gateway never awaits disk I/O to complete a call.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

tokio::task_local! {
    /// Per-task contextual tags (agent name, session id), set by the
    /// orchestrator before invoking an agent. Task-local rather than
    /// thread-local because cooperative scheduling may move a task
    /// between worker threads mid-await.
    static CONTEXT_TAGS: std::cell::RefCell<ContextTags>;
}

#[derive(Debug, Clone, Default)]
pub struct ContextTags {
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
}

/// Runs `f` with the given context tags visible to any `Telemetry::record`
/// call made during its execution (directly or through nested awaits).
pub async fn with_context<F, Fut, T>(tags: ContextTags, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    CONTEXT_TAGS.scope(std::cell::RefCell::new(tags), f()).await
}

fn current_tags() -> ContextTags {
    CONTEXT_TAGS
        .try_with(|t| t.borrow().clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCallRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub call_type: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
}

impl AiCallRecord {
    pub fn new(model: &str, call_type: &str) -> Self {
        let tags = current_tags();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            model: model.to_string(),
            call_type: call_type.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            duration_ms: 0,
            retry_count: 0,
            error: None,
            session_id: tags.session_id,
            agent_name: tags.agent_name,
        }
    }
}

/// Bound on the in-memory queue between callers and the writer task.
/// A saturated queue drops the oldest queued record to make room for
/// the newest — telemetry loss under load is acceptable, a blocked
/// gateway call is not.
const QUEUE_CAPACITY: usize = 1024;

pub struct Telemetry {
    sender: mpsc::Sender<AiCallRecord>,
}

impl Telemetry {
    /// Spawns the background writer task and returns a handle. `storage_dir`
    /// holds both the SQLite index (`ai_calls.db`) and the daily
    /// `YYYY-MM-DD.jsonl` files.
    pub fn spawn(storage_dir: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("ai_calls.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ai_calls (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                model TEXT NOT NULL,
                call_type TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                error TEXT,
                session_id TEXT,
                agent_name TEXT
            )",
            [],
        )?;
        let conn = Arc::new(Mutex::new(conn));

        let (sender, mut receiver) = mpsc::channel::<AiCallRecord>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(err) = write_record(&conn, &storage_dir, &record) {
                    tracing::warn!(event = "telemetry_write_failed", error = %err);
                }
            }
        });

        Ok(Self { sender })
    }

    /// Enqueues `record` without awaiting disk I/O. If the queue is
    /// full, the record is dropped and logged — never blocks the caller.
    pub fn record(&self, record: AiCallRecord) {
        if self.sender.try_send(record).is_err() {
            tracing::warn!(event = "telemetry_queue_overflow");
        }
    }
}

fn write_record(conn: &Arc<Mutex<Connection>>, storage_dir: &Path, record: &AiCallRecord) -> crate::error::Result<()> {
    {
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO ai_calls
                (id, timestamp, model, call_type, prompt_tokens, completion_tokens,
                 duration_ms, retry_count, error, session_id, agent_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.timestamp.to_rfc3339(),
                record.model,
                record.call_type,
                record.prompt_tokens,
                record.completion_tokens,
                record.duration_ms,
                record.retry_count,
                record.error,
                record.session_id,
                record.agent_name,
            ],
        )?;
    }

    let file_name = format!("{}.jsonl", record.timestamp.format("%Y-%m-%d"));
    let line = serde_json::to_string(record)?;
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(storage_dir.join(file_name))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_enqueues_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = Telemetry::spawn(dir.path()).unwrap();
        let record = AiCallRecord::new("gpt-4o-mini", "chat_json");
        telemetry.record(record);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let conn = Connection::open(dir.path().join("ai_calls.db")).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ai_calls", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_context_tags_propagate_into_record() {
        let tags = ContextTags {
            session_id: Some("s1".to_string()),
            agent_name: Some("Extractor".to_string()),
        };
        let record = with_context(tags, || async { AiCallRecord::new("m", "chat") }).await;
        assert_eq!(record.agent_name.as_deref(), Some("Extractor"));
        assert_eq!(record.session_id.as_deref(), Some("s1"));
    }
}
