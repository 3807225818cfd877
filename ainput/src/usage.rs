//! Token-usage accounting.
//!
//! Records are appended to a SQLite table and read back newest-first. Writers
//! never wait on the database: [`UsageRecorder::record`] only enqueues, and a
//! background task performs the blocking insert.

use crate::error::UsageError;
use crate::types::{UsagePage, UsageRecord};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Approximate token count for calls whose vendor reported no usage:
/// `ceil(output_chars / 4) + ceil(prompt_chars / 4)`.
///
/// Counts Unicode scalar values, not bytes. This is an estimate only.
pub fn estimate_tokens(prompt: &str, output: &str) -> u64 {
    let quarter = |s: &str| (s.chars().count() as u64).div_ceil(4);
    quarter(output) + quarter(prompt)
}

/// Default database location (`~/.ainput/usage.db`).
pub fn default_usage_db_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".ainput").join("usage.db")
}

/// Append-only log of usage records.
pub trait UsageStore: Send + Sync {
    fn append(&self, record: &UsageRecord) -> Result<(), UsageError>;

    /// 1-indexed page, newest first. Past-the-end pages are empty.
    fn page(&self, page: u32, page_size: u32) -> Result<Vec<UsageRecord>, UsageError>;

    fn count(&self) -> Result<u64, UsageError>;
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub struct SqliteUsageStore {
    conn: Mutex<Connection>,
}

impl SqliteUsageStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, UsageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, UsageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, UsageError> {
        run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, UsageError>) -> Result<T, UsageError> {
        let conn = self.conn.lock().map_err(|_| UsageError::Poisoned)?;
        f(&conn)
    }
}

fn schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0)
}

fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;

    if schema_version(conn) < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS token_usage (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 date TEXT NOT NULL,
                 model TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 tokens INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_token_usage_date ON token_usage(date);",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![CURRENT_SCHEMA_VERSION, Utc::now().to_rfc3339()],
        )?;
    }
    Ok(())
}

impl UsageStore for SqliteUsageStore {
    fn append(&self, record: &UsageRecord) -> Result<(), UsageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO token_usage (date, model, kind, tokens) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.date.to_rfc3339(),
                    record.model_id,
                    record.kind,
                    i64::try_from(record.tokens).unwrap_or(i64::MAX),
                ],
            )?;
            Ok(())
        })
    }

    fn page(&self, page: u32, page_size: u32) -> Result<Vec<UsageRecord>, UsageError> {
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let offset = u64::from(page.max(1) - 1) * u64::from(page_size);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, model, kind, tokens FROM token_usage
                 ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![page_size, offset as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(date, model_id, kind, tokens)| {
                    let date = DateTime::parse_from_rfc3339(&date)
                        .map_err(|_| UsageError::InvalidDate(date.clone()))?
                        .with_timezone(&Utc);
                    Ok(UsageRecord {
                        date,
                        model_id,
                        kind,
                        tokens: tokens.max(0) as u64,
                    })
                })
                .collect()
        })
    }

    fn count(&self) -> Result<u64, UsageError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM token_usage", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

enum Command {
    Record(UsageRecord),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget front end to a [`UsageStore`].
///
/// Must be created inside a tokio runtime. Failed writes are logged and
/// dropped; nothing is reported back to whoever submitted the record.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::UnboundedSender<Command>,
    store: Arc<dyn UsageStore>,
}

impl UsageRecorder {
    pub fn spawn(store: Arc<dyn UsageStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let worker_store = store.clone();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Record(record) => {
                        let store = worker_store.clone();
                        let kind = record.kind.clone();
                        match tokio::task::spawn_blocking(move || store.append(&record)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!(kind = %kind, "failed to record usage: {e}"),
                            Err(e) => tracing::error!("usage write task failed: {e}"),
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("usage recorder stopped");
        });

        Self { tx, store }
    }

    /// Queue a record. Returns immediately.
    pub fn record(&self, record: UsageRecord) {
        if self.tx.send(Command::Record(record)).is_err() {
            tracing::warn!("usage recorder is not running; record dropped");
        }
    }

    /// Wait until every record queued before this call has been written (or failed).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Newest-first page plus the total record count.
    pub async fn page(&self, page: u32, page_size: u32) -> Result<UsagePage, UsageError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            Ok(UsagePage {
                items: store.page(page, page_size)?,
                total: store.count()?,
            })
        })
        .await
        .map_err(|_| UsageError::WorkerGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(i: u32) -> UsageRecord {
        UsageRecord {
            date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(i as i64),
            model_id: "gemini-2.5-flash".into(),
            kind: format!("kind-{i}"),
            tokens: u64::from(i),
        }
    }

    #[test]
    fn estimate_rounds_each_side_up() {
        assert_eq!(estimate_tokens("abcd", "abcdefgh"), 3);
        assert_eq!(estimate_tokens("", ""), 0);
        assert_eq!(estimate_tokens("a", "abcde"), 3);
        assert_eq!(estimate_tokens("", "héllo"), 2);
    }

    #[test]
    fn pages_are_newest_first_and_total_is_global() {
        let store = SqliteUsageStore::open_in_memory().unwrap();
        for i in 1..=25 {
            store.append(&record(i)).unwrap();
        }

        let first = store.page(1, 10).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].kind, "kind-25");
        assert_eq!(first[9].kind, "kind-16");

        assert_eq!(store.page(3, 10).unwrap().len(), 5);
        assert!(store.page(4, 10).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 25);
    }

    #[test]
    fn page_zero_and_empty_page_size() {
        let store = SqliteUsageStore::open_in_memory().unwrap();
        for i in 1..=3 {
            store.append(&record(i)).unwrap();
        }
        assert_eq!(store.page(0, 2).unwrap(), store.page(1, 2).unwrap());
        assert!(store.page(1, 0).unwrap().is_empty());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.db");
        {
            let store = SqliteUsageStore::open(&path).unwrap();
            store.append(&record(7)).unwrap();
        }
        let store = SqliteUsageStore::open(&path).unwrap();
        let items = store.page(1, 10).unwrap();
        assert_eq!(items, vec![record(7)]);
    }

    #[tokio::test]
    async fn recorder_writes_in_background() {
        let store = Arc::new(SqliteUsageStore::open_in_memory().unwrap());
        let recorder = UsageRecorder::spawn(store);
        for i in 1..=25 {
            recorder.record(record(i));
        }
        recorder.flush().await;

        let page = recorder.page(3, 10).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total, 25);
        assert_eq!(page.items[0].kind, "kind-5");

        let past_end = recorder.page(4, 10).await.unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 25);
    }

    struct BrokenStore;

    impl UsageStore for BrokenStore {
        fn append(&self, _: &UsageRecord) -> Result<(), UsageError> {
            Err(UsageError::Poisoned)
        }
        fn page(&self, _: u32, _: u32) -> Result<Vec<UsageRecord>, UsageError> {
            Err(UsageError::Poisoned)
        }
        fn count(&self) -> Result<u64, UsageError> {
            Err(UsageError::Poisoned)
        }
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let recorder = UsageRecorder::spawn(Arc::new(BrokenStore));
        recorder.record(record(1));
        recorder.flush().await;
        assert!(recorder.page(1, 10).await.is_err());
    }
}
