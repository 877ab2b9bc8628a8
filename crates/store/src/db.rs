use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beacon_core::error::{BeaconError, Result};
use beacon_core::time::from_unix_micros;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::Serialize;

use crate::schema::SCHEMA_SQL;

/// Durable FIFO queue of encoded spans.
///
/// Every operation takes the single connection lock, so writers are
/// serialized and a reader never observes a half-applied transaction.
#[derive(Clone)]
pub struct SpanStore {
    inner: Arc<Mutex<StoreInner>>,
    db_path: Option<PathBuf>,
}

pub(crate) struct StoreInner {
    pub(crate) conn: Connection,
    /// Newest `inserted_at` handed out; insert timestamps never go backwards.
    pub(crate) last_inserted_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreStatus {
    pub db_path: String,
    pub pending_spans: usize,
    pub size_bytes: u64,
    pub file_size_bytes: u64,
    pub oldest_inserted_at: Option<DateTime<Utc>>,
    pub newest_inserted_at: Option<DateTime<Utc>>,
}

impl SpanStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BeaconError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| BeaconError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=1;")
            .map_err(|e| BeaconError::Store(format!("failed to set pragmas: {e}")))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BeaconError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| BeaconError::Store(format!("failed to initialize schema: {e}")))?;
        let last_inserted_at = conn
            .query_row(
                "SELECT COALESCE(MAX(inserted_at), 0) FROM pending_spans",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| BeaconError::Store(format!("failed to read newest row: {e}")))?;

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                conn,
                last_inserted_at,
            })),
            db_path,
        })
    }

    /// Lock poisoning is ignored: uncommitted work rolls back with the
    /// transaction that was open when the holder panicked.
    pub(crate) fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Bytes used by the database file and its WAL, 0 when in memory.
    pub fn file_size_bytes(&self) -> u64 {
        let Some(path) = &self.db_path else {
            return 0;
        };
        let main = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let wal = fs::metadata(wal_path(path)).map(|m| m.len()).unwrap_or(0);
        main + wal
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let pending_spans = self.count()?;
        let size_bytes = self.size_bytes()?;
        let (oldest, newest) = {
            let inner = self.inner();
            inner
                .conn
                .query_row(
                    "SELECT MIN(inserted_at), MAX(inserted_at) FROM pending_spans",
                    [],
                    |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
                )
                .map_err(|e| BeaconError::Store(format!("status query failed: {e}")))?
        };

        Ok(StoreStatus {
            db_path: self
                .db_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            pending_spans,
            size_bytes,
            file_size_bytes: self.file_size_bytes(),
            oldest_inserted_at: oldest.and_then(from_unix_micros),
            newest_inserted_at: newest.and_then(from_unix_micros),
        })
    }

    /// Runs raw SQL on the store's connection, outside the queue API.
    #[cfg(any(test, feature = "test-util"))]
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.inner()
            .conn
            .execute_batch(sql)
            .map_err(|e| BeaconError::Store(format!("raw sql failed: {e}")))
    }

    /// Removes the database file and its WAL, discarding all unsent spans.
    /// Every handle to the file must be dropped first.
    pub fn delete_database(path: &Path) -> Result<bool> {
        let mut removed = false;
        for candidate in [path.to_path_buf(), wal_path(path)] {
            match fs::remove_file(&candidate) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BeaconError::Io(format!(
                        "failed to delete {}: {e}",
                        candidate.display()
                    )));
                }
            }
        }
        Ok(removed)
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".wal");
    PathBuf::from(raw)
}
