//! SQLite-backed job gateway.
//!
//! Relational storage for job records, metadata, and exceptions. Every
//! mutating call runs inside a single transaction, so partial writes are
//! never observable. The single-active-job invariant is enforced by a
//! partial unique index over `(name, key, backend)` for non-terminal
//! statuses -- a concurrent duplicate submission loses the race at the
//! store and surfaces as `DuplicateKey`.
//!
//! Unlike the filesystem gateway, terminal records accumulate as history
//! rows; `fetch` returns the most recent match by `start_time`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::constants::end_time_sentinel;
use crate::domain::{ExceptionRecord, JobRecord};
use crate::error::{JobError, Result};
use crate::gateway::{JobGateway, StatusFilter};
use crate::types::{Backend, JobStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    key TEXT NOT NULL,
    backend TEXT NOT NULL,
    owner TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    result BLOB
);

CREATE UNIQUE INDEX IF NOT EXISTS jobs_active_identity
    ON jobs (name, key, backend)
    WHERE status IN ('Queued', 'Running');

CREATE TABLE IF NOT EXISTS job_metadata (
    job_id TEXT NOT NULL,
    meta_key TEXT NOT NULL,
    meta_value TEXT NOT NULL,
    UNIQUE (job_id, meta_key)
);

CREATE TABLE IF NOT EXISTS job_exceptions (
    job_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE VIEW IF NOT EXISTS job_overview AS
    SELECT id, name, key, backend, status, start_time,
           result IS NOT NULL AS has_result
    FROM jobs;
";

const SELECT_JOB_COLUMNS: &str =
    "SELECT job_id, name, key, backend, owner, status, start_time, end_time, result
     FROM jobs
     WHERE name = ?1 AND key = ?2 AND backend = ?3
     ORDER BY start_time DESC, id DESC";

/// Job gateway backed by SQLite.
///
/// The connection is shared behind a mutex; operations are short,
/// synchronous statements executed under the lock.
///
/// # Examples
///
/// ```
/// use mljobs::{Backend, JobGateway, JobRecord, SqliteGateway, StatusFilter};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let gateway = SqliteGateway::open_in_memory().unwrap();
/// gateway.initialize().await.unwrap();
///
/// let record = JobRecord::new("m", "k", Backend::Custom, "node-a");
/// gateway.create(&record).await.unwrap();
///
/// let fetched = gateway
///     .fetch("m", "k", Backend::Custom, StatusFilter::Any)
///     .await
///     .unwrap();
/// assert_eq!(fetched.unwrap().job_id, record.job_id);
/// # });
/// ```
#[derive(Clone)]
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGateway {
    /// Wraps an existing connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Connection::open(path)?))
    }

    /// Opens a private in-memory database. Used by tests and
    /// single-process deployments that do not need durability.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] when the connection cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Queryable derived flag: whether the most recent record for the
    /// identity has a persisted result. Absence reads as `false`.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] on store failures.
    pub async fn has_result(&self, name: &str, key: &str, backend: Backend) -> Result<bool> {
        let conn = self.conn.lock();
        let flag: Option<bool> = conn
            .query_row(
                "SELECT has_result FROM job_overview
                 WHERE name = ?1 AND key = ?2 AND backend = ?3
                 ORDER BY start_time DESC, id DESC
                 LIMIT 1",
                params![name, key, backend.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }
}

fn dt_to_ms(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(end_time_sentinel)
}

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {value}").into(),
    )
}

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let backend_raw: String = row.get(3)?;
    let status_raw: String = row.get(5)?;
    let backend = Backend::parse(&backend_raw).ok_or_else(|| invalid_text(3, &backend_raw))?;
    let status = JobStatus::parse(&status_raw).ok_or_else(|| invalid_text(5, &status_raw))?;

    Ok(JobRecord {
        job_id: row.get(0)?,
        name: row.get(1)?,
        key: row.get(2)?,
        backend,
        owner: row.get(4)?,
        status,
        start_time: ms_to_dt(row.get(6)?),
        end_time: ms_to_dt(row.get(7)?),
        result: row.get(8)?,
        metadata: BTreeMap::new(),
        exceptions: Vec::new(),
    })
}

fn fetch_latest(
    conn: &Connection,
    name: &str,
    key: &str,
    backend: Backend,
    filter: &StatusFilter,
) -> Result<Option<JobRecord>> {
    let mut stmt = conn.prepare(SELECT_JOB_COLUMNS)?;
    let rows = stmt.query_map(params![name, key, backend.as_str()], map_job_row)?;

    for row in rows {
        let mut record = row?;
        if filter.matches(record.status) {
            load_annotations(conn, &mut record)?;
            return Ok(Some(record));
        }
    }

    Ok(None)
}

fn load_annotations(conn: &Connection, record: &mut JobRecord) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT meta_key, meta_value FROM job_metadata WHERE job_id = ?1")?;
    let rows = stmt.query_map(params![record.job_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (k, v) = row?;
        record.metadata.insert(k, v);
    }

    let mut stmt = conn.prepare(
        "SELECT kind, message, recorded_at FROM job_exceptions
         WHERE job_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![record.job_id], |row| {
        Ok(ExceptionRecord {
            kind: row.get(0)?,
            message: row.get(1)?,
            recorded_at: ms_to_dt(row.get(2)?),
        })
    })?;
    for row in rows {
        record.exceptions.push(row?);
    }

    Ok(())
}

#[async_trait]
impl JobGateway for SqliteGateway {
    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn recover_orphans(&self, owner: &str) -> Result<usize> {
        let recovered = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let recovered = tx.execute(
                "UPDATE jobs SET status = 'Failed', end_time = ?1
                 WHERE status = 'Running' AND owner = ?2",
                params![dt_to_ms(&Utc::now()), owner],
            )?;
            tx.commit()?;
            recovered
        };

        if recovered > 0 {
            tracing::info!(
                recovered,
                owner,
                "encountered running jobs from a previous run, marking failed"
            );
        }

        Ok(recovered)
    }

    async fn create(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO jobs (job_id, name, key, backend, owner, status,
                               start_time, end_time, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.job_id,
                record.name,
                record.key,
                record.backend.as_str(),
                record.owner,
                record.status.as_str(),
                dt_to_ms(&record.start_time),
                dt_to_ms(&record.end_time),
                record.result,
            ],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                JobError::DuplicateKey {
                    name: record.name.clone(),
                    key: record.key.clone(),
                    backend: record.backend,
                }
            }
            other => other.into(),
        })?;

        for (meta_key, meta_value) in &record.metadata {
            tx.execute(
                "INSERT INTO job_metadata (job_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
                params![record.job_id, meta_key, meta_value],
            )?;
        }
        for exc in &record.exceptions {
            tx.execute(
                "INSERT INTO job_exceptions (job_id, kind, message, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.job_id, exc.kind, exc.message, dt_to_ms(&exc.recorded_at)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn fetch(
        &self,
        name: &str,
        key: &str,
        backend: Backend,
        filter: StatusFilter,
    ) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record = fetch_latest(&tx, name, key, backend, &filter)?;
        tx.commit()?;
        Ok(record)
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, end_time = ?2, result = ?3
             WHERE job_id = ?4",
            params![
                record.status.as_str(),
                dt_to_ms(&record.end_time),
                record.result,
                record.job_id,
            ],
        )?;
        if changed == 0 {
            return Err(JobError::NotFound {
                name: record.name.clone(),
                key: record.key.clone(),
                backend: record.backend,
            });
        }

        // Metadata rows are replaced wholesale in the same transaction;
        // exception rows are append-only, so only entries beyond the
        // stored count are inserted.
        tx.execute(
            "DELETE FROM job_metadata WHERE job_id = ?1",
            params![record.job_id],
        )?;
        for (meta_key, meta_value) in &record.metadata {
            tx.execute(
                "INSERT INTO job_metadata (job_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
                params![record.job_id, meta_key, meta_value],
            )?;
        }

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM job_exceptions WHERE job_id = ?1",
            params![record.job_id],
            |row| row.get(0),
        )?;
        for exc in record.exceptions.iter().skip(stored as usize) {
            tx.execute(
                "INSERT INTO job_exceptions (job_id, kind, message, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.job_id, exc.kind, exc.message, dt_to_ms(&exc.recorded_at)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, name: &str, key: &str, backend: Backend) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM job_metadata WHERE job_id IN
                (SELECT job_id FROM jobs WHERE name = ?1 AND key = ?2 AND backend = ?3)",
            params![name, key, backend.as_str()],
        )?;
        tx.execute(
            "DELETE FROM job_exceptions WHERE job_id IN
                (SELECT job_id FROM jobs WHERE name = ?1 AND key = ?2 AND backend = ?3)",
            params![name, key, backend.as_str()],
        )?;
        tx.execute(
            "DELETE FROM jobs WHERE name = ?1 AND key = ?2 AND backend = ?3",
            params![name, key, backend.as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }
}
