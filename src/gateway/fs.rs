//! Filesystem-backed job gateway.
//!
//! Stores one binary-encoded record file per `(name, key, backend)`
//! triple inside a configured directory. Because a triple maps to a
//! single file, "most recent record" is trivially the file's content and
//! a new submission for a finished identity overwrites its history.
//!
//! Delete scans with a glob so a stray file that also matches the
//! pattern surfaces as an ambiguity error instead of silently removing
//! the wrong record. An empty scan is reported as `NotFound` rather than
//! panicking on a missing match.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::constants::RECORD_FILE_EXT;
use crate::domain::JobRecord;
use crate::error::{JobError, Result};
use crate::gateway::{JobGateway, StatusFilter};
use crate::types::{Backend, JobStatus};

/// Job gateway that persists records as files.
///
/// # Examples
///
/// ```
/// use mljobs::{Backend, FileGateway, JobGateway, JobRecord, StatusFilter};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let gateway = FileGateway::new(dir.path());
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
#[derive(Debug)]
pub struct FileGateway {
    root: PathBuf,
}

impl FileGateway {
    /// Creates a gateway rooted at `root`. The directory is created by
    /// [`initialize`](JobGateway::initialize), not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the record files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(name: &str, key: &str, backend: Backend) -> String {
        format!("{name}-{key}-{backend}.{RECORD_FILE_EXT}")
    }

    fn record_path(&self, name: &str, key: &str, backend: Backend) -> PathBuf {
        self.root.join(Self::file_name(name, key, backend))
    }

    fn read_record(path: &Path) -> Result<JobRecord> {
        let bytes = fs::read(path)?;
        let (record, _) =
            bincode::serde::decode_from_slice::<JobRecord, _>(&bytes, bincode::config::standard())
                .map_err(|e| {
                    JobError::Storage(format!("corrupt record file {}: {e}", path.display()))
                })?;
        Ok(record)
    }

    fn write_record(&self, record: &JobRecord) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| JobError::Storage(format!("failed to encode record: {e}")))?;
        let path = self.record_path(&record.name, &record.key, record.backend);
        fs::write(path, bytes)?;
        Ok(())
    }

    /// All record files currently in the root directory.
    fn scan(&self) -> Result<Vec<PathBuf>> {
        let pattern = self
            .root
            .join(format!("*.{RECORD_FILE_EXT}"))
            .to_string_lossy()
            .into_owned();
        collect_glob(&pattern)
    }
}

fn collect_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| JobError::Storage(format!("bad glob pattern {pattern}: {e}")))?;
    let mut out = Vec::new();
    for entry in paths {
        out.push(entry.map_err(|e| JobError::Storage(e.to_string()))?);
    }
    Ok(out)
}

#[async_trait]
impl JobGateway for FileGateway {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    async fn recover_orphans(&self, owner: &str) -> Result<usize> {
        let mut recovered = 0;
        for path in self.scan()? {
            let mut record = Self::read_record(&path)?;
            if record.owner != owner || record.status != JobStatus::Running {
                continue;
            }
            record.fail()?;
            self.write_record(&record)?;
            recovered += 1;
        }

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
        let path = self.record_path(&record.name, &record.key, record.backend);
        if path.exists() {
            let existing = Self::read_record(&path)?;
            if !existing.is_terminal() {
                return Err(JobError::DuplicateKey {
                    name: record.name.clone(),
                    key: record.key.clone(),
                    backend: record.backend,
                });
            }
            // A finished identity is fair game for resubmission; the
            // single file per triple means the old record is replaced.
        }
        self.write_record(record)
    }

    async fn fetch(
        &self,
        name: &str,
        key: &str,
        backend: Backend,
        filter: StatusFilter,
    ) -> Result<Option<JobRecord>> {
        let path = self.record_path(name, key, backend);
        if !path.exists() {
            return Ok(None);
        }
        let record = Self::read_record(&path)?;
        if filter.matches(record.status) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let path = self.record_path(&record.name, &record.key, record.backend);
        if !path.exists() {
            return Err(JobError::NotFound {
                name: record.name.clone(),
                key: record.key.clone(),
                backend: record.backend,
            });
        }
        self.write_record(record)
    }

    async fn delete(&self, name: &str, key: &str, backend: Backend) -> Result<()> {
        let pattern = self
            .root
            .join(format!("*{}", Self::file_name(name, key, backend)))
            .to_string_lossy()
            .into_owned();
        let matches = collect_glob(&pattern)?;

        match matches.len() {
            0 => Err(JobError::NotFound {
                name: name.to_string(),
                key: key.to_string(),
                backend,
            }),
            1 => {
                fs::remove_file(&matches[0])?;
                Ok(())
            }
            count => Err(JobError::MultipleMatches {
                name: name.to_string(),
                key: key.to_string(),
                backend,
                count,
            }),
        }
    }
}
