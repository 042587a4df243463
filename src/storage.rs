//! Per-invocation job directories for scratch files and output archives.
//!
//! Every conversion gets its own UUID-named directory so concurrent
//! requests never share scratch filenames or archive paths. A periodic
//! sweep removes directories older than the configured TTL.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ConvertError, Result};

pub struct JobStore {
    root: PathBuf,
}

/// One job's directory: scratch space plus the final archive location.
pub struct JobDir {
    pub id: String,
    path: PathBuf,
}

impl JobDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.path.join("scratch")
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_job(&self) -> Result<JobDir> {
        let id = Uuid::new_v4().to_string();
        let path = self.root.join(&id);
        fs::create_dir_all(path.join("scratch"))?;
        debug!(job_id = %id, "created job directory");
        Ok(JobDir { id, path })
    }

    /// Resolves a download request to an on-disk file. Only UUID job names
    /// and bare filenames are accepted, so requests cannot escape the data
    /// directory.
    pub fn resolve_download(&self, job_id: &str, file_name: &str) -> Result<PathBuf> {
        if Uuid::parse_str(job_id).is_err() {
            return Err(ConvertError::NotFound(format!("unknown job: {job_id}")));
        }
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name == ".." {
            return Err(ConvertError::NotFound(format!(
                "no such file: {file_name}"
            )));
        }
        let path = self.root.join(job_id).join(file_name);
        if !path.is_file() {
            return Err(ConvertError::NotFound(format!(
                "no such file: {job_id}/{file_name}"
            )));
        }
        Ok(path)
    }

    /// Best-effort removal of a job directory, used for rollback.
    pub fn remove_job(&self, job_id: &str) {
        if let Err(e) = fs::remove_dir_all(self.root.join(job_id)) {
            warn!(job_id = %job_id, error = %e, "failed to remove job directory");
        }
    }

    /// Removes job directories whose last modification is older than the
    /// TTL. Returns how many were removed; individual failures are logged
    /// and skipped so one bad entry cannot stall the sweep.
    pub fn sweep_stale(&self, ttl: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "unreadable entry during sweep");
                    continue;
                }
            };
            let is_stale = entry
                .metadata()
                .ok()
                .filter(|m| m.is_dir())
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age >= ttl)
                .unwrap_or(false);
            if !is_stale {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to reap job directory"),
            }
        }
        Ok(removed)
    }
}
