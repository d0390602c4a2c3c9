//! Append-only log writer.
//!
//! A [`TxnLog`] is the single shared append target for one node (or for the
//! driver). Appends are serialized by an async mutex so records never
//! interleave, and rotation happens inside the same critical section.

use crate::record::LogRecord;
use crate::rotation::{self, RotationPolicy};
use cascade_core::NodeId;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Opening, writing or rotating the file failed
    #[error("log I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

struct ActiveFile {
    file: File,
    len: u64,
}

/// Shared append-only transaction log
pub struct TxnLog {
    path: PathBuf,
    policy: RotationPolicy,
    active: Mutex<Option<ActiveFile>>,
}

impl TxnLog {
    /// Open (or create) the log at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created
    pub async fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LogError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let active = open_active(&path).await?;
        Ok(Self {
            path,
            policy,
            active: Mutex::new(Some(active)),
        })
    }

    /// Open the per-node log `<dir>/<node>_log.csv`
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created
    pub async fn for_node(
        dir: impl AsRef<Path>,
        node: &NodeId,
        policy: RotationPolicy,
    ) -> Result<Self, LogError> {
        Self::open(dir.as_ref().join(format!("{}_log.csv", node)), policy).await
    }

    /// Path of the active file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, rotating first if it would push the file past the limit
    ///
    /// # Errors
    ///
    /// Returns error if writing or rotating fails
    pub async fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let line = record.to_csv_line();
        let mut guard = self.active.lock().await;

        let rollover = guard
            .as_ref()
            .is_some_and(|a| self.policy.should_rotate(a.len, line.len() as u64));
        if rollover {
            if let Some(mut old) = guard.take() {
                old.file.flush().await.map_err(|source| self.io(source))?;
                rotation::rotate(&self.path, self.policy.max_backups)
                    .await
                    .map_err(|source| self.io(source))?;
                tracing::debug!(path = %self.path.display(), bytes = old.len, "rotated transaction log");
            }
        }

        let current = match guard.take() {
            Some(active) => active,
            None => open_active(&self.path).await?,
        };
        let active = guard.insert(current);
        let written = async {
            active.file.write_all(line.as_bytes()).await?;
            active.file.flush().await
        }
        .await;
        if let Err(source) = written {
            // Drop the handle so the next append reopens a fresh one.
            *guard = None;
            return Err(self.io(source));
        }
        active.len += line.len() as u64;
        Ok(())
    }

    /// Append, reporting failures through tracing instead of returning them
    pub async fn append_best_effort(&self, record: &LogRecord) {
        if let Err(err) = self.append(record).await {
            tracing::warn!(tid = %record.tid, error = %err, "failed to append log record");
        }
    }

    fn io(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

async fn open_active(path: &Path) -> Result<ActiveFile, LogError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let len = file
        .metadata()
        .await
        .map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    Ok(ActiveFile { file, len })
}
