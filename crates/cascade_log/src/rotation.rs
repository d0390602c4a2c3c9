//! Size-based rename rotation.
//!
//! `log.csv` rolls to `log.csv.1`, `log.csv.1` to `log.csv.2`, and so on up
//! to `max_backups`; the oldest generation is discarded.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Rotate when the active file would grow past this many bytes (0 = never)
    pub max_bytes: u64,
    /// Number of prior generations to keep
    pub max_backups: usize,
}

impl RotationPolicy {
    /// Create a new policy
    #[must_use]
    pub const fn new(max_bytes: u64, max_backups: usize) -> Self {
        Self {
            max_bytes,
            max_backups,
        }
    }

    /// Never rotate
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_bytes: 0,
            max_backups: 0,
        }
    }

    /// Whether writing `incoming` bytes onto a file of `current` bytes needs a rollover
    #[must_use]
    pub const fn should_rotate(&self, current: u64, incoming: u64) -> bool {
        self.max_bytes > 0 && current > 0 && current + incoming > self.max_bytes
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024, // 10 MB
            max_backups: 5,
        }
    }
}

/// Path of backup generation `n` (1 = newest)
#[must_use]
pub fn backup_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}

/// Shift every generation up by one and move the active file to `.1`
///
/// With `max_backups == 0` the active file is simply removed.
///
/// # Errors
///
/// Returns error if a rename or removal fails for a reason other than the
/// source not existing
pub async fn rotate(path: &Path, max_backups: usize) -> io::Result<()> {
    if max_backups == 0 {
        return ignore_missing(tokio::fs::remove_file(path).await);
    }

    ignore_missing(tokio::fs::remove_file(backup_path(path, max_backups)).await)?;
    for generation in (1..max_backups).rev() {
        ignore_missing(
            tokio::fs::rename(
                backup_path(path, generation),
                backup_path(path, generation + 1),
            )
            .await,
        )?;
    }
    ignore_missing(tokio::fs::rename(path, backup_path(path, 1)).await)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
