use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;

use crate::error::{RestoreError, Result};

/// Directory (inside the work dir) that holds completion markers.
pub const MARKER_DIRNAME: &str = ".markers";

const MARKER_EXT: &str = "done";
const LOCK_EXT: &str = "lock";

/// Set of archive identities that have been fully materialized.
///
/// Backed by one empty `<identity>.done` file per archive. Only the presence
/// of a marker matters, never its content.
#[derive(Debug)]
pub struct MarkerStore {
    dir: PathBuf,
    completed: BTreeSet<String>,
}

impl MarkerStore {
    /// Open (creating if needed) the marker directory and load every
    /// completed identity found in it.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut completed = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXT) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                completed.insert(id.to_string());
            }
        }
        log::debug!("Loaded {} completion marker(s) from {}", completed.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            completed,
        })
    }

    /// Whether `identity` is complete, consulting the disk as well as the
    /// in-memory set so markers written by a concurrent run are honoured.
    pub fn is_complete(&self, identity: &str) -> bool {
        self.completed.contains(identity) || self.marker_path(identity).exists()
    }

    /// Persist the marker for `identity` (temp file + rename).
    pub fn mark_complete(&mut self, identity: &str) -> Result<()> {
        let path = self.marker_path(identity);
        let temp_path = self.dir.join(format!("{}.tmp", identity));
        File::create(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, &path)?;
        self.completed.insert(identity.to_string());
        Ok(())
    }

    /// Take an exclusive advisory lock for `identity`. Released on drop.
    pub fn lock(&self, identity: &str) -> Result<ArchiveLock> {
        let path = self.dir.join(format!("{}.{}", identity, LOCK_EXT));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(ArchiveLock { file })
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    fn marker_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", identity, MARKER_EXT))
    }
}

/// Held while one archive is checked, extracted and marked.
pub struct ArchiveLock {
    file: File,
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Token for cooperative cancellation. Checked at phase boundaries and
/// between archives.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }
        Ok(())
    }
}
