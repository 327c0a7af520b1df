use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// mtime differed and was rewritten
    Applied,
    /// mtime already matched; times were rewritten anyway
    Unchanged,
}

/// Set mtime and atime of `path` (file or directory) to `epoch` seconds.
///
/// Only the entry itself is touched: applying to a file leaves its parent
/// directory's times alone and applying to a directory leaves its children
/// alone.
pub fn apply_timestamp(path: &Path, epoch: i64) -> io::Result<ApplyOutcome> {
    let meta = fs::metadata(path)?;
    let target = FileTime::from_unix_time(epoch, 0);
    let before = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(path, target, target)?;
    if before == target {
        Ok(ApplyOutcome::Unchanged)
    } else {
        Ok(ApplyOutcome::Applied)
    }
}

/// Current mtime in whole seconds.
pub fn mtime_secs(path: &Path) -> io::Result<i64> {
    let meta = fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&meta).unix_seconds())
}
