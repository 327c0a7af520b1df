use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{RestoreError, Result};
use crate::folder_classify::{self, RootNames};
use crate::media::{self, MediaFile};
use crate::sidecar::{DirListing, SidecarEntry};
use crate::ThrottledProgress;

/// Aggregate counts for progress and the final summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    pub media: u64,
    pub sidecars: u64,
    pub folder_markers: u64,
    pub roots: u64,
}

/// Everything the restoration passes need, captured by one walk.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Media roots, outermost only, sorted. These are also the sources for
    /// the external transfer stage.
    pub roots: Vec<PathBuf>,
    /// Media files sorted by path
    pub media: Vec<MediaFile>,
    /// Sidecar listing per directory
    pub listings: BTreeMap<PathBuf, DirListing>,
    /// Folder marker files sorted by path
    pub folder_markers: Vec<PathBuf>,
    pub counts: ScanCounts,
}

impl Snapshot {
    pub fn listing(&self, dir: &Path) -> Option<&DirListing> {
        self.listings.get(dir)
    }
}

/// Walk `overlay` once and classify every file under a media root.
///
/// Read-only. Classification is by file name suffix alone. Entries the walker
/// cannot read are logged and skipped. Fails with `NoMediaRoot` when no
/// directory matches `names`.
pub fn scan_overlay(overlay: &Path, names: &RootNames, progress: &ThrottledProgress) -> Result<Snapshot> {
    let mut found_roots = Vec::new();
    let mut media_files = Vec::new();
    let mut listings: BTreeMap<PathBuf, DirListing> = BTreeMap::new();
    let mut folder_markers = Vec::new();
    let mut seen = 0u64;

    for entry in WalkDir::new(overlay).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        seen += 1;
        progress.report("scan", seen, 0, "Scanning overlay");

        let Some(rel) = entry.path().strip_prefix(overlay).ok() else {
            continue;
        };
        let Some(name) = entry.file_name().to_str() else {
            log::debug!("Skipping non UTF-8 name {}", entry.path().display());
            continue;
        };

        if entry.file_type().is_dir() {
            if entry.depth() > 0 && names.matches(name) {
                found_roots.push(entry.path().to_path_buf());
            }
            continue;
        }
        if !entry.file_type().is_file() || !folder_classify::is_inside_root(rel, names) {
            continue;
        }

        let path = entry.path();
        let Some(dir) = path.parent() else {
            continue;
        };
        if folder_classify::is_folder_marker_name(name) {
            folder_markers.push(path.to_path_buf());
        } else if folder_classify::is_metadata_name(name) {
            listings.entry(dir.to_path_buf()).or_default().push(SidecarEntry {
                name: media::nfc(name),
                path: path.to_path_buf(),
            });
        } else if let Some(m) = MediaFile::from_path(path) {
            media_files.push(m);
        }
    }

    let roots = folder_classify::outermost_roots(found_roots);
    if roots.is_empty() {
        return Err(RestoreError::NoMediaRoot {
            overlay: overlay.to_path_buf(),
            names: names.describe(),
        });
    }

    for listing in listings.values_mut() {
        listing.sort();
    }
    media_files.sort_by(|a, b| a.path.cmp(&b.path));
    folder_markers.sort();

    let counts = ScanCounts {
        media: media_files.len() as u64,
        sidecars: listings.values().map(|l| l.len() as u64).sum(),
        folder_markers: folder_markers.len() as u64,
        roots: roots.len() as u64,
    };
    progress.report("scan", seen, seen, "Scan complete");
    log::info!(
        "Scanned {} entries: {} media, {} sidecars, {} folder markers in {} root(s)",
        seen,
        counts.media,
        counts.sidecars,
        counts.folder_markers,
        counts.roots
    );

    Ok(Snapshot {
        roots,
        media: media_files,
        listings,
        folder_markers,
        counts,
    })
}
