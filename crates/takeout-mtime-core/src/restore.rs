use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::apply::{self, ApplyOutcome};
use crate::diagnostics::{DiagnosticKind, DiagnosticsSink};
use crate::media::MediaFile;
use crate::scan::Snapshot;
use crate::sidecar::{self, DirListing, MatchRule};
use crate::timestamp::{self, Extraction};
use crate::ThrottledProgress;

/// Outcome counts of the media pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaReport {
    pub total: u64,
    pub matched: u64,
    pub applied: u64,
    pub unchanged: u64,
    pub unmatched: u64,
    pub malformed: u64,
    pub no_timestamp: u64,
    pub failed: u64,
    /// Sidecars no media file resolved to
    pub orphan_sidecars: u64,
    /// Matches per cascade rule
    pub by_rule: BTreeMap<String, u64>,
}

/// Outcome counts of the folder pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub total: u64,
    pub applied: u64,
    pub unchanged: u64,
    pub malformed: u64,
    pub no_timestamp: u64,
    pub failed: u64,
}

#[derive(Debug)]
enum Outcome {
    Applied { changed: bool },
    NoSidecar,
    Malformed { metadata: PathBuf, reason: String },
    NoTimestamp { metadata: PathBuf },
    ApplyFailed { reason: String },
}

#[derive(Debug)]
struct MediaResult {
    sidecar: Option<(PathBuf, MatchRule)>,
    outcome: Outcome,
}

/// Read `metadata` and apply its timestamp to `target`.
fn restore_from(metadata: &Path, target: &Path) -> Outcome {
    match timestamp::extract_from_file(metadata) {
        Extraction::Found(ts) => match apply::apply_timestamp(target, ts.epoch) {
            Ok(result) => {
                log::trace!("{} <- {} ({})", target.display(), ts.epoch, ts.key);
                Outcome::Applied {
                    changed: result == ApplyOutcome::Applied,
                }
            }
            Err(e) => Outcome::ApplyFailed { reason: e.to_string() },
        },
        Extraction::NoTimestamp => Outcome::NoTimestamp {
            metadata: metadata.to_path_buf(),
        },
        Extraction::Malformed(e) => Outcome::Malformed {
            metadata: metadata.to_path_buf(),
            reason: e.to_string(),
        },
    }
}

fn restore_one(media: &MediaFile, listing: Option<&DirListing>) -> MediaResult {
    let Some(resolution) = sidecar::resolve(media, listing) else {
        return MediaResult {
            sidecar: None,
            outcome: Outcome::NoSidecar,
        };
    };
    let sidecar_path = resolution.sidecar.path.clone();
    let outcome = restore_from(&sidecar_path, &media.path);
    MediaResult {
        sidecar: Some((sidecar_path, resolution.rule)),
        outcome,
    }
}

/// Resolve and restore every media file of the snapshot.
///
/// Work fans out over the rayon pool; results are collected in snapshot
/// order and only then recorded, so the diagnostics stream does not depend
/// on scheduling.
pub fn restore_media(snapshot: &Snapshot, sink: &DiagnosticsSink, progress: &ThrottledProgress) -> MediaReport {
    let mut report = MediaReport::default();
    if snapshot.media.is_empty() {
        log::info!("No media files found; nothing to restore");
        return report;
    }

    let total = snapshot.media.len() as u64;
    let done = AtomicU64::new(0);
    let results: Vec<MediaResult> = snapshot
        .media
        .par_iter()
        .map(|m| {
            let result = restore_one(m, snapshot.listing(&m.dir));
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report("restore-media", current, total, &m.name);
            result
        })
        .collect();

    report.total = total;
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    for (m, result) in snapshot.media.iter().zip(results) {
        if let Some((path, rule)) = result.sidecar {
            report.matched += 1;
            *report.by_rule.entry(rule.as_str().to_string()).or_insert(0) += 1;
            claimed.insert(path);
        }
        tally(&result.outcome, &m.path, sink, &mut report);
    }

    let mut orphans: Vec<&PathBuf> = snapshot
        .listings
        .values()
        .flat_map(|l| l.entries())
        .map(|e| &e.path)
        .filter(|p| !claimed.contains(*p))
        .collect();
    orphans.sort();
    for path in orphans {
        sink.record(DiagnosticKind::NoMedia, path, "");
        report.orphan_sidecars += 1;
    }

    log::info!(
        "Media: {} matched of {}, {} updated, {} already correct, {} without sidecar",
        report.matched,
        report.total,
        report.applied,
        report.unchanged,
        report.unmatched
    );
    report
}

fn tally(outcome: &Outcome, media: &Path, sink: &DiagnosticsSink, report: &mut MediaReport) {
    match outcome {
        Outcome::Applied { changed: true } => report.applied += 1,
        Outcome::Applied { changed: false } => report.unchanged += 1,
        Outcome::NoSidecar => {
            report.unmatched += 1;
            sink.record(DiagnosticKind::NoSidecar, media, "");
        }
        Outcome::Malformed { metadata, reason } => {
            report.malformed += 1;
            sink.record(DiagnosticKind::Malformed, metadata, reason);
        }
        Outcome::NoTimestamp { metadata } => {
            report.no_timestamp += 1;
            sink.record(DiagnosticKind::NoTimestamp, metadata, "");
        }
        Outcome::ApplyFailed { reason } => {
            report.failed += 1;
            sink.record(DiagnosticKind::ApplyFailed, media, reason);
        }
    }
}

/// Apply each folder marker's timestamp to the directory that contains it.
///
/// Directory times come only from the directory's own marker; nothing is
/// derived from the files inside it.
pub fn restore_folders(snapshot: &Snapshot, sink: &DiagnosticsSink, progress: &ThrottledProgress) -> FolderReport {
    let mut report = FolderReport::default();
    if snapshot.folder_markers.is_empty() {
        log::info!("No folder metadata found; directory times left as is");
        return report;
    }

    let total = snapshot.folder_markers.len() as u64;
    let done = AtomicU64::new(0);
    let outcomes: Vec<(PathBuf, Outcome)> = snapshot
        .folder_markers
        .par_iter()
        .filter_map(|marker| {
            let dir = marker.parent()?;
            let outcome = restore_from(marker, dir);
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report("restore-folders", current, total, &dir.to_string_lossy());
            Some((dir.to_path_buf(), outcome))
        })
        .collect();

    report.total = total;
    for (dir, outcome) in outcomes {
        match outcome {
            Outcome::Applied { changed: true } => report.applied += 1,
            Outcome::Applied { changed: false } => report.unchanged += 1,
            Outcome::NoSidecar => {}
            Outcome::Malformed { metadata, reason } => {
                report.malformed += 1;
                sink.record(DiagnosticKind::Malformed, &metadata, &reason);
            }
            Outcome::NoTimestamp { metadata } => {
                report.no_timestamp += 1;
                sink.record(DiagnosticKind::NoTimestamp, &metadata, "");
            }
            Outcome::ApplyFailed { reason } => {
                report.failed += 1;
                sink.record(DiagnosticKind::ApplyFailed, &dir, &reason);
            }
        }
    }

    log::info!(
        "Folders: {} updated, {} already correct of {}",
        report.applied,
        report.unchanged,
        report.total
    );
    report
}
