pub mod apply;
pub mod checkpoint;
pub mod diagnostics;
pub mod error;
pub mod folder_classify;
pub mod materialize;
pub mod media;
pub mod restore;
pub mod scan;
pub mod sidecar;
pub mod timestamp;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use checkpoint::{CancellationToken, MarkerStore};
pub use diagnostics::{DiagnosticKind, DiagnosticsSink};
pub use error::{RestoreError, Result};
pub use materialize::MaterializeReport;
pub use restore::{FolderReport, MediaReport};
pub use scan::{ScanCounts, Snapshot};

/// Work directory created inside the source directory when none is given.
pub const DEFAULT_WORK_DIRNAME: &str = ".takeout-mtime";

/// Overlay tree inside the work directory.
pub const OVERLAY_DIRNAME: &str = "overlay";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Directory holding the Takeout `.zip` archives
    pub source_dir: PathBuf,
    /// Where the overlay, markers and diagnostics live
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Single media root name replacing the default pair
    #[serde(default)]
    pub root_name: Option<String>,
    /// Remove overlay and markers before materializing
    #[serde(default)]
    pub reset: bool,
    /// Only meaningful to the transfer stage; restoration ignores it
    #[serde(default)]
    pub dry_run: bool,
    /// Diagnostics file override
    #[serde(default)]
    pub diagnostics: Option<PathBuf>,
}

impl RestoreOptions {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            work_dir: None,
            root_name: None,
            reset: false,
            dry_run: false,
            diagnostics: None,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.source_dir.join(DEFAULT_WORK_DIRNAME))
    }

    pub fn overlay_dir(&self) -> PathBuf {
        self.work_dir().join(OVERLAY_DIRNAME)
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.work_dir().join(checkpoint::MARKER_DIRNAME)
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.diagnostics
            .clone()
            .unwrap_or_else(|| self.work_dir().join(diagnostics::DIAGNOSTICS_FILENAME))
    }
}

/// Control options for a run (cancellation).
#[derive(Debug, Clone, Default)]
pub struct RestoreControl {
    pub cancel_token: Option<CancellationToken>,
}

impl RestoreControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<()> {
        match &self.cancel_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

/// Stages of one run. Strictly linear; a run never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    Pending,
    Materializing,
    Scanned,
    Resolving,
    Restored,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Pending => "pending",
            RunStage::Materializing => "materializing",
            RunStage::Scanned => "scanned",
            RunStage::Resolving => "resolving",
            RunStage::Restored => "restored",
        }
    }

    pub fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Pending => Some(RunStage::Materializing),
            RunStage::Materializing => Some(RunStage::Scanned),
            RunStage::Scanned => Some(RunStage::Resolving),
            RunStage::Resolving => Some(RunStage::Restored),
            RunStage::Restored => None,
        }
    }

    /// Move to `to`, which must be the immediate successor.
    pub fn advance(&mut self, to: RunStage) -> Result<()> {
        if self.next() != Some(to) {
            return Err(RestoreError::StageOrder {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        log::debug!("Stage {} -> {}", self.as_str(), to.as_str());
        *self = to;
        Ok(())
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub stage: RunStage,
    pub archives: MaterializeReport,
    pub counts: ScanCounts,
    /// Media roots for the external transfer stage
    pub sync_sources: Vec<PathBuf>,
    pub media: MediaReport,
    pub folders: FolderReport,
    /// Diagnostic lines written, per kind
    pub diagnostics: BTreeMap<String, u64>,
    pub diagnostics_path: PathBuf,
    pub dry_run: bool,
}

/// Type alias for progress callback: `(stage, done, total, message)`.
/// `total` is 0 while unknown. The callback may borrow from the caller.
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter: emits at most every 200ms, and always once
/// `done` reaches a known `total`.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        Self {
            inner,
            last_emit: Mutex::new(start),
        }
    }

    pub fn report(&self, stage: &str, done: u64, total: u64, message: &str) {
        let is_done = total > 0 && done >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < Duration::from_millis(200) {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, done, total, message);
    }
}

/// Run the full pipeline with progress reporting.
pub fn restore(options: &RestoreOptions, progress_callback: &ProgressCallback<'_>) -> Result<RestoreSummary> {
    restore_with_control(options, &RestoreControl::default(), progress_callback)
}

/// Run the full pipeline: materialize, scan, restore media, restore folders.
///
/// Cancellation is honoured between archives and at every phase boundary.
/// Whatever finished before a fatal error or cancellation (markers written,
/// times applied) stays valid, so the same call can simply be repeated.
pub fn restore_with_control(
    options: &RestoreOptions,
    control: &RestoreControl,
    progress_callback: &ProgressCallback<'_>,
) -> Result<RestoreSummary> {
    let tp = ThrottledProgress::new(progress_callback);
    let mut stage = RunStage::Pending;
    let overlay = options.overlay_dir();
    let markers_dir = options.markers_dir();
    control.check()?;

    if options.dry_run {
        log::info!("Dry run requested: timestamps are still restored, only the transfer stage is affected");
    }

    let archives = materialize::discover_archives(&options.source_dir)?;
    log::info!("Found {} archive(s) in {}", archives.len(), options.source_dir.display());

    if options.reset {
        materialize::reset(&overlay, &markers_dir)?;
    }

    stage.advance(RunStage::Materializing)?;
    let mut markers = MarkerStore::open(&markers_dir)?;
    let archive_report = materialize::materialize(
        &archives,
        &overlay,
        &mut markers,
        control.cancel_token.as_ref(),
        &tp,
    )?;
    log::info!(
        "Materialized {} archive(s), {} already done",
        archive_report.extracted,
        archive_report.skipped
    );
    control.check()?;

    let names = folder_classify::RootNames::new(options.root_name.as_deref());
    let snapshot = scan::scan_overlay(&overlay, &names, &tp)?;
    stage.advance(RunStage::Scanned)?;
    control.check()?;

    stage.advance(RunStage::Resolving)?;
    let diagnostics_path = options.diagnostics_path();
    let sink = DiagnosticsSink::create(&diagnostics_path, &overlay);
    let media = restore::restore_media(&snapshot, &sink, &tp);
    control.check()?;
    let folders = restore::restore_folders(&snapshot, &sink, &tp);
    sink.flush();
    stage.advance(RunStage::Restored)?;

    Ok(RestoreSummary {
        stage,
        archives: archive_report,
        counts: snapshot.counts,
        sync_sources: snapshot.roots.clone(),
        media,
        folders,
        diagnostics: sink.counts(),
        diagnostics_path,
        dry_run: options.dry_run,
    })
}

/// Scan and restore an already materialized overlay, without archives.
pub fn restore_overlay(
    overlay: &Path,
    root_name: Option<&str>,
    sink: &DiagnosticsSink,
    progress_callback: &ProgressCallback<'_>,
) -> Result<(Snapshot, MediaReport, FolderReport)> {
    let tp = ThrottledProgress::new(progress_callback);
    let names = folder_classify::RootNames::new(root_name);
    let snapshot = scan::scan_overlay(overlay, &names, &tp)?;
    let media = restore::restore_media(&snapshot, sink, &tp);
    let folders = restore::restore_folders(&snapshot, sink, &tp);
    Ok((snapshot, media, folders))
}
