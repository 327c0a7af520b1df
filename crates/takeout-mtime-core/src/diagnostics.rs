use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

/// Default diagnostics file name inside the work directory.
pub const DIAGNOSTICS_FILENAME: &str = "diagnostics.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    /// media file without a matching sidecar
    NoSidecar,
    /// sidecar that no media file resolved to
    NoMedia,
    /// sidecar or folder metadata that could not be read or parsed
    Malformed,
    /// parsed document without any usable timestamp
    NoTimestamp,
    /// setting the file or directory times failed
    ApplyFailed,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::NoSidecar => "NO_SIDECAR",
            DiagnosticKind::NoMedia => "NO_MEDIA",
            DiagnosticKind::Malformed => "MALFORMED",
            DiagnosticKind::NoTimestamp => "NO_TIMESTAMP",
            DiagnosticKind::ApplyFailed => "APPLY_FAILED",
        }
    }
}

#[derive(Serialize)]
struct DiagnosticLine<'a> {
    kind: DiagnosticKind,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

/// Append-only JSON-lines audit trail of per-item anomalies.
///
/// Recording never fails: if the file cannot be created or written the line
/// is dropped (after a log warning) and only the counters are updated.
pub struct DiagnosticsSink {
    writer: Mutex<Option<LineWriter<File>>>,
    counts: Mutex<BTreeMap<DiagnosticKind, u64>>,
    base: PathBuf,
}

impl DiagnosticsSink {
    /// Start a fresh diagnostics file at `path`. Paths in lines are written
    /// relative to `base`.
    pub fn create(path: &Path, base: &Path) -> Self {
        let writer = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| File::create(path))
            .map(LineWriter::new);
        let writer = match writer {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("Diagnostics file {} unavailable: {}", path.display(), e);
                None
            }
        };
        Self {
            writer: Mutex::new(writer),
            counts: Mutex::new(BTreeMap::new()),
            base: base.to_path_buf(),
        }
    }

    /// A sink that only counts.
    pub fn in_memory(base: &Path) -> Self {
        Self {
            writer: Mutex::new(None),
            counts: Mutex::new(BTreeMap::new()),
            base: base.to_path_buf(),
        }
    }

    pub fn record(&self, kind: DiagnosticKind, path: &Path, detail: &str) {
        let rel = relative_display(path, &self.base);
        match kind {
            DiagnosticKind::Malformed | DiagnosticKind::ApplyFailed => {
                log::warn!("{} {} {}", kind.as_str(), rel, detail)
            }
            _ => log::debug!("{} {} {}", kind.as_str(), rel, detail),
        }

        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(kind).or_insert(0) += 1;
        }

        let Ok(line) = serde_json::to_string(&DiagnosticLine {
            kind,
            path: &rel,
            detail: Some(detail).filter(|d| !d.is_empty()),
        }) else {
            return;
        };
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(w) = guard.as_mut() {
                if writeln!(w, "{}", line).is_err() {
                    log::warn!("Dropping diagnostics output after write failure");
                    *guard = None;
                }
            }
        }
    }

    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.counts
            .lock()
            .map(|c| c.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Per-kind totals keyed by the line tag (`NO_SIDECAR`, ...).
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .map(|c| c.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn flush(&self) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(w) = guard.as_mut() {
                let _ = w.flush();
            }
        }
    }
}

impl Drop for DiagnosticsSink {
    fn drop(&mut self) {
        self.flush();
    }
}

fn relative_display(path: &Path, base: &Path) -> String {
    let rel = pathdiff::diff_paths(path, base)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| path.to_path_buf());
    rel.to_string_lossy().replace('\\', "/")
}
