use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use encoding_rs::SHIFT_JIS;
use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::checkpoint::{CancellationToken, MarkerStore};
use crate::error::{RestoreError, Result};
use crate::ThrottledProgress;

/// One input archive and the key its completion marker is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUnit {
    pub path: PathBuf,
    pub identity: String,
}

impl ArchiveUnit {
    /// Identity is `sha256(file name, 0x00, byte length)`: stable across runs
    /// and independent of where the source directory is mounted.
    pub fn new(path: &Path) -> Result<Self> {
        let len = fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        Ok(Self {
            path: path.to_path_buf(),
            identity: hex::encode(hasher.finalize()),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub discovered: u64,
    pub extracted: u64,
    pub skipped: u64,
}

/// `.zip` files directly inside `source_dir`, ordered by file name. The order
/// decides which archive wins when two carry the same path.
pub fn discover_archives(source_dir: &Path) -> Result<Vec<ArchiveUnit>> {
    if !source_dir.is_dir() {
        return Err(RestoreError::SourceNotFound(source_dir.to_path_buf()));
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(source_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
        })
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    paths.iter().map(|p| ArchiveUnit::new(p)).collect()
}

/// Remove the overlay tree and every marker. Must run before either
/// directory is created for the current run.
pub fn reset(overlay: &Path, markers: &Path) -> Result<()> {
    for dir in [overlay, markers] {
        if dir.exists() {
            log::info!("Removing {}", dir.display());
            fs::remove_dir_all(dir)?;
        }
    }
    Ok(())
}

/// Extract every archive without a completion marker into `overlay`.
///
/// Archives are handled one at a time; for each the marker check, the
/// extraction and the marker write happen under that archive's lock. The
/// first extraction failure aborts the run; archives already marked stay
/// marked.
pub fn materialize(
    archives: &[ArchiveUnit],
    overlay: &Path,
    markers: &mut MarkerStore,
    cancel_token: Option<&CancellationToken>,
    progress: &ThrottledProgress,
) -> Result<MaterializeReport> {
    fs::create_dir_all(overlay)?;
    let total = archives.len() as u64;
    let mut report = MaterializeReport {
        discovered: total,
        ..Default::default()
    };

    for (i, unit) in archives.iter().enumerate() {
        if let Some(token) = cancel_token {
            token.check()?;
        }
        let display = unit.path.display().to_string();

        let _lock = markers.lock(&unit.identity)?;
        if markers.is_complete(&unit.identity) {
            log::debug!("Already materialized: {}", display);
            report.skipped += 1;
        } else {
            log::info!("Extracting {}", display);
            let entries = extract_archive(&unit.path, overlay)?;
            markers.mark_complete(&unit.identity)?;
            log::info!("Extracted {} entries from {}", entries, display);
            report.extracted += 1;
        }
        progress.report("materialize", i as u64 + 1, total, &display);
    }

    Ok(report)
}

/// Extract all entries of `archive` under `overlay`, overwriting files that
/// earlier archives put at the same relative path.
pub fn extract_archive(archive: &Path, overlay: &Path) -> Result<u64> {
    let file = File::open(archive).map_err(|e| RestoreError::extraction(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|source| RestoreError::Zip {
        archive: archive.to_path_buf(),
        source,
    })?;

    let mut count = 0u64;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|source| RestoreError::Zip {
            archive: archive.to_path_buf(),
            source,
        })?;
        let name = decode_entry_name(entry.name_raw());
        let Some(rel) = enclosed_path(&name) else {
            return Err(RestoreError::extraction(
                archive,
                format!("entry escapes the overlay: {}", name),
            ));
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = overlay.join(&rel);

        let written = if entry.is_dir() {
            fs::create_dir_all(&dest)
        } else {
            dest.parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| File::create(&dest))
                .and_then(|mut out| io::copy(&mut entry, &mut out).map(|_| ()))
        };
        written.map_err(|e| RestoreError::extraction(archive, format!("{}: {}", name, e)))?;
        count += 1;
    }
    Ok(count)
}

/// Decode an entry name: UTF-8, then Shift_JIS (common for Japanese
/// archives), then lossy UTF-8.
fn decode_entry_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }
    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// Relative path for an entry name, or `None` if it is absolute or climbs
/// out with `..`. `./` style names yield an empty path.
fn enclosed_path(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(&name.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn noop(_: &str, _: u64, _: u64, _: &str) {}

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_identity_is_stable_and_name_derived() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("takeout-001.zip");
        write_zip(&a, &[("x.txt", "1")]);
        let first = ArchiveUnit::new(&a).unwrap();
        let second = ArchiveUnit::new(&a).unwrap();
        assert_eq!(first.identity, second.identity);
        assert_eq!(first.identity.len(), 64);

        let b = dir.path().join("takeout-002.zip");
        fs::copy(&a, &b).unwrap();
        assert_ne!(ArchiveUnit::new(&b).unwrap().identity, first.identity);
    }

    #[test]
    fn test_discover_sorted_zip_only() {
        let dir = tempdir().unwrap();
        write_zip(&dir.path().join("b.zip"), &[]);
        write_zip(&dir.path().join("a.ZIP"), &[]);
        fs::write(dir.path().join("c.tgz"), b"").unwrap();
        fs::create_dir(dir.path().join("d.zip")).unwrap();

        let found = discover_archives(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|u| u.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.ZIP", "b.zip"]);
        assert!(matches!(
            discover_archives(&dir.path().join("nope")),
            Err(RestoreError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_later_archive_overwrites_earlier() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        write_zip(&src.join("1.zip"), &[("T/a.txt", "first"), ("T/only1.txt", "1")]);
        write_zip(&src.join("2.zip"), &[("T/a.txt", "second")]);

        let overlay = dir.path().join("overlay");
        let mut markers = MarkerStore::open(&dir.path().join("markers")).unwrap();
        let archives = discover_archives(&src).unwrap();
        let tp = ThrottledProgress::new(&noop);
        let report = materialize(&archives, &overlay, &mut markers, None, &tp).unwrap();

        assert_eq!(report.extracted, 2);
        assert_eq!(fs::read(overlay.join("T/a.txt")).unwrap(), b"second");
        assert_eq!(fs::read(overlay.join("T/only1.txt")).unwrap(), b"1");
    }

    #[test]
    fn test_second_run_skips_everything() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        write_zip(&src.join("1.zip"), &[("T/a.txt", "first")]);

        let overlay = dir.path().join("overlay");
        let marker_dir = dir.path().join("markers");
        let tp = ThrottledProgress::new(&noop);
        let archives = discover_archives(&src).unwrap();

        let mut markers = MarkerStore::open(&marker_dir).unwrap();
        materialize(&archives, &overlay, &mut markers, None, &tp).unwrap();

        // local edit must survive: proof that nothing is re-extracted
        fs::write(overlay.join("T/a.txt"), b"edited").unwrap();
        let mut markers = MarkerStore::open(&marker_dir).unwrap();
        let report = materialize(&archives, &overlay, &mut markers, None, &tp).unwrap();
        assert_eq!(report, MaterializeReport { discovered: 1, extracted: 0, skipped: 1 });
        assert_eq!(fs::read(overlay.join("T/a.txt")).unwrap(), b"edited");
    }

    #[test]
    fn test_concurrent_runs_extract_each_archive_once() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        for i in 0..4 {
            let name = format!("T/{}.txt", i);
            write_zip(&src.join(format!("{}.zip", i)), &[(name.as_str(), "x")]);
        }
        let archives = discover_archives(&src).unwrap();
        let overlay = dir.path().join("overlay");
        let marker_dir = dir.path().join("markers");

        let (archives, overlay, marker_dir) = (&archives, &overlay, &marker_dir);
        let reports: Vec<MaterializeReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(move |_| {
                    scope.spawn(move || {
                        let mut markers = MarkerStore::open(marker_dir).unwrap();
                        let tp = ThrottledProgress::new(&noop);
                        materialize(archives, overlay, &mut markers, None, &tp).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(reports.iter().map(|r| r.extracted).sum::<u64>(), 4);
        assert!(reports.iter().all(|r| r.extracted + r.skipped == 4));
        assert_eq!(MarkerStore::open(marker_dir).unwrap().len(), 4);
        for i in 0..4 {
            assert!(overlay.join(format!("T/{}.txt", i)).is_file());
        }
    }

    #[test]
    fn test_corrupt_archive_is_fatal_and_unmarked() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("broken.zip"), b"definitely not a zip").unwrap();

        let mut markers = MarkerStore::open(&dir.path().join("markers")).unwrap();
        let archives = discover_archives(&src).unwrap();
        let tp = ThrottledProgress::new(&noop);
        let err = materialize(&archives, &dir.path().join("overlay"), &mut markers, None, &tp).unwrap_err();
        assert!(matches!(err, RestoreError::Zip { .. }));
        assert!(!markers.is_complete(&archives[0].identity));
    }

    #[test]
    fn test_cancel_before_first_archive() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        write_zip(&src.join("1.zip"), &[("T/a.txt", "x")]);

        let token = CancellationToken::new();
        token.cancel();
        let mut markers = MarkerStore::open(&dir.path().join("markers")).unwrap();
        let archives = discover_archives(&src).unwrap();
        let tp = ThrottledProgress::new(&noop);
        let err = materialize(&archives, &dir.path().join("overlay"), &mut markers, Some(&token), &tp)
            .unwrap_err();
        assert!(matches!(err, RestoreError::Cancelled));
        assert!(markers.is_empty());
    }

    #[test]
    fn test_reset_removes_overlay_and_markers() {
        let dir = tempdir().unwrap();
        let overlay = dir.path().join("overlay");
        let markers = dir.path().join("markers");
        fs::create_dir_all(overlay.join("T")).unwrap();
        fs::create_dir_all(&markers).unwrap();
        reset(&overlay, &markers).unwrap();
        assert!(!overlay.exists());
        assert!(!markers.exists());
        // nothing to remove is fine
        reset(&overlay, &markers).unwrap();
    }

    #[test]
    fn test_enclosed_path() {
        assert_eq!(enclosed_path("Takeout/a.jpg"), Some(PathBuf::from("Takeout/a.jpg")));
        assert_eq!(enclosed_path("./Takeout/"), Some(PathBuf::from("Takeout")));
        assert_eq!(enclosed_path("../evil"), None);
        assert_eq!(enclosed_path("/etc/passwd"), None);
        assert_eq!(enclosed_path("./"), Some(PathBuf::new()));
    }

    #[test]
    fn test_decode_shift_jis_name() {
        let (encoded, _, _) = SHIFT_JIS.encode("写真.jpg");
        assert_eq!(decode_entry_name(&encoded), "写真.jpg");
        assert_eq!(decode_entry_name("plain.jpg".as_bytes()), "plain.jpg");
    }
}
