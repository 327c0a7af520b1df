use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::media::{MediaFile, MediaKind};

/// `name(12)` duplicate counter appended by the exporter.
static DUPLICATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<stem>.+)\((?P<n>\d+)\)$").unwrap());

/// Video containers that can be the motion half of a live photo.
const LIVE_PHOTO_VIDEO_EXTS: &[&str] = &["mp4", "mov"];

/// Still-image extensions tried, in order, for a live-photo video.
const LIVE_PHOTO_IMAGE_EXTS: &[&str] = &["heic", "jpg", "jpeg"];

/// One `.json` file found next to media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEntry {
    /// NFC-normalized file name, used for matching
    pub name: String,
    /// Path on disk
    pub path: PathBuf,
}

/// Sidecar files of one directory.
///
/// Entries are kept ordered by (name length, name bytes). Every rule walks
/// this order and takes the first hit, so among several candidates for the
/// same rule the shortest name wins and ties fall back to byte order.
/// `photo.jpg.json` therefore beats `photo.jpg(1).json` and
/// `photo.jpg.supplemental-metadata.json` for `photo.jpg`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    entries: Vec<SidecarEntry>,
}

impl DirListing {
    pub fn new(entries: Vec<SidecarEntry>) -> Self {
        let mut listing = Self { entries };
        listing.sort();
        listing
    }

    pub fn push(&mut self, entry: SidecarEntry) {
        self.entries.push(entry);
    }

    /// Restore the matching order after a sequence of `push` calls.
    pub fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| {
                a.name
                    .len()
                    .cmp(&b.name.len())
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.path.cmp(&b.path))
            });
        self.entries.dedup_by(|a, b| a.path == b.path);
    }

    pub fn entries(&self) -> &[SidecarEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn first_with_prefix(&self, prefix: &str) -> Option<&SidecarEntry> {
        self.entries.iter().find(|e| e.name.starts_with(prefix))
    }

    fn first_with_prefix_ignore_case(&self, prefix: &str) -> Option<&SidecarEntry> {
        let prefix = prefix.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.name.to_lowercase().starts_with(&prefix))
    }
}

/// Which step of the cascade produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    FullName,
    BaseName,
    DuplicateSuffix,
    LivePhoto,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::FullName => "full-name",
            MatchRule::BaseName => "base-name",
            MatchRule::DuplicateSuffix => "duplicate-suffix",
            MatchRule::LivePhoto => "live-photo",
        }
    }
}

/// A resolved sidecar and the rule that found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub sidecar: &'a SidecarEntry,
    pub rule: MatchRule,
}

type Rule = for<'a> fn(&MediaFile, &'a DirListing) -> Option<&'a SidecarEntry>;

const CASCADE: [(MatchRule, Rule); 4] = [
    (MatchRule::FullName, full_name),
    (MatchRule::BaseName, base_name),
    (MatchRule::DuplicateSuffix, duplicate_suffix),
    (MatchRule::LivePhoto, live_photo),
];

/// Find the sidecar for `media` in its directory listing.
///
/// Pure: the listing comes from the scan snapshot and the filesystem is
/// never touched. `None` means no rule matched.
pub fn resolve<'a>(media: &MediaFile, listing: Option<&'a DirListing>) -> Option<Resolution<'a>> {
    let listing = listing?;
    if listing.is_empty() {
        return None;
    }
    CASCADE
        .iter()
        .find_map(|(rule, f)| f(media, listing).map(|sidecar| Resolution { sidecar, rule: *rule }))
}

/// Rule 1: sidecar name starts with `<base>.<ext>`.
pub fn full_name<'a>(media: &MediaFile, listing: &'a DirListing) -> Option<&'a SidecarEntry> {
    listing.first_with_prefix(&media.name)
}

/// Rule 2: sidecar name starts with `<base>`.
pub fn base_name<'a>(media: &MediaFile, listing: &'a DirListing) -> Option<&'a SidecarEntry> {
    if media.base.is_empty() {
        return None;
    }
    listing.first_with_prefix(&media.base)
}

/// Rule 3: `<stem>(N).<ext>` whose sidecar kept the original name.
///
/// Takeout writes the counter behind the extension (`<stem>.<ext>(N).json`),
/// so that form is preferred before falling back to `<stem>.<ext>`.
pub fn duplicate_suffix<'a>(media: &MediaFile, listing: &'a DirListing) -> Option<&'a SidecarEntry> {
    let caps = DUPLICATE_RE.captures(&media.base)?;
    let stem = caps.name("stem")?.as_str();
    let n = caps.name("n")?.as_str();
    let stripped = join_ext(stem, &media.ext);
    listing
        .first_with_prefix(&format!("{}({})", stripped, n))
        .or_else(|| listing.first_with_prefix(&stripped))
}

/// Rule 4: motion half of a live photo, matched through the still image's
/// name. Case-insensitive.
pub fn live_photo<'a>(media: &MediaFile, listing: &'a DirListing) -> Option<&'a SidecarEntry> {
    if media.kind != MediaKind::Video || !LIVE_PHOTO_VIDEO_EXTS.contains(&media.ext_lower().as_str()) {
        return None;
    }
    LIVE_PHOTO_IMAGE_EXTS
        .iter()
        .find_map(|image_ext| listing.first_with_prefix_ignore_case(&join_ext(&media.base, image_ext)))
}

fn join_ext(base: &str, ext: &str) -> String {
    if ext.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn listing(names: &[&str]) -> DirListing {
        DirListing::new(
            names
                .iter()
                .map(|n| SidecarEntry {
                    name: n.to_string(),
                    path: PathBuf::from("/d").join(n),
                })
                .collect(),
        )
    }

    fn media(name: &str) -> MediaFile {
        MediaFile::from_path(&Path::new("/d").join(name)).unwrap()
    }

    fn resolved(name: &str, names: &[&str]) -> Option<(String, MatchRule)> {
        let l = listing(names);
        resolve(&media(name), Some(&l)).map(|r| (r.sidecar.name.clone(), r.rule))
    }

    #[test]
    fn test_full_name_beats_base_name() {
        assert_eq!(
            resolved("photo.jpg", &["photo.json", "photo.jpg.json"]),
            Some(("photo.jpg.json".to_string(), MatchRule::FullName))
        );
    }

    #[test]
    fn test_base_name_fallback() {
        assert_eq!(
            resolved("IMG_0001.jpg", &["IMG_0001.json"]),
            Some(("IMG_0001.json".to_string(), MatchRule::BaseName))
        );
    }

    #[test]
    fn test_supplemental_metadata_name() {
        assert_eq!(
            resolved("photo.jpg", &["photo.jpg.supplemental-metadata.json"]),
            Some((
                "photo.jpg.supplemental-metadata.json".to_string(),
                MatchRule::FullName
            ))
        );
    }

    #[test]
    fn test_shortest_candidate_wins_within_rule() {
        let names = ["photo.jpg.supplemental-metadata.json", "photo.jpg(1).json", "photo.jpg.json"];
        assert_eq!(
            resolved("photo.jpg", &names).map(|(n, _)| n),
            Some("photo.jpg.json".to_string())
        );
    }

    #[test]
    fn test_tie_break_ignores_input_order() {
        let forward = resolved("a.jpg", &["a.jpg.x.json", "a.jpg.b.json"]);
        let backward = resolved("a.jpg", &["a.jpg.b.json", "a.jpg.x.json"]);
        assert_eq!(forward, backward);
        assert_eq!(forward.map(|(n, _)| n), Some("a.jpg.b.json".to_string()));
    }

    #[test]
    fn test_duplicate_suffix_strips_counter() {
        assert_eq!(
            resolved("photo(2).jpg", &["photo.jpg.json"]),
            Some(("photo.jpg.json".to_string(), MatchRule::DuplicateSuffix))
        );
    }

    #[test]
    fn test_duplicate_suffix_prefers_takeout_counter_form() {
        assert_eq!(
            resolved("photo(2).jpg", &["photo.jpg.json", "photo.jpg(2).json"]),
            Some(("photo.jpg(2).json".to_string(), MatchRule::DuplicateSuffix))
        );
    }

    #[test]
    fn test_live_photo_rule_in_isolation() {
        let l = listing(&["clip.HEIC.json"]);
        assert_eq!(
            live_photo(&media("clip.mov"), &l).map(|e| e.name.as_str()),
            Some("clip.HEIC.json")
        );
        assert_eq!(live_photo(&media("clip.avi"), &l), None);
        assert_eq!(live_photo(&media("clip.jpg"), &l), None);
    }

    #[test]
    fn test_live_photo_is_case_insensitive() {
        assert_eq!(
            resolved("IMG_0042.MOV", &["img_0042.heic.json"]),
            Some(("img_0042.heic.json".to_string(), MatchRule::LivePhoto))
        );
    }

    #[test]
    fn test_live_photo_pairing_resolves() {
        assert_eq!(
            resolved("clip.mov", &["clip.HEIC.json"]).map(|(n, _)| n),
            Some("clip.HEIC.json".to_string())
        );
    }

    #[test]
    fn test_no_match() {
        assert_eq!(resolved("orphan.png", &["other.jpg.json"]), None);
        assert_eq!(resolved("orphan.png", &[]), None);
        assert!(resolve(&media("orphan.png"), None).is_none());
    }

    #[test]
    fn test_dir_listing_dedups_paths() {
        let mut l = DirListing::default();
        l.push(SidecarEntry { name: "a.json".into(), path: PathBuf::from("/d/a.json") });
        l.push(SidecarEntry { name: "a.json".into(), path: PathBuf::from("/d/a.json") });
        l.sort();
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn test_dir_listing_keeps_normalization_twins() {
        // same NFC name, one file stored decomposed on disk
        let nfd = PathBuf::from("/d/cafe\u{301}.jpg.json");
        let nfc = PathBuf::from("/d/caf\u{e9}.jpg.json");
        let mut l = DirListing::default();
        l.push(SidecarEntry { name: "caf\u{e9}.jpg.json".into(), path: nfd.clone() });
        l.push(SidecarEntry { name: "caf\u{e9}.jpg.json".into(), path: nfc.clone() });
        l.sort();
        assert_eq!(l.len(), 2);

        let first = l.entries()[0].path.clone();
        assert_eq!(first, nfd.clone().min(nfc));
        let r = resolve(&media("caf\u{e9}.jpg"), Some(&l)).unwrap();
        assert_eq!(r.sidecar.path, first);
    }
}
