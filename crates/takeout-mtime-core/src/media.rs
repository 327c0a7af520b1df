use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Image suffixes (lowercase) recognised without consulting `mime_guess`.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "avif", "dng",
    "cr2", "nef", "arw", "raw",
];

/// Video suffixes (lowercase).
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp", "mts", "m2ts", "wmv", "mpg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// A media file inside the overlay tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Absolute path
    pub path: PathBuf,
    /// Directory containing the file
    pub dir: PathBuf,
    /// File name, NFC-normalized
    pub name: String,
    /// File name without the final extension
    pub base: String,
    /// Final extension as written on disk (no dot)
    pub ext: String,
    pub kind: MediaKind,
}

impl MediaFile {
    /// Build a `MediaFile` if `path` has a supported media suffix.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = nfc(path.file_name()?.to_str()?);
        let kind = classify(&name)?;
        let (base, ext) = split_name(&name);
        Some(Self {
            path: path.to_path_buf(),
            dir: path.parent()?.to_path_buf(),
            base: base.to_string(),
            ext: ext.to_string(),
            name,
            kind,
        })
    }

    /// Lowercased extension.
    pub fn ext_lower(&self) -> String {
        self.ext.to_lowercase()
    }
}

/// Classify a file name by suffix only (case-insensitive).
pub fn classify(name: &str) -> Option<MediaKind> {
    let (_, ext) = split_name(name);
    if ext.is_empty() {
        return None;
    }
    let ext = ext.to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaKind::Image);
    }
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaKind::Video);
    }
    // mime_guess only looks at the extension as well
    let mime = mime_guess::from_ext(&ext).first()?;
    if mime.type_() == mime_guess::mime::IMAGE {
        Some(MediaKind::Image)
    } else if mime.type_() == mime_guess::mime::VIDEO {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Split `name` into (base, extension) at the last dot. Dotfiles and names
/// without a dot have an empty extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    }
}

/// NFC-normalize a file name. Archives built on macOS carry NFD names.
pub fn nfc(name: &str) -> String {
    name.nfc().collect()
}
