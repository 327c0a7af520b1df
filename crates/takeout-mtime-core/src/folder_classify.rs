use std::path::{Component, Path, PathBuf};

/// Root folder names Takeout uses for the photo library when no override
/// is configured.
pub const DEFAULT_ROOT_NAMES: [&str; 2] = ["Google Photos", "Google Fotos"];

/// Fixed name of the per-directory metadata file (album metadata).
pub const FOLDER_MARKER_NAME: &str = "metadata.json";

/// Metadata document suffix shared by sidecars and folder markers.
pub const METADATA_EXT: &str = ".json";

/// Names that identify a media root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNames(Vec<String>);

impl RootNames {
    /// One override name replaces the default pair entirely.
    pub fn new(override_name: Option<&str>) -> Self {
        match override_name {
            Some(name) => Self(vec![name.to_string()]),
            None => Self(DEFAULT_ROOT_NAMES.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn matches(&self, folder_name: &str) -> bool {
        self.0.iter().any(|n| n == folder_name)
    }

    /// Human readable list for error messages.
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(|n| format!("\"{}\"", n))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

impl Default for RootNames {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Whether `path` (relative to the overlay) passes through a media root
/// other than as its last component.
pub fn is_inside_root(rel_path: &Path, names: &RootNames) -> bool {
    let parts: Vec<_> = rel_path.components().collect();
    parts
        .iter()
        .take(parts.len().saturating_sub(1))
        .any(|c| matches!(c, Component::Normal(n) if n.to_str().is_some_and(|s| names.matches(s))))
}

/// Drop roots nested inside another root; input need not be sorted.
pub fn outermost_roots(mut roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots.sort();
    let mut kept: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        if kept.iter().any(|k| root.starts_with(k)) {
            continue;
        }
        kept.push(root);
    }
    kept
}

/// A metadata document by suffix (case-insensitive).
pub fn is_metadata_name(name: &str) -> bool {
    name.len() > METADATA_EXT.len() && name.to_lowercase().ends_with(METADATA_EXT)
}

/// The per-directory marker (case-insensitive).
pub fn is_folder_marker_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(FOLDER_MARKER_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_names() {
        let defaults = RootNames::default();
        assert!(defaults.matches("Google Photos"));
        assert!(defaults.matches("Google Fotos"));
        assert!(!defaults.matches("Google Drive"));

        let custom = RootNames::new(Some("Google フォト"));
        assert!(custom.matches("Google フォト"));
        assert!(!custom.matches("Google Photos"));
        assert_eq!(custom.describe(), "\"Google フォト\"");
    }

    #[test]
    fn test_outermost_roots() {
        let roots = outermost_roots(vec![
            PathBuf::from("/o/Takeout/Google Photos/Google Photos"),
            PathBuf::from("/o/Takeout/Google Photos"),
            PathBuf::from("/o/Other/Google Fotos"),
        ]);
        assert_eq!(
            roots,
            vec![
                PathBuf::from("/o/Other/Google Fotos"),
                PathBuf::from("/o/Takeout/Google Photos"),
            ]
        );
    }

    #[test]
    fn test_metadata_names() {
        assert!(is_metadata_name("photo.jpg.json"));
        assert!(is_metadata_name("photo.JSON"));
        assert!(!is_metadata_name(".json"));
        assert!(!is_metadata_name("photo.jpg"));
        assert!(is_folder_marker_name("metadata.json"));
        assert!(is_folder_marker_name("Metadata.JSON"));
        assert!(!is_folder_marker_name("metadata.jsonl"));
    }

    #[test]
    fn test_is_inside_root() {
        let names = RootNames::default();
        assert!(is_inside_root(Path::new("Takeout/Google Photos/a.jpg"), &names));
        assert!(!is_inside_root(Path::new("Takeout/Google Photos"), &names));
        assert!(!is_inside_root(Path::new("Takeout/Drive/a.jpg"), &names));
    }
}
