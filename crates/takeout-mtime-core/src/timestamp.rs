use std::fs;
use std::path::Path;

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;

/// Timestamp groups in priority order: capture time, upload/creation time,
/// and the album-level `date` used by folder metadata.
pub const TIMESTAMP_KEYS: [&str; 3] = ["photoTakenTime", "creationTime", "date"];

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("top-level value is not an object")]
    NotAnObject,
}

/// Parsed sidecar or folder metadata.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    fields: Map<String, Value>,
}

/// The timestamp chosen from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalTimestamp {
    pub epoch: i64,
    pub key: &'static str,
}

impl MetadataDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    pub fn read(path: &Path) -> Result<Self, DocumentError> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// First key in `TIMESTAMP_KEYS` holding a usable `timestamp`.
    ///
    /// A key that is present but unusable (not an object, no `timestamp`,
    /// non-numeric, out of range) is skipped, never averaged with others.
    pub fn canonical_timestamp(&self) -> Option<CanonicalTimestamp> {
        TIMESTAMP_KEYS.iter().find_map(|&key| {
            let group = self.fields.get(key)?.as_object()?;
            let epoch = epoch_value(group.get("timestamp")?)?;
            DateTime::from_timestamp(epoch, 0)?;
            Some(CanonicalTimestamp { epoch, key })
        })
    }
}

/// Accept integers, integral floats and numeric strings.
fn epoch_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Result of reading one metadata file.
#[derive(Debug)]
pub enum Extraction {
    Found(CanonicalTimestamp),
    NoTimestamp,
    Malformed(DocumentError),
}

/// Read `path` and extract its canonical timestamp. Never fails; problems
/// come back as `Malformed` or `NoTimestamp`.
pub fn extract_from_file(path: &Path) -> Extraction {
    match MetadataDocument::read(path) {
        Ok(doc) => match doc.canonical_timestamp() {
            Some(ts) => Extraction::Found(ts),
            None => Extraction::NoTimestamp,
        },
        Err(e) => Extraction::Malformed(e),
    }
}
