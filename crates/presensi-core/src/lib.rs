//! presensi-core: identity store and face recognition.
//!
//! SCRFD detection and ArcFace embeddings via ONNX Runtime, Euclidean
//! distance matching against a read-only catalog of known identities.

pub mod alignment;
pub mod catalog;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use catalog::{CatalogError, IdentityKey, IdentityStore, Metadata};
pub use detector::{DetectorError, ScrfdDetector};
pub use recognizer::{ArcFaceEmbedder, RecognizerError};
pub use types::{BoundingBox, Detect, DistanceMatcher, Embed, Embedding, MatchResult, Matcher};

use std::path::PathBuf;

/// Default location for ONNX models: `$XDG_DATA_HOME/presensi/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory: `$XDG_DATA_HOME/presensi` or `~/.local/share/presensi`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presensi")
}
