//! Identity store: known embeddings, display names and per-person metadata.
//!
//! Loaded once at startup from two JSON files and never mutated afterwards.
//! Every name that enters the process goes through [`IdentityKey`] so the
//! catalog, the metadata table, the attendance memory and the speech cache all
//! agree on one spelling.

use crate::types::{Embedding, MatchResult, Matcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{kind} file not found: {path}")]
    NotFound { kind: &'static str, path: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// Normalized identity name: trimmed, inner whitespace collapsed, uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(raw: &str) -> Self {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Self(collapsed.to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name form: lowercase, spaces as `_`, every other byte that is
    /// not ASCII alphanumeric percent-encoded. Distinct keys never share a
    /// slug.
    pub fn slug(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_lowercase());
            } else if c == ' ' {
                out.push('_');
            } else {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
        out
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Organisation and role shown on the kiosk popup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Metadata {
    #[serde(alias = "instansi", default = "unknown_field")]
    pub org: String,
    #[serde(default = "unknown_field")]
    pub status: String,
}

fn unknown_field() -> String {
    "-".to_string()
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            org: unknown_field(),
            status: unknown_field(),
        }
    }
}

/// On-disk catalog layout produced by the trainer.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(alias = "encodings")]
    embeddings: Vec<Vec<f32>>,
    names: Vec<String>,
}

/// Read-only catalog of known identities.
///
/// Parallel arrays: `names[i]` owns `embeddings[i]`. One person may appear
/// several times (one entry per training photo).
#[derive(Debug, Default)]
pub struct IdentityStore {
    embeddings: Vec<Embedding>,
    names: Vec<IdentityKey>,
    metadata: HashMap<IdentityKey, Metadata>,
}

impl IdentityStore {
    /// Load catalog and metadata files. Either file missing is an error.
    pub fn load(catalog_path: &Path, metadata_path: &Path) -> Result<Self, CatalogError> {
        let catalog: CatalogFile = read_json("catalog", catalog_path)?;
        let metadata: HashMap<String, Metadata> = read_json("metadata", metadata_path)?;

        let store = Self::from_parts(catalog.embeddings, catalog.names, metadata)?;
        tracing::info!(
            catalog = %catalog_path.display(),
            entries = store.len(),
            identities = store.identity_count(),
            dim = store.dimension().unwrap_or(0),
            "identity store loaded"
        );
        Ok(store)
    }

    /// Build a store from in-memory parts, enforcing the parallel-array invariant.
    pub fn from_parts(
        embeddings: Vec<Vec<f32>>,
        names: Vec<String>,
        metadata: HashMap<String, Metadata>,
    ) -> Result<Self, CatalogError> {
        if embeddings.len() != names.len() {
            return Err(CatalogError::Invalid(format!(
                "{} embeddings but {} names",
                embeddings.len(),
                names.len()
            )));
        }

        if let Some(first) = embeddings.first() {
            let dim = first.len();
            if let Some(pos) = embeddings.iter().position(|e| e.len() != dim) {
                return Err(CatalogError::Invalid(format!(
                    "entry {pos} has dimension {}, expected {dim}",
                    embeddings[pos].len()
                )));
            }
        }

        Ok(Self {
            embeddings: embeddings.into_iter().map(Embedding::new).collect(),
            names: names.iter().map(|n| IdentityKey::new(n)).collect(),
            metadata: metadata
                .into_iter()
                .map(|(name, meta)| (IdentityKey::new(&name), meta))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of distinct identities (entries collapse per person).
    pub fn identity_count(&self) -> usize {
        let mut distinct: Vec<&IdentityKey> = self.names.iter().collect();
        distinct.sort();
        distinct.dedup();
        distinct.len()
    }

    /// Embedding dimensionality, or `None` for an empty catalog.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Embedding::dim)
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn name(&self, index: usize) -> Option<&IdentityKey> {
        self.names.get(index)
    }

    /// Metadata for an identity, defaulting to `-` fields when absent.
    pub fn metadata(&self, key: &IdentityKey) -> Metadata {
        self.metadata.get(key).cloned().unwrap_or_default()
    }

    /// Identify a probe embedding, returning the accepted identity if any.
    pub fn identify<M: Matcher>(&self, matcher: &M, probe: &Embedding) -> (Option<&IdentityKey>, MatchResult) {
        let result = matcher.compare(probe, &self.embeddings);
        (result.index.and_then(|i| self.names.get(i)), result)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(kind: &'static str, path: &Path) -> Result<T, CatalogError> {
    if !path.exists() {
        return Err(CatalogError::NotFound {
            kind,
            path: path.display().to_string(),
        });
    }
    let raw = std::fs::read(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}
