//! Import pipeline for stevedore image archives.
//!
//! This crate turns an image archive into stored layers, images and tags: it
//! extracts the archive into a scoped workspace, guards every path read from
//! untrusted manifests (`safepath`), detects the archive layout (`format`),
//! normalizes OCI and legacy layouts into manifest items (`oci`, `legacy`),
//! resolves layer chains against the layer store (`resolver`), and binds
//! references (`tagger`). `Loader` is the entry point.

pub mod concurrency;
pub mod extract;
pub mod format;
pub mod legacy;
pub mod loader;
pub mod oci;
pub mod progress;
pub mod resolver;
pub mod safepath;
pub mod tagger;

pub use concurrency::StoreLock;
pub use format::Layout;
pub use loader::{LoadOptions, LoadReport, Loader};
pub use progress::{NoProgress, ProgressSink};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("path '{path}' escapes archive root {}", root.display())]
    PathEscape { root: PathBuf, path: String },
    #[error("layer {index} content does not match manifest: declared {expected}, computed {actual}")]
    ManifestIntegrity {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("invalid image config '{path}': {reason}")]
    InvalidConfig { path: String, reason: String },
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("image manifest {digest} has no reference name annotation")]
    MissingRefAnnotation { digest: String },
    #[error("no target reference given for '{0}'")]
    UnmappedRef(String),
    #[error("a target name and a reference map are mutually exclusive")]
    AmbiguousTarget,
    #[error("an OCI layout needs a target name or a reference map")]
    MissingTarget,
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] stevedore_store::StoreError),
    #[error("schema error: {0}")]
    Schema(#[from] stevedore_schema::SchemaError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure comes from the archive contents rather than the store.
    pub fn is_archive_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Io { .. })
    }
}
