//! Data model and on-disk formats for stevedore image archives.
//!
//! This crate defines the schema layer: digest parsing and hashing (`Digest`),
//! typed identifiers (`DiffId`, `ChainId`, `ImageId`), layer stacks with
//! deterministic chain identity (`RootFs`), image configuration records
//! (`ImageConfig`, `History`), migration of legacy per-directory image JSON
//! (`v1`), repository:tag references (`Reference`), and the three archive
//! layouts an import understands (`manifest`).

pub mod config;
pub mod digest;
pub mod manifest;
pub mod reference;
pub mod rootfs;
pub mod types;
pub mod v1;

pub use config::{History, ImageConfig};
pub use digest::{Digest, HashingReader};
pub use manifest::{
    parse_manifest, Descriptor, DescriptorExt, ImageIndex, ImageManifest, ManifestItem,
    Repositories,
};
pub use reference::Reference;
pub use rootfs::{chain_id, child_chain_id, RootFs};
pub use types::{short_id, ChainId, DiffId, ImageId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid digest '{0}'")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("invalid image config: {0}")]
    InvalidConfig(String),
    #[error("invalid reference format: {0}")]
    InvalidReference(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
