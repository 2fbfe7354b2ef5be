//! File names and document shapes of the three archive layouts.

use crate::digest::Digest;
use crate::SchemaError;
pub use oci_spec::image::{Descriptor, ImageIndex, ImageManifest, MediaType, ANNOTATION_REF_NAME};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Structured multi-image manifest at the archive root.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Marker file identifying an OCI image layout.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";
/// Image index of an OCI image layout.
pub const OCI_INDEX_FILE: &str = "index.json";
/// Per-image configuration inside a legacy image directory.
pub const LEGACY_CONFIG_FILE: &str = "json";
/// Per-image layer inside a legacy image directory.
pub const LEGACY_LAYER_FILE: &str = "layer.tar";
/// Legacy `{repo: {tag: old_id}}` map at the archive root.
pub const LEGACY_REPOSITORIES_FILE: &str = "repositories";

/// Pre-1.0 spelling of [`ANNOTATION_REF_NAME`], still found in older layouts.
pub const ANNOTATION_REF_NAME_LEGACY: &str = "org.opencontainers.ref.name";

/// One image entry of a structured manifest: where its config and layers live
/// relative to the archive root, and which tags to apply once it is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default, deserialize_with = "null_as_default")]
    pub repo_tags: Vec<String>,
    #[serde(rename = "Layers", default, deserialize_with = "null_as_default")]
    pub layers: Vec<String>,
}

/// Parse the structured manifest document (an ordered list of entries).
pub fn parse_manifest(data: &[u8]) -> Result<Vec<ManifestItem>, SchemaError> {
    Ok(serde_json::from_slice(data)?)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Layout-level helpers on OCI descriptors.
pub trait DescriptorExt {
    /// Location of the described blob relative to the layout root.
    fn blob_path(&self) -> Result<PathBuf, SchemaError>;

    /// The reference name annotation, in either its current or pre-1.0 spelling.
    fn ref_name(&self) -> Option<&str>;

    fn is_image_manifest(&self) -> bool;
}

impl DescriptorExt for Descriptor {
    fn blob_path(&self) -> Result<PathBuf, SchemaError> {
        Ok(Digest::parse(self.digest())?.blob_path())
    }

    fn ref_name(&self) -> Option<&str> {
        let annotations = self.annotations().as_ref()?;
        annotations
            .get(ANNOTATION_REF_NAME)
            .or_else(|| annotations.get(ANNOTATION_REF_NAME_LEGACY))
            .map(String::as_str)
    }

    fn is_image_manifest(&self) -> bool {
        *self.media_type() == MediaType::ImageManifest
    }
}

/// Legacy repositories file: repository name -> tag -> old image identifier.
pub type Repositories = BTreeMap<String, BTreeMap<String, String>>;
