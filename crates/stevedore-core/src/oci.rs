//! OCI image layout adapter: `index.json` plus content-addressed blobs.

use crate::loader::{parse_reference, LoadOptions};
use crate::safepath::ArchiveRoot;
use crate::LoadError;
use std::collections::BTreeMap;
use std::path::Path;
use stevedore_schema::manifest::OCI_INDEX_FILE;
use stevedore_schema::reference::validate_name;
use stevedore_schema::{
    Descriptor, DescriptorExt, ImageIndex, ImageManifest, ManifestItem, Reference,
};
use tracing::debug;

/// How manifests in the index are turned into references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OciNaming {
    /// Every manifest is tagged `<name>:<ref.name annotation>`.
    Name(String),
    /// Each `ref.name` annotation maps to a full reference.
    Refs(BTreeMap<String, Reference>),
}

impl OciNaming {
    /// Exactly one of a target name or a non-empty reference map is required.
    pub fn from_options(options: &LoadOptions) -> Result<Self, LoadError> {
        let name = options.name.as_deref().filter(|n| !n.is_empty());
        match (name, options.refs.is_empty()) {
            (Some(_), false) => Err(LoadError::AmbiguousTarget),
            (None, true) => Err(LoadError::MissingTarget),
            (Some(name), true) => {
                validate_name(name).map_err(|e| LoadError::InvalidReference(e.to_string()))?;
                Ok(Self::Name(name.to_owned()))
            }
            (None, false) => options
                .refs
                .iter()
                .map(|(ref_name, target)| -> Result<_, LoadError> {
                    Ok((ref_name.clone(), parse_reference(target)?))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Refs),
        }
    }

    pub fn reference_for(&self, ref_name: &str) -> Result<Reference, LoadError> {
        match self {
            Self::Name(name) => Reference::new(name, ref_name)
                .map_err(|e| LoadError::InvalidReference(e.to_string())),
            Self::Refs(refs) => refs
                .get(ref_name)
                .cloned()
                .ok_or_else(|| LoadError::UnmappedRef(ref_name.to_owned())),
        }
    }
}

fn blob_path(descriptor: &Descriptor) -> Result<String, LoadError> {
    Ok(path_string(&descriptor.blob_path()?))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Read the index of an OCI layout and produce one manifest item per image manifest.
///
/// Index entries of other media types (nested indexes, attestations) are skipped.
pub fn manifest_items(
    root: &ArchiveRoot,
    options: &LoadOptions,
) -> Result<Vec<ManifestItem>, LoadError> {
    let naming = OciNaming::from_options(options)?;

    let index_bytes = root.read(OCI_INDEX_FILE)?;
    let index: ImageIndex = serde_json::from_slice(&index_bytes)
        .map_err(|e| LoadError::json(root.path().join(OCI_INDEX_FILE), e))?;

    let mut items = Vec::new();
    for descriptor in index.manifests() {
        if !descriptor.is_image_manifest() {
            debug!(
                "skipping index entry {} of type '{}'",
                descriptor.digest(),
                descriptor.media_type()
            );
            continue;
        }

        let manifest_path = blob_path(descriptor)?;
        let manifest_bytes = root.read(&manifest_path)?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| LoadError::json(root.path().join(&manifest_path), e))?;

        let ref_name = descriptor
            .ref_name()
            .ok_or_else(|| LoadError::MissingRefAnnotation {
                digest: descriptor.digest().to_string(),
            })?;
        let reference = naming.reference_for(ref_name)?;

        let layers = manifest
            .layers()
            .iter()
            .map(blob_path)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "manifest {} ({} layer(s)) will be tagged {reference}",
            descriptor.digest(),
            layers.len()
        );
        items.push(ManifestItem {
            config: blob_path(manifest.config())?,
            repo_tags: vec![reference.to_string()],
            layers,
        });
    }

    Ok(items)
}
