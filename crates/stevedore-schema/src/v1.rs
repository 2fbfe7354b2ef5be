//! Migration of legacy per-directory image JSON into the current config schema.
//!
//! A legacy image directory carries one JSON document per layer. Each document
//! becomes one history entry, and the document of the topmost layer becomes the
//! new image configuration once the per-layer bookkeeping keys are removed and
//! the accumulated `rootfs` and `history` are attached.

use crate::config::History;
use crate::rootfs::RootFs;
use crate::SchemaError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Configs written by engines older than this carry fields that are not part
/// of the v1 image schema and are dropped before migration.
const NO_FALLBACK_MIN_VERSION: &str = "1.8.3";

/// Keys the v1 image schema defines.
const V1_FIELDS: &[&str] = &[
    "id",
    "parent",
    "comment",
    "created",
    "container",
    "container_config",
    "docker_version",
    "author",
    "config",
    "architecture",
    "variant",
    "os",
    "Size",
];

/// Per-layer keys with no meaning in a content-addressed config.
const STRIPPED_FIELDS: &[&str] = &["id", "parent", "Size", "parent_id", "layer_id", "throwaway"];

#[derive(Debug, Default, Deserialize)]
struct V1Header {
    #[serde(default, rename = "parent")]
    parent_lower: Option<String>,
    #[serde(default, rename = "Parent")]
    parent_upper: Option<String>,
    #[serde(default)]
    docker_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V1ContainerConfig {
    #[serde(default, rename = "Cmd")]
    cmd: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct V1HistorySource {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    container_config: Option<V1ContainerConfig>,
}

/// The old identifier of the parent image declared by a legacy JSON document, if any.
pub fn parent_of(image_json: &[u8]) -> Result<Option<String>, SchemaError> {
    let header: V1Header = serde_json::from_slice(image_json)?;
    Ok(header
        .parent_lower
        .or(header.parent_upper)
        .filter(|p| !p.is_empty()))
}

/// Build the history entry describing the layer a legacy JSON document introduced.
pub fn history_from_config(image_json: &[u8], empty_layer: bool) -> Result<History, SchemaError> {
    let src: V1HistorySource = serde_json::from_slice(image_json)?;
    let created_by = src
        .container_config
        .and_then(|c| c.cmd)
        .map(|cmd| cmd.join(" "))
        .filter(|s| !s.is_empty());

    Ok(History {
        created: src.created,
        author: src.author.filter(|s| !s.is_empty()),
        created_by,
        comment: src.comment.filter(|s| !s.is_empty()),
        empty_layer,
    })
}

/// Produce a current-schema config from a legacy JSON document.
pub fn config_from_v1(
    image_json: &[u8],
    rootfs: &RootFs,
    history: &[History],
) -> Result<Vec<u8>, SchemaError> {
    let header: V1Header = serde_json::from_slice(image_json)?;
    let mut fields: Map<String, Value> = serde_json::from_slice(image_json)?;

    let engine_version = header.docker_version.unwrap_or_default();
    if version_less_than(&engine_version, NO_FALLBACK_MIN_VERSION) {
        fields.retain(|key, _| V1_FIELDS.contains(&key.as_str()));
    }

    for key in STRIPPED_FIELDS {
        fields.remove(*key);
    }
    fields.insert("rootfs".to_owned(), serde_json::to_value(rootfs)?);
    fields.insert("history".to_owned(), serde_json::to_value(history)?);

    Ok(serde_json::to_vec(&fields)?)
}

/// Dotted numeric version comparison; missing or non-numeric segments count as 0.
fn version_less_than(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|s| s.parse().unwrap_or(0)).collect() };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x < y;
        }
    }
    false
}
