use crate::digest::Digest;
use crate::rootfs::{RootFs, TYPE_LAYERS};
use crate::types::ImageId;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One build step in an image's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// Parsed image configuration.
///
/// Only the fields the importer interprets are typed; everything else is kept
/// verbatim in `extra`. The image ID is always computed over the original bytes,
/// never over a re-serialization of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, SchemaError> {
        let config: ImageConfig = serde_json::from_slice(data)
            .map_err(|e| SchemaError::InvalidConfig(e.to_string()))?;

        if config.rootfs.fs_type != TYPE_LAYERS {
            return Err(SchemaError::InvalidConfig(format!(
                "unsupported rootfs type '{}'",
                config.rootfs.fs_type
            )));
        }
        for diff_id in &config.rootfs.diff_ids {
            Digest::parse(diff_id).map_err(|e| {
                SchemaError::InvalidConfig(format!("bad diff_id '{diff_id}': {e}"))
            })?;
        }

        Ok(config)
    }

    /// Content-addressed identity of a raw configuration payload.
    pub fn id_of(data: &[u8]) -> ImageId {
        Digest::sha256(data).into()
    }

    pub fn created(&self) -> Option<&str> {
        self.extra.get("created").and_then(Value::as_str)
    }

    pub fn architecture(&self) -> Option<&str> {
        self.extra.get("architecture").and_then(Value::as_str)
    }

    pub fn os(&self) -> Option<&str> {
        self.extra.get("os").and_then(Value::as_str)
    }
}
