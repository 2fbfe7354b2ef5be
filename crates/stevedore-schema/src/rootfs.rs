use crate::digest::Digest;
use crate::types::{ChainId, DiffId};
use serde::{Deserialize, Serialize};

/// The only root filesystem type an image config may declare.
pub const TYPE_LAYERS: &str = "layers";

/// Ordered layer stack of an image, base first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_ids: Vec<DiffId>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RootFs {
    pub fn new() -> Self {
        Self {
            fs_type: TYPE_LAYERS.to_owned(),
            diff_ids: Vec::new(),
        }
    }

    pub fn append(&mut self, diff_id: DiffId) {
        self.diff_ids.push(diff_id);
    }

    /// A copy of this stack with one more layer on top.
    #[must_use]
    pub fn with_layer(&self, diff_id: DiffId) -> Self {
        let mut next = self.clone();
        next.append(diff_id);
        next
    }

    /// ChainID of the full stack, or `None` for an empty stack.
    pub fn chain_id(&self) -> Option<ChainId> {
        chain_id(&self.diff_ids)
    }

    pub fn len(&self) -> usize {
        self.diff_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diff_ids.is_empty()
    }
}

/// ChainID of an ordered DiffID sequence.
///
/// `ChainID(L0) = DiffID(L0)` and
/// `ChainID(L0..n) = sha256(ChainID(L0..n-1) + " " + DiffID(Ln))`.
pub fn chain_id(diff_ids: &[DiffId]) -> Option<ChainId> {
    diff_ids
        .iter()
        .fold(None, |parent, diff_id| Some(child_chain_id(parent.as_ref(), diff_id)))
}

/// ChainID of `diff_id` stacked on `parent`.
pub fn child_chain_id(parent: Option<&ChainId>, diff_id: &DiffId) -> ChainId {
    match parent {
        None => ChainId::new(diff_id.as_str()),
        Some(parent) => Digest::sha256(format!("{parent} {diff_id}").as_bytes()).into(),
    }
}
