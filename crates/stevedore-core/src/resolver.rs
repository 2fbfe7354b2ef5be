//! Layer chain resolution: reuse stored layers by ChainID, register the rest.

use crate::extract::decompress;
use crate::progress::{ProgressReader, ProgressSink};
use crate::safepath::ArchiveRoot;
use crate::LoadError;
use stevedore_schema::{short_id, DiffId, RootFs};
use stevedore_store::{log_release_metadata, LayerGuard, LayerStore};
use tracing::debug;

const PHASE_LOADING: &str = "Loading layer";

/// Handles acquired while resolving one image's layers, plus the stack built so far.
///
/// Dropping the chain releases every handle; [`release`](Self::release) does
/// the same but reports failures and logs deallocated layers.
pub struct ResolvedChain<'s> {
    rootfs: RootFs,
    handles: Vec<LayerGuard<'s>>,
}

impl<'s> ResolvedChain<'s> {
    /// Start from an inherited stack (a legacy parent's) or an empty one.
    pub fn new(base: RootFs) -> Self {
        Self {
            rootfs: base,
            handles: Vec::new(),
        }
    }

    pub fn rootfs(&self) -> &RootFs {
        &self.rootfs
    }

    /// Resolve the next declared layer on top of the current stack.
    pub fn push_declared(
        &mut self,
        layers: &'s LayerStore,
        root: &ArchiveRoot,
        index: usize,
        diff_id: &DiffId,
        blob: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), LoadError> {
        let (handle, rootfs) =
            resolve_layer(layers, root, &self.rootfs, index, diff_id, blob, progress)?;
        self.handles.push(handle);
        self.rootfs = rootfs;
        Ok(())
    }

    /// Register a layer whose DiffID is not declared anywhere.
    pub fn push_undeclared(
        &mut self,
        layers: &'s LayerStore,
        root: &ArchiveRoot,
        blob: &str,
        progress_id: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), LoadError> {
        let handle = load_layer(layers, root, &self.rootfs, blob, progress_id, progress)?;
        self.rootfs.append(handle.diff_id.clone());
        self.handles.push(handle);
        Ok(())
    }

    pub fn release(self) -> Result<(), LoadError> {
        for handle in self.handles.into_iter().rev() {
            let released = handle.release()?;
            log_release_metadata(&released);
        }
        Ok(())
    }
}

/// Resolve `diff_id` on top of `parent`, returning a handle and the extended stack.
///
/// A stored layer with the resulting ChainID is reused without touching the
/// blob. Otherwise the blob is decompressed and registered against the
/// parent's ChainID, and its computed DiffID must equal the declared one.
pub fn resolve_layer<'s>(
    layers: &'s LayerStore,
    root: &ArchiveRoot,
    parent: &RootFs,
    index: usize,
    diff_id: &DiffId,
    blob: &str,
    progress: &dyn ProgressSink,
) -> Result<(LayerGuard<'s>, RootFs), LoadError> {
    root.check(blob)?;

    let candidate = parent.with_layer(diff_id.clone());
    let chain_id = candidate
        .chain_id()
        .ok_or_else(|| LoadError::InvalidConfig {
            path: blob.to_owned(),
            reason: "empty layer chain".to_owned(),
        })?;

    let handle = match layers.get(&chain_id)? {
        Some(handle) => {
            debug!("layer {} already stored as {chain_id}", short_id(diff_id));
            handle
        }
        None => load_layer(layers, root, parent, blob, diff_id, progress)?,
    };

    if handle.diff_id != *diff_id {
        return Err(LoadError::ManifestIntegrity {
            index,
            expected: diff_id.to_string(),
            actual: handle.diff_id.to_string(),
        });
    }

    Ok((handle, candidate))
}

/// Decompress a layer blob and register it on top of `parent`.
pub fn load_layer<'s>(
    layers: &'s LayerStore,
    root: &ArchiveRoot,
    parent: &RootFs,
    blob: &str,
    progress_id: &str,
    progress: &dyn ProgressSink,
) -> Result<LayerGuard<'s>, LoadError> {
    let path = root.path().join(blob);
    let file = root.open_file(blob)?;
    let total = file.metadata().map(|m| m.len()).ok();

    let reader = ProgressReader::new(file, progress, short_id(progress_id), PHASE_LOADING, total);
    let inflated = decompress(reader).map_err(|e| LoadError::io(&path, e))?;
    let parent_chain = parent.chain_id();

    debug!("registering {} on {:?}", path.display(), parent_chain);
    Ok(layers.register(inflated, parent_chain.as_ref())?)
}
