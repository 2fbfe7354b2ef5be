use crate::concurrency::StoreLock;
use crate::format::{self, Layout};
use crate::progress::ProgressSink;
use crate::resolver::ResolvedChain;
use crate::safepath::ArchiveRoot;
use crate::tagger::Tagger;
use crate::{extract, legacy, oci, LoadError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stevedore_schema::{ImageConfig, ImageId, ManifestItem, Reference, RootFs};
use stevedore_store::{ImageStore, LayerStore, ReferenceStore, StoreLayout};
use tracing::{debug, info};

/// Caller-supplied naming for one import.
///
/// Only OCI layouts consult these: either `name` (each manifest's reference
/// name annotation becomes its tag) or `refs` (annotation -> full reference).
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub name: Option<String>,
    pub refs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedTag {
    pub reference: String,
    pub image: ImageId,
}

/// Outcome of a successful import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub layout: String,
    /// Images created or found, in load order, without duplicates.
    pub images: Vec<ImageId>,
    pub tags: Vec<LoadedTag>,
}

impl LoadReport {
    fn record_image(&mut self, id: &ImageId) {
        if !self.images.contains(id) {
            self.images.push(id.clone());
        }
    }
}

/// Entry point of the import pipeline, bound to one store root.
pub struct Loader {
    layout: StoreLayout,
    layers: Arc<LayerStore>,
    images: ImageStore,
    references: ReferenceStore,
}

impl Loader {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        let layout = StoreLayout::new(store_root.into());
        let layers = Arc::new(LayerStore::new(layout.clone()));
        let images = ImageStore::new(layout.clone(), Arc::clone(&layers));
        let references = ReferenceStore::new(layout.clone());
        Self {
            layout,
            layers,
            images,
            references,
        }
    }

    pub fn store_layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn references(&self) -> &ReferenceStore {
        &self.references
    }

    /// Import an archive stream (plain, gzip or zstd tar).
    ///
    /// The archive is unpacked into a temporary workspace under the store's
    /// staging directory, which is removed on every exit path. Status lines go
    /// to `out`. Work committed before a failure is not rolled back.
    pub fn load(
        &self,
        input: impl Read,
        options: &LoadOptions,
        out: &mut dyn Write,
        progress: &dyn ProgressSink,
    ) -> Result<LoadReport, LoadError> {
        self.layout.initialize()?;
        let staging = self.layout.staging_dir();
        let workspace = tempfile::Builder::new()
            .prefix("import-")
            .tempdir_in(&staging)
            .map_err(|e| LoadError::io(&staging, e))?;

        debug!("extracting archive into {}", workspace.path().display());
        extract::unpack(input, workspace.path())?;
        self.load_extracted(workspace.path(), options, out, progress)
    }

    /// Import an archive that has already been extracted to `dir`.
    pub fn load_extracted(
        &self,
        dir: &Path,
        options: &LoadOptions,
        out: &mut dyn Write,
        progress: &dyn ProgressSink,
    ) -> Result<LoadReport, LoadError> {
        self.layout.initialize()?;
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let root = ArchiveRoot::open(dir)?;

        let layout = format::detect(&root)?;
        info!("loading {} archive", layout.name());
        if (options.name.is_some() || !options.refs.is_empty()) && layout != Layout::Oci {
            debug!("target naming only applies to OCI layouts; ignoring it");
        }

        let mut session = Session {
            root,
            layers: &self.layers,
            images: &self.images,
            tagger: Tagger::new(&self.references, out),
            progress,
            report: LoadReport {
                layout: layout.name().to_owned(),
                ..Default::default()
            },
        };

        match layout {
            Layout::Oci => {
                let items = oci::manifest_items(&session.root, options)?;
                session.load_items(&items)?;
            }
            Layout::Structured(items) => session.load_items(&items)?,
            Layout::Legacy => legacy::load(&mut session)?,
        }

        let report = session.report;
        info!(
            "loaded {} image(s), {} tag(s)",
            report.images.len(),
            report.tags.len()
        );
        Ok(report)
    }
}

/// State shared by the layout adapters during one import.
pub(crate) struct Session<'a> {
    pub(crate) root: ArchiveRoot,
    pub(crate) layers: &'a LayerStore,
    pub(crate) images: &'a ImageStore,
    tagger: Tagger<'a>,
    pub(crate) progress: &'a dyn ProgressSink,
    report: LoadReport,
}

impl Session<'_> {
    pub(crate) fn load_items(&mut self, items: &[ManifestItem]) -> Result<(), LoadError> {
        for item in items {
            self.load_item(item)?;
        }
        Ok(())
    }

    /// Resolve an item's layers, create its image, then tag it.
    fn load_item(&mut self, item: &ManifestItem) -> Result<ImageId, LoadError> {
        let references = item
            .repo_tags
            .iter()
            .map(String::as_str)
            .map(parse_reference)
            .collect::<Result<Vec<_>, _>>()?;

        let config = self.root.read(&item.config)?;
        let parsed = ImageConfig::from_json(&config).map_err(|e| LoadError::InvalidConfig {
            path: item.config.clone(),
            reason: e.to_string(),
        })?;
        if parsed.rootfs.len() != item.layers.len() {
            return Err(LoadError::InvalidConfig {
                path: item.config.clone(),
                reason: format!(
                    "layers length mismatch: config declares {}, manifest lists {}",
                    parsed.rootfs.len(),
                    item.layers.len()
                ),
            });
        }

        let mut chain = ResolvedChain::new(RootFs::new());
        for (index, (diff_id, blob)) in parsed.rootfs.diff_ids.iter().zip(&item.layers).enumerate() {
            chain.push_declared(self.layers, &self.root, index, diff_id, blob, self.progress)?;
        }

        let id = self.images.create(&config)?;
        chain.release()?;
        self.record_image(&id);

        for reference in &references {
            self.bind(reference, &id)?;
        }
        Ok(id)
    }

    pub(crate) fn record_image(&mut self, id: &ImageId) {
        self.report.record_image(id);
    }

    pub(crate) fn bind(&mut self, reference: &Reference, id: &ImageId) -> Result<(), LoadError> {
        self.tagger.bind(reference, id)?;
        self.report.tags.push(LoadedTag {
            reference: reference.to_string(),
            image: id.clone(),
        });
        Ok(())
    }
}

pub(crate) fn parse_reference(s: &str) -> Result<Reference, LoadError> {
    Reference::parse(s).map_err(|e| LoadError::InvalidReference(e.to_string()))
}
