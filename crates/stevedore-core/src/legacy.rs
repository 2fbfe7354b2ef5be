//! Legacy per-directory layout: one directory per image, linked by parent IDs.
//!
//! Each directory holds a `json` config naming its parent directory and a
//! single `layer.tar`. Ancestors are loaded before descendants using an
//! explicit stack; the load map from old directory names to new image IDs
//! doubles as the visited set, so shared ancestors are loaded once.

use crate::loader::Session;
use crate::resolver::ResolvedChain;
use crate::LoadError;
use std::collections::{HashMap, HashSet};
use stevedore_schema::manifest::{LEGACY_CONFIG_FILE, LEGACY_LAYER_FILE, LEGACY_REPOSITORIES_FILE};
use stevedore_schema::{v1, History, ImageId, Reference, Repositories, RootFs, SchemaError};
use tracing::{debug, warn};

type LoadMap = HashMap<String, ImageId>;

/// A legacy image whose ancestors are still being loaded.
struct Pending {
    old_id: String,
    json: Vec<u8>,
    parent: Option<String>,
}

fn config_path(old_id: &str) -> String {
    format!("{old_id}/{LEGACY_CONFIG_FILE}")
}

fn invalid_config(old_id: &str, e: &SchemaError) -> LoadError {
    LoadError::InvalidConfig {
        path: config_path(old_id),
        reason: e.to_string(),
    }
}

/// Load every image directory under the session root, then apply the
/// repositories file if there is one.
pub(crate) fn load(session: &mut Session<'_>) -> Result<(), LoadError> {
    let mut dirs = Vec::new();
    for name in session.root.subdirectories()? {
        match name {
            Ok(name) => dirs.push(name),
            Err(name) => warn!("skipping non UTF-8 image directory {name:?}"),
        }
    }
    dirs.sort();
    debug!("legacy archive has {} image directories", dirs.len());

    let mut loaded = LoadMap::new();
    for old_id in &dirs {
        load_with_ancestors(session, old_id, &mut loaded)?;
    }

    apply_repositories(session, &loaded)
}

/// Load `old_id` after every ancestor it declares.
fn load_with_ancestors(
    session: &mut Session<'_>,
    old_id: &str,
    loaded: &mut LoadMap,
) -> Result<(), LoadError> {
    let mut stack = Vec::new();
    let mut visiting = HashSet::new();
    let mut next = Some(old_id.to_owned());

    while let Some(id) = next.take() {
        if loaded.contains_key(&id) {
            break;
        }
        if !visiting.insert(id.clone()) {
            return Err(LoadError::InvalidConfig {
                path: config_path(&id),
                reason: format!("parent chain of {old_id} loops back to {id}"),
            });
        }
        let json = session.root.read(config_path(&id))?;
        let parent = v1::parent_of(&json).map_err(|e| invalid_config(&id, &e))?;
        if let Some(parent) = &parent {
            debug!("legacy image {id} has parent {parent}");
        }
        next.clone_from(&parent);
        stack.push(Pending {
            old_id: id,
            json,
            parent,
        });
    }

    while let Some(pending) = stack.pop() {
        let image_id = load_one(session, &pending, loaded)?;
        loaded.insert(pending.old_id, image_id);
    }
    Ok(())
}

/// Migrate one legacy image whose parent (if any) is already in `loaded`.
fn load_one(
    session: &mut Session<'_>,
    pending: &Pending,
    loaded: &LoadMap,
) -> Result<ImageId, LoadError> {
    let old_id = pending.old_id.as_str();
    let parent_id = match &pending.parent {
        Some(parent) => Some(loaded.get(parent).cloned().ok_or_else(|| {
            LoadError::InvalidReference(format!("parent {parent} of {old_id} was not loaded"))
        })?),
        None => None,
    };

    let (rootfs, mut history): (RootFs, Vec<History>) = match &parent_id {
        Some(parent_id) => {
            let parent = session.images.get(parent_id)?;
            (parent.config.rootfs, parent.config.history)
        }
        None => (RootFs::new(), Vec::new()),
    };

    let mut chain = ResolvedChain::new(rootfs);
    chain.push_undeclared(
        session.layers,
        &session.root,
        &format!("{old_id}/{LEGACY_LAYER_FILE}"),
        old_id,
        session.progress,
    )?;

    history.push(v1::history_from_config(&pending.json, false).map_err(|e| invalid_config(old_id, &e))?);
    let config = v1::config_from_v1(&pending.json, chain.rootfs(), &history)
        .map_err(|e| invalid_config(old_id, &e))?;

    let image_id = session.images.create(&config)?;
    chain.release()?;

    if let Some(parent_id) = &parent_id {
        session.images.set_parent(&image_id, parent_id)?;
    }
    session.record_image(&image_id);
    debug!("legacy image {old_id} loaded as {image_id}");
    Ok(image_id)
}

/// Tag loaded images from the `repositories` file: repository -> tag -> old ID.
fn apply_repositories(session: &mut Session<'_>, loaded: &LoadMap) -> Result<(), LoadError> {
    let Some(bytes) = session.root.read_optional(LEGACY_REPOSITORIES_FILE)? else {
        debug!("no {LEGACY_REPOSITORIES_FILE} file, nothing to tag");
        return Ok(());
    };
    let repositories: Repositories = serde_json::from_slice(&bytes)
        .map_err(|e| LoadError::json(session.root.path().join(LEGACY_REPOSITORIES_FILE), e))?;

    for (name, tags) in &repositories {
        for (tag, old_id) in tags {
            let image_id = loaded
                .get(old_id)
                .cloned()
                .ok_or_else(|| LoadError::InvalidReference(format!("invalid target ID: {old_id}")))?;
            let reference = Reference::new(name, tag)
                .map_err(|e| LoadError::InvalidReference(e.to_string()))?;
            session.bind(&reference, &image_id)?;
        }
    }
    Ok(())
}
