//! Layer, image and reference stores working together on one root.

use std::sync::Arc;
use stevedore_schema::{chain_id, Digest, DiffId, ImageConfig, Reference, RootFs};
use stevedore_store::{
    verify_store_integrity, ImageStore, LayerGuard, LayerStore, ReferenceStore, StoreError, StoreLayout,
};

fn layer_tar(name: &str, content: &[u8]) -> Vec<u8> {
    let mut ar = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    ar.append_data(&mut header, name, content).unwrap();
    ar.into_inner().unwrap()
}

fn open_store(root: &std::path::Path) -> (StoreLayout, Arc<LayerStore>, ImageStore, ReferenceStore) {
    let layout = StoreLayout::new(root);
    layout.initialize().unwrap();
    let layers = Arc::new(LayerStore::new(layout.clone()));
    let images = ImageStore::new(layout.clone(), Arc::clone(&layers));
    let refs = ReferenceStore::new(layout.clone());
    (layout, layers, images, refs)
}

#[test]
fn three_layer_image_survives_handle_release() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, layers, images, refs) = open_store(dir.path());

    let blobs = [
        layer_tar("base", b"base"),
        layer_tar("mid", b"mid"),
        layer_tar("top", b"top"),
    ];
    let mut guards: Vec<LayerGuard<'_>> = Vec::new();
    let mut rootfs = RootFs::new();
    for blob in &blobs {
        let parent = guards.last().map(|g| g.chain_id.clone());
        let guard = layers.register(blob.as_slice(), parent.as_ref()).unwrap();
        rootfs.append(guard.diff_id.clone());
        guards.push(guard);
    }

    let expected: Vec<DiffId> = blobs.iter().map(|b| DiffId::from(Digest::sha256(b))).collect();
    assert_eq!(rootfs.diff_ids, expected);
    assert_eq!(guards[2].chain_id, chain_id(&expected).unwrap());

    let config = serde_json::to_vec(&serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "rootfs": rootfs,
    }))
    .unwrap();
    let id = images.create(&config).unwrap();
    assert_eq!(id, ImageConfig::id_of(&config));
    refs.add_tag(&Reference::parse("sample:latest").unwrap(), &id, false)
        .unwrap();

    for guard in guards {
        assert!(guard.release().unwrap().is_empty());
    }
    assert_eq!(layers.active_handles(), 0);
    assert_eq!(layers.list().unwrap().len(), 3);

    let report = verify_store_integrity(&layout).unwrap();
    assert!(report.is_clean(), "{:?}", report.failed);
    assert_eq!(report.layers_passed, 3);
}

#[test]
fn store_reopens_with_same_content() {
    let dir = tempfile::tempdir().unwrap();
    let reference = Reference::parse("app:v1").unwrap();
    let id = {
        let (_layout, layers, images, refs) = open_store(dir.path());
        let guard = layers.register(layer_tar("f", b"1").as_slice(), None).unwrap();
        let config = serde_json::to_vec(&serde_json::json!({
            "rootfs": RootFs::new().with_layer(guard.diff_id.clone()),
        }))
        .unwrap();
        let id = images.create(&config).unwrap();
        refs.add_tag(&reference, &id, false).unwrap();
        id
    };

    let (_layout, layers, images, refs) = open_store(dir.path());
    assert_eq!(refs.get(&reference).unwrap(), Some(id.clone()));
    let image = images.get(&id).unwrap();
    let top = image.config.rootfs.chain_id().unwrap();
    let guard = layers.get(&top).unwrap().expect("layer kept by image");
    assert_eq!(guard.chain_id, top);
}

#[test]
fn concurrent_registration_of_same_layer_converges() {
    let dir = tempfile::tempdir().unwrap();
    let (_layout, layers, _images, _refs) = open_store(dir.path());
    let blob = layer_tar("shared", b"same content");

    let ids: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let layers = Arc::clone(&layers);
                let blob = blob.clone();
                s.spawn(move || {
                    let guard = layers.register(blob.as_slice(), None).unwrap();
                    let id = guard.chain_id.clone();
                    layers.retain(&id).unwrap();
                    drop(guard);
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(layers.list().unwrap().len(), 1);
    assert_eq!(layers.active_handles(), 0);
}

#[test]
fn image_with_unregistered_layer_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_layout, _layers, images, _refs) = open_store(dir.path());
    let config = serde_json::to_vec(&serde_json::json!({
        "rootfs": RootFs::new().with_layer(DiffId::from(Digest::sha256(b"absent"))),
    }))
    .unwrap();
    assert!(matches!(
        images.create(&config),
        Err(StoreError::LayerNotFound(_))
    ));
}
