//! End-to-end imports of structured, OCI and legacy archives built in memory.

use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use stevedore_core::{LoadError, LoadOptions, Loader, NoProgress};
use stevedore_schema::{ChainId, DiffId, ImageId, Reference, RootFs};

fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut ar = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        ar.append_data(&mut header, name, *content).unwrap();
    }
    ar.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// A layer changeset holding one file.
fn layer(name: &str, content: &[u8]) -> Vec<u8> {
    tar_bytes(&[(name, content)])
}

fn config_for(layers: &[&[u8]], comment: &str) -> Vec<u8> {
    let diff_ids: Vec<String> = layers.iter().map(|l| sha256(l)).collect();
    serde_json::to_vec(&serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "comment": comment,
        "rootfs": {"type": "layers", "diff_ids": diff_ids},
    }))
    .unwrap()
}

/// Archive contents keyed by path, plus optional symlinks.
#[derive(Default)]
struct Archive {
    files: BTreeMap<String, Vec<u8>>,
    symlinks: Vec<(String, String)>,
}

impl Archive {
    fn file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_owned(), content.into());
        self
    }

    fn symlink(mut self, path: &str, target: &str) -> Self {
        self.symlinks.push((path.to_owned(), target.to_owned()));
        self
    }

    fn build(&self) -> Vec<u8> {
        let mut ar = tar::Builder::new(Vec::new());
        for (path, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            ar.append_data(&mut header, path, content.as_slice()).unwrap();
        }
        for (path, target) in &self.symlinks {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            header.set_cksum();
            ar.append_link(&mut header, path, target).unwrap();
        }
        ar.into_inner().unwrap()
    }
}

fn manifest(items: &[(&str, &[&str], &[&str])]) -> Vec<u8> {
    let entries: Vec<_> = items
        .iter()
        .map(|(config, tags, layers)| {
            serde_json::json!({"Config": config, "RepoTags": tags, "Layers": layers})
        })
        .collect();
    serde_json::to_vec(&entries).unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    loader: Loader,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let loader = Loader::new(dir.path().join("store"));
        Self { _dir: dir, loader }
    }

    fn load(&self, archive: &[u8], options: &LoadOptions) -> (Result<stevedore_core::LoadReport, LoadError>, String) {
        let mut out = Vec::new();
        let result = self.loader.load(archive, options, &mut out, &NoProgress);
        (result, String::from_utf8(out).unwrap())
    }

    fn tagged(&self, reference: &str) -> Option<ImageId> {
        self.loader
            .references()
            .get(&Reference::parse(reference).unwrap())
            .unwrap()
    }

    fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.loader.store_layout().staging_dir())
            .unwrap()
            .next()
            .is_none()
    }
}

#[test]
fn structured_manifest_single_image() {
    let fx = Fixture::new();
    let l1 = layer("hello.txt", b"hello");
    let config = config_for(&[&l1], "one");
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("cfg.json", &["sample:latest"], &["l1/layer.tar"])]))
        .file("cfg.json", config.clone())
        .file("l1/layer.tar", l1)
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    let report = result.unwrap();

    let id = ImageId::new(sha256(&config));
    assert_eq!(report.images, vec![id.clone()]);
    assert_eq!(report.layout, "manifest");
    assert_eq!(out, format!("sample:latest({id}) has been loaded.\n"));
    assert_eq!(fx.tagged("sample:latest"), Some(id.clone()));
    assert_eq!(fx.loader.images().config_bytes(&id).unwrap(), config);
    assert_eq!(fx.loader.layers().active_handles(), 0);
    assert!(fx.staging_is_empty());
}

#[test]
fn shared_prefix_is_registered_once() {
    let fx = Fixture::new();
    let base = layer("base", b"base");
    let a_top = layer("a", b"a");
    let b_top = layer("b", b"b");

    // The second image points its base layer at a path that does not exist:
    // it must be satisfied from the store without reading the blob.
    let archive = Archive::default()
        .file(
            "manifest.json",
            manifest(&[
                ("a.json", &["app:a"], &["base/layer.tar", "a/layer.tar"]),
                ("b.json", &["app:b"], &["missing/layer.tar", "b/layer.tar"]),
            ]),
        )
        .file("a.json", config_for(&[&base, &a_top], "a"))
        .file("b.json", config_for(&[&base, &b_top], "b"))
        .file("base/layer.tar", base.clone())
        .file("a/layer.tar", a_top)
        .file("b/layer.tar", b_top)
        .build();

    let report = fx.load(&archive, &LoadOptions::default()).0.unwrap();
    assert_eq!(report.images.len(), 2);

    let layers = fx.loader.layers().list().unwrap();
    assert_eq!(layers.len(), 3);
    assert!(layers.contains(&ChainId::new(sha256(&base))));

    let a = fx.loader.images().get(&report.images[0]).unwrap();
    let b = fx.loader.images().get(&report.images[1]).unwrap();
    assert_eq!(a.config.rootfs.diff_ids[0], b.config.rootfs.diff_ids[0]);
}

#[test]
fn layer_count_mismatch_is_invalid_config() {
    let fx = Fixture::new();
    let (l1, l2, l3) = (layer("1", b"1"), layer("2", b"2"), layer("3", b"3"));
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("c.json", &[], &["1.tar", "2.tar"])]))
        .file("c.json", config_for(&[&l1, &l2, &l3], "three"))
        .file("1.tar", l1)
        .file("2.tar", l2)
        .build();

    let err = fx.load(&archive, &LoadOptions::default()).0.unwrap_err();
    assert!(matches!(err, LoadError::InvalidConfig { .. }), "{err}");
    assert!(fx.loader.layers().list().unwrap().is_empty());
}

#[test]
fn diff_id_mismatch_creates_no_image() {
    let fx = Fixture::new();
    let declared = layer("declared", b"what the config says");
    let actual = layer("actual", b"what the archive holds");
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("c.json", &["app:v1"], &["l.tar"])]))
        .file("c.json", config_for(&[&declared], "lie"))
        .file("l.tar", actual)
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    assert!(matches!(
        result,
        Err(LoadError::ManifestIntegrity { index: 0, .. })
    ));
    assert!(out.is_empty());
    assert!(fx.loader.images().list().unwrap().is_empty());
    assert!(fx.loader.layers().list().unwrap().is_empty());
    assert_eq!(fx.tagged("app:v1"), None);
    assert!(fx.staging_is_empty());
}

#[test]
fn integrity_failure_on_later_layer_releases_earlier_ones() {
    let fx = Fixture::new();
    let l0 = layer("base", b"base layer");
    let declared = layer("declared", b"what the config says");
    let actual = layer("actual", b"what the archive holds");
    let archive = Archive::default()
        .file(
            "manifest.json",
            manifest(&[("c.json", &["app:v1"], &["l0/layer.tar", "l1/layer.tar"])]),
        )
        .file("c.json", config_for(&[&l0, &declared], "two layers"))
        .file("l0/layer.tar", l0)
        .file("l1/layer.tar", actual)
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    assert!(matches!(
        result,
        Err(LoadError::ManifestIntegrity { index: 1, .. })
    ));
    assert!(out.is_empty());
    assert_eq!(fx.loader.layers().active_handles(), 0);
    assert!(fx.loader.layers().list().unwrap().is_empty());
    assert!(fx.loader.images().list().unwrap().is_empty());
    assert_eq!(fx.tagged("app:v1"), None);
    assert!(fx.staging_is_empty());
}

#[test]
fn rebinding_within_one_import_last_wins() {
    let fx = Fixture::new();
    let l1 = layer("f", b"1");
    let first = config_for(&[&l1], "first");
    let second = config_for(&[&l1], "second");
    let archive = Archive::default()
        .file(
            "manifest.json",
            manifest(&[
                ("first.json", &["sample:latest"], &["l.tar"]),
                ("second.json", &["sample:latest"], &["l.tar"]),
            ]),
        )
        .file("first.json", first.clone())
        .file("second.json", second.clone())
        .file("l.tar", l1)
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    result.unwrap();

    let (first_id, second_id) = (sha256(&first), sha256(&second));
    assert!(out.contains(&format!(
        "The image sample:latest already exists, renaming the old one with ID {first_id} to empty string"
    )));
    assert!(out.ends_with(&format!("sample:latest({second_id}) has been loaded.\n")));
    assert_eq!(fx.tagged("sample:latest"), Some(ImageId::new(second_id)));
}

#[test]
fn traversal_in_manifest_is_rejected() {
    let fx = Fixture::new();
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("../../etc/passwd", &[], &[])]))
        .build();
    let err = fx.load(&archive, &LoadOptions::default()).0.unwrap_err();
    assert!(matches!(err, LoadError::PathEscape { .. }), "{err}");
    assert!(fx.staging_is_empty());
}

#[test]
fn planted_symlink_is_rejected() {
    let fx = Fixture::new();
    let l1 = layer("f", b"1");
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("evil", &[], &["l.tar"])]))
        .file("l.tar", l1)
        .symlink("evil", "/etc/passwd")
        .build();
    let err = fx.load(&archive, &LoadOptions::default()).0.unwrap_err();
    assert!(matches!(err, LoadError::PathEscape { .. }), "{err}");
}

#[test]
fn compressed_archive_and_layers() {
    let fx = Fixture::new();
    let l1 = layer("f", b"compressed layer");
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("c.json", &["app:gz"], &["l.tar.gz"])]))
        .file("c.json", config_for(&[&l1], "gz"))
        .file("l.tar.gz", gzip(&l1))
        .build();

    let report = fx.load(&gzip(&archive), &LoadOptions::default()).0.unwrap();
    let image = fx.loader.images().get(&report.images[0]).unwrap();
    assert_eq!(image.config.rootfs.diff_ids, vec![DiffId::new(sha256(&l1))]);
}

#[test]
fn reloading_is_idempotent() {
    let fx = Fixture::new();
    let l1 = layer("f", b"1");
    let archive = Archive::default()
        .file("manifest.json", manifest(&[("c.json", &["app:v1"], &["l.tar"])]))
        .file("c.json", config_for(&[&l1], "again"))
        .file("l.tar", l1)
        .build();

    let first = fx.load(&archive, &LoadOptions::default()).0.unwrap();
    let (second, out) = fx.load(&archive, &LoadOptions::default());
    assert_eq!(first.images, second.unwrap().images);
    assert!(!out.contains("already exists"));
    assert_eq!(fx.loader.images().list().unwrap().len(), 1);
    assert_eq!(fx.loader.layers().list().unwrap().len(), 1);
}

// --- OCI layout ---

fn oci_archive(annotations: serde_json::Value, extra_index_entry: bool) -> (Vec<u8>, Vec<u8>) {
    let l1 = layer("oci.txt", b"oci");
    let config = config_for(&[&l1], "oci");
    let hex = |d: String| d.trim_start_matches("sha256:").to_owned();

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": sha256(&config),
            "size": config.len(),
        },
        "layers": [{
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": sha256(&l1),
            "size": l1.len(),
        }],
    }))
    .unwrap();

    let mut manifests = vec![serde_json::json!({
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "digest": sha256(&manifest),
        "size": manifest.len(),
        "annotations": annotations,
    })];
    if extra_index_entry {
        manifests.push(serde_json::json!({
            "mediaType": "application/vnd.in-toto+json",
            "digest": sha256(b"attestation"),
            "size": 11,
        }));
    }
    let index = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "manifests": manifests,
    }))
    .unwrap();

    let archive = Archive::default()
        .file("oci-layout", r#"{"imageLayoutVersion":"1.0.0"}"#)
        .file("index.json", index)
        .file(&format!("blobs/sha256/{}", hex(sha256(&manifest))), manifest.clone())
        .file(&format!("blobs/sha256/{}", hex(sha256(&config))), config.clone())
        .file(&format!("blobs/sha256/{}", hex(sha256(&l1))), l1)
        .build();
    (archive, config)
}

#[test]
fn oci_layout_with_target_name() {
    let fx = Fixture::new();
    let (archive, config) = oci_archive(
        serde_json::json!({"org.opencontainers.image.ref.name": "v1"}),
        true,
    );
    let options = LoadOptions {
        name: Some("myimage".to_owned()),
        ..Default::default()
    };

    let (result, out) = fx.load(&archive, &options);
    let report = result.unwrap();
    let id = ImageId::new(sha256(&config));
    assert_eq!(report.layout, "oci");
    assert_eq!(report.images, vec![id.clone()]);
    assert_eq!(fx.tagged("myimage:v1"), Some(id.clone()));
    assert_eq!(out, format!("myimage:v1({id}) has been loaded.\n"));
}

#[test]
fn oci_layout_with_ref_map() {
    let fx = Fixture::new();
    let (archive, config) = oci_archive(serde_json::json!({"org.opencontainers.ref.name": "v1"}), false);
    let options = LoadOptions {
        refs: BTreeMap::from([("v1".to_owned(), "registry.local/team/app:stable".to_owned())]),
        ..Default::default()
    };

    fx.load(&archive, &options).0.unwrap();
    assert_eq!(
        fx.tagged("registry.local/team/app:stable"),
        Some(ImageId::new(sha256(&config)))
    );
}

#[test]
fn oci_layout_input_errors() {
    let fx = Fixture::new();
    let (archive, _) = oci_archive(serde_json::json!({}), false);
    let named = LoadOptions {
        name: Some("myimage".to_owned()),
        ..Default::default()
    };
    assert!(matches!(
        fx.load(&archive, &named).0,
        Err(LoadError::MissingRefAnnotation { .. })
    ));
    assert!(matches!(
        fx.load(&archive, &LoadOptions::default()).0,
        Err(LoadError::MissingTarget)
    ));

    let (archive, _) = oci_archive(
        serde_json::json!({"org.opencontainers.image.ref.name": "v2"}),
        false,
    );
    let mapped = LoadOptions {
        refs: BTreeMap::from([("v1".to_owned(), "app:v1".to_owned())]),
        ..Default::default()
    };
    assert!(matches!(
        fx.load(&archive, &mapped).0,
        Err(LoadError::UnmappedRef(r)) if r == "v2"
    ));
    assert!(fx.staging_is_empty());
}

// --- Legacy layout ---

fn legacy_json(id: &str, parent: Option<&str>, cmd: &str) -> Vec<u8> {
    let mut json = serde_json::json!({
        "id": id,
        "created": "2016-01-01T00:00:00Z",
        "docker_version": "1.10.0",
        "architecture": "amd64",
        "os": "linux",
        "container_config": {"Cmd": ["/bin/sh", "-c", cmd]},
        "config": {"Cmd": ["/bin/sh"]},
    });
    if let Some(parent) = parent {
        json["parent"] = serde_json::Value::from(parent);
    }
    serde_json::to_vec(&json).unwrap()
}

fn legacy_id(n: u8) -> String {
    hex::encode([n; 32])
}

#[test]
fn legacy_shared_ancestor_loads_once() {
    let fx = Fixture::new();
    let (p, x, y) = (legacy_id(1), legacy_id(2), legacy_id(3));
    let repositories = serde_json::to_vec(&serde_json::json!({
        "app": {"x": x, "y": y},
        "base": {"latest": p},
    }))
    .unwrap();

    let archive = Archive::default()
        .file(&format!("{p}/json"), legacy_json(&p, None, "#(nop) ADD base"))
        .file(&format!("{p}/layer.tar"), layer("base", b"base"))
        .file(&format!("{x}/json"), legacy_json(&x, Some(&p), "touch x"))
        .file(&format!("{x}/layer.tar"), layer("x", b"x"))
        .file(&format!("{y}/json"), legacy_json(&y, Some(&p), "touch y"))
        .file(&format!("{y}/layer.tar"), layer("y", b"y"))
        .file("repositories", repositories)
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    let report = result.unwrap();
    assert_eq!(report.layout, "legacy");
    assert_eq!(report.images.len(), 3);
    assert_eq!(out.lines().count(), 3);
    assert_eq!(fx.loader.layers().list().unwrap().len(), 3);

    let images = fx.loader.images();
    let parent = fx.tagged("base:latest").unwrap();
    let child_x = fx.tagged("app:x").unwrap();
    let child_y = fx.tagged("app:y").unwrap();
    assert_eq!(images.parent(&child_x).unwrap(), Some(parent.clone()));
    assert_eq!(images.parent(&child_y).unwrap(), Some(parent.clone()));
    assert_eq!(images.parent(&parent).unwrap(), None);

    let x_image = images.get(&child_x).unwrap();
    assert_eq!(x_image.config.rootfs.len(), 2);
    assert_eq!(x_image.config.history.len(), 2);
    assert_eq!(
        x_image.config.history[1].created_by.as_deref(),
        Some("/bin/sh -c touch x")
    );
    assert!(!x_image.config.extra.contains_key("id"));
    assert!(!x_image.config.extra.contains_key("parent"));

    let parent_rootfs = images.get(&parent).unwrap().config.rootfs;
    assert_eq!(x_image.config.rootfs.diff_ids[0], parent_rootfs.diff_ids[0]);
    assert_eq!(fx.loader.layers().active_handles(), 0);
}

#[test]
fn legacy_deep_chain_loads_in_order() {
    let fx = Fixture::new();
    let ids: Vec<String> = (1..=20).map(legacy_id).collect();
    let mut archive = Archive::default();
    for (i, id) in ids.iter().enumerate() {
        let parent = i.checked_sub(1).map(|p| ids[p].as_str());
        archive = archive
            .file(&format!("{id}/json"), legacy_json(id, parent, &format!("step {i}")))
            .file(&format!("{id}/layer.tar"), layer(&format!("f{i}"), b"x"));
    }

    let report = fx.load(&archive.build(), &LoadOptions::default()).0.unwrap();
    assert_eq!(report.images.len(), 20);

    let mut rootfs = RootFs::new();
    let top = report
        .images
        .iter()
        .map(|id| fx.loader.images().get(id).unwrap())
        .max_by_key(|image| image.config.rootfs.len())
        .unwrap();
    for diff in &top.config.rootfs.diff_ids {
        rootfs.append(diff.clone());
    }
    assert_eq!(rootfs.len(), 20);
    assert!(fx.loader.layers().exists(&rootfs.chain_id().unwrap()));
}

#[test]
fn legacy_repositories_must_reference_loaded_images() {
    let fx = Fixture::new();
    let p = legacy_id(7);
    let repositories = serde_json::to_vec(&serde_json::json!({
        "app": {"latest": legacy_id(8)},
    }))
    .unwrap();
    let archive = Archive::default()
        .file(&format!("{p}/json"), legacy_json(&p, None, "true"))
        .file(&format!("{p}/layer.tar"), layer("f", b"f"))
        .file("repositories", repositories)
        .build();

    let err = fx.load(&archive, &LoadOptions::default()).0.unwrap_err();
    assert!(matches!(err, LoadError::InvalidReference(_)), "{err}");
}

#[test]
fn legacy_parent_cycle_is_invalid_config() {
    let fx = Fixture::new();
    let (a, b) = (legacy_id(4), legacy_id(5));
    let archive = Archive::default()
        .file(&format!("{a}/json"), legacy_json(&a, Some(&b), "a"))
        .file(&format!("{a}/layer.tar"), layer("a", b"a"))
        .file(&format!("{b}/json"), legacy_json(&b, Some(&a), "b"))
        .file(&format!("{b}/layer.tar"), layer("b", b"b"))
        .build();

    let err = fx.load(&archive, &LoadOptions::default()).0.unwrap_err();
    assert!(matches!(err, LoadError::InvalidConfig { .. }), "{err}");
    assert!(fx.loader.images().list().unwrap().is_empty());
}

#[test]
fn legacy_non_ascii_directory_name_loads() {
    let fx = Fixture::new();
    let id = "aaaaaaaaaaa\u{20ac}x";
    let archive = Archive::default()
        .file(&format!("{id}/json"), legacy_json(id, None, "#(nop) ADD file"))
        .file(&format!("{id}/layer.tar"), layer("file", b"content"))
        .build();

    let (result, out) = fx.load(&archive, &LoadOptions::default());
    let report = result.unwrap();
    assert_eq!(report.layout, "legacy");
    assert_eq!(report.images.len(), 1);
    assert!(out.is_empty());
    assert_eq!(fx.loader.layers().list().unwrap().len(), 1);
    assert_eq!(fx.loader.layers().active_handles(), 0);
}
