use packsrv_core::hasher::hash_reader;
use packsrv_core::manifest::{ManifestBuilder, ManifestStore};
use packsrv_core::IngestError;
use std::fs;
use url::Url;

fn base() -> Url {
    Url::parse("http://localhost:3000").unwrap()
}

fn sample_tree(root: &std::path::Path) {
    fs::create_dir_all(root.join("mods")).unwrap();
    fs::create_dir_all(root.join("config/nested")).unwrap();
    fs::write(root.join("options.txt"), b"renderDistance:12\n").unwrap();
    fs::write(root.join("mods/sodium.jar"), vec![7u8; 200_000]).unwrap();
    fs::write(root.join("config/nested/a.json"), b"{}").unwrap();
    fs::write(root.join("empty.dat"), b"").unwrap();
}

#[test]
fn every_file_has_one_descriptor_with_independent_hash() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("pack");
    sample_tree(&root);

    let m = ManifestBuilder::new(base()).build("pack", &root).unwrap();
    assert_eq!(m.len(), 4);
    for fd in &m.files {
        let bytes = fs::read(root.join(&fd.path)).unwrap();
        let d = hash_reader(&bytes[..]).unwrap();
        assert_eq!(fd.hash, d.hex, "{}", fd.path);
        assert_eq!(fd.size, bytes.len() as u64);
        assert_eq!(fd.url, format!("http://localhost:3000/download/pack/{}", fd.path));
        assert_eq!(fd.hash.len(), 40);
        assert!(fd.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
    let paths: Vec<_> = m.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["config/nested/a.json", "empty.dat", "mods/sodium.jar", "options.txt"]);
    assert_eq!(
        m.get("empty.dat").unwrap().hash,
        "da39a3ee5e6b4b0d3255bfef95601890afd80709"
    );
}

#[test]
fn building_twice_is_identical() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("pack");
    sample_tree(&root);
    let b = ManifestBuilder::new(base());
    assert_eq!(b.build("pack", &root).unwrap(), b.build("pack", &root).unwrap());
}

#[test]
fn invalid_instance_name_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let err = ManifestBuilder::new(base()).build("../x", td.path()).unwrap_err();
    assert!(matches!(err, IngestError::Validation { .. }));
}

#[test]
fn persist_then_load_round_trips() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("pack");
    sample_tree(&root);
    let m = ManifestBuilder::new(base()).build("pack", &root).unwrap();

    let store = ManifestStore::new(td.path().join("extracted"));
    let path = store.persist(&m, "pack").unwrap();
    assert_eq!(path, td.path().join("extracted/pack.json"));
    assert_eq!(store.load("pack").unwrap(), m);

    // document is a pretty-printed bare array with the four wire fields
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("[\n  {"));
    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
    let first = &v.as_array().unwrap()[0];
    for k in ["url", "size", "hash", "path"] {
        assert!(first.get(k).is_some(), "missing {k}");
    }
}

#[test]
fn persist_replaces_and_leaves_no_temp_files() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("pack");
    sample_tree(&root);
    let store = ManifestStore::new(td.path().join("extracted"));
    let b = ManifestBuilder::new(base());

    store.persist(&b.build("pack", &root).unwrap(), "pack").unwrap();
    fs::remove_file(root.join("options.txt")).unwrap();
    let second = b.build("pack", &root).unwrap();
    store.persist(&second, "pack").unwrap();

    assert_eq!(store.load("pack").unwrap(), second);
    let names: Vec<_> = fs::read_dir(store.dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["pack.json"]);
}

#[test]
fn staged_manifest_is_invisible_until_commit() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path());
    let staged = store.stage(&Default::default(), "pack").unwrap();
    assert!(!store.exists("pack"));
    staged.commit().unwrap();
    assert!(store.exists("pack"));
    assert!(store.load("pack").unwrap().is_empty());
}

#[test]
fn load_missing_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    let store = ManifestStore::new(td.path());
    assert!(store.load("doesnotexist").unwrap_err().is_not_found());
    assert!(store.load("../../etc/passwd").unwrap_err().is_not_found());
}

#[test]
fn empty_tree_gives_empty_manifest() {
    let td = tempfile::tempdir().unwrap();
    let m = ManifestBuilder::new(base()).build("pack", td.path()).unwrap();
    assert!(m.is_empty());
    assert_eq!(serde_json::to_string(&m).unwrap(), "[]");
}
