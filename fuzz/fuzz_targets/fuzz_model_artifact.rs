//! Fuzz target for stored model decoding.
//!
//! Feeds arbitrary bytes through the store's reader and checks that a model
//! that loads is internally consistent.

#![no_main]

use dt_common::{LayerName, ModelKey};
use dt_core::store::{ArtifactStore, FsStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let store = FsStore::new(dir.path());
    let Some(layer) = LayerName::parse("fuzz") else {
        return;
    };
    let key = ModelKey::accepted(layer, 2);
    let path = store.model_path(&key);
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if std::fs::write(&path, data).is_err() {
        return;
    }
    if let Ok(artifact) = store.load_model(&key) {
        assert!(artifact.fit.model.check_consistent().is_ok());
    }
});
