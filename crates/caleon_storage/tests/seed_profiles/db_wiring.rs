#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use caleon_kernel_contracts::collaborators::SeedProfileSource;
use caleon_kernel_contracts::resonance::SeedProfile;
use caleon_storage::seed_store::JsonSeedProfileStore;
use caleon_storage::StorageError;

fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("caleon_seed_{label}_{}_{nanos}", std::process::id()))
}

#[test]
fn at_seed_db_01_store_then_read_back() {
    let dir = scratch_dir("store");
    let store = JsonSeedProfileStore::new(&dir);
    let profile = SeedProfile::v1(0.05, 0.3).unwrap();
    store.store("seed_spinoza", &profile).unwrap();

    assert_eq!(store.read_seed("seed_spinoza"), Some(profile));
    let raw = std::fs::read_to_string(dir.join("seed_spinoza.json")).unwrap();
    assert!(raw.contains("\"mod\""));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_seed_db_02_partial_document_takes_defaults() {
    let dir = scratch_dir("partial");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("seed_hume.json"), r#"{ "bias": 0.2 }"#).unwrap();
    let store = JsonSeedProfileStore::new(&dir);

    let profile = store.read_seed("seed_hume").unwrap();
    assert_eq!(profile.bias, 0.2);
    assert_eq!(profile.mod_factor, 0.02);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_seed_db_03_missing_and_malformed_seeds_read_as_none() {
    let dir = scratch_dir("bad");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("seed_kant.json"), "{ not json").unwrap();
    std::fs::write(dir.join("seed_hume.json"), r#"{ "mod": -1.0 }"#).unwrap();
    let store = JsonSeedProfileStore::new(&dir);

    assert!(store.read_seed("seed_spinoza").is_none());
    assert!(store.read_seed("seed_kant").is_none());
    assert!(store.read_seed("seed_hume").is_none());
    assert!(matches!(
        store.load("seed_kant"),
        Err(StorageError::Malformed { .. })
    ));
    assert!(matches!(
        store.load("seed_hume"),
        Err(StorageError::ContractViolation(_))
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_seed_db_04_invalid_profile_is_never_written() {
    let dir = scratch_dir("invalid");
    let store = JsonSeedProfileStore::new(&dir);
    let bad = SeedProfile {
        bias: f64::NAN,
        mod_factor: 0.1,
    };
    assert!(store.store("seed_kant", &bad).is_err());
    assert!(!dir.join("seed_kant.json").exists());
}
