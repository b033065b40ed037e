#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use caleon_kernel_contracts::collaborators::SeedProfileSource;
use caleon_kernel_contracts::resonance::SeedProfile;
use caleon_kernel_contracts::Validate;

use crate::store::{read_json_record, write_json_record, StorageConfig, StorageError};

/// Fixed in-process seed profiles.
#[derive(Debug, Clone, Default)]
pub struct StaticSeedProfiles {
    seeds: BTreeMap<String, SeedProfile>,
}

impl StaticSeedProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, name: impl Into<String>, profile: SeedProfile) -> Self {
        self.seeds.insert(name.into(), profile);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, profile: SeedProfile) {
        self.seeds.insert(name.into(), profile);
    }
}

impl SeedProfileSource for StaticSeedProfiles {
    fn read_seed(&self, name: &str) -> Option<SeedProfile> {
        self.seeds.get(name).copied()
    }
}

/// Seed vault directory holding `<name>.json` documents with `bias` and `mod`.
#[derive(Debug, Clone)]
pub struct JsonSeedProfileStore {
    dir: PathBuf,
}

impl JsonSeedProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        Self::new(StorageConfig::from_env().seed_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, name: &str) -> Result<Option<SeedProfile>, StorageError> {
        let Some(raw) = read_json_record(&self.dir, name)? else {
            return Ok(None);
        };
        let path = self.dir.join(format!("{name}.json"));
        let profile: SeedProfile = serde_json::from_value(raw)
            .map_err(|e| StorageError::Malformed { path, source: e })?;
        profile.validate()?;
        Ok(Some(profile))
    }

    pub fn store(&self, name: &str, profile: &SeedProfile) -> Result<PathBuf, StorageError> {
        profile.validate()?;
        let value = serde_json::to_value(profile).map_err(|e| StorageError::Malformed {
            path: self.dir.join(format!("{name}.json")),
            source: e,
        })?;
        write_json_record(&self.dir, name, &value)
    }
}

impl SeedProfileSource for JsonSeedProfileStore {
    fn read_seed(&self, name: &str) -> Option<SeedProfile> {
        match self.load(name) {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("seed {name} unreadable, treating as missing: {e}");
                None
            }
        }
    }
}
