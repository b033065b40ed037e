#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use caleon_kernel_contracts::error::CollaboratorError;
use caleon_kernel_contracts::ContractViolation;
use thiserror::Error;

pub const DEFAULT_SEED_DIR: &str = "vaults/core/seed";
pub const DEFAULT_REFLECTION_DIR: &str = "vaults/core/reflection";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid record key {key:?}")]
    InvalidKey { key: String },

    #[error("contract violation: {0:?}")]
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn into_collaborator(self, collaborator: &'static str) -> CollaboratorError {
        CollaboratorError::unavailable(collaborator, self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub seed_dir: PathBuf,
    pub reflection_dir: PathBuf,
}

impl StorageConfig {
    pub fn mvp_v1() -> Self {
        Self {
            seed_dir: PathBuf::from(DEFAULT_SEED_DIR),
            reflection_dir: PathBuf::from(DEFAULT_REFLECTION_DIR),
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            seed_dir: env_path("CALEON_SEED_DIR").unwrap_or(defaults.seed_dir),
            reflection_dir: env_path("CALEON_REFLECTION_DIR").unwrap_or(defaults.reflection_dir),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

/// Record keys become file stems, so they are restricted to `[A-Za-z0-9_.-]`
/// and may not start with a dot.
pub(crate) fn checked_key(key: &str) -> Result<&str, StorageError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(key)
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}

/// Writes `<dir>/<key>.json` through a temp file and rename.
pub(crate) fn write_json_record(
    dir: &Path,
    key: &str,
    value: &serde_json::Value,
) -> Result<PathBuf, StorageError> {
    let key = checked_key(key)?;
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    let path = dir.join(format!("{key}.json"));
    let tmp = dir.join(format!(".{key}.json.tmp"));
    let body = serde_json::to_string_pretty(value).map_err(|e| StorageError::Malformed {
        path: path.clone(),
        source: e,
    })?;
    fs::write(&tmp, body).map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))?;
    Ok(path)
}

/// Reads `<dir>/<key>.json`; `Ok(None)` when the file does not exist.
pub(crate) fn read_json_record(
    dir: &Path,
    key: &str,
) -> Result<Option<serde_json::Value>, StorageError> {
    let key = checked_key(key)?;
    let path = dir.join(format!("{key}.json"));
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(&path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Malformed { path, source: e })
}
