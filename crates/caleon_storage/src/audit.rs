#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use caleon_kernel_contracts::collaborators::{AuditRecordId, AuditSink};
use caleon_kernel_contracts::error::CollaboratorError;

use crate::store::{read_json_record, write_json_record, StorageConfig, StorageError};

#[derive(Debug, Clone, PartialEq)]
pub struct AuditLedgerRow {
    pub seq: u64,
    pub record_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Default)]
struct AuditTables {
    ledger: Vec<AuditLedgerRow>,
    current: BTreeMap<String, serde_json::Value>,
}

/// Process-local audit sink. Every write appends a ledger row; the current
/// view keeps the latest payload per record id.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    tables: Mutex<AuditTables>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger_rows(&self) -> Vec<AuditLedgerRow> {
        self.lock().ledger.clone()
    }

    pub fn record(&self, record_id: &str) -> Option<serde_json::Value> {
        self.lock().current.get(record_id).cloned()
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.lock().current.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ledger.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, AuditTables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write_reflection(
        &self,
        record_id: &AuditRecordId,
        data: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let mut tables = self.lock();
        let seq = tables.ledger.len() as u64 + 1;
        tables.ledger.push(AuditLedgerRow {
            seq,
            record_id: record_id.to_string(),
            data: data.clone(),
        });
        tables
            .current
            .insert(record_id.to_string(), data.clone());
        Ok(())
    }
}

/// Reflection vault on disk: one pretty-printed `<dir>/<record_id>.json` per record.
/// Rewriting an id replaces the file.
#[derive(Debug, Clone)]
pub struct JsonFileAuditSink {
    dir: PathBuf,
}

impl JsonFileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        Self::new(StorageConfig::from_env().reflection_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_reflection(
        &self,
        record_id: &AuditRecordId,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        read_json_record(&self.dir, record_id.as_str())
    }

    /// Record ids present on disk, sorted.
    pub fn record_ids(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".json") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl AuditSink for JsonFileAuditSink {
    fn write_reflection(
        &self,
        record_id: &AuditRecordId,
        data: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        write_json_record(&self.dir, record_id.as_str(), data)
            .map(|_| ())
            .map_err(|e| e.into_collaborator("audit_sink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn at_audit_01_in_memory_keeps_ledger_and_latest() {
        let sink = InMemoryAuditSink::new();
        let id = AuditRecordId::new("left", "syn_res", 0);
        sink.write_reflection(&id, &json!({"v": 1})).unwrap();
        sink.write_reflection(&id, &json!({"v": 2})).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.record("left_syn_res_000000"), Some(json!({"v": 2})));
        let seqs: Vec<u64> = sink.ledger_rows().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
