#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use caleon_kernel_contracts::collaborators::{AuditRecordId, AuditSink};
use caleon_storage::audit::JsonFileAuditSink;
use serde_json::json;

fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("caleon_audit_{label}_{}_{nanos}", std::process::id()))
}

#[test]
fn at_audit_db_01_record_round_trips_through_disk() {
    let dir = scratch_dir("roundtrip");
    let sink = JsonFileAuditSink::new(&dir);
    let id = AuditRecordId::new("left", "syn_res", 3);
    let data = json!({ "hemisphere": "left", "verdict_scalar": 0.5 });

    sink.write_reflection(&id, &data).unwrap();

    assert!(dir.join("left_syn_res_000003.json").is_file());
    assert_eq!(sink.read_reflection(&id).unwrap(), Some(data));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_audit_db_02_files_are_pretty_printed_json() {
    let dir = scratch_dir("pretty");
    let sink = JsonFileAuditSink::new(&dir);
    let id = AuditRecordId::new("core", "thinker", 1);
    sink.write_reflection(&id, &json!({ "a": 1, "b": [1, 2] }))
        .unwrap();

    let raw = std::fs::read_to_string(dir.join("core_thinker_000001.json")).unwrap();
    assert!(raw.contains('\n'));
    assert!(raw.contains("  \"a\": 1"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_audit_db_03_rewrite_replaces_and_ids_are_listed_sorted() {
    let dir = scratch_dir("list");
    let sink = JsonFileAuditSink::new(&dir);
    for n in [2u64, 0, 1] {
        sink.write_reflection(&AuditRecordId::new("right", "syn_res", n), &json!({ "n": n }))
            .unwrap();
    }
    let id = AuditRecordId::new("right", "syn_res", 1);
    sink.write_reflection(&id, &json!({ "n": 99 })).unwrap();

    assert_eq!(
        sink.record_ids().unwrap(),
        vec!["right_syn_res_000000", "right_syn_res_000001", "right_syn_res_000002"]
    );
    assert_eq!(sink.read_reflection(&id).unwrap(), Some(json!({ "n": 99 })));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn at_audit_db_04_missing_dir_reads_as_empty() {
    let sink = JsonFileAuditSink::new(scratch_dir("absent"));
    assert!(sink.record_ids().unwrap().is_empty());
    assert_eq!(
        sink.read_reflection(&AuditRecordId::new("left", "syn_res", 0))
            .unwrap(),
        None
    );
}

#[test]
fn at_audit_db_05_unwritable_location_surfaces_as_collaborator_error() {
    let dir = scratch_dir("blocked");
    std::fs::write(&dir, b"not a directory").unwrap();
    let sink = JsonFileAuditSink::new(dir.join("nested"));
    let err = sink
        .write_reflection(&AuditRecordId::new("left", "syn_res", 0), &json!({}))
        .unwrap_err();
    assert!(err.to_string().starts_with("audit_sink unavailable"));
    let _ = std::fs::remove_file(&dir);
}
