#![forbid(unsafe_code)]

use caleon_kernel_contracts::collaborators::AuditRecordId;
use caleon_kernel_contracts::resonance::SeedProfile;
use caleon_storage::{JsonFileAuditSink, JsonSeedProfileStore};

/// `seed <get|set> <name> [bias mod]` against the seed vault directory.
pub fn execute_seed_command(
    store: &JsonSeedProfileStore,
    subcommand: &str,
    args: &[String],
) -> Result<String, String> {
    match subcommand {
        "get" => {
            let name = require_arg(args, 0, "usage: caleon seed get <name>")?;
            match store.load(name).map_err(|e| format!("failed to read seed: {e}"))? {
                Some(profile) => Ok(format!("bias={} mod={}", profile.bias, profile.mod_factor)),
                None => Ok("MISSING".to_string()),
            }
        }
        "set" => {
            let usage = "usage: caleon seed set <name> <bias> <mod>";
            let name = require_arg(args, 0, usage)?;
            let bias = parse_f64(require_arg(args, 1, usage)?, "bias")?;
            let mod_factor = parse_f64(require_arg(args, 2, usage)?, "mod")?;
            let profile =
                SeedProfile::v1(bias, mod_factor).map_err(|e| format!("invalid seed: {e:?}"))?;
            store
                .store(name, &profile)
                .map_err(|e| format!("failed to store seed: {e}"))?;
            Ok("OK".to_string())
        }
        _ => Err(format!(
            "unknown seed subcommand: {subcommand}. expected one of: get, set"
        )),
    }
}

/// `reflection <ls|show <record_id>>` against the reflection vault directory.
pub fn execute_reflection_command(
    sink: &JsonFileAuditSink,
    subcommand: &str,
    args: &[String],
) -> Result<String, String> {
    match subcommand {
        "ls" => {
            let ids = sink
                .record_ids()
                .map_err(|e| format!("failed to list reflections: {e}"))?;
            Ok(ids.join("\n"))
        }
        "show" => {
            let raw = require_arg(args, 0, "usage: caleon reflection show <record_id>")?;
            let record_id = AuditRecordId::parse(raw)
                .ok_or_else(|| format!("malformed record id '{raw}'"))?;
            let record = sink
                .read_reflection(&record_id)
                .map_err(|e| format!("failed to read reflection: {e}"))?
                .ok_or_else(|| format!("no reflection named {raw}"))?;
            serde_json::to_string_pretty(&record).map_err(|e| e.to_string())
        }
        _ => Err(format!(
            "unknown reflection subcommand: {subcommand}. expected one of: ls, show"
        )),
    }
}

fn require_arg<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| usage.to_string())
}

fn parse_f64(raw: &str, field: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .map_err(|_| format!("{field} must be a number, got '{raw}'"))
}
