#![forbid(unsafe_code)]

use std::env;

use caleon_engines::ollama::OllamaClient;
use caleon_engines::pulse::PulseOracle;
use caleon_storage::{JsonFileAuditSink, JsonSeedProfileStore};
use caleon_tools::pulse_cli::{execute_pulse_command, PULSE_USAGE};
use caleon_tools::vault_cli::{execute_reflection_command, execute_seed_command};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args
        .first()
        .ok_or_else(|| format!("{PULSE_USAGE}\n       caleon <seed|reflection> ..."))?
        .as_str();
    let rest = &args[1..];

    let output = match command {
        "seed" | "reflection" => {
            let subcommand = rest
                .first()
                .ok_or_else(|| format!("usage: caleon {command} <subcommand> ..."))?;
            if command == "seed" {
                execute_seed_command(&JsonSeedProfileStore::from_env(), subcommand, &rest[1..])?
            } else {
                execute_reflection_command(&JsonFileAuditSink::from_env(), subcommand, &rest[1..])?
            }
        }
        "oracle-model" => {
            let oracle = OllamaClient::from_env().map_err(|e| format!("invalid oracle config: {e:?}"))?;
            match oracle.model_info() {
                Some(info) => serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?,
                None => format!("MISSING {}", oracle.config().model),
            }
        }
        _ => {
            let oracle = OllamaClient::from_env().map_err(|e| format!("invalid oracle config: {e:?}"))?;
            log::debug!("oracle endpoint {}", oracle.config().base_url);
            execute_pulse_command(&PulseOracle::system(), &oracle, command, rest)?
        }
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
