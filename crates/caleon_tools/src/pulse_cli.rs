#![forbid(unsafe_code)]

use caleon_engines::pulse::PulseOracle;
use caleon_kernel_contracts::collaborators::ReasoningOracle;

pub const PULSE_USAGE: &str = "usage: caleon <pulse|digest <text>|anchor <field>...|oracle-health|oracle-model>";

pub fn execute_pulse_command(
    pulse: &PulseOracle,
    oracle: &dyn ReasoningOracle,
    command: &str,
    args: &[String],
) -> Result<String, String> {
    match command {
        "pulse" => {
            let cycle_id = pulse.pulse();
            let drift = pulse.detect_drift_default();
            Ok(format!(
                "cycle_id={cycle_id}\nstardate={}\nunix_time={:.6}\ndrift={drift}",
                pulse.stardate(),
                cycle_id.unix_time(),
            ))
        }
        "digest" => {
            if args.is_empty() {
                return Err("usage: caleon digest <text>".to_string());
            }
            Ok(pulse.digest(&args.join(" ")))
        }
        "anchor" => {
            if args.is_empty() {
                return Err("usage: caleon anchor <field>...".to_string());
            }
            let fields: Vec<&str> = args.iter().map(String::as_str).collect();
            Ok(pulse.anchor(&fields))
        }
        "oracle-health" => {
            if oracle.health_check() {
                Ok("UP".to_string())
            } else {
                Ok("DOWN".to_string())
            }
        }
        _ => Err(format!("unknown command: {command}. {PULSE_USAGE}")),
    }
}
