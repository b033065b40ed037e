#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::harmonization::{HarmonizationResult, ReflectionRecord};
use crate::pulse::{PulseId, Stardate};
use crate::resonance::ResonanceResult;
use crate::task::TaskPriority;
use crate::{validate_non_empty, validate_range, ContractViolation, Validate};

pub const THINK_MAX_MESSAGE_CHARS: usize = 10_000;
pub const THINK_DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
pub const THINK_MAX_TIMEOUT_SECONDS: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

fn default_timeout_seconds() -> f64 {
    THINK_DEFAULT_TIMEOUT_SECONDS
}

impl ThinkRequest {
    pub fn v1(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            priority: TaskPriority::Normal,
            timeout_seconds: THINK_DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl Validate for ThinkRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("think_request.message", &self.message, THINK_MAX_MESSAGE_CHARS)?;
        validate_range(
            "think_request.timeout_seconds",
            self.timeout_seconds,
            f64::MIN_POSITIVE,
            THINK_MAX_TIMEOUT_SECONDS,
        )
    }
}

/// One hemisphere's contribution: its resonance trace and its harmonized verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemisphereTrace {
    pub resonance: ResonanceResult,
    pub harmonization: HarmonizationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub left: HemisphereTrace,
    pub right: HemisphereTrace,
    pub harmonization: ReflectionRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkResponse {
    pub cycle_id: PulseId,
    pub stardate: Stardate,
    pub unix_time: f64,
    pub final_verdict: String,
    pub reasoning_chain: ReasoningChain,
    pub confidence: f64,
    pub processing_time_seconds: f64,
    /// Pipeline restarts triggered by the return-to-resonator sentinel.
    pub restarts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_think_01_request_defaults_from_json() {
        let req: ThinkRequest = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(req, ThinkRequest::v1("hello"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn at_think_02_request_bounds() {
        assert!(ThinkRequest::v1("").validate().is_err());
        assert!(ThinkRequest::v1("x".repeat(THINK_MAX_MESSAGE_CHARS + 1))
            .validate()
            .is_err());
        assert!(ThinkRequest::v1("ok")
            .with_timeout_seconds(0.0)
            .validate()
            .is_err());
        assert!(ThinkRequest::v1("ok")
            .with_timeout_seconds(301.0)
            .validate()
            .is_err());
    }
}
