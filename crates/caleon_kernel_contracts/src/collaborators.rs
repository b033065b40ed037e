#![forbid(unsafe_code)]

//! Capability interfaces for the collaborators the consensus core consumes
//! but does not own: the seed vault, the reasoning oracle, the audit sink and
//! the seed-profile source.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::harmonization::{EvaluationInput, Verdict};
use crate::resonance::SeedProfile;

/// Enumerable seed ids a harmonizer draws its combos from.
pub trait SeedCatalog: Send + Sync {
    fn philosophers(&self) -> Vec<String>;
    fn logic_seeds(&self) -> Vec<String>;
}

/// The external judge. Its semantics are opaque to the core.
pub trait VerdictEvaluator: Send + Sync {
    fn evaluate(
        &self,
        input: &EvaluationInput,
        philosopher: &str,
        logic_set: &[String],
    ) -> Result<Verdict, CollaboratorError>;

    fn is_resolved(&self, verdict: &Verdict) -> bool;
}

pub trait SeedVault: SeedCatalog + VerdictEvaluator {}

impl<T: SeedCatalog + VerdictEvaluator> SeedVault for T {}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleQuery {
    pub prompt: String,
    pub system: Option<String>,
    pub context: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl OracleQuery {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            context: None,
            timeout,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePerformance {
    pub total_duration: u64,
    pub eval_count: u64,
    pub eval_duration: u64,
}

/// Oracle answer. Failures are carried in-band; `query` never raises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleReply {
    pub success: bool,
    pub response: String,
    pub model: String,
    pub performance: OraclePerformance,
    pub error: Option<String>,
}

impl OracleReply {
    pub fn ok(response: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            model: model.into(),
            performance: OraclePerformance::default(),
            error: None,
        }
    }

    pub fn unavailable(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            model: model.into(),
            performance: OraclePerformance::default(),
            error: Some(error.into()),
        }
    }
}

pub trait ReasoningOracle: Send + Sync {
    fn health_check(&self) -> bool;
    fn query(&self, query: &OracleQuery) -> OracleReply;
}

/// Oracle that is never reachable. Pipelines without a configured oracle run local-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOracle;

impl ReasoningOracle for UnavailableOracle {
    fn health_check(&self) -> bool {
        false
    }

    fn query(&self, _query: &OracleQuery) -> OracleReply {
        OracleReply::unavailable("none", "no reasoning oracle configured")
    }
}

/// Deterministic audit record id: `{scope}_{stage}_{counter:06}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuditRecordId(String);

impl AuditRecordId {
    pub fn new(scope: &str, stage: &str, counter: u64) -> Self {
        Self(format!("{scope}_{stage}_{counter:06}"))
    }

    /// Accepts `{scope}_{stage}_{counter}`: ASCII word characters and a counter of at least six digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, counter) = raw.rsplit_once('_')?;
        let (scope, stage) = prefix.split_once('_')?;
        if scope.is_empty()
            || stage.is_empty()
            || !prefix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            || counter.len() < 6
            || !counter.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuditRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait AuditSink: Send + Sync {
    fn write_reflection(
        &self,
        record_id: &AuditRecordId,
        data: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

pub trait SeedProfileSource: Send + Sync {
    /// `None` when the vault has no seed under `name`.
    fn read_seed(&self, name: &str) -> Option<SeedProfile>;
}
