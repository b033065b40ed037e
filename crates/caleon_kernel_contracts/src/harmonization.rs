#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pulse::{PulseId, Stardate};
use crate::resonance::Hemisphere;
use crate::{validate_range, ContractViolation, ReasonCodeId, SchemaVersion, Validate};

pub const HARMONIZATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const HEMISPHERE_UNRESOLVED_VERDICT: &str = "UNRESOLVED";
pub const RETURN_TO_RESONATOR_VERDICT: &str = "UNRESOLVED_RETURN_TO_RESONATOR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verdict {
    Scalar(f64),
    Symbolic(String),
}

impl Verdict {
    pub fn symbolic(text: impl Into<String>) -> Self {
        Self::Symbolic(text.into())
    }

    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Symbolic(s) => Some(s),
            Self::Scalar(_) => None,
        }
    }

    /// False only for a NaN or infinite scalar, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Scalar(v) => v.is_finite(),
            Self::Symbolic(_) => true,
        }
    }

    /// True for the final-core sentinel that sends the caller back to resonance.
    pub fn is_return_to_resonator(&self) -> bool {
        self.as_symbolic() == Some(RETURN_TO_RESONATOR_VERDICT)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Symbolic(s) => f.write_str(s),
        }
    }
}

/// One philosopher plus a sorted logic-seed set, drawn for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeedCombo {
    pub philosopher: String,
    pub logic_set: Vec<String>,
}

impl SeedCombo {
    pub fn new(philosopher: impl Into<String>, logic_set: Vec<String>) -> Self {
        let mut logic_set = logic_set;
        logic_set.sort();
        Self {
            philosopher: philosopher.into(),
            logic_set,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Primary,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_index: u32,
    pub phase: CyclePhase,
    pub combo: SeedCombo,
    /// `None` when the evaluator was unavailable for this cycle.
    pub verdict: Option<Verdict>,
    pub resolved: bool,
    pub escalated: bool,
    pub reason_code: ReasonCodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarmonizationSource {
    #[serde(rename = "Left_Hemisphere")]
    LeftHemisphere,
    #[serde(rename = "Right_Hemisphere")]
    RightHemisphere,
    #[serde(rename = "Final_Core")]
    FinalCore,
    #[serde(rename = "Final_Core_Oracle")]
    FinalCoreOracle,
}

impl HarmonizationSource {
    pub fn for_hemisphere(hemisphere: Hemisphere) -> Self {
        match hemisphere {
            Hemisphere::Left => Self::LeftHemisphere,
            Hemisphere::Right => Self::RightHemisphere,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeftHemisphere => "Left_Hemisphere",
            Self::RightHemisphere => "Right_Hemisphere",
            Self::FinalCore => "Final_Core",
            Self::FinalCoreOracle => "Final_Core_Oracle",
        }
    }
}

impl fmt::Display for HarmonizationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmonizationStatus {
    Resolved,
    ResolvedEscalated,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizationResult {
    pub schema_version: SchemaVersion,
    pub source: HarmonizationSource,
    pub verdict: Verdict,
    pub cycles_used: u32,
    pub status: HarmonizationStatus,
    pub oracle_model: Option<String>,
    pub cycles: Vec<CycleRecord>,
}

impl HarmonizationResult {
    pub fn is_resolved(&self) -> bool {
        self.status != HarmonizationStatus::Unresolved
    }
}

impl Validate for HarmonizationResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != HARMONIZATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "harmonization_result.schema_version",
                reason: "must match HARMONIZATION_CONTRACT_VERSION",
            });
        }
        if self.cycles_used as usize != self.cycles.len() {
            return Err(ContractViolation::InvalidValue {
                field: "harmonization_result.cycles_used",
                reason: "must equal the number of recorded cycles",
            });
        }
        let escalated = self.status == HarmonizationStatus::ResolvedEscalated;
        if escalated != self.oracle_model.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "harmonization_result.oracle_model",
                reason: "must be present exactly when resolved by escalation",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub original: HarmonizationResult,
    pub confidence: f64,
    pub pulse_id: PulseId,
    pub stardate: Stardate,
}

impl Validate for ReflectionRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.original.validate()?;
        validate_range("reflection_record.confidence", self.confidence, 0.0, 1.0)
    }
}

/// What a single hemisphere hands its harmonizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemisphereDistillate {
    pub hemisphere: Hemisphere,
    pub stimulus: f64,
    pub verdict_scalar: f64,
    pub context: String,
}

/// Both hemisphere verdicts plus the distilled message, as seen by the final core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRecord {
    pub left: Verdict,
    pub right: Verdict,
    pub distilled: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationInput {
    Hemisphere(HemisphereDistillate),
    Fused(FusedRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo() -> SeedCombo {
        SeedCombo::new("kant", vec!["e".into(), "a".into(), "c".into()])
    }

    #[test]
    fn at_harmonization_01_combo_logic_set_is_sorted() {
        assert_eq!(combo().logic_set, vec!["a", "c", "e"]);
        assert_eq!(
            combo(),
            SeedCombo::new("kant", vec!["c".into(), "e".into(), "a".into()])
        );
    }

    #[test]
    fn at_harmonization_02_sentinel_detection() {
        assert!(Verdict::symbolic(RETURN_TO_RESONATOR_VERDICT).is_return_to_resonator());
        assert!(!Verdict::symbolic(HEMISPHERE_UNRESOLVED_VERDICT).is_return_to_resonator());
        assert!(!Verdict::Scalar(0.5).is_return_to_resonator());
    }

    #[test]
    fn at_harmonization_03_cycles_used_must_match_trace() {
        let result = HarmonizationResult {
            schema_version: HARMONIZATION_CONTRACT_VERSION,
            source: HarmonizationSource::FinalCore,
            verdict: Verdict::Scalar(1.0),
            cycles_used: 2,
            status: HarmonizationStatus::Resolved,
            oracle_model: None,
            cycles: vec![CycleRecord {
                cycle_index: 1,
                phase: CyclePhase::Primary,
                combo: combo(),
                verdict: Some(Verdict::Scalar(1.0)),
                resolved: true,
                escalated: false,
                reason_code: ReasonCodeId(1),
            }],
        };
        assert!(result.validate().is_err());
    }

    #[test]
    fn at_harmonization_04_source_wire_names() {
        let json = serde_json::to_string(&HarmonizationSource::FinalCoreOracle).unwrap();
        assert_eq!(json, "\"Final_Core_Oracle\"");
        let json = serde_json::to_string(&HarmonizationStatus::ResolvedEscalated).unwrap();
        assert_eq!(json, "\"resolved_escalated\"");
    }
}
