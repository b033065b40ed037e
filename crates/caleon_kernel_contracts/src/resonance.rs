#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pulse::{PulseId, Stardate};
use crate::{validate_finite, ContractViolation, SchemaVersion, Validate};

pub const RESONANCE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const DEFAULT_SEED_BIAS: f64 = 0.0;
pub const DEFAULT_SEED_MOD_FACTOR: f64 = 0.02;

/// Node ids of the aggregation pyramid, top tier first.
pub const TOP_TIER_NODE_IDS: [u8; 3] = [6, 5, 4];
pub const MID_TIER_NODE_IDS: [u8; 2] = [3, 2];
pub const FINAL_NODE_ID: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hemisphere {
    Left,
    Right,
}

impl Hemisphere {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseMode {
    Intuition,
    Induction,
    Deduction,
}

impl SynapseMode {
    pub const ALL: [SynapseMode; 3] = [Self::Intuition, Self::Induction, Self::Deduction];

    /// Name of the vault seed that parameterises this mode.
    pub fn seed_name(self) -> &'static str {
        match self {
            Self::Intuition => "seed_spinoza",
            Self::Induction => "seed_hume",
            Self::Deduction => "seed_kant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedProfile {
    #[serde(default)]
    pub bias: f64,
    #[serde(rename = "mod", default = "default_mod_factor")]
    pub mod_factor: f64,
}

fn default_mod_factor() -> f64 {
    DEFAULT_SEED_MOD_FACTOR
}

impl SeedProfile {
    pub fn v1(bias: f64, mod_factor: f64) -> Result<Self, ContractViolation> {
        let profile = Self { bias, mod_factor };
        profile.validate()?;
        Ok(profile)
    }
}

impl Default for SeedProfile {
    fn default() -> Self {
        Self {
            bias: DEFAULT_SEED_BIAS,
            mod_factor: DEFAULT_SEED_MOD_FACTOR,
        }
    }
}

impl Validate for SeedProfile {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("seed_profile.bias", self.bias)?;
        validate_finite("seed_profile.mod", self.mod_factor)?;
        if self.mod_factor < 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "seed_profile.mod",
                reason: "must be >= 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynapseUnit {
    pub mode: SynapseMode,
    pub bias: f64,
    pub mod_factor: f64,
}

impl SynapseUnit {
    pub fn from_profile(mode: SynapseMode, profile: SeedProfile) -> Self {
        Self {
            mode,
            bias: profile.bias,
            mod_factor: profile.mod_factor,
        }
    }

    /// Closed-form multiplicative range `fire` can apply for this unit.
    pub fn factor_bounds(&self) -> (f64, f64) {
        let m = self.mod_factor;
        match self.mode {
            SynapseMode::Intuition => (1.0 + self.bias - m, 1.0 + self.bias + m),
            SynapseMode::Induction => (1.0 - 2.0 * m, 1.0 + 2.0 * m),
            SynapseMode::Deduction => (1.0 - m, 1.0 + m / 2.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleAnnotation {
    pub reasoning: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceResult {
    pub schema_version: SchemaVersion,
    pub hemisphere: Hemisphere,
    pub pulse_id: PulseId,
    pub stardate: Stardate,
    pub unix_time: f64,
    pub input_stimulus: f64,
    pub context: String,
    pub node_outputs: BTreeMap<u8, f64>,
    pub verdict_scalar: f64,
    pub oracle_annotation: Option<OracleAnnotation>,
}

impl Validate for ResonanceResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RESONANCE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "resonance_result.schema_version",
                reason: "must match RESONANCE_CONTRACT_VERSION",
            });
        }
        validate_finite("resonance_result.input_stimulus", self.input_stimulus)?;
        validate_finite("resonance_result.verdict_scalar", self.verdict_scalar)?;
        if self.node_outputs.get(&FINAL_NODE_ID) != Some(&self.verdict_scalar) {
            return Err(ContractViolation::InvalidValue {
                field: "resonance_result.verdict_scalar",
                reason: "must equal the final node output",
            });
        }
        Ok(())
    }
}
