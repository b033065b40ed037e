#![forbid(unsafe_code)]

use std::sync::Arc;

use caleon_kernel_contracts::harmonization::{HarmonizationResult, ReflectionRecord};

use crate::pulse::PulseOracle;

pub const DEFAULT_REFLECTION_CONFIDENCE: f64 = 0.95;

pub trait ConfidenceStrategy: Send + Sync {
    fn score(&self, result: &HarmonizationResult) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedConfidence(pub f64);

impl Default for FixedConfidence {
    fn default() -> Self {
        Self(DEFAULT_REFLECTION_CONFIDENCE)
    }
}

impl ConfidenceStrategy for FixedConfidence {
    fn score(&self, _result: &HarmonizationResult) -> f64 {
        self.0
    }
}

/// Wraps harmonization results with a pulse, stardate and confidence score.
pub struct Reflector {
    pulse: Arc<PulseOracle>,
    strategy: Arc<dyn ConfidenceStrategy>,
}

impl Reflector {
    pub fn new(pulse: Arc<PulseOracle>) -> Self {
        Self::with_strategy(pulse, Arc::new(FixedConfidence::default()))
    }

    pub fn with_strategy(pulse: Arc<PulseOracle>, strategy: Arc<dyn ConfidenceStrategy>) -> Self {
        Self { pulse, strategy }
    }

    pub fn reflect(&self, result: HarmonizationResult) -> ReflectionRecord {
        let raw = self.strategy.score(&result);
        let confidence = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            log::warn!("confidence strategy returned {raw}; reflecting with 0.0");
            0.0
        };
        ReflectionRecord {
            original: result,
            confidence,
            pulse_id: self.pulse.pulse(),
            stardate: self.pulse.stardate(),
        }
    }
}
