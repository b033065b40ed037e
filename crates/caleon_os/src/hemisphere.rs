#![forbid(unsafe_code)]

use std::time::Duration;

use caleon_engines::harmonizer::HemisphereHarmonizer;
use caleon_engines::resonator::Resonator;
use caleon_kernel_contracts::error::HarmonizeResult;
use caleon_kernel_contracts::harmonization::HemisphereDistillate;
use caleon_kernel_contracts::resonance::Hemisphere;
use caleon_kernel_contracts::think::HemisphereTrace;
use caleon_kernel_contracts::ContractViolation;

/// Resonator feeding its own harmonizer. One instance per hemisphere; the two
/// never share state.
pub struct HemispherePipeline {
    resonator: Resonator,
    harmonizer: HemisphereHarmonizer,
}

impl HemispherePipeline {
    pub fn new(
        resonator: Resonator,
        harmonizer: HemisphereHarmonizer,
    ) -> Result<Self, ContractViolation> {
        if resonator.hemisphere() != harmonizer.hemisphere() {
            return Err(ContractViolation::InvalidValue {
                field: "hemisphere_pipeline.harmonizer",
                reason: "must serve the same hemisphere as the resonator",
            });
        }
        Ok(Self {
            resonator,
            harmonizer,
        })
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.resonator.hemisphere()
    }

    pub fn harmonizer(&self) -> &HemisphereHarmonizer {
        &self.harmonizer
    }

    /// `annotation_budget` bounds the resonator's oracle annotation only.
    pub fn run(
        &mut self,
        stimulus: f64,
        context: &str,
        annotation_budget: Option<Duration>,
    ) -> HarmonizeResult<HemisphereTrace> {
        let resonance = self
            .resonator
            .resonate_within(stimulus, context, annotation_budget)?;
        let distillate = HemisphereDistillate {
            hemisphere: self.hemisphere(),
            stimulus,
            verdict_scalar: resonance.verdict_scalar,
            context: context.to_string(),
        };
        let harmonization = self.harmonizer.harmonize(&distillate)?;
        Ok(HemisphereTrace {
            resonance,
            harmonization,
        })
    }
}
