#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use caleon_kernel_contracts::collaborators::{
    AuditRecordId, AuditSink, OracleQuery, ReasoningOracle, SeedProfileSource,
};
use caleon_kernel_contracts::resonance::{
    Hemisphere, OracleAnnotation, ResonanceResult, SeedProfile, SynapseMode, SynapseUnit,
    FINAL_NODE_ID, MID_TIER_NODE_IDS, RESONANCE_CONTRACT_VERSION, TOP_TIER_NODE_IDS,
};
use caleon_kernel_contracts::{validate_finite, ContractViolation, Validate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::pulse::PulseOracle;

pub const RESONANCE_AUDIT_STAGE: &str = "syn_res";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResonatorConfig {
    pub synapses_per_mode: usize,
    pub annotate_with_oracle: bool,
    pub annotation_timeout_ms: u64,
}

impl ResonatorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            synapses_per_mode: 780,
            annotate_with_oracle: true,
            annotation_timeout_ms: 30_000,
        }
    }
}

impl Validate for ResonatorConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.synapses_per_mode == 0 || self.synapses_per_mode > 1_000_000 {
            return Err(ContractViolation::InvalidValue {
                field: "resonator_config.synapses_per_mode",
                reason: "must be within 1..=1000000",
            });
        }
        if self.annotation_timeout_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "resonator_config.annotation_timeout_ms",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// First-pass reasoning engine for one hemisphere.
///
/// Holds a shuffled bank of `3 * synapses_per_mode` units. Every `resonate`
/// fires the whole bank, distils it through the 6-node pyramid and writes the
/// trace to the audit sink.
pub struct Resonator {
    hemisphere: Hemisphere,
    config: ResonatorConfig,
    pulse: Arc<PulseOracle>,
    audit: Arc<dyn AuditSink>,
    oracle: Option<Arc<dyn ReasoningOracle>>,
    profiles: [SeedProfile; 3],
    synapses: Vec<SynapseUnit>,
    rng: StdRng,
    audit_counter: u64,
}

impl Resonator {
    pub fn new(
        hemisphere: Hemisphere,
        config: ResonatorConfig,
        pulse: Arc<PulseOracle>,
        seeds: &dyn SeedProfileSource,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        let profiles = load_profiles(hemisphere, seeds)?;
        let mut rng = StdRng::from_entropy();
        let synapses = build_bank(&profiles, config.synapses_per_mode, &mut rng);
        Ok(Self {
            hemisphere,
            config,
            pulse,
            audit,
            oracle: None,
            profiles,
            synapses,
            rng,
            audit_counter: 0,
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ReasoningOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Reseeds the perturbation source and reshuffles the bank deterministically.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.synapses = build_bank(&self.profiles, self.config.synapses_per_mode, &mut self.rng);
        self
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }

    pub fn synapse_count(&self) -> usize {
        self.synapses.len()
    }

    pub fn synapses(&self) -> &[SynapseUnit] {
        &self.synapses
    }

    /// Closed-form range that `resonate(stimulus, _)` can produce for this bank.
    pub fn verdict_bounds(&self, stimulus: f64) -> (f64, f64) {
        let (lo, hi) = self.synapses.iter().map(SynapseUnit::factor_bounds).fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), (l, h)| (lo.min(l), hi.max(h)),
        );
        let a = stimulus * lo;
        let b = stimulus * hi;
        (a.min(b), a.max(b))
    }

    pub fn resonate(
        &mut self,
        stimulus: f64,
        context: &str,
    ) -> Result<ResonanceResult, ContractViolation> {
        self.resonate_within(stimulus, context, None)
    }

    /// Same as `resonate`, but the oracle annotation is abandoned once
    /// `budget` (or `annotation_timeout_ms`, whichever is shorter) runs out.
    pub fn resonate_within(
        &mut self,
        stimulus: f64,
        context: &str,
        budget: Option<Duration>,
    ) -> Result<ResonanceResult, ContractViolation> {
        validate_finite("resonator.stimulus", stimulus)?;

        let fired: Vec<f64> = {
            let rng = &mut self.rng;
            self.synapses
                .iter()
                .map(|unit| fire(stimulus, unit, rng))
                .collect()
        };
        let node_outputs = distil(&fired, self.config.synapses_per_mode);
        let verdict_scalar = node_outputs.get(&FINAL_NODE_ID).copied().unwrap_or(1.0);

        let oracle_annotation = self.annotate(stimulus, verdict_scalar, context, budget);
        let pulse_id = self.pulse.pulse();
        let result = ResonanceResult {
            schema_version: RESONANCE_CONTRACT_VERSION,
            hemisphere: self.hemisphere,
            pulse_id,
            stardate: self.pulse.stardate(),
            unix_time: pulse_id.unix_time(),
            input_stimulus: stimulus,
            context: context.to_string(),
            node_outputs,
            verdict_scalar,
            oracle_annotation,
        };
        self.write_audit(&result);
        Ok(result)
    }

    fn annotate(
        &self,
        stimulus: f64,
        verdict: f64,
        context: &str,
        budget: Option<Duration>,
    ) -> Option<OracleAnnotation> {
        if !self.config.annotate_with_oracle {
            return None;
        }
        let oracle = self.oracle.clone()?;
        let hemisphere = self.hemisphere;
        let limit = Duration::from_millis(self.config.annotation_timeout_ms);
        let wait = budget.map_or(limit, |b| b.min(limit));
        if wait.is_zero() {
            log::debug!("{hemisphere} resonator: no time left for oracle annotation");
            return None;
        }

        let mut query = OracleQuery::new(annotation_prompt(hemisphere, stimulus, verdict), wait);
        if !context.trim().is_empty() {
            let context = serde_json::from_str(context)
                .unwrap_or_else(|_| Value::String(context.to_string()));
            query = query.with_context(context);
        }

        // The worker is detached on timeout; the oracle's own timeouts end it.
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("{hemisphere}-annotation"))
            .spawn(move || {
                let reply = if oracle.health_check() {
                    Some(oracle.query(&query))
                } else {
                    None
                };
                let _ = tx.send(reply);
            });
        if let Err(e) = spawned {
            log::warn!("{hemisphere} resonator: annotation worker not started: {e}");
            return None;
        }

        let reply = match rx.recv_timeout(wait) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                log::debug!("{hemisphere} resonator: oracle unhealthy, skipping annotation");
                return None;
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{hemisphere} resonator: oracle annotation exceeded {}ms, skipping",
                    wait.as_millis()
                );
                return None;
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("{hemisphere} resonator: annotation worker exited without a reply");
                return None;
            }
        };
        if !reply.success {
            log::warn!(
                "{hemisphere} resonator: oracle annotation failed: {}",
                reply.error.as_deref().unwrap_or("unknown")
            );
            return None;
        }
        Some(OracleAnnotation {
            reasoning: reply.response,
            model: reply.model,
        })
    }

    fn write_audit(&mut self, result: &ResonanceResult) {
        let record_id = AuditRecordId::new(
            self.hemisphere.as_str(),
            RESONANCE_AUDIT_STAGE,
            self.audit_counter,
        );
        self.audit_counter += 1;
        let data = match serde_json::to_value(result) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("{record_id}: resonance trace not serialisable: {e}");
                return;
            }
        };
        if let Err(e) = self.audit.write_reflection(&record_id, &data) {
            log::warn!("{record_id}: audit write failed: {e}");
        }
    }
}

fn load_profiles(
    hemisphere: Hemisphere,
    seeds: &dyn SeedProfileSource,
) -> Result<[SeedProfile; 3], ContractViolation> {
    let mut profiles = [SeedProfile::default(); 3];
    for (slot, mode) in profiles.iter_mut().zip(SynapseMode::ALL) {
        match seeds.read_seed(mode.seed_name()) {
            Some(profile) => {
                profile.validate()?;
                *slot = profile;
            }
            None => log::info!(
                "{hemisphere} resonator: {} missing, using default profile",
                mode.seed_name()
            ),
        }
    }
    Ok(profiles)
}

fn build_bank(profiles: &[SeedProfile; 3], per_mode: usize, rng: &mut StdRng) -> Vec<SynapseUnit> {
    let mut bank = Vec::with_capacity(per_mode * 3);
    for _ in 0..per_mode {
        for (mode, profile) in SynapseMode::ALL.iter().zip(profiles) {
            bank.push(SynapseUnit::from_profile(*mode, *profile));
        }
    }
    bank.shuffle(rng);
    bank
}

/// Applies one unit's perturbation to the stimulus.
pub fn fire<R: Rng + ?Sized>(stimulus: f64, unit: &SynapseUnit, rng: &mut R) -> f64 {
    let m = unit.mod_factor;
    match unit.mode {
        SynapseMode::Intuition => stimulus * (1.0 + unit.bias + uniform(rng, -m, m)),
        SynapseMode::Induction => stimulus * (1.0 + uniform(rng, -2.0 * m, 2.0 * m)),
        SynapseMode::Deduction => stimulus * (1.0 + uniform(rng, -m, m / 2.0)),
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.gen_range(low..high)
}

/// Positional fan-in: three equal slices feed the top tier, both mid nodes
/// average the whole top tier, the final node averages the mid tier.
fn distil(fired: &[f64], slice_len: usize) -> BTreeMap<u8, f64> {
    let mut out = BTreeMap::new();
    let mut top = Vec::with_capacity(TOP_TIER_NODE_IDS.len());
    for (i, node_id) in TOP_TIER_NODE_IDS.iter().enumerate() {
        let start = (i * slice_len).min(fired.len());
        let end = ((i + 1) * slice_len).min(fired.len());
        let value = aggregate(&fired[start..end]);
        out.insert(*node_id, value);
        top.push(value);
    }
    let mut mid = Vec::with_capacity(MID_TIER_NODE_IDS.len());
    for node_id in MID_TIER_NODE_IDS {
        let value = aggregate(&top);
        out.insert(node_id, value);
        mid.push(value);
    }
    out.insert(FINAL_NODE_ID, aggregate(&mid));
    out
}

fn aggregate(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn annotation_prompt(hemisphere: Hemisphere, stimulus: f64, verdict: f64) -> String {
    let (role, focus) = match hemisphere {
        Hemisphere::Left => (
            "Left Hemisphere Synaptic Resonator (analytical processing)",
            "Focus on logical patterns, deductive reasoning, and structured analysis.",
        ),
        Hemisphere::Right => (
            "Right Hemisphere Synaptic Resonator (intuitive processing)",
            "Focus on associative patterns, analogy, and holistic interpretation.",
        ),
    };
    format!(
        "You are the {role}.\n\
         Input stimulus: {stimulus}\n\
         Synaptic verdict: {verdict}\n\n\
         Provide reasoning that enhances or validates this synaptic processing.\n\
         {focus}\n\
         Keep response concise and actionable."
    )
}
