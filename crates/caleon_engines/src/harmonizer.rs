#![forbid(unsafe_code)]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use caleon_kernel_contracts::collaborators::SeedVault;
use caleon_kernel_contracts::error::{CollaboratorError, HarmonizeResult};
use caleon_kernel_contracts::harmonization::{
    CyclePhase, CycleRecord, EvaluationInput, HarmonizationResult, HarmonizationSource,
    HarmonizationStatus, HemisphereDistillate, SeedCombo, Verdict,
    HARMONIZATION_CONTRACT_VERSION, HEMISPHERE_UNRESOLVED_VERDICT,
};
use caleon_kernel_contracts::resonance::Hemisphere;
use caleon_kernel_contracts::{validate_finite, ContractViolation, ReasonCodeId, Validate};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::combo::{ComboHistory, ComboRun, DrawLimits};
use crate::reason_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarmonizerConfig {
    pub primary_cycles: u32,
    pub conflict_cycles: u32,
    pub logic_set_size: usize,
    pub max_draw_attempts: u32,
    pub max_combo_history: usize,
}

impl HarmonizerConfig {
    pub fn mvp_v1() -> Self {
        Self {
            primary_cycles: 5,
            conflict_cycles: 5,
            logic_set_size: 5,
            max_draw_attempts: 256,
            max_combo_history: 10_000,
        }
    }

    pub fn total_cycles(&self) -> u32 {
        self.primary_cycles.saturating_add(self.conflict_cycles)
    }

    pub(crate) fn draw_limits(&self) -> DrawLimits {
        DrawLimits {
            logic_set_size: self.logic_set_size,
            max_attempts: self.max_draw_attempts,
        }
    }
}

impl Validate for HarmonizerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.total_cycles() == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "harmonizer_config.primary_cycles",
                reason: "primary + conflict cycles must be > 0",
            });
        }
        if self.logic_set_size == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "harmonizer_config.logic_set_size",
                reason: "must be > 0",
            });
        }
        if self.max_draw_attempts == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "harmonizer_config.max_draw_attempts",
                reason: "must be > 0",
            });
        }
        if self.max_combo_history < self.total_cycles() as usize {
            return Err(ContractViolation::InvalidValue {
                field: "harmonizer_config.max_combo_history",
                reason: "must hold at least one full run of cycles",
            });
        }
        Ok(())
    }
}

/// Per-hemisphere consensus loop over the seed vault.
///
/// Draws a combo no other cycle of the run has used, preferring combos no
/// earlier run has used either, and stops at the first verdict the vault calls
/// resolved. Once the catalog runs short the oldest history is recycled.
pub struct HemisphereHarmonizer {
    hemisphere: Hemisphere,
    config: HarmonizerConfig,
    vault: Arc<dyn SeedVault>,
    history: ComboHistory,
    rng: StdRng,
}

impl HemisphereHarmonizer {
    pub fn new(
        hemisphere: Hemisphere,
        config: HarmonizerConfig,
        vault: Arc<dyn SeedVault>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            hemisphere,
            config,
            vault,
            history: ComboHistory::new(config.max_combo_history),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }

    pub fn source(&self) -> HarmonizationSource {
        HarmonizationSource::for_hemisphere(self.hemisphere)
    }

    pub fn history(&self) -> &ComboHistory {
        &self.history
    }

    pub fn pick_unique_combo(&mut self, run: &mut ComboRun) -> HarmonizeResult<SeedCombo> {
        let philosophers = self.vault.philosophers();
        let logic_seeds = self.vault.logic_seeds();
        let source = self.source();
        self.history.draw(
            &mut self.rng,
            source,
            &philosophers,
            &logic_seeds,
            self.config.draw_limits(),
            run,
        )
    }

    pub fn harmonize(
        &mut self,
        distillate: &HemisphereDistillate,
    ) -> HarmonizeResult<HarmonizationResult> {
        validate_finite("hemisphere_distillate.stimulus", distillate.stimulus)?;
        validate_finite("hemisphere_distillate.verdict_scalar", distillate.verdict_scalar)?;
        let input = EvaluationInput::Hemisphere(distillate.clone());
        let source = self.source();

        let mut run = ComboRun::new(self.config.total_cycles());
        let mut cycles = Vec::with_capacity(self.config.total_cycles() as usize);
        for index in 1..=self.config.total_cycles() {
            let combo = self.pick_unique_combo(&mut run)?;
            let record = run_cycle(
                self.vault.as_ref(),
                &input,
                combo,
                index,
                phase_for(index, self.config.primary_cycles),
                source,
            );
            let resolved = record.resolved;
            let verdict = record.verdict.clone();
            cycles.push(record);
            if let (true, Some(verdict)) = (resolved, verdict) {
                log::debug!("{source} resolved on cycle {index}");
                return Ok(HarmonizationResult {
                    schema_version: HARMONIZATION_CONTRACT_VERSION,
                    source,
                    verdict,
                    cycles_used: index,
                    status: HarmonizationStatus::Resolved,
                    oracle_model: None,
                    cycles,
                });
            }
        }

        log::info!(
            "{source} unresolved after {} cycles",
            self.config.total_cycles()
        );
        Ok(HarmonizationResult {
            schema_version: HARMONIZATION_CONTRACT_VERSION,
            source,
            verdict: Verdict::symbolic(HEMISPHERE_UNRESOLVED_VERDICT),
            cycles_used: self.config.total_cycles(),
            status: HarmonizationStatus::Unresolved,
            oracle_model: None,
            cycles,
        })
    }
}

pub(crate) fn phase_for(index: u32, primary_cycles: u32) -> CyclePhase {
    if index <= primary_cycles {
        CyclePhase::Primary
    } else {
        CyclePhase::Conflict
    }
}

/// Evaluates one combo. Evaluator errors, panics and non-finite scalars leave
/// the cycle unresolved.
pub(crate) fn run_cycle(
    vault: &dyn SeedVault,
    input: &EvaluationInput,
    combo: SeedCombo,
    cycle_index: u32,
    phase: CyclePhase,
    source: HarmonizationSource,
) -> CycleRecord {
    let (verdict, reason_code) = match evaluate_guarded(vault, input, &combo) {
        Ok(verdict) => (Some(verdict), reason_codes::CAL_CYCLE_EVALUATED),
        Err(code) => {
            log::warn!("{source} cycle {cycle_index}: evaluator failed (reason {:#x})", code.0);
            (None, code)
        }
    };
    let resolved = verdict
        .as_ref()
        .map(|v| is_resolved_guarded(vault, v))
        .unwrap_or(false);
    CycleRecord {
        cycle_index,
        phase,
        combo,
        verdict,
        resolved,
        escalated: false,
        reason_code: if resolved {
            reason_codes::CAL_CYCLE_RESOLVED
        } else {
            reason_code
        },
    }
}

fn evaluate_guarded(
    vault: &dyn SeedVault,
    input: &EvaluationInput,
    combo: &SeedCombo,
) -> Result<Verdict, ReasonCodeId> {
    match catch_unwind(AssertUnwindSafe(|| {
        vault.evaluate(input, &combo.philosopher, &combo.logic_set)
    })) {
        Ok(Ok(verdict)) if !verdict.is_finite() => {
            log::warn!("evaluator returned non-finite verdict {verdict}");
            Err(reason_codes::CAL_VERDICT_NOT_FINITE)
        }
        Ok(Ok(verdict)) => Ok(verdict),
        Ok(Err(CollaboratorError::Unavailable { collaborator, detail })) => {
            log::warn!("{collaborator} unavailable during evaluation: {detail}");
            Err(reason_codes::CAL_EVALUATOR_UNAVAILABLE)
        }
        Ok(Err(e)) => {
            log::warn!("evaluation failed: {e}");
            Err(reason_codes::CAL_EVALUATOR_UNAVAILABLE)
        }
        Err(_) => {
            log::error!("verdict evaluator panicked; treating cycle as unresolved");
            Err(reason_codes::CAL_EVALUATOR_PANICKED)
        }
    }
}

pub(crate) fn is_resolved_guarded(vault: &dyn SeedVault, verdict: &Verdict) -> bool {
    catch_unwind(AssertUnwindSafe(|| vault.is_resolved(verdict))).unwrap_or_else(|_| {
        log::error!("resolution check panicked; treating verdict as unresolved");
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use caleon_kernel_contracts::collaborators::{SeedCatalog, VerdictEvaluator};
    use caleon_kernel_contracts::error::HarmonizeError;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Resolves on the n-th evaluation (1-based); `None` never resolves.
    struct CountingVault {
        philosophers: Vec<String>,
        logic_seeds: Vec<String>,
        resolve_on: Option<u32>,
        calls: AtomicU32,
        seen: Mutex<Vec<(String, Vec<String>)>>,
        failing_calls: BTreeSet<u32>,
        panic_on: Option<u32>,
        scalar_on: Option<(u32, f64)>,
    }

    impl CountingVault {
        fn new(philosophers: usize, logic_seeds: usize, resolve_on: Option<u32>) -> Self {
            Self {
                philosophers: (0..philosophers).map(|i| format!("philosopher_{i}")).collect(),
                logic_seeds: (0..logic_seeds).map(|i| format!("logic_{i:02}")).collect(),
                resolve_on,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
                failing_calls: BTreeSet::new(),
                panic_on: None,
                scalar_on: None,
            }
        }
    }

    impl SeedCatalog for CountingVault {
        fn philosophers(&self) -> Vec<String> {
            self.philosophers.clone()
        }

        fn logic_seeds(&self) -> Vec<String> {
            self.logic_seeds.clone()
        }
    }

    impl VerdictEvaluator for CountingVault {
        fn evaluate(
            &self,
            _input: &EvaluationInput,
            philosopher: &str,
            logic_set: &[String],
        ) -> Result<Verdict, CollaboratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen
                .lock()
                .unwrap()
                .push((philosopher.to_string(), logic_set.to_vec()));
            if self.panic_on == Some(n) {
                panic!("evaluator blew up");
            }
            if self.failing_calls.contains(&n) {
                return Err(CollaboratorError::unavailable("seed_vault", "io error"));
            }
            if let Some((at, value)) = self.scalar_on {
                if at == n {
                    return Ok(Verdict::Scalar(value));
                }
            }
            if self.resolve_on == Some(n) {
                Ok(Verdict::symbolic(format!("resolved@{n}")))
            } else {
                Ok(Verdict::symbolic("pending"))
            }
        }

        fn is_resolved(&self, verdict: &Verdict) -> bool {
            match verdict {
                Verdict::Scalar(_) => true,
                Verdict::Symbolic(s) => s.starts_with("resolved@"),
            }
        }
    }

    fn distillate() -> HemisphereDistillate {
        HemisphereDistillate {
            hemisphere: Hemisphere::Left,
            stimulus: 0.42,
            verdict_scalar: 0.43,
            context: "test".to_string(),
        }
    }

    fn harmonizer(vault: Arc<CountingVault>) -> HemisphereHarmonizer {
        HemisphereHarmonizer::new(Hemisphere::Left, HarmonizerConfig::mvp_v1(), vault)
            .unwrap()
            .with_rng_seed(9)
    }

    #[test]
    fn at_harmonizer_01_resolves_on_third_primary_cycle() {
        let vault = Arc::new(CountingVault::new(4, 12, Some(3)));
        let mut h = harmonizer(vault.clone());
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.status, HarmonizationStatus::Resolved);
        assert_eq!(out.cycles_used, 3);
        assert_eq!(out.source, HarmonizationSource::LeftHemisphere);
        assert_eq!(out.verdict, Verdict::symbolic("resolved@3"));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 3);
        assert!(out.cycles.iter().all(|c| c.phase == CyclePhase::Primary));
        assert_eq!(out.cycles[2].reason_code, reason_codes::CAL_CYCLE_RESOLVED);
        assert!(out.validate().is_ok());
    }

    #[test]
    fn at_harmonizer_02_never_more_than_ten_cycles_and_all_combos_unique() {
        let vault = Arc::new(CountingVault::new(3, 10, None));
        let mut h = harmonizer(vault.clone());
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.status, HarmonizationStatus::Unresolved);
        assert_eq!(out.verdict, Verdict::symbolic(HEMISPHERE_UNRESOLVED_VERDICT));
        assert_eq!(out.cycles_used, 10);
        assert_eq!(vault.calls.load(Ordering::SeqCst), 10);

        let seen = vault.seen.lock().unwrap();
        let unique: BTreeSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), seen.len());
        for (_, logic_set) in seen.iter() {
            assert_eq!(logic_set.len(), 5);
            assert!(logic_set.windows(2).all(|w| w[0] < w[1]));
        }
        let phases: Vec<CyclePhase> = out.cycles.iter().map(|c| c.phase).collect();
        assert_eq!(phases[4], CyclePhase::Primary);
        assert_eq!(phases[5], CyclePhase::Conflict);
    }

    #[test]
    fn at_harmonizer_03_resolution_in_conflict_phase_counts_primary_cycles() {
        let vault = Arc::new(CountingVault::new(3, 10, Some(7)));
        let mut h = harmonizer(vault);
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.cycles_used, 7);
        assert_eq!(out.cycles.last().map(|c| c.phase), Some(CyclePhase::Conflict));
    }

    #[test]
    fn at_harmonizer_04_history_persists_across_calls() {
        let vault = Arc::new(CountingVault::new(2, 8, None));
        let mut h = harmonizer(vault.clone());
        h.harmonize(&distillate()).unwrap();
        h.harmonize(&distillate()).unwrap();
        assert_eq!(h.history().len(), 20);
        let seen = vault.seen.lock().unwrap();
        let unique: BTreeSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn at_harmonizer_05_many_runs_on_a_small_catalog_keep_succeeding() {
        // 3 philosophers * C(10,5) = 756 combos, far fewer than 200 runs * 10 cycles.
        let vault = Arc::new(CountingVault::new(3, 10, None));
        let mut h = harmonizer(vault.clone());
        for run in 0..200 {
            let before = vault.seen.lock().unwrap().len();
            let out = h.harmonize(&distillate()).unwrap();
            assert_eq!(out.status, HarmonizationStatus::Unresolved, "run {run}");
            assert_eq!(out.cycles_used, 10);
            let seen = vault.seen.lock().unwrap();
            let this_run: BTreeSet<_> = seen[before..].iter().collect();
            assert_eq!(this_run.len(), 10, "run {run} repeated a combo");
            assert!(h.history().len() <= 756);
        }
        assert_eq!(vault.calls.load(Ordering::SeqCst), 2_000);
    }

    #[test]
    fn at_harmonizer_06_evaluator_failures_and_panics_leave_cycle_unresolved() {
        let mut vault = CountingVault::new(3, 10, Some(4));
        vault.failing_calls.insert(1);
        vault.panic_on = Some(2);
        let vault = Arc::new(vault);
        let mut h = harmonizer(vault);
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.cycles_used, 4);
        assert_eq!(out.cycles[0].verdict, None);
        assert_eq!(out.cycles[0].reason_code, reason_codes::CAL_EVALUATOR_UNAVAILABLE);
        assert_eq!(out.cycles[1].verdict, None);
        assert_eq!(out.cycles[1].reason_code, reason_codes::CAL_EVALUATOR_PANICKED);
        assert_eq!(out.cycles[2].reason_code, reason_codes::CAL_CYCLE_EVALUATED);
    }

    #[test]
    fn at_harmonizer_07_left_and_right_instances_share_no_history() {
        let vault = Arc::new(CountingVault::new(2, 6, None));
        let mut left = harmonizer(vault.clone());
        let mut right =
            HemisphereHarmonizer::new(Hemisphere::Right, HarmonizerConfig::mvp_v1(), vault)
                .unwrap()
                .with_rng_seed(9);
        left.harmonize(&distillate()).unwrap();
        assert_eq!(right.history().len(), 0);
        let out = right.harmonize(&distillate()).unwrap();
        assert_eq!(out.source, HarmonizationSource::RightHemisphere);
        assert_eq!(out.cycles_used, 10);
    }

    #[test]
    fn at_harmonizer_08_config_guards() {
        let mut cfg = HarmonizerConfig::mvp_v1();
        cfg.max_combo_history = 9;
        assert!(cfg.validate().is_err());
        let mut cfg = HarmonizerConfig::mvp_v1();
        cfg.primary_cycles = 0;
        cfg.conflict_cycles = 0;
        assert!(cfg.validate().is_err());
        assert!(HarmonizerConfig::mvp_v1().validate().is_ok());
    }

    #[test]
    fn at_harmonizer_09_non_finite_input_is_rejected() {
        let vault = Arc::new(CountingVault::new(3, 10, None));
        let mut h = harmonizer(vault);
        let mut input = distillate();
        input.stimulus = f64::NAN;
        assert!(matches!(
            h.harmonize(&input),
            Err(HarmonizeError::Contract(ContractViolation::NotFinite { .. }))
        ));
    }

    #[test]
    fn at_harmonizer_10_non_finite_scalar_verdict_leaves_cycle_unresolved() {
        let mut vault = CountingVault::new(3, 10, None);
        vault.scalar_on = Some((1, f64::NAN));
        let vault = Arc::new(vault);
        let mut h = harmonizer(vault.clone());
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.cycles[0].verdict, None);
        assert!(!out.cycles[0].resolved);
        assert_eq!(out.cycles[0].reason_code, reason_codes::CAL_VERDICT_NOT_FINITE);
        assert_eq!(out.status, HarmonizationStatus::Unresolved);
        assert!(serde_json::to_string(&out).unwrap().contains("UNRESOLVED"));

        let mut vault = CountingVault::new(3, 10, None);
        vault.scalar_on = Some((1, 0.75));
        let mut h = harmonizer(Arc::new(vault));
        let out = h.harmonize(&distillate()).unwrap();
        assert_eq!(out.verdict, Verdict::Scalar(0.75));
        assert_eq!(out.cycles_used, 1);
    }

    #[test]
    fn at_harmonizer_11_catalog_smaller_than_a_run_is_a_distinct_error() {
        // 1 philosopher * C(6,5) = 6 combos, fewer than the 10 cycles of a run.
        let vault = Arc::new(CountingVault::new(1, 6, None));
        let mut h = harmonizer(vault.clone());
        let err = h.harmonize(&distillate()).unwrap_err();
        assert!(matches!(
            err,
            HarmonizeError::ExhaustedSeedSpace {
                harmonizer: HarmonizationSource::LeftHemisphere,
                space: 6,
                used: 0,
                ..
            }
        ));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 0);
        assert!(h.history().is_empty());
    }
}
