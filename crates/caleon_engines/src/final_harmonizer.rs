#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use caleon_kernel_contracts::collaborators::{
    OracleQuery, OracleReply, ReasoningOracle, SeedVault,
};
use caleon_kernel_contracts::error::{CollaboratorError, HarmonizeResult};
use caleon_kernel_contracts::harmonization::{
    CyclePhase, EvaluationInput, FusedRecord, HarmonizationResult, HarmonizationSource,
    HarmonizationStatus, ReflectionRecord, SeedCombo, Verdict, HARMONIZATION_CONTRACT_VERSION,
    RETURN_TO_RESONATOR_VERDICT,
};
use caleon_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::combo::{ComboHistory, ComboRun};
use crate::harmonizer::{phase_for, run_cycle, HarmonizerConfig};
use crate::reason_codes;
use crate::reflector::Reflector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalHarmonizerConfig {
    pub harmonizer: HarmonizerConfig,
    pub escalation_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
}

impl FinalHarmonizerConfig {
    pub fn mvp_v1() -> Self {
        Self {
            harmonizer: HarmonizerConfig::mvp_v1(),
            escalation_timeout_ms: 30_000,
            health_check_timeout_ms: 5_000,
        }
    }
}

impl Validate for FinalHarmonizerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.harmonizer.validate()?;
        if self.escalation_timeout_ms == 0 || self.health_check_timeout_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "final_harmonizer_config.escalation_timeout_ms",
                reason: "timeouts must be > 0",
            });
        }
        Ok(())
    }
}

struct DrawState {
    history: ComboHistory,
    rng: StdRng,
}

/// Final-core consensus over both hemisphere verdicts.
///
/// Runs the same primary/conflict cycle schedule as a hemisphere. In conflict
/// cycles a locally unresolved verdict may be escalated to the reasoning
/// oracle; that call is the only point where `harmonize` suspends. The combo
/// history lock is taken only for the synchronous draw and never held across
/// an `.await`.
pub struct FinalHarmonizer {
    config: FinalHarmonizerConfig,
    vault: Arc<dyn SeedVault>,
    oracle: Arc<dyn ReasoningOracle>,
    reflector: Reflector,
    draw: Mutex<DrawState>,
}

impl FinalHarmonizer {
    pub fn new(
        config: FinalHarmonizerConfig,
        vault: Arc<dyn SeedVault>,
        oracle: Arc<dyn ReasoningOracle>,
        reflector: Reflector,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            vault,
            oracle,
            reflector,
            draw: Mutex::new(DrawState {
                history: ComboHistory::new(config.harmonizer.max_combo_history),
                rng: StdRng::from_entropy(),
            }),
        })
    }

    pub fn with_rng_seed(self, seed: u64) -> Self {
        if let Ok(mut state) = self.draw.lock() {
            state.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    pub fn config(&self) -> FinalHarmonizerConfig {
        self.config
    }

    pub fn history_len(&self) -> usize {
        self.lock_draw().history.len()
    }

    pub fn pick_unique_combo(&self, run: &mut ComboRun) -> HarmonizeResult<SeedCombo> {
        let philosophers = self.vault.philosophers();
        let logic_seeds = self.vault.logic_seeds();
        let mut guard = self.lock_draw();
        let state = &mut *guard;
        state.history.draw(
            &mut state.rng,
            HarmonizationSource::FinalCore,
            &philosophers,
            &logic_seeds,
            self.config.harmonizer.draw_limits(),
            run,
        )
    }

    /// Harmonizes the fused record and reflects the outcome.
    ///
    /// `deadline` caps every escalation on top of `escalation_timeout_ms`.
    /// An unresolved outcome carries the return-to-resonator sentinel; the
    /// caller is expected to restart from resonance.
    pub async fn harmonize(
        &self,
        fused: FusedRecord,
        deadline: Option<Instant>,
        cancel: &CancelSignal,
    ) -> HarmonizeResult<ReflectionRecord> {
        let hc = self.config.harmonizer;
        let input = EvaluationInput::Fused(fused.clone());
        let mut run = ComboRun::new(hc.total_cycles());
        let mut cycles = Vec::with_capacity(hc.total_cycles() as usize);

        for index in 1..=hc.total_cycles() {
            let combo = self.pick_unique_combo(&mut run)?;
            let phase = phase_for(index, hc.primary_cycles);
            let mut record = run_cycle(
                self.vault.as_ref(),
                &input,
                combo.clone(),
                index,
                phase,
                HarmonizationSource::FinalCore,
            );

            if phase == CyclePhase::Conflict && !record.resolved {
                let conflict = index - hc.primary_cycles;
                match self.escalate(&fused, &combo, conflict, deadline, cancel).await {
                    Ok(reply) => {
                        record.escalated = true;
                        record.reason_code = reason_codes::CAL_CYCLE_ESCALATED;
                        cycles.push(record);
                        log::info!("final core resolved by escalation on conflict cycle {conflict}");
                        return Ok(self.reflector.reflect(HarmonizationResult {
                            schema_version: HARMONIZATION_CONTRACT_VERSION,
                            source: HarmonizationSource::FinalCoreOracle,
                            verdict: Verdict::Symbolic(reply.response),
                            cycles_used: index,
                            status: HarmonizationStatus::ResolvedEscalated,
                            oracle_model: Some(reply.model),
                            cycles,
                        }));
                    }
                    Err(e) => {
                        log::warn!("final core escalation skipped on conflict cycle {conflict}: {e}");
                        if record.verdict.is_some() {
                            record.reason_code = escalation_reason(&e);
                        }
                    }
                }
            }

            let resolved = record.resolved;
            let verdict = record.verdict.clone();
            cycles.push(record);
            if let (true, Some(verdict)) = (resolved, verdict) {
                return Ok(self.reflector.reflect(HarmonizationResult {
                    schema_version: HARMONIZATION_CONTRACT_VERSION,
                    source: HarmonizationSource::FinalCore,
                    verdict,
                    cycles_used: index,
                    status: HarmonizationStatus::Resolved,
                    oracle_model: None,
                    cycles,
                }));
            }
        }

        log::info!(
            "final core unresolved after {} cycles; returning to resonator",
            hc.total_cycles()
        );
        Ok(self.reflector.reflect(HarmonizationResult {
            schema_version: HARMONIZATION_CONTRACT_VERSION,
            source: HarmonizationSource::FinalCore,
            verdict: Verdict::symbolic(RETURN_TO_RESONATOR_VERDICT),
            cycles_used: hc.total_cycles(),
            status: HarmonizationStatus::Unresolved,
            oracle_model: None,
            cycles,
        }))
    }

    async fn escalate(
        &self,
        fused: &FusedRecord,
        combo: &SeedCombo,
        conflict: u32,
        deadline: Option<Instant>,
        cancel: &CancelSignal,
    ) -> Result<OracleReply, CollaboratorError> {
        if cancel.is_cancelled() {
            return Err(CollaboratorError::EscalationCancelled);
        }

        let health_budget = budget(self.config.health_check_timeout_ms, deadline);
        if health_budget.is_zero() {
            return Err(CollaboratorError::EscalationTimeout { after_ms: 0 });
        }
        let oracle = self.oracle.clone();
        let health = tokio::task::spawn_blocking(move || oracle.health_check());
        let healthy = tokio::select! {
            _ = cancel.cancelled() => return Err(CollaboratorError::EscalationCancelled),
            out = tokio::time::timeout(health_budget, health) => matches!(out, Ok(Ok(true))),
        };
        if !healthy {
            return Err(CollaboratorError::OracleDegraded);
        }

        let query_budget = budget(self.config.escalation_timeout_ms, deadline);
        if query_budget.is_zero() {
            return Err(CollaboratorError::EscalationTimeout { after_ms: 0 });
        }
        let query = OracleQuery::new(bridge_prompt(fused, combo, conflict), query_budget);
        let oracle = self.oracle.clone();
        let call = tokio::task::spawn_blocking(move || oracle.query(&query));
        tokio::select! {
            _ = cancel.cancelled() => Err(CollaboratorError::EscalationCancelled),
            out = tokio::time::timeout(query_budget, call) => match out {
                Err(_) => Err(CollaboratorError::EscalationTimeout {
                    after_ms: query_budget.as_millis() as u64,
                }),
                Ok(Err(join)) => Err(CollaboratorError::unavailable(
                    "reasoning_oracle",
                    join.to_string(),
                )),
                Ok(Ok(reply)) if reply.success => Ok(reply),
                Ok(Ok(reply)) => Err(CollaboratorError::unavailable(
                    "reasoning_oracle",
                    reply.error.unwrap_or_else(|| "unsuccessful reply".to_string()),
                )),
            },
        }
    }

    fn lock_draw(&self) -> std::sync::MutexGuard<'_, DrawState> {
        self.draw
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn budget(limit_ms: u64, deadline: Option<Instant>) -> Duration {
    let limit = Duration::from_millis(limit_ms);
    match deadline {
        Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
        None => limit,
    }
}

fn escalation_reason(err: &CollaboratorError) -> ReasonCodeId {
    match err {
        CollaboratorError::EscalationTimeout { .. } => reason_codes::CAL_ESCALATION_TIMEOUT,
        CollaboratorError::EscalationCancelled => reason_codes::CAL_ESCALATION_CANCELLED,
        CollaboratorError::OracleDegraded => reason_codes::CAL_ORACLE_DEGRADED,
        CollaboratorError::Unavailable { .. } => reason_codes::CAL_ESCALATION_FAILED,
    }
}

fn bridge_prompt(fused: &FusedRecord, combo: &SeedCombo, conflict: u32) -> String {
    format!(
        "You are the Final Harmonizer conflict resolver.\n\
         Left verdict: {}\n\
         Right verdict: {}\n\
         Current philosopher: {}\n\
         Logic set: {}\n\
         Conflict cycle: {conflict}\n\n\
         Provide a harmonized resolution that bridges both hemispheres.\n\
         Focus on finding common ground and integrative solutions.",
        fused.left,
        fused.right,
        combo.philosopher,
        combo.logic_set.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::pulse::PulseOracle;
    use caleon_kernel_contracts::collaborators::{SeedCatalog, UnavailableOracle, VerdictEvaluator};
    use caleon_kernel_contracts::error::HarmonizeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubVault {
        resolve_on: Option<u32>,
        logic_seeds: usize,
        calls: AtomicU32,
    }

    impl StubVault {
        fn never() -> Self {
            Self {
                resolve_on: None,
                logic_seeds: 12,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SeedCatalog for StubVault {
        fn philosophers(&self) -> Vec<String> {
            vec!["spinoza".into(), "hume".into(), "kant".into()]
        }

        fn logic_seeds(&self) -> Vec<String> {
            (0..self.logic_seeds).map(|i| format!("logic_{i:02}")).collect()
        }
    }

    impl VerdictEvaluator for StubVault {
        fn evaluate(
            &self,
            _input: &EvaluationInput,
            _philosopher: &str,
            _logic_set: &[String],
        ) -> Result<Verdict, CollaboratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.resolve_on == Some(n) {
                Ok(Verdict::Scalar(1.0))
            } else {
                Ok(Verdict::Scalar(0.0))
            }
        }

        fn is_resolved(&self, verdict: &Verdict) -> bool {
            *verdict == Verdict::Scalar(1.0)
        }
    }

    /// Healthy oracle whose n-th query (1-based) succeeds.
    struct StubOracle {
        healthy: bool,
        succeed_on: Option<u32>,
        delay: Duration,
        queries: AtomicU32,
    }

    impl StubOracle {
        fn new(healthy: bool, succeed_on: Option<u32>) -> Self {
            Self {
                healthy,
                succeed_on,
                delay: Duration::ZERO,
                queries: AtomicU32::new(0),
            }
        }
    }

    impl ReasoningOracle for StubOracle {
        fn health_check(&self) -> bool {
            self.healthy
        }

        fn query(&self, query: &OracleQuery) -> OracleReply {
            let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            assert!(query.prompt.contains(&format!("Conflict cycle: {n}")));
            if self.succeed_on == Some(n) {
                OracleReply::ok("bridged verdict", "phi3:mini")
            } else {
                OracleReply::unavailable("phi3:mini", "model busy")
            }
        }
    }

    fn fused() -> FusedRecord {
        FusedRecord {
            left: Verdict::Scalar(0.4),
            right: Verdict::symbolic("UNRESOLVED"),
            distilled: "what now".to_string(),
        }
    }

    fn final_harmonizer(
        config: FinalHarmonizerConfig,
        vault: Arc<StubVault>,
        oracle: Arc<dyn ReasoningOracle>,
    ) -> FinalHarmonizer {
        let reflector = Reflector::new(Arc::new(PulseOracle::system()));
        FinalHarmonizer::new(config, vault, oracle, reflector)
            .unwrap()
            .with_rng_seed(17)
    }

    #[tokio::test]
    async fn at_final_01_unreachable_oracle_exhausts_all_cycles() {
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            Arc::new(StubVault::never()),
            Arc::new(UnavailableOracle),
        );
        let record = h.harmonize(fused(), None, &CancelSignal::never()).await.unwrap();
        let out = &record.original;
        assert_eq!(out.status, HarmonizationStatus::Unresolved);
        assert!(out.verdict.is_return_to_resonator());
        assert_eq!(out.cycles_used, 10);
        assert_eq!(out.source, HarmonizationSource::FinalCore);
        assert_eq!(record.confidence, 0.95);
        assert!(out.cycles[5..]
            .iter()
            .all(|c| c.reason_code == reason_codes::CAL_ORACLE_DEGRADED && !c.escalated));
        assert!(record.validate().is_ok());
    }

    #[tokio::test]
    async fn at_final_02_escalation_on_second_conflict_cycle() {
        let oracle = Arc::new(StubOracle::new(true, Some(2)));
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            Arc::new(StubVault::never()),
            oracle.clone(),
        );
        let record = h.harmonize(fused(), None, &CancelSignal::never()).await.unwrap();
        let out = &record.original;
        assert_eq!(out.status, HarmonizationStatus::ResolvedEscalated);
        assert_eq!(out.cycles_used, 7);
        assert_eq!(out.source, HarmonizationSource::FinalCoreOracle);
        assert_eq!(out.verdict, Verdict::symbolic("bridged verdict"));
        assert_eq!(out.oracle_model.as_deref(), Some("phi3:mini"));
        assert_eq!(oracle.queries.load(Ordering::SeqCst), 2);
        assert_eq!(out.cycles[5].reason_code, reason_codes::CAL_ESCALATION_FAILED);
        assert!(out.cycles[6].escalated);
        assert!(record.validate().is_ok());
    }

    #[tokio::test]
    async fn at_final_03_primary_resolution_never_escalates() {
        let oracle = Arc::new(StubOracle::new(true, Some(1)));
        let vault = Arc::new(StubVault {
            resolve_on: Some(2),
            ..StubVault::never()
        });
        let h = final_harmonizer(FinalHarmonizerConfig::mvp_v1(), vault, oracle.clone());
        let record = h.harmonize(fused(), None, &CancelSignal::never()).await.unwrap();
        assert_eq!(record.original.status, HarmonizationStatus::Resolved);
        assert_eq!(record.original.cycles_used, 2);
        assert_eq!(record.original.verdict, Verdict::Scalar(1.0));
        assert_eq!(oracle.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_final_04_slow_oracle_times_out_and_falls_through() {
        let oracle = Arc::new(StubOracle {
            delay: Duration::from_millis(200),
            ..StubOracle::new(true, Some(1))
        });
        let config = FinalHarmonizerConfig {
            escalation_timeout_ms: 20,
            ..FinalHarmonizerConfig::mvp_v1()
        };
        let h = final_harmonizer(config, Arc::new(StubVault::never()), oracle);
        let record = h.harmonize(fused(), None, &CancelSignal::never()).await.unwrap();
        assert!(record.original.verdict.is_return_to_resonator());
        assert_eq!(
            record.original.cycles[5].reason_code,
            reason_codes::CAL_ESCALATION_TIMEOUT
        );
    }

    #[tokio::test]
    async fn at_final_05_cancelled_escalation_falls_through() {
        let oracle = Arc::new(StubOracle::new(true, Some(1)));
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            Arc::new(StubVault::never()),
            oracle.clone(),
        );
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let record = h.harmonize(fused(), None, &signal).await.unwrap();
        assert!(record.original.verdict.is_return_to_resonator());
        assert_eq!(oracle.queries.load(Ordering::SeqCst), 0);
        assert!(record.original.cycles[5..]
            .iter()
            .all(|c| c.reason_code == reason_codes::CAL_ESCALATION_CANCELLED));
    }

    #[tokio::test]
    async fn at_final_06_expired_deadline_skips_escalation() {
        let oracle = Arc::new(StubOracle::new(true, Some(1)));
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            Arc::new(StubVault::never()),
            oracle.clone(),
        );
        let record = h
            .harmonize(fused(), Some(Instant::now()), &CancelSignal::never())
            .await
            .unwrap();
        assert!(record.original.verdict.is_return_to_resonator());
        assert_eq!(oracle.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_final_07_exhausted_seed_space_is_an_error() {
        // 3 philosophers * C(5,5) = 3 combos, fewer than the 10 cycles of a run.
        let vault = Arc::new(StubVault {
            logic_seeds: 5,
            ..StubVault::never()
        });
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            vault,
            Arc::new(UnavailableOracle),
        );
        let err = h
            .harmonize(fused(), None, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HarmonizeError::ExhaustedSeedSpace {
                harmonizer: HarmonizationSource::FinalCore,
                space: 3,
                used: 0,
                ..
            }
        ));
        assert_eq!(h.history_len(), 0);
    }

    #[test]
    fn at_final_08_bridge_prompt_names_both_verdicts_and_seeds() {
        let combo = SeedCombo::new("kant", vec!["b".into(), "a".into()]);
        let prompt = bridge_prompt(&fused(), &combo, 3);
        assert!(prompt.contains("Left verdict: 0.4"));
        assert!(prompt.contains("Right verdict: UNRESOLVED"));
        assert!(prompt.contains("Current philosopher: kant"));
        assert!(prompt.contains("Logic set: a, b"));
        assert!(prompt.contains("Conflict cycle: 3"));
    }

    #[tokio::test]
    async fn at_final_09_repeated_runs_recycle_history_instead_of_failing() {
        // 3 philosophers * C(10,5) = 756 combos across 120 runs of 10 cycles.
        let vault = Arc::new(StubVault {
            logic_seeds: 10,
            ..StubVault::never()
        });
        let h = final_harmonizer(
            FinalHarmonizerConfig::mvp_v1(),
            vault,
            Arc::new(UnavailableOracle),
        );
        for _ in 0..120 {
            let record = h
                .harmonize(fused(), None, &CancelSignal::never())
                .await
                .unwrap();
            assert!(record.original.verdict.is_return_to_resonator());
            let combos: std::collections::BTreeSet<_> =
                record.original.cycles.iter().map(|c| &c.combo).collect();
            assert_eq!(combos.len(), 10);
        }
        assert!(h.history_len() <= 756);
    }
}
