#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use caleon_engines::cancel::CancelSignal;
use caleon_engines::final_harmonizer::{FinalHarmonizer, FinalHarmonizerConfig};
use caleon_engines::harmonizer::{HarmonizerConfig, HemisphereHarmonizer};
use caleon_engines::ollama::OllamaClient;
use caleon_engines::pulse::PulseOracle;
use caleon_engines::reflector::Reflector;
use caleon_engines::resonator::{Resonator, ResonatorConfig};
use caleon_engines::task_queue::{TaskQueue, TaskQueueConfig};
use caleon_kernel_contracts::collaborators::{
    AuditRecordId, AuditSink, ReasoningOracle, SeedProfileSource, SeedVault,
};
use caleon_kernel_contracts::error::HarmonizeError;
use caleon_kernel_contracts::harmonization::{FusedRecord, ReflectionRecord};
use caleon_kernel_contracts::pulse::PulseId;
use caleon_kernel_contracts::resonance::Hemisphere;
use caleon_kernel_contracts::task::TaskItem;
use caleon_kernel_contracts::think::{HemisphereTrace, ReasoningChain, ThinkRequest, ThinkResponse};
use caleon_kernel_contracts::{ContractViolation, Validate};
use caleon_storage::{JsonFileAuditSink, JsonSeedProfileStore};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;

use crate::hemisphere::HemispherePipeline;

pub const THINK_AUDIT_SCOPE: &str = "core";
pub const THINK_AUDIT_STAGE: &str = "thinker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaleonCoreConfig {
    pub max_pipeline_restarts: u32,
}

impl CaleonCoreConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_pipeline_restarts: 2,
        }
    }
}

impl Validate for CaleonCoreConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.max_pipeline_restarts > 16 {
            return Err(ContractViolation::InvalidValue {
                field: "caleon_core_config.max_pipeline_restarts",
                reason: "must be within 0..=16",
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ThinkError {
    #[error("invalid think request: {0:?}")]
    Contract(ContractViolation),

    #[error(transparent)]
    Harmonize(#[from] HarmonizeError),

    #[error("think timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("hemisphere worker failed: {0}")]
    Worker(String),

    #[error("think cancelled")]
    Cancelled,
}

impl From<ContractViolation> for ThinkError {
    fn from(v: ContractViolation) -> Self {
        ThinkError::Contract(v)
    }
}

/// Collaborators and per-stage configuration for one core.
pub struct CaleonWiring {
    pub pulse: Arc<PulseOracle>,
    pub vault: Arc<dyn SeedVault>,
    pub oracle: Arc<dyn ReasoningOracle>,
    pub seeds: Arc<dyn SeedProfileSource>,
    pub audit: Arc<dyn AuditSink>,
    pub resonator: ResonatorConfig,
    pub harmonizer: HarmonizerConfig,
    pub final_harmonizer: FinalHarmonizerConfig,
    pub task_queue: TaskQueueConfig,
    pub rng_seed: Option<u64>,
}

impl CaleonWiring {
    pub fn mvp_v1(
        pulse: Arc<PulseOracle>,
        vault: Arc<dyn SeedVault>,
        oracle: Arc<dyn ReasoningOracle>,
        seeds: Arc<dyn SeedProfileSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            pulse,
            vault,
            oracle,
            seeds,
            audit,
            resonator: ResonatorConfig::mvp_v1(),
            harmonizer: HarmonizerConfig::mvp_v1(),
            final_harmonizer: FinalHarmonizerConfig::mvp_v1(),
            task_queue: TaskQueueConfig::mvp_v1(),
            rng_seed: None,
        }
    }

    /// Local vault directories and the Ollama endpoint, all from the environment.
    pub fn from_env(vault: Arc<dyn SeedVault>) -> Result<Self, ContractViolation> {
        Ok(Self::mvp_v1(
            Arc::new(PulseOracle::system()),
            vault,
            Arc::new(OllamaClient::from_env()?),
            Arc::new(JsonSeedProfileStore::from_env()),
            Arc::new(JsonFileAuditSink::from_env()),
        ))
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

/// The full think pipeline: two hemispheres in parallel, then the final core.
pub struct CaleonCore {
    config: CaleonCoreConfig,
    pulse: Arc<PulseOracle>,
    left: Arc<Mutex<HemispherePipeline>>,
    right: Arc<Mutex<HemispherePipeline>>,
    final_harmonizer: FinalHarmonizer,
    audit: Arc<dyn AuditSink>,
    tasks: Arc<TaskQueue>,
    think_counter: AtomicU64,
}

struct PipelineRun {
    left: HemisphereTrace,
    right: HemisphereTrace,
    reflection: ReflectionRecord,
    restarts: u32,
}

impl CaleonCore {
    pub fn new(config: CaleonCoreConfig, wiring: CaleonWiring) -> Result<Self, ContractViolation> {
        config.validate()?;
        let left = build_pipeline(Hemisphere::Left, &wiring, 0)?;
        let right = build_pipeline(Hemisphere::Right, &wiring, 2)?;
        let final_harmonizer = FinalHarmonizer::new(
            wiring.final_harmonizer,
            wiring.vault.clone(),
            wiring.oracle.clone(),
            Reflector::new(wiring.pulse.clone()),
        )?;
        let final_harmonizer = match wiring.rng_seed {
            Some(seed) => final_harmonizer.with_rng_seed(seed.wrapping_add(4)),
            None => final_harmonizer,
        };
        let tasks = Arc::new(TaskQueue::new(wiring.task_queue, wiring.pulse.clone())?);
        Ok(Self {
            config,
            pulse: wiring.pulse,
            left: Arc::new(Mutex::new(left)),
            right: Arc::new(Mutex::new(right)),
            final_harmonizer,
            audit: wiring.audit,
            tasks,
            think_counter: AtomicU64::new(0),
        })
    }

    pub fn pulse(&self) -> &Arc<PulseOracle> {
        &self.pulse
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    pub async fn think(
        &self,
        request: ThinkRequest,
        cancel: &CancelSignal,
    ) -> Result<ThinkResponse, ThinkError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(ThinkError::Cancelled);
        }
        let started = Instant::now();
        let budget = Duration::from_secs_f64(request.timeout_seconds);
        let deadline = started + budget;
        let cycle_id = self.pulse.pulse();
        let stardate = self.pulse.stardate();

        let run = tokio::select! {
            _ = cancel.cancelled() => return Err(ThinkError::Cancelled),
            out = tokio::time::timeout(budget, self.run_pipeline(&request, deadline, cancel)) => {
                out.map_err(|_| ThinkError::Timeout {
                    after_ms: budget.as_millis() as u64,
                })??
            }
        };

        let response = ThinkResponse {
            cycle_id,
            stardate,
            unix_time: cycle_id.unix_time(),
            final_verdict: run.reflection.original.verdict.to_string(),
            confidence: run.reflection.confidence,
            reasoning_chain: ReasoningChain {
                left: run.left,
                right: run.right,
                harmonization: run.reflection,
            },
            processing_time_seconds: started.elapsed().as_secs_f64(),
            restarts: run.restarts,
        };
        self.write_audit(&response);
        self.stage_task(&request, &response);
        Ok(response)
    }

    async fn run_pipeline(
        &self,
        request: &ThinkRequest,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> Result<PipelineRun, ThinkError> {
        let left_stimulus = message_stimulus(&request.message);
        let right_stimulus = message_stimulus(&request.message.chars().rev().collect::<String>());
        let context = request
            .context
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_default();

        let mut restarts = 0;
        loop {
            let (left, right) = tokio::try_join!(
                run_hemisphere(self.left.clone(), left_stimulus, context.clone(), deadline),
                run_hemisphere(self.right.clone(), right_stimulus, context.clone(), deadline),
            )?;
            let fused = FusedRecord {
                left: left.harmonization.verdict.clone(),
                right: right.harmonization.verdict.clone(),
                distilled: request.message.clone(),
            };
            let reflection = self
                .final_harmonizer
                .harmonize(fused, Some(deadline), cancel)
                .await?;

            if !reflection.original.verdict.is_return_to_resonator()
                || restarts >= self.config.max_pipeline_restarts
            {
                return Ok(PipelineRun {
                    left,
                    right,
                    reflection,
                    restarts,
                });
            }
            restarts += 1;
            log::info!(
                "final core returned to resonator; restarting pipeline ({restarts}/{})",
                self.config.max_pipeline_restarts
            );
        }
    }

    fn write_audit(&self, response: &ThinkResponse) {
        let n = self.think_counter.fetch_add(1, Ordering::SeqCst);
        let record_id = AuditRecordId::new(THINK_AUDIT_SCOPE, THINK_AUDIT_STAGE, n);
        match serde_json::to_value(response) {
            Ok(data) => {
                if let Err(e) = self.audit.write_reflection(&record_id, &data) {
                    log::warn!("{record_id}: audit write failed: {e}");
                }
            }
            Err(e) => log::warn!("{record_id}: think response not serialisable: {e}"),
        }
    }

    fn stage_task(&self, request: &ThinkRequest, response: &ThinkResponse) -> Option<PulseId> {
        let item = TaskItem::new(
            json!({
                "cycle_id": response.cycle_id,
                "final_verdict": response.final_verdict,
                "confidence": response.confidence,
                "restarts": response.restarts,
            }),
            request.priority,
        );
        match self.tasks.enqueue(item) {
            Ok(pulse) => Some(pulse),
            Err(e) => {
                log::warn!("verdict for {} not staged: {e}", response.cycle_id);
                None
            }
        }
    }
}

fn build_pipeline(
    hemisphere: Hemisphere,
    wiring: &CaleonWiring,
    seed_offset: u64,
) -> Result<HemispherePipeline, ContractViolation> {
    let resonator = Resonator::new(
        hemisphere,
        wiring.resonator,
        wiring.pulse.clone(),
        wiring.seeds.as_ref(),
        wiring.audit.clone(),
    )?
    .with_oracle(wiring.oracle.clone());
    let harmonizer = HemisphereHarmonizer::new(hemisphere, wiring.harmonizer, wiring.vault.clone())?;
    let (resonator, harmonizer) = match wiring.rng_seed {
        Some(seed) => (
            resonator.with_rng_seed(seed.wrapping_add(seed_offset)),
            harmonizer.with_rng_seed(seed.wrapping_add(seed_offset + 1)),
        ),
        None => (resonator, harmonizer),
    };
    HemispherePipeline::new(resonator, harmonizer)
}

async fn run_hemisphere(
    pipeline: Arc<Mutex<HemispherePipeline>>,
    stimulus: f64,
    context: String,
    deadline: Instant,
) -> Result<HemisphereTrace, ThinkError> {
    let joined = tokio::task::spawn_blocking(move || {
        let mut pipeline = pipeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Annotation may use at most half of the time left.
        let annotation_budget = deadline.saturating_duration_since(Instant::now()) / 2;
        pipeline.run(stimulus, &context, Some(annotation_budget))
    })
    .await;
    match joined {
        Ok(trace) => Ok(trace?),
        Err(e) => Err(ThinkError::Worker(e.to_string())),
    }
}

/// Maps a message onto `[0, 1)` in steps of 0.001 via its SHA-256 digest.
pub fn message_stimulus(message: &str) -> f64 {
    let digest = Sha256::digest(message.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 1000) as f64 / 1000.0
}
