#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use caleon_kernel_contracts::pulse::{PulseId, Stardate};
use caleon_kernel_contracts::{validate_range, ContractViolation, Validate};
use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn unix_time(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Test clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    unix_us: AtomicU64,
}

impl ManualClock {
    pub fn at(unix_time: f64) -> Self {
        Self {
            unix_us: AtomicU64::new(seconds_to_us(unix_time)),
        }
    }

    pub fn set(&self, unix_time: f64) {
        self.unix_us.store(seconds_to_us(unix_time), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.unix_us
            .fetch_add(seconds_to_us(seconds), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_time(&self) -> f64 {
        self.unix_us.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseConfig {
    pub drift_threshold_seconds: f64,
}

impl PulseConfig {
    pub fn mvp_v1() -> Self {
        Self {
            drift_threshold_seconds: 0.250,
        }
    }
}

impl Validate for PulseConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_range(
            "pulse_config.drift_threshold_seconds",
            self.drift_threshold_seconds,
            0.0,
            SECONDS_PER_DAY,
        )
    }
}

/// Internal time oracle: pulses, stardates, call-interval drift and digests.
///
/// One instance is shared (behind an `Arc`) by every component of a process;
/// nothing here is a global.
pub struct PulseOracle {
    config: PulseConfig,
    clock: Arc<dyn Clock>,
    cycle: AtomicU64,
    last_drift_check: Mutex<f64>,
}

impl PulseOracle {
    pub fn new(config: PulseConfig, clock: Arc<dyn Clock>) -> Result<Self, ContractViolation> {
        config.validate()?;
        let now = clock.unix_time();
        Ok(Self {
            config,
            clock,
            cycle: AtomicU64::new(0),
            last_drift_check: Mutex::new(now),
        })
    }

    pub fn system() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.unix_time();
        Self {
            config: PulseConfig::mvp_v1(),
            clock,
            cycle: AtomicU64::new(0),
            last_drift_check: Mutex::new(now),
        }
    }

    pub fn config(&self) -> PulseConfig {
        self.config
    }

    pub fn unix_time(&self) -> f64 {
        self.clock.unix_time()
    }

    pub fn pulse(&self) -> PulseId {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        PulseId::new(seconds_to_us(self.unix_time()), cycle)
    }

    /// Number of pulses issued so far.
    pub fn cycles_issued(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn stardate(&self) -> Stardate {
        stardate_at(self.unix_time())
    }

    /// Reports whether the gap since the previous call exceeds `threshold_seconds`.
    ///
    /// Stateful and order-dependent: every call replaces the stored reference
    /// time, so concurrent callers must serialise externally to get meaningful
    /// answers.
    pub fn detect_drift(&self, threshold_seconds: f64) -> bool {
        let now = self.unix_time();
        let mut last = self
            .last_drift_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let delta = (now - *last).abs();
        *last = now;
        let drifted = delta > threshold_seconds;
        if drifted {
            log::debug!("pulse oracle call gap {delta:.6}s exceeded {threshold_seconds:.6}s");
        }
        drifted
    }

    pub fn detect_drift_default(&self) -> bool {
        self.detect_drift(self.config.drift_threshold_seconds)
    }

    pub fn digest(&self, data: &str) -> String {
        digest_hex(data)
    }

    pub fn anchor(&self, fields: &[&str]) -> String {
        digest_hex(&fields.join("|"))
    }
}

pub fn digest_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

pub fn stardate_at(unix_time: f64) -> Stardate {
    let secs = unix_time.floor();
    let nanos = ((unix_time - secs) * 1_000_000_000.0) as u32;
    let (year, day_of_year) = DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|dt| (dt.year(), dt.ordinal()))
        .unwrap_or((1970, 1));
    let hundredths = (unix_time.rem_euclid(SECONDS_PER_DAY) * 100.0) as u64;
    Stardate::from_parts(year, day_of_year, hundredths)
}

fn seconds_to_us(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1_000_000.0).round() as u64
}
