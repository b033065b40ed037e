#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ContractViolation;

pub const PULSE_PREFIX: &str = "PULSE-";
pub const STARDATE_PREFIX: &str = "SD-";

/// Canonical machine pulse: wall-clock time at issue plus the oracle's cycle.
///
/// Rendered as `PULSE-<secs>.<micros>.<cycle>`. Ordering and equality follow the
/// cycle first, so two pulses from the same oracle always compare by issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PulseId {
    cycle: u64,
    unix_us: u64,
}

impl PulseId {
    pub fn new(unix_us: u64, cycle: u64) -> Self {
        Self { cycle, unix_us }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn unix_us(&self) -> u64 {
        self.unix_us
    }

    pub fn unix_time(&self) -> f64 {
        self.unix_us as f64 / 1_000_000.0
    }
}

impl fmt::Display for PulseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PULSE_PREFIX}{}.{:06}.{}",
            self.unix_us / 1_000_000,
            self.unix_us % 1_000_000,
            self.cycle
        )
    }
}

impl FromStr for PulseId {
    type Err = ContractViolation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = ContractViolation::InvalidValue {
            field: "pulse_id",
            reason: "must match PULSE-<secs>.<micros>.<cycle>",
        };
        let body = raw.strip_prefix(PULSE_PREFIX).ok_or(invalid.clone())?;
        let mut parts = body.split('.');
        let (Some(secs), Some(micros), Some(cycle), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid);
        };
        if micros.len() != 6 {
            return Err(invalid);
        }
        let secs: u64 = secs.parse().map_err(|_| invalid.clone())?;
        let micros: u64 = micros.parse().map_err(|_| invalid.clone())?;
        let cycle: u64 = cycle.parse().map_err(|_| invalid.clone())?;
        let unix_us = secs
            .checked_mul(1_000_000)
            .and_then(|us| us.checked_add(micros))
            .ok_or(invalid)?;
        Ok(Self::new(unix_us, cycle))
    }
}

impl Serialize for PulseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PulseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| serde::de::Error::custom("invalid pulse id"))
    }
}

/// Human-readable `SD-<year>.<day_of_year>.<hundredths_of_day_second>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stardate(String);

impl Stardate {
    pub fn from_parts(year: i32, day_of_year: u32, hundredths_of_day: u64) -> Self {
        Self(format!("{STARDATE_PREFIX}{year}.{day_of_year}.{hundredths_of_day}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stardate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_pulse_id_01_renders_and_parses_canonical_form() {
        let pulse = PulseId::new(1_732_000_000_000_042, 7);
        let rendered = pulse.to_string();
        assert_eq!(rendered, "PULSE-1732000000.000042.7");
        assert_eq!(rendered.parse::<PulseId>().unwrap(), pulse);
    }

    #[test]
    fn at_pulse_id_02_orders_by_cycle_before_time() {
        let earlier_cycle_later_time = PulseId::new(9_000_000, 1);
        let later_cycle_earlier_time = PulseId::new(1_000_000, 2);
        assert!(earlier_cycle_later_time < later_cycle_earlier_time);
    }

    #[test]
    fn at_pulse_id_03_rejects_malformed_text() {
        assert!("PULSE-1.2".parse::<PulseId>().is_err());
        assert!("SD-2025.1.1".parse::<PulseId>().is_err());
        assert!("PULSE-1.42.3".parse::<PulseId>().is_err());
        assert!("PULSE-1.000042.3.4".parse::<PulseId>().is_err());
    }

    #[test]
    fn at_pulse_id_04_serializes_as_string() {
        let pulse = PulseId::new(2_500_000, 3);
        let json = serde_json::to_string(&pulse).unwrap();
        assert_eq!(json, "\"PULSE-2.500000.3\"");
        let back: PulseId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pulse);
    }

    #[test]
    fn at_stardate_01_formats_parts() {
        assert_eq!(
            Stardate::from_parts(2025, 326, 45219).as_str(),
            "SD-2025.326.45219"
        );
    }
}
