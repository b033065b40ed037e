#![forbid(unsafe_code)]

pub mod collaborators;
pub mod common;
pub mod error;
pub mod harmonization;
pub mod pulse;
pub mod resonance;
pub mod task;
pub mod think;

pub use common::{
    validate_finite, validate_non_empty, validate_range, ContractViolation, ReasonCodeId,
    SchemaVersion, Validate,
};
