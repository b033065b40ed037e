#![forbid(unsafe_code)]

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pulse::PulseId;
use crate::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl FromStr for TaskPriority {
    type Err = ContractViolation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(ContractViolation::InvalidValue {
                field: "task_priority",
                reason: "must be one of low|normal|high|urgent",
            }),
        }
    }
}

/// A staged unit of work. Pulses are stamped by the queue, never by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub queued_pulse: Option<PulseId>,
    pub executed_pulse: Option<PulseId>,
    pub completed_pulse: Option<PulseId>,
}

impl TaskItem {
    pub fn new(payload: serde_json::Value, priority: TaskPriority) -> Self {
        Self {
            payload,
            priority,
            queued_pulse: None,
            executed_pulse: None,
            completed_pulse: None,
        }
    }
}
