#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use caleon_kernel_contracts::pulse::PulseId;
use caleon_kernel_contracts::task::TaskItem;
use caleon_kernel_contracts::{ContractViolation, Validate};
use thiserror::Error;

use crate::pulse::PulseOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskQueueConfig {
    pub max_depth: usize,
}

impl TaskQueueConfig {
    pub fn mvp_v1() -> Self {
        Self { max_depth: 10_000 }
    }
}

impl Validate for TaskQueueConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.max_depth == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "task_queue_config.max_depth",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskQueueError {
    #[error("task queue full (max_depth={max_depth})")]
    QueueFull { max_depth: usize },
}

/// FIFO staging area for completed verdicts. Pulses are stamped on every
/// transition; nothing is persisted.
pub struct TaskQueue {
    config: TaskQueueConfig,
    pulse: Arc<PulseOracle>,
    items: Mutex<VecDeque<TaskItem>>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig, pulse: Arc<PulseOracle>) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            pulse,
            items: Mutex::new(VecDeque::new()),
        })
    }

    pub fn enqueue(&self, mut item: TaskItem) -> Result<PulseId, TaskQueueError> {
        let mut items = self.lock();
        if items.len() >= self.config.max_depth {
            log::warn!("task queue rejected item: depth {} reached", self.config.max_depth);
            return Err(TaskQueueError::QueueFull {
                max_depth: self.config.max_depth,
            });
        }
        let pulse = self.pulse.pulse();
        item.queued_pulse = Some(pulse);
        items.push_back(item);
        Ok(pulse)
    }

    /// Pops the oldest item, or `None` when empty. Never blocks on an empty queue.
    pub fn dequeue(&self) -> Option<TaskItem> {
        let mut item = self.lock().pop_front()?;
        item.executed_pulse = Some(self.pulse.pulse());
        Some(item)
    }

    pub fn complete(&self, item: &mut TaskItem) -> PulseId {
        let pulse = self.pulse.pulse();
        item.completed_pulse = Some(pulse);
        pulse
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaskItem>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
