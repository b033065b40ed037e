#![forbid(unsafe_code)]

pub mod cancel;
pub mod combo;
pub mod final_harmonizer;
pub mod harmonizer;
pub mod ollama;
pub mod pulse;
pub mod reflector;
pub mod resonator;
pub mod task_queue;

pub mod reason_codes {
    use caleon_kernel_contracts::ReasonCodeId;

    // Consensus-cycle reason codes recorded on every CycleRecord.
    pub const CAL_CYCLE_EVALUATED: ReasonCodeId = ReasonCodeId(0x4341_0001);
    pub const CAL_CYCLE_RESOLVED: ReasonCodeId = ReasonCodeId(0x4341_0002);
    pub const CAL_CYCLE_ESCALATED: ReasonCodeId = ReasonCodeId(0x4341_0003);

    pub const CAL_EVALUATOR_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4341_00F1);
    pub const CAL_EVALUATOR_PANICKED: ReasonCodeId = ReasonCodeId(0x4341_00F2);
    pub const CAL_ORACLE_DEGRADED: ReasonCodeId = ReasonCodeId(0x4341_00F3);
    pub const CAL_ESCALATION_TIMEOUT: ReasonCodeId = ReasonCodeId(0x4341_00F4);
    pub const CAL_ESCALATION_CANCELLED: ReasonCodeId = ReasonCodeId(0x4341_00F5);
    pub const CAL_ESCALATION_FAILED: ReasonCodeId = ReasonCodeId(0x4341_00F6);
    pub const CAL_VERDICT_NOT_FINITE: ReasonCodeId = ReasonCodeId(0x4341_00F7);
}
