#![forbid(unsafe_code)]

pub mod pulse_cli;
pub mod vault_cli;
