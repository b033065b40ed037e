#![forbid(unsafe_code)]

pub mod thinker;
pub mod hemisphere;

pub use crate::thinker::{
    message_stimulus, CaleonCore, CaleonCoreConfig, CaleonWiring, ThinkError,
};
pub use crate::hemisphere::HemispherePipeline;
