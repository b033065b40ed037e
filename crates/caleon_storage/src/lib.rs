#![forbid(unsafe_code)]

pub mod audit;
pub mod seed_store;
pub mod store;

pub use audit::{InMemoryAuditSink, JsonFileAuditSink};
pub use seed_store::{JsonSeedProfileStore, StaticSeedProfiles};
pub use store::{StorageConfig, StorageError};
