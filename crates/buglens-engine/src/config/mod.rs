pub mod loader;

pub use buglens_common::config::{
    BuglensConfig, CaptureConfig, DedupConfig, PersistenceConfig, TriageConfig,
};
pub use loader::{ConfigError, ConfigLoader};
