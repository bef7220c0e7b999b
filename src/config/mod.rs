mod error;
mod loader;
mod model;

pub use error::ConfigError;
pub use loader::{apply_env_overrides, ensure_working_dirs, load, save, validate};
pub use model::{Config, UrlSpec, DEFAULT_EACH_COLLECTION_SIZE, DEFAULT_SAFE_STATS_SIZE};
