pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{ObserverConfig, PipelineConfig};
