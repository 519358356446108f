//! Configuration system for the Aether renderer.
//!
//! Settings persist to disk as `config.ron`. Every section is
//! `#[serde(default)]`, so older files keep loading as fields are added, and
//! command-line flags override whatever was loaded.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    AtmosphereConfig, Config, DebugConfig, PlanetConfig, PostProcessingSettings, RenderConfig,
    ToneMapOperator, WindowConfig, default_config_dir,
};
pub use error::ConfigError;
