//! Opens a window showing a planet with a precomputed atmosphere.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags, e.g. `aether --width 1920 --height 1080` or `aether --headless
//! --frames 120`.

use std::process::ExitCode;

use aether_config::{CliArgs, Config, default_config_dir};
use clap::Parser;
use tracing::{error, info};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    aether_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let result = if config.render.headless {
        aether_app::run_headless(&config, args.frames.unwrap_or(60)).map(|stats| {
            info!("Last frame: {stats:?}");
        })
    } else {
        aether_app::run(config, args.frames)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
