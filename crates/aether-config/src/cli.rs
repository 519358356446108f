//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Aether command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "aether", about = "Deferred renderer with precomputed atmospheric scattering")]
pub struct CliArgs {
    /// Window width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Window height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Start in fullscreen.
    #[arg(long)]
    pub fullscreen: Option<bool>,

    /// Render on the CPU reference device without opening a window.
    #[arg(long)]
    pub headless: bool,

    /// Number of frames to render before exiting (headless runs).
    #[arg(long)]
    pub frames: Option<u64>,

    /// Highest atmospheric scattering order.
    #[arg(long)]
    pub scattering_order: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(fs) = args.fullscreen {
            self.window.fullscreen = fs;
        }
        if args.headless {
            self.render.headless = true;
        }
        if let Some(order) = args.scattering_order {
            self.atmosphere.max_scattering_order = order;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            width: Some(1920),
            headless: true,
            scattering_order: Some(5),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.window.width, 1920);
        assert!(config.render.headless);
        assert_eq!(config.atmosphere.max_scattering_order, 5);
        // Non-overridden fields retain defaults
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["aether", "--headless", "--frames", "3", "--width", "64"]);
        assert!(args.headless);
        assert_eq!(args.frames, Some(3));
        assert_eq!(args.width, Some(64));
    }
}
