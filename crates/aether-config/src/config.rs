//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Window settings.
    pub window: WindowConfig,
    /// Frame pipeline settings.
    pub render: RenderConfig,
    /// Post-processing applied when a scene does not bring its own settings.
    pub post_processing: PostProcessingSettings,
    /// Atmospheric scattering precomputation settings.
    pub atmosphere: AtmosphereConfig,
    /// Demo planet settings.
    pub planet: PlanetConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window width in physical pixels.
    pub width: u32,
    /// Window height in physical pixels.
    pub height: u32,
    /// Start in fullscreen mode.
    pub fullscreen: bool,
    /// Enable vsync (PresentMode::Fifo).
    pub vsync: bool,
    /// Window title.
    pub title: String,
}

/// Frame pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Linear RGB colour the Gbuffer is cleared to each frame.
    pub clear_color: [f32; 3],
    /// Edge length of every shadow map in texels.
    pub shadow_map_resolution: u32,
    /// Far end of the camera frustum slice covered by directional shadows.
    pub shadow_distance: f32,
    /// Hemispheric ambient: colour for normals facing up.
    pub ambient_sky: [f32; 3],
    /// Hemispheric ambient: colour for normals facing down.
    pub ambient_ground: [f32; 3],
    /// Scale applied to the hemispheric ambient term.
    pub ambient_intensity: f32,
    /// Run on the CPU reference device instead of the GPU.
    pub headless: bool,
}

/// Tone-mapping curve used by the final composite.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToneMapOperator {
    /// Clamp only.
    None,
    /// `c / (1 + c)`.
    Reinhard,
    /// ACES filmic fit.
    #[default]
    Aces,
}

/// Per-scene post-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostProcessingSettings {
    /// Add a glow around pixels brighter than `bloom_threshold`.
    pub bloom: bool,
    /// Luminance above which pixels contribute to bloom.
    pub bloom_threshold: f32,
    /// Strength of the bloom contribution.
    pub bloom_intensity: f32,
    /// Linear exposure multiplier applied before tone mapping.
    pub exposure: f32,
    /// Tone-mapping curve.
    pub tone_map: ToneMapOperator,
}

/// Atmospheric scattering precomputation configuration.
///
/// Lookup table sizes default to the classic 256x64 / 64x16 / 32x128x32x8
/// layout; tests shrink them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtmosphereConfig {
    /// Highest scattering order fed into the multiple-scattering recurrence.
    pub max_scattering_order: u32,
    /// Transmittance table width (view zenith cosine).
    pub transmittance_width: u32,
    /// Transmittance table height (altitude).
    pub transmittance_height: u32,
    /// Irradiance table width (sun zenith cosine).
    pub irradiance_width: u32,
    /// Irradiance table height (altitude).
    pub irradiance_height: u32,
    /// Inscatter altitude resolution.
    pub inscatter_r: u32,
    /// Inscatter view zenith resolution.
    pub inscatter_mu: u32,
    /// Inscatter sun zenith resolution.
    pub inscatter_mu_s: u32,
    /// Inscatter view/sun azimuth resolution.
    pub inscatter_nu: u32,
    /// Integration steps for optical depth.
    pub transmittance_samples: u32,
    /// Integration steps along a view ray.
    pub inscatter_samples: u32,
    /// Angular steps for the irradiance hemisphere integral.
    pub irradiance_samples: u32,
    /// Angular steps for the scattering density sphere integral.
    pub spherical_samples: u32,
}

/// Demo planet configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanetConfig {
    /// Planet radius in world units.
    pub radius: f32,
    /// Camera start altitude above the surface in world units.
    pub camera_altitude: f32,
    /// Camera orbit speed in radians per second.
    pub orbit_speed: f32,
    /// Sun brightness multiplier.
    pub sun_brightness: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Show the frame statistics overlay.
    pub show_frame_stats: bool,
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fullscreen: false,
            vsync: true,
            title: "Aether".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [
                101.0 / 255.0 * 0.1,
                114.0 / 255.0 * 0.1,
                107.0 / 255.0 * 0.1,
            ],
            shadow_map_resolution: 2048,
            shadow_distance: 500.0,
            ambient_sky: [0.35, 0.45, 0.6],
            ambient_ground: [0.12, 0.1, 0.08],
            ambient_intensity: 0.3,
            headless: false,
        }
    }
}

impl Default for PostProcessingSettings {
    fn default() -> Self {
        Self {
            bloom: true,
            bloom_threshold: 1.0,
            bloom_intensity: 0.3,
            exposure: 1.0,
            tone_map: ToneMapOperator::Aces,
        }
    }
}

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self {
            max_scattering_order: 3,
            transmittance_width: 256,
            transmittance_height: 64,
            irradiance_width: 64,
            irradiance_height: 16,
            inscatter_r: 32,
            inscatter_mu: 128,
            inscatter_mu_s: 32,
            inscatter_nu: 8,
            transmittance_samples: 500,
            inscatter_samples: 50,
            irradiance_samples: 32,
            spherical_samples: 16,
        }
    }
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            radius: 1000.0,
            camera_altitude: 10.0,
            orbit_speed: 0.02,
            sun_brightness: 0.99,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            show_frame_stats: false,
            log_level: "info".to_string(),
        }
    }
}

/// Default configuration directory (`<os config dir>/aether`).
///
/// Falls back to the working directory when the OS exposes no config
/// directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aether")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let config = read_config(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join("config.ron");
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path,
            source,
        })
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = read_config(&config_dir.join("config.ron"))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("width: 1280"));
        assert!(ron_str.contains("max_scattering_order: 3"));
        assert!(ron_str.contains("tone_map: Aces"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(window: (), render: (), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.atmosphere, AtmosphereConfig::default());
        assert_eq!(config.post_processing, PostProcessingSettings::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let ron_str = "(atmosphere: (max_scattering_order: 1, inscatter_nu: 2))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.atmosphere.max_scattering_order, 1);
        assert_eq!(config.atmosphere.inscatter_nu, 2);
        assert_eq!(config.atmosphere.inscatter_mu, 128);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_default_clear_color_is_dimmed_grey_green() {
        let c = RenderConfig::default().clear_color;
        assert!((c[0] - 0.039_607).abs() < 1e-5);
        assert!(c[1] > c[2] && c[2] > c[0]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.window.width = 1920;
        config.post_processing.tone_map = ToneMapOperator::Reinhard;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.render.shadow_map_resolution = 512;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().render.shadow_map_resolution, 512);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_dir_ends_with_app_name() {
        assert!(default_config_dir().ends_with("aether"));
    }
}
