//! Demo application: a planet with a precomputed atmosphere rendered through
//! the deferred pipeline, in a window or headless.

pub mod demo;
pub mod engine;
pub mod error;
pub mod game_loop;
pub mod headless;
pub mod overlay;
pub mod skybox;
pub mod window;

pub use demo::PlanetScene;
pub use engine::Engine;
pub use error::AppError;
pub use game_loop::{FIXED_DT, GameLoop, MAX_FRAME_TIME};
pub use headless::run_headless;
pub use overlay::{OverlayInfo, SharedOverlayInfo, StatsOverlay};
pub use skybox::GradientSkybox;
pub use window::{AppState, run};
