use aether_planet::AtmosphereError;
use aether_render::{DeviceError, GpuContextError, RenderError};

/// Errors that end the application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("GPU initialization failed: {0}")]
    Gpu(#[from] GpuContextError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to build the planet scene: {0}")]
    Atmosphere(#[from] AtmosphereError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
}
