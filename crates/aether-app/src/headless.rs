//! Run the engine without a window on the CPU reference device.

use aether_config::Config;
use aether_render::{Extent2d, FrameStats, GraphicsContext};
use tracing::{info, instrument};

use crate::engine::Engine;
use crate::error::AppError;
use crate::game_loop::FIXED_DT;

/// Render `frames` frames with one fixed tick before each. Returns the
/// statistics of the last frame.
#[instrument(skip(config))]
pub fn run_headless(config: &Config, frames: u64) -> Result<FrameStats, AppError> {
    let size = Extent2d::new(config.window.width.max(1), config.window.height.max(1));
    let ctx = GraphicsContext::headless(size);
    let mut engine = Engine::new(ctx, config)?;

    let mut stats = FrameStats::default();
    for _ in 0..frames {
        engine.tick(FIXED_DT);
        stats = engine.frame()?;
    }

    info!(
        "Headless run finished: {} frames, {} draw calls in the last frame, atmosphere {}",
        stats.frame,
        stats.draw_calls,
        if engine.scene().planet().atmosphere().is_ready() {
            "ready"
        } else {
            "pending"
        }
    );
    Ok(stats)
}
