//! Frame statistics overlay.
//!
//! Text rendering lives outside the renderer; this overlay formats the HUD
//! lines and reports them through `tracing` at a fixed frame interval.

use std::cell::RefCell;
use std::rc::Rc;

use aether_render::{DeviceError, Extent2d, FrameStats, GraphicsContext, OverlayRenderer};
use tracing::info;

/// What the overlay reports, updated by the engine after each frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlayInfo {
    pub stats: FrameStats,
    pub fps: f32,
    pub altitude: f32,
    pub atmosphere: String,
}

impl OverlayInfo {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("FPS: {:.1}", self.fps),
            format!("Frame ms: {:.2}", self.stats.cpu_frame_ms),
            format!("Draw calls: {}", self.stats.draw_calls),
            format!("Altitude: {:.2}", self.altitude),
            format!("Atmosphere: {}", self.atmosphere),
        ]
    }
}

/// Shared handle to the overlay's text source.
pub type SharedOverlayInfo = Rc<RefCell<OverlayInfo>>;

pub struct StatsOverlay {
    info: SharedOverlayInfo,
    interval: u64,
    frames: u64,
}

impl StatsOverlay {
    /// Report every `interval` frames.
    pub fn new(info: SharedOverlayInfo, interval: u64) -> Self {
        Self {
            info,
            interval: interval.max(1),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl OverlayRenderer for StatsOverlay {
    fn draw(&mut self, _ctx: &mut GraphicsContext, size: Extent2d) -> Result<(), DeviceError> {
        self.frames += 1;
        if self.frames % self.interval == 0 {
            let text = self.info.borrow().lines().join(" | ");
            info!(target: "aether::overlay", "{}x{} {text}", size.width, size.height);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_show_stats() {
        let info = OverlayInfo {
            stats: FrameStats {
                draw_calls: 12,
                cpu_frame_ms: 4.5,
                ..Default::default()
            },
            fps: 60.0,
            altitude: 10.0,
            atmosphere: "ready".into(),
        };
        let lines = info.lines();
        assert_eq!(lines[0], "FPS: 60.0");
        assert_eq!(lines[2], "Draw calls: 12");
        assert_eq!(lines[4], "Atmosphere: ready");
    }

    #[test]
    fn test_overlay_counts_frames() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(2, 2));
        let mut overlay = StatsOverlay::new(SharedOverlayInfo::default(), 0);
        overlay.draw(&mut ctx, Extent2d::new(2, 2)).unwrap();
        overlay.draw(&mut ctx, Extent2d::new(2, 2)).unwrap();
        assert_eq!(overlay.frames(), 2);
    }
}
