//! Fixed-timestep clock.
//!
//! Simulation (camera orbit, atmosphere precomputation) advances in fixed
//! ticks while frames render at whatever rate the surface allows.

use std::time::Instant;

use tracing::warn;

/// Fixed simulation timestep: 60 Hz.
pub const FIXED_DT: f64 = 1.0 / 60.0;

/// Longest frame time accounted for; slower frames accept slowdown.
pub const MAX_FRAME_TIME: f64 = 0.25;

/// Accumulates wall-clock time into whole simulation ticks.
pub struct GameLoop {
    previous_time: Instant,
    accumulator: f64,
    total_sim_time: f64,
    frame_count: u64,
    update_count: u64,
}

impl GameLoop {
    pub fn new() -> Self {
        Self {
            previous_time: Instant::now(),
            accumulator: 0.0,
            total_sim_time: 0.0,
            frame_count: 0,
            update_count: 0,
        }
    }

    /// Measure the time since the last call and return how many fixed ticks
    /// to run before rendering this frame.
    pub fn advance(&mut self) -> u32 {
        let now = Instant::now();
        let frame_time = now.duration_since(self.previous_time).as_secs_f64();
        self.previous_time = now;
        self.advance_by(frame_time)
    }

    /// Like [`advance`](Self::advance) with an explicit frame time in seconds.
    pub fn advance_by(&mut self, mut frame_time: f64) -> u32 {
        if frame_time > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_time * 1000.0,
                MAX_FRAME_TIME * 1000.0
            );
            frame_time = MAX_FRAME_TIME;
        }
        self.accumulator += frame_time.max(0.0);

        let mut ticks = 0;
        while self.accumulator >= FIXED_DT {
            self.accumulator -= FIXED_DT;
            self.total_sim_time += FIXED_DT;
            ticks += 1;
        }
        self.update_count += u64::from(ticks);
        self.frame_count += 1;
        ticks
    }

    /// Fraction of a tick left in the accumulator, in `[0, 1)`.
    pub fn alpha(&self) -> f64 {
        self.accumulator / FIXED_DT
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn total_sim_time(&self) -> f64 {
        self.total_sim_time
    }
}

impl Default for GameLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_tick_runs_once() {
        let mut game_loop = GameLoop::new();
        assert_eq!(game_loop.advance_by(FIXED_DT), 1);
        assert_eq!(game_loop.update_count(), 1);
        assert_eq!(game_loop.frame_count(), 1);
    }

    #[test]
    fn test_short_frames_accumulate() {
        let mut game_loop = GameLoop::new();
        assert_eq!(game_loop.advance_by(FIXED_DT * 0.6), 0);
        assert!((game_loop.alpha() - 0.6).abs() < 1e-9);
        assert_eq!(game_loop.advance_by(FIXED_DT * 0.6), 1);
        assert!(game_loop.alpha() < 1.0);
    }

    #[test]
    fn test_long_frame_is_clamped() {
        let mut game_loop = GameLoop::new();
        let ticks = game_loop.advance_by(5.0);
        // 15 ticks, give or take rounding in the accumulator.
        assert!((14..=15).contains(&ticks));
        assert!(game_loop.total_sim_time() <= MAX_FRAME_TIME);
    }
}
