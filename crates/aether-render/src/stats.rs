/// Counters for one frame of [`RenderPipeline::draw`](crate::RenderPipeline::draw).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Frames drawn so far, including this one.
    pub frame: u64,
    pub draw_calls: u64,
    pub dispatches: u64,
    /// State changes that reached the device.
    pub state_changes: u64,
    /// Redundant state changes dropped by the cache.
    pub suppressed: u64,
    pub lights: usize,
    pub shadow_maps: usize,
    pub cpu_frame_ms: f32,
}
