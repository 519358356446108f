//! Fixed-function draw state and the cache that deduplicates changes.
//!
//! Device state persists between passes, so each pass only states what it
//! needs. [`GraphicsStateCache`] keeps a mirror of what the device has applied
//! and forwards a [`StateChange`] only when it differs from the mirror.

use glam::Vec4;

use crate::device::GraphicsDevice;
use crate::resource::TargetId;

/// Which faces are discarded when culling is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
}

/// Blend operation combining source and destination terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
}

/// Blend factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Source and destination factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendFunction {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunction {
    /// `(One, One)`: additive accumulation.
    pub const ADDITIVE: BlendFunction = BlendFunction {
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };

    /// `(SrcAlpha, OneMinusSrcAlpha)`: classic alpha blending.
    pub const ALPHA: BlendFunction = BlendFunction {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
}

/// Pixel rectangle, origin top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Viewport covering a whole target of `size`.
    pub fn full(size: crate::Extent2d) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// Complete fixed-function state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawState {
    pub depth_test: bool,
    pub cull: bool,
    pub cull_face: CullFace,
    pub blend: bool,
    pub blend_equation: BlendEquation,
    pub blend_function: BlendFunction,
    pub color_write: bool,
    pub viewport: Viewport,
    pub clear_color: Vec4,
    pub draw_target: TargetId,
    pub read_target: TargetId,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            depth_test: false,
            cull: false,
            cull_face: CullFace::Back,
            blend: false,
            blend_equation: BlendEquation::Add,
            blend_function: BlendFunction {
                src: BlendFactor::One,
                dst: BlendFactor::Zero,
            },
            color_write: true,
            viewport: Viewport::default(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            draw_target: TargetId::SURFACE,
            read_target: TargetId::SURFACE,
        }
    }
}

/// One state transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StateChange {
    DepthTest(bool),
    Cull(bool),
    CullFace(CullFace),
    Blend(bool),
    BlendEquation(BlendEquation),
    BlendFunction(BlendFunction),
    ColorWrite(bool),
    Viewport(Viewport),
    ClearColor(Vec4),
    DrawTarget(TargetId),
    ReadTarget(TargetId),
}

impl DrawState {
    /// Apply `change`; returns whether anything differed.
    pub fn apply(&mut self, change: StateChange) -> bool {
        macro_rules! swap {
            ($field:expr, $value:expr) => {{
                let changed = $field != $value;
                $field = $value;
                changed
            }};
        }
        match change {
            StateChange::DepthTest(v) => swap!(self.depth_test, v),
            StateChange::Cull(v) => swap!(self.cull, v),
            StateChange::CullFace(v) => swap!(self.cull_face, v),
            StateChange::Blend(v) => swap!(self.blend, v),
            StateChange::BlendEquation(v) => swap!(self.blend_equation, v),
            StateChange::BlendFunction(v) => swap!(self.blend_function, v),
            StateChange::ColorWrite(v) => swap!(self.color_write, v),
            StateChange::Viewport(v) => swap!(self.viewport, v),
            StateChange::ClearColor(v) => swap!(self.clear_color, v),
            StateChange::DrawTarget(v) => swap!(self.draw_target, v),
            StateChange::ReadTarget(v) => swap!(self.read_target, v),
        }
    }

    /// Every field as a change, for a full resync.
    pub fn as_changes(&self) -> [StateChange; 11] {
        [
            StateChange::DepthTest(self.depth_test),
            StateChange::Cull(self.cull),
            StateChange::CullFace(self.cull_face),
            StateChange::Blend(self.blend),
            StateChange::BlendEquation(self.blend_equation),
            StateChange::BlendFunction(self.blend_function),
            StateChange::ColorWrite(self.color_write),
            StateChange::Viewport(self.viewport),
            StateChange::ClearColor(self.clear_color),
            StateChange::DrawTarget(self.draw_target),
            StateChange::ReadTarget(self.read_target),
        ]
    }
}

/// Counters kept by the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Changes forwarded to the device.
    pub applied: u64,
    /// Requests that matched the current state and were dropped.
    pub suppressed: u64,
}

/// Mirror of device state. The only path by which state reaches a device.
#[derive(Debug, Default)]
pub struct GraphicsStateCache {
    current: DrawState,
    stats: StateStats,
}

impl GraphicsStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// State as the device currently has it.
    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn stats(&self) -> StateStats {
        self.stats
    }

    /// Reset counters, keeping state.
    pub fn reset_stats(&mut self) {
        self.stats = StateStats::default();
    }

    /// Forward `change` to `device` unless it is already in effect.
    /// Returns whether it was forwarded.
    pub(crate) fn set(&mut self, device: &mut dyn GraphicsDevice, change: StateChange) -> bool {
        if self.current.apply(change) {
            device.apply_state(change);
            self.stats.applied += 1;
            true
        } else {
            self.stats.suppressed += 1;
            false
        }
    }

    /// Push the whole mirror to a device whose state is unknown.
    pub(crate) fn sync(&mut self, device: &mut dyn GraphicsDevice) {
        for change in self.current.as_changes() {
            device.apply_state(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_changes_only() {
        let mut s = DrawState::default();
        assert!(!s.apply(StateChange::DepthTest(false)));
        assert!(s.apply(StateChange::DepthTest(true)));
        assert!(!s.apply(StateChange::DepthTest(true)));
        assert!(s.depth_test);
    }

    #[test]
    fn test_as_changes_rebuilds_state() {
        let mut s = DrawState::default();
        s.apply(StateChange::Cull(true));
        s.apply(StateChange::CullFace(CullFace::Front));
        s.apply(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        let mut rebuilt = DrawState::default();
        for change in s.as_changes() {
            rebuilt.apply(change);
        }
        assert_eq!(rebuilt, s);
    }
}
