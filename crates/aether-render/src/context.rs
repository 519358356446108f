//! The handle passes render through: a device plus its state cache.

use glam::Vec4;
use rustc_hash::FxHashMap;

use crate::device::{ComputeDispatch, DeviceError, DeviceStats, DrawCall, GraphicsDevice};
use crate::headless::HeadlessDevice;
use crate::mesh::MeshData;
use crate::program::{ComputeProgramDescriptor, RenderProgramDescriptor};
use crate::resource::{
    Extent2d, Mesh, ProgramId, RenderTarget, TargetDescriptor, TargetId, Texture,
    TextureDescriptor, TextureId,
};
use crate::state::{
    BlendEquation, BlendFunction, CullFace, DrawState, GraphicsStateCache, StateChange, StateStats,
    Viewport,
};
use crate::texture_data::TextureData;

/// Owns the device and routes every state change through the cache.
///
/// The device is not reachable mutably from outside, so state can only reach
/// it via the setters here. Programs are identified by label: registering a
/// label twice returns the first id.
pub struct GraphicsContext {
    device: Box<dyn GraphicsDevice>,
    state: GraphicsStateCache,
    programs: FxHashMap<&'static str, ProgramId>,
}

impl GraphicsContext {
    pub fn new(mut device: Box<dyn GraphicsDevice>) -> Self {
        let mut state = GraphicsStateCache::new();
        state.sync(device.as_mut());
        let mut ctx = Self {
            device,
            state,
            programs: FxHashMap::default(),
        };
        let size = ctx.window_size();
        ctx.set_viewport(Viewport::full(size));
        ctx
    }

    /// Context over a [`HeadlessDevice`] with a surface of `size`.
    pub fn headless(size: Extent2d) -> Self {
        Self::new(Box::new(HeadlessDevice::new(size)))
    }

    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    pub fn state(&self) -> &DrawState {
        self.state.current()
    }

    pub fn state_stats(&self) -> StateStats {
        self.state.stats()
    }

    pub fn reset_state_stats(&mut self) {
        self.state.reset_stats();
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.device.stats()
    }

    /// Size of the presentable surface.
    pub fn window_size(&self) -> Extent2d {
        self.device.surface_size()
    }

    pub fn resize_surface(&mut self, size: Extent2d) {
        self.device.resize_surface(size);
    }

    /// Free resources whose handles were dropped.
    pub fn maintain(&mut self) -> usize {
        self.device.maintain()
    }

    pub fn target_size(&self, target: TargetId) -> Option<Extent2d> {
        self.device.target_size(target)
    }

    fn set(&mut self, change: StateChange) -> bool {
        self.state.set(self.device.as_mut(), change)
    }

    pub fn set_depth_test(&mut self, enabled: bool) -> bool {
        self.set(StateChange::DepthTest(enabled))
    }

    pub fn set_cull(&mut self, enabled: bool) -> bool {
        self.set(StateChange::Cull(enabled))
    }

    pub fn set_cull_face(&mut self, face: CullFace) -> bool {
        self.set(StateChange::CullFace(face))
    }

    pub fn set_blend(&mut self, enabled: bool) -> bool {
        self.set(StateChange::Blend(enabled))
    }

    pub fn set_blend_equation(&mut self, equation: BlendEquation) -> bool {
        self.set(StateChange::BlendEquation(equation))
    }

    pub fn set_blend_function(&mut self, function: BlendFunction) -> bool {
        self.set(StateChange::BlendFunction(function))
    }

    pub fn set_color_write(&mut self, enabled: bool) -> bool {
        self.set(StateChange::ColorWrite(enabled))
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        self.set(StateChange::Viewport(viewport))
    }

    pub fn set_clear_color(&mut self, color: Vec4) -> bool {
        self.set(StateChange::ClearColor(color))
    }

    pub fn bind_draw_target(&mut self, target: TargetId) -> bool {
        self.set(StateChange::DrawTarget(target))
    }

    pub fn bind_read_target(&mut self, target: TargetId) -> bool {
        self.set(StateChange::ReadTarget(target))
    }

    /// Bind `target` for drawing with a viewport covering it.
    pub fn bind_target(&mut self, target: TargetId) -> Result<(), DeviceError> {
        let size = self
            .device
            .target_size(target)
            .ok_or(DeviceError::UnknownHandle {
                kind: "target",
                id: target.0,
            })?;
        self.bind_draw_target(target);
        self.set_viewport(Viewport::full(size));
        Ok(())
    }

    /// Clear the bound draw target.
    pub fn clear(&mut self, color: bool, depth: bool) -> Result<(), DeviceError> {
        self.device.clear(color, depth)
    }

    /// Copy `from`'s depth into `to`'s depth. Leaves `to` bound for drawing.
    pub fn blit_depth(&mut self, from: TargetId, to: TargetId) -> Result<(), DeviceError> {
        self.bind_read_target(from);
        self.bind_draw_target(to);
        self.device.blit_depth()
    }

    pub fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), DeviceError> {
        self.device.draw(call)
    }

    pub fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> Result<(), DeviceError> {
        self.device.dispatch(dispatch)
    }

    pub fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget, DeviceError> {
        self.device.create_target(desc)
    }

    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture, DeviceError> {
        self.device.create_texture(desc)
    }

    pub fn write_texture(
        &mut self,
        texture: TextureId,
        data: &TextureData,
    ) -> Result<(), DeviceError> {
        self.device.write_texture(texture, data)
    }

    pub fn create_mesh(&mut self, data: &MeshData) -> Result<Mesh, DeviceError> {
        self.device.create_mesh(data)
    }

    pub fn create_render_program(
        &mut self,
        desc: RenderProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        if let Some(id) = self.programs.get(desc.label) {
            return Ok(*id);
        }
        log::debug!("registering render program '{}'", desc.label);
        let label = desc.label;
        let id = self.device.create_render_program(desc)?;
        self.programs.insert(label, id);
        Ok(id)
    }

    pub fn create_compute_program(
        &mut self,
        desc: ComputeProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        if let Some(id) = self.programs.get(desc.label) {
            return Ok(*id);
        }
        log::debug!("registering compute program '{}'", desc.label);
        let label = desc.label;
        let id = self.device.create_compute_program(desc)?;
        self.programs.insert(label, id);
        Ok(id)
    }

    pub fn read_color(
        &mut self,
        target: TargetId,
        attachment: usize,
    ) -> Result<TextureData, DeviceError> {
        self.device.read_color(target, attachment)
    }

    pub fn read_depth(&mut self, target: TargetId) -> Result<TextureData, DeviceError> {
        self.device.read_depth(target)
    }

    pub fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, DeviceError> {
        self.device.read_texture(texture)
    }

    pub fn present(&mut self) -> Result<(), DeviceError> {
        self.device.present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundant_changes_never_reach_device() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(8, 8));
        let before = ctx.device_stats().state_changes;
        assert!(ctx.set_depth_test(true));
        assert!(!ctx.set_depth_test(true));
        assert!(!ctx.set_cull(false));
        assert_eq!(ctx.device_stats().state_changes, before + 1);
        assert_eq!(ctx.state_stats().suppressed, 2);
    }

    #[test]
    fn test_bind_target_sets_viewport() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(8, 8));
        let target = ctx
            .create_target(&TargetDescriptor {
                label: "t".into(),
                size: Extent2d::new(3, 5),
                color: Vec::new(),
                depth: true,
            })
            .unwrap();
        ctx.bind_target(target.id()).unwrap();
        assert_eq!(ctx.state().draw_target, target.id());
        assert_eq!(ctx.state().viewport, Viewport::full(Extent2d::new(3, 5)));
    }

    #[test]
    fn test_programs_are_registered_once_per_label() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(2, 2));
        let desc = || RenderProgramDescriptor {
            label: "depth-only",
            wgsl: "",
            geometry: crate::program::GeometryKind::Mesh,
            textures: Vec::new(),
            fragment: None,
        };
        let a = ctx.create_render_program(desc()).unwrap();
        let b = ctx.create_render_program(desc()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_initial_viewport_covers_surface() {
        let ctx = GraphicsContext::headless(Extent2d::new(6, 4));
        assert_eq!(ctx.state().viewport, Viewport::full(Extent2d::new(6, 4)));
    }
}
