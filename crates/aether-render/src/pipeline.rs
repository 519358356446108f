//! Per-frame orchestration of the deferred passes.
//!
//! Pass order within [`RenderPipeline::draw`]:
//! 1. shadow maps
//! 2. geometry into the Gbuffer
//! 3. ambient resolve into the HDR target, then Gbuffer depth copied over
//! 4. light volumes, additively blended
//! 5. forward content (skyboxes, then per-scene forward hooks and entities)
//! 6. post-processing into the output target, then overlays
//!
//! Each pass sets the state it depends on; anything it leaves behind is
//! visible to the next pass.

use std::time::Instant;

use aether_config::RenderConfig;
use aether_lighting::ShadowProjections;
use glam::Vec4;

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::device::TextureSource;
use crate::error::RenderError;
use crate::events::{ResizeSubscription, WindowEvents};
use crate::gbuffer::Gbuffer;
use crate::light_volume::LightVolumeRenderer;
use crate::post_processing::PostProcessingRenderer;
use crate::resource::{Extent2d, TargetId};
use crate::scene::{ForwardPass, GeometryPass, OverlayRenderer, Scene};
use crate::shadow::{ShadowCasters, ShadowRenderer};
use crate::state::{BlendEquation, BlendFunction, CullFace};
use crate::stats::FrameStats;

/// Frame phases, reported to a [`PassInspector`] as each completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    Shadow,
    Geometry,
    LightingComposite,
    LightVolumes,
    Forward,
    PostProcess,
}

/// Observes the context between passes. Debugging aid.
pub trait PassInspector {
    fn after_pass(&mut self, pass: Pass, ctx: &mut GraphicsContext);
}

/// Owns every per-frame renderer and sequences them.
pub struct RenderPipeline {
    gbuffer: Gbuffer,
    post_processing: PostProcessingRenderer,
    shadows: ShadowRenderer,
    light_volumes: LightVolumeRenderer,
    overlays: Vec<Box<dyn OverlayRenderer>>,
    inspector: Option<Box<dyn PassInspector>>,
    resize: ResizeSubscription,
    size: Extent2d,
    clear_color: Vec4,
    stats: FrameStats,
}

impl RenderPipeline {
    /// Build every renderer at the current window size and subscribe to
    /// resize notifications.
    pub fn initialize(
        ctx: &mut GraphicsContext,
        config: &RenderConfig,
        events: &mut WindowEvents,
    ) -> Result<Self, RenderError> {
        let size = ctx.window_size();
        let gbuffer = Gbuffer::new(ctx, size, config).map_err(|source| RenderError::TargetCreation {
            what: "gbuffer",
            source,
        })?;
        let post_processing =
            PostProcessingRenderer::new(ctx, size).map_err(|source| RenderError::TargetCreation {
                what: "post-processing target",
                source,
            })?;
        let shadows = ShadowRenderer::new(
            ctx,
            config.shadow_map_resolution,
            config.shadow_distance,
            ShadowProjections::default(),
        )?;
        let light_volumes = LightVolumeRenderer::new(ctx)?;
        log::info!(
            "Render pipeline initialized at {}x{} on {}",
            size.width,
            size.height,
            ctx.device().backend_name()
        );
        Ok(Self {
            clear_color: gbuffer.clear_color(),
            gbuffer,
            post_processing,
            shadows,
            light_volumes,
            overlays: Vec::new(),
            inspector: None,
            resize: events.subscribe(),
            size,
            stats: FrameStats::default(),
        })
    }

    /// Render one frame of `scenes` into `output`.
    pub fn draw(
        &mut self,
        ctx: &mut GraphicsContext,
        scenes: &mut [&mut dyn Scene],
        output: TargetId,
    ) -> Result<FrameStats, RenderError> {
        let start = Instant::now();
        if let Some(size) = self.resize.latest()
            && size != self.size
        {
            self.on_resize(ctx, size)?;
        }
        ctx.maintain();
        ctx.reset_state_stats();
        let device_before = ctx.device_stats();

        // 1. Shadows
        ctx.set_depth_test(true);
        ctx.set_cull(true);
        ctx.set_cull_face(CullFace::Front);
        ctx.set_color_write(false);
        let (light_count, shadow_maps) = {
            let lights: Vec<_> = scenes.iter().map(|s| s.lights()).collect();
            let casters: Vec<ShadowCasters<'_>> = scenes
                .iter()
                .zip(&lights)
                .map(|(scene, lights)| ShadowCasters {
                    camera: scene.camera(),
                    lights,
                    entities: scene.entities(),
                })
                .collect();
            let rendered = self.shadows.render(ctx, &casters)?;
            (lights.iter().map(Vec::len).sum::<usize>(), rendered)
        };
        self.inspect(Pass::Shadow, ctx);

        // 2. Geometry
        ctx.set_cull_face(CullFace::Back);
        ctx.set_color_write(true);
        self.gbuffer.enable(ctx, true)?;
        for scene in scenes.iter_mut() {
            let camera = scene.camera().clone();
            let pass = GeometryPass {
                view_proj: camera.view_projection_matrix(),
                camera,
                surface_program: self.gbuffer.surface_program(),
            };
            scene.draw(ctx, &pass)?;
            for entity in scene.entities() {
                entity.draw(ctx, &pass)?;
            }
        }
        self.inspect(Pass::Geometry, ctx);

        // 3. Ambient resolve and depth copy
        ctx.set_cull(false);
        ctx.set_depth_test(false);
        self.post_processing.enable_input(ctx)?;
        self.gbuffer.draw(ctx)?;
        ctx.blit_depth(
            self.gbuffer.target().id(),
            self.post_processing.target().id(),
        )?;
        self.inspect(Pass::LightingComposite, ctx);

        // 4. Light volumes
        ctx.set_blend(true);
        ctx.set_blend_equation(BlendEquation::Add);
        ctx.set_blend_function(BlendFunction::ADDITIVE);
        ctx.set_cull(true);
        ctx.set_cull_face(CullFace::Front);
        for scene in scenes.iter() {
            for light in scene.lights() {
                self.light_volumes.draw(
                    ctx,
                    &self.gbuffer,
                    scene.camera(),
                    &light,
                    self.shadows.map(light.id),
                )?;
            }
        }
        ctx.set_cull_face(CullFace::Back);
        ctx.set_blend(false);
        self.inspect(Pass::LightVolumes, ctx);

        // 5. Forward
        ctx.set_depth_test(true);
        ctx.set_cull(false);
        self.post_processing.enable_input(ctx)?;
        let passes: Vec<ForwardPass> = scenes.iter().map(|s| self.forward_pass(s.camera())).collect();
        for (scene, pass) in scenes.iter().zip(&passes) {
            if let Some(skybox) = scene.skybox() {
                skybox.draw_forward(ctx, pass)?;
            }
        }
        for (scene, pass) in scenes.iter_mut().zip(&passes) {
            scene.draw_forward(ctx, pass)?;
            for entity in scene.entities() {
                entity.draw_forward(ctx, pass)?;
            }
        }
        self.inspect(Pass::Forward, ctx);

        // 6. Post-processing and overlays
        ctx.set_depth_test(false);
        match scenes.first() {
            Some(scene) => {
                let settings = scene.post_processing();
                self.post_processing.draw(ctx, output, &settings)?;
            }
            None => {
                ctx.bind_target(output)?;
                ctx.set_clear_color(self.clear_color);
                ctx.set_color_write(true);
                ctx.clear(true, true)?;
            }
        }
        let output_size = ctx.target_size(output).unwrap_or(self.size);
        for overlay in &mut self.overlays {
            overlay.draw(ctx, output_size)?;
        }
        self.inspect(Pass::PostProcess, ctx);

        // 7. Finalize
        let device = ctx.device_stats();
        let state = ctx.state_stats();
        self.stats = FrameStats {
            frame: self.stats.frame + 1,
            draw_calls: device.draws - device_before.draws,
            dispatches: device.dispatches - device_before.dispatches,
            state_changes: state.applied,
            suppressed: state.suppressed,
            lights: light_count,
            shadow_maps,
            cpu_frame_ms: start.elapsed().as_secs_f32() * 1000.0,
        };
        for scene in scenes.iter_mut() {
            scene.post_draw(&self.stats);
        }
        log::trace!(
            "frame {}: {} draws, {} state changes ({} suppressed), {} lights, {} shadow maps, {:.2} ms",
            self.stats.frame,
            self.stats.draw_calls,
            self.stats.state_changes,
            self.stats.suppressed,
            self.stats.lights,
            self.stats.shadow_maps,
            self.stats.cpu_frame_ms
        );
        Ok(self.stats)
    }

    fn forward_pass(&self, camera: &Camera) -> ForwardPass {
        let view_proj = camera.view_projection_matrix();
        ForwardPass {
            camera: camera.clone(),
            view_proj,
            inverse_view_proj: view_proj.inverse(),
            camera_position: camera.position,
            scene_depth: TextureSource::TargetDepth(self.gbuffer.target().id()),
            size: self.size,
        }
    }

    fn inspect(&mut self, pass: Pass, ctx: &mut GraphicsContext) {
        if let Some(inspector) = &mut self.inspector {
            inspector.after_pass(pass, ctx);
        }
    }

    /// Present the surface.
    pub fn swap_buffers(&mut self, ctx: &mut GraphicsContext) -> Result<(), RenderError> {
        ctx.present()?;
        Ok(())
    }

    /// Rebuild size-dependent targets. Called by `draw` for queued resizes;
    /// may also be called directly.
    pub fn on_resize(&mut self, ctx: &mut GraphicsContext, size: Extent2d) -> Result<(), RenderError> {
        if ctx.window_size() != size {
            ctx.resize_surface(size);
        }
        // Nothing may stay bound to the targets about to be released.
        ctx.bind_draw_target(TargetId::SURFACE);
        ctx.bind_read_target(TargetId::SURFACE);
        self.gbuffer
            .initialize(ctx, size)
            .map_err(|source| RenderError::TargetCreation {
                what: "gbuffer",
                source,
            })?;
        self.post_processing =
            PostProcessingRenderer::new(ctx, size).map_err(|source| RenderError::TargetCreation {
                what: "post-processing target",
                source,
            })?;
        self.size = size;
        log::info!("Render targets resized to {}x{}", size.width, size.height);
        Ok(())
    }

    pub fn add_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.overlays.push(overlay);
    }

    pub fn set_inspector(&mut self, inspector: Option<Box<dyn PassInspector>>) {
        self.inspector = inspector;
    }

    /// Replace the per-light-kind shadow strategies.
    pub fn set_shadow_projections(&mut self, projections: ShadowProjections) {
        self.shadows.set_projections(projections);
    }

    pub fn size(&self) -> Extent2d {
        self.size
    }

    pub fn gbuffer(&self) -> &Gbuffer {
        &self.gbuffer
    }

    pub fn post_processing(&self) -> &PostProcessingRenderer {
        &self.post_processing
    }

    pub fn shadows(&self) -> &ShadowRenderer {
        &self.shadows
    }

    /// Stats of the last completed frame.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Recorder(Rc<RefCell<Vec<Pass>>>);

    impl PassInspector for Recorder {
        fn after_pass(&mut self, pass: Pass, _ctx: &mut GraphicsContext) {
            self.0.borrow_mut().push(pass);
        }
    }

    #[test]
    fn test_passes_run_in_order() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(8, 8));
        let mut events = WindowEvents::new();
        let mut pipeline =
            RenderPipeline::initialize(&mut ctx, &RenderConfig::default(), &mut events).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        pipeline.set_inspector(Some(Box::new(Recorder(seen.clone()))));
        pipeline.draw(&mut ctx, &mut [], TargetId::SURFACE).unwrap();
        assert_eq!(
            *seen.borrow(),
            [
                Pass::Shadow,
                Pass::Geometry,
                Pass::LightingComposite,
                Pass::LightVolumes,
                Pass::Forward,
                Pass::PostProcess
            ]
        );
    }

    #[test]
    fn test_queued_resize_applies_at_frame_start() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(8, 8));
        let mut events = WindowEvents::new();
        let mut pipeline =
            RenderPipeline::initialize(&mut ctx, &RenderConfig::default(), &mut events).unwrap();
        events.notify_resize(Extent2d::new(4, 4));
        events.notify_resize(Extent2d::new(12, 6));
        assert_eq!(pipeline.size(), Extent2d::new(8, 8));
        pipeline.draw(&mut ctx, &mut [], TargetId::SURFACE).unwrap();
        assert_eq!(pipeline.size(), Extent2d::new(12, 6));
        assert_eq!(ctx.window_size(), Extent2d::new(12, 6));
        assert_eq!(pipeline.gbuffer().size(), Extent2d::new(12, 6));
    }
}
