//! What the pipeline needs from a scene, and the per-pass views handed to
//! entities.

use aether_config::PostProcessingSettings;
use aether_lighting::SceneLight;
use glam::{Mat4, Vec3};

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::device::{DeviceError, DrawCall, TextureSource};
use crate::gbuffer::SurfaceMaterial;
use crate::program::DrawTransform;
use crate::resource::{Extent2d, Mesh, ProgramId};
use crate::stats::FrameStats;

/// Shadow pass view: one light, its depth view, and the depth-only program.
#[derive(Clone, Copy, Debug)]
pub struct ShadowPass<'a> {
    pub light: SceneLight<'a>,
    pub view_proj: Mat4,
    pub program: ProgramId,
}

impl ShadowPass<'_> {
    /// Rasterize `mesh` into the light's shadow map.
    pub fn draw_mesh(
        &self,
        ctx: &mut GraphicsContext,
        mesh: &Mesh,
        model: Mat4,
    ) -> Result<(), DeviceError> {
        ctx.draw(&DrawCall::mesh(
            self.program,
            mesh,
            DrawTransform::new(model, self.view_proj),
            &[],
            &[],
        ))
    }
}

/// Geometry pass view; entities write surface attributes into the Gbuffer.
#[derive(Clone, Debug)]
pub struct GeometryPass {
    pub camera: Camera,
    pub view_proj: Mat4,
    pub surface_program: ProgramId,
}

impl GeometryPass {
    /// Draw `mesh` with the standard surface program.
    pub fn draw_mesh(
        &self,
        ctx: &mut GraphicsContext,
        mesh: &Mesh,
        model: Mat4,
        material: &SurfaceMaterial,
    ) -> Result<(), DeviceError> {
        let uniform = material.to_uniform();
        ctx.draw(&DrawCall::mesh(
            self.surface_program,
            mesh,
            DrawTransform::new(model, self.view_proj),
            bytemuck::bytes_of(&uniform),
            &[],
        ))
    }
}

/// Forward pass view. The bound target is the HDR post-processing target,
/// whose depth holds the scene depth copied from the Gbuffer.
#[derive(Clone, Debug)]
pub struct ForwardPass {
    pub camera: Camera,
    pub view_proj: Mat4,
    pub inverse_view_proj: Mat4,
    pub camera_position: Vec3,
    /// Gbuffer depth, safe to sample while the post target is bound.
    pub scene_depth: TextureSource,
    pub size: Extent2d,
}

/// A drawable owned by a scene. Every hook defaults to drawing nothing.
pub trait Entity {
    fn draw_shadow(&self, ctx: &mut GraphicsContext, pass: &ShadowPass<'_>) -> Result<(), DeviceError> {
        let _ = (ctx, pass);
        Ok(())
    }

    fn draw(&self, ctx: &mut GraphicsContext, pass: &GeometryPass) -> Result<(), DeviceError> {
        let _ = (ctx, pass);
        Ok(())
    }

    fn draw_forward(&self, ctx: &mut GraphicsContext, pass: &ForwardPass) -> Result<(), DeviceError> {
        let _ = (ctx, pass);
        Ok(())
    }
}

/// A scene as seen by [`RenderPipeline`](crate::RenderPipeline).
pub trait Scene {
    fn name(&self) -> &str;

    fn camera(&self) -> &Camera;

    /// Entities in draw order.
    fn entities(&self) -> &[Box<dyn Entity>];

    /// Lights borrowed for this frame.
    fn lights(&self) -> Vec<SceneLight<'_>>;

    /// Drawn before any other forward content.
    fn skybox(&self) -> Option<&dyn Entity> {
        None
    }

    fn post_processing(&self) -> PostProcessingSettings {
        PostProcessingSettings::default()
    }

    /// Runs before the entities of the geometry pass.
    fn draw(&mut self, ctx: &mut GraphicsContext, pass: &GeometryPass) -> Result<(), DeviceError> {
        let _ = (ctx, pass);
        Ok(())
    }

    /// Runs before the entities of the forward pass.
    fn draw_forward(
        &mut self,
        ctx: &mut GraphicsContext,
        pass: &ForwardPass,
    ) -> Result<(), DeviceError> {
        let _ = (ctx, pass);
        Ok(())
    }

    /// Called once the frame is complete.
    fn post_draw(&mut self, stats: &FrameStats) {
        let _ = stats;
    }
}

/// Draws screen-space content after post-processing.
pub trait OverlayRenderer {
    fn draw(&mut self, ctx: &mut GraphicsContext, size: Extent2d) -> Result<(), DeviceError>;
}

/// A mesh with a fixed material.
pub struct MeshEntity {
    pub mesh: Mesh,
    pub model: Mat4,
    pub material: SurfaceMaterial,
    pub casts_shadow: bool,
}

impl MeshEntity {
    pub fn new(mesh: Mesh, model: Mat4, material: SurfaceMaterial) -> Self {
        Self {
            mesh,
            model,
            material,
            casts_shadow: true,
        }
    }
}

impl Entity for MeshEntity {
    fn draw_shadow(&self, ctx: &mut GraphicsContext, pass: &ShadowPass<'_>) -> Result<(), DeviceError> {
        if self.casts_shadow {
            pass.draw_mesh(ctx, &self.mesh, self.model)?;
        }
        Ok(())
    }

    fn draw(&self, ctx: &mut GraphicsContext, pass: &GeometryPass) -> Result<(), DeviceError> {
        pass.draw_mesh(ctx, &self.mesh, self.model, &self.material)
    }
}
