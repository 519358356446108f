//! Procedural gradient skybox drawn behind everything else.

use std::sync::Arc;

use aether_render::{
    DeviceError, DrawCall, Entity, ForwardPass, Fragment, FragmentOutput, FragmentProgram,
    GeometryKind, GraphicsContext, ProgramId, RenderProgramDescriptor, ShaderResources,
    reconstruct_world_position,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SkyboxUniform {
    inv_view_proj: [[f32; 4]; 4],
    camera: [f32; 4],
    up: [f32; 4],
    zenith: [f32; 4],
    horizon: [f32; 4],
}

/// Colour along `dir` for a sky with the given `up`.
pub fn gradient(dir: Vec3, up: Vec3, zenith: Vec3, horizon: Vec3) -> Vec3 {
    let t = dir.dot(up).clamp(0.0, 1.0).sqrt();
    horizon.lerp(zenith, t)
}

struct Gradient;

impl FragmentProgram for Gradient {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let u: SkyboxUniform = res.uniform();
        let inv_view_proj = Mat4::from_cols_array_2d(&u.inv_view_proj);
        let camera = Vec4::from(u.camera).truncate();
        let p = fragment.pixel.as_ivec2();
        let near = reconstruct_world_position(p, res.target_size, 1.0, inv_view_proj);
        let dir = (near - camera).normalize_or_zero();
        let color = gradient(
            dir,
            Vec4::from(u.up).truncate(),
            Vec4::from(u.zenith).truncate(),
            Vec4::from(u.horizon).truncate(),
        );
        Some(FragmentOutput::single(color.extend(1.0)))
    }
}

/// Dark space gradient shown wherever nothing else was drawn.
pub struct GradientSkybox {
    program: ProgramId,
    pub up: Vec3,
    pub zenith: Vec3,
    pub horizon: Vec3,
}

impl GradientSkybox {
    pub fn new(ctx: &mut GraphicsContext) -> Result<Self, DeviceError> {
        let program = ctx.create_render_program(RenderProgramDescriptor {
            label: "gradient-skybox",
            wgsl: SKYBOX_SHADER_SOURCE,
            geometry: GeometryKind::FullScreen,
            textures: Vec::new(),
            fragment: Some(Arc::new(Gradient)),
        })?;
        Ok(Self {
            program,
            up: Vec3::Y,
            zenith: Vec3::new(0.0, 0.0, 0.004),
            horizon: Vec3::new(0.01, 0.012, 0.03),
        })
    }
}

impl Entity for GradientSkybox {
    /// Full-screen draw at the far plane; the forward pass depth test keeps
    /// it behind scene geometry.
    fn draw_forward(&self, ctx: &mut GraphicsContext, pass: &ForwardPass) -> Result<(), DeviceError> {
        let uniform = SkyboxUniform {
            inv_view_proj: pass.inverse_view_proj.to_cols_array_2d(),
            camera: pass.camera_position.extend(1.0).to_array(),
            up: self.up.normalize_or(Vec3::Y).extend(0.0).to_array(),
            zenith: self.zenith.extend(1.0).to_array(),
            horizon: self.horizon.extend(1.0).to_array(),
        };
        ctx.draw(&DrawCall::full_screen(
            self.program,
            bytemuck::bytes_of(&uniform),
            &[],
        ))
    }
}

pub const SKYBOX_SHADER_SOURCE: &str = r#"
struct Skybox {
    inv_view_proj: mat4x4<f32>,
    camera: vec4<f32>,
    up: vec4<f32>,
    zenith: vec4<f32>,
    horizon: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> sky: Skybox;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = in.uv;
    let w = sky.inv_view_proj * vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 1.0, 1.0);
    let dir = normalize(w.xyz / w.w - sky.camera.xyz);
    let t = sqrt(clamp(dot(dir, sky.up.xyz), 0.0, 1.0));
    return vec4<f32>(mix(sky.horizon.rgb, sky.zenith.rgb, t), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_endpoints() {
        let zenith = Vec3::new(0.0, 0.0, 1.0);
        let horizon = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(gradient(Vec3::Y, Vec3::Y, zenith, horizon), zenith);
        assert_eq!(gradient(Vec3::X, Vec3::Y, zenith, horizon), horizon);
        // Below the horizon stays at the horizon colour.
        assert_eq!(gradient(Vec3::NEG_Y, Vec3::Y, zenith, horizon), horizon);
    }
}
