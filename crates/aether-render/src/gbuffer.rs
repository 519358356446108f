//! Geometry buffer for deferred lighting.
//!
//! Attachments:
//! - 0: albedo (rgb) + ambient occlusion (a), `Rgba8Unorm`
//! - 1: world normal (xyz) + roughness (w), `Rgba16Float`
//! - 2: metalness (x) + emissive strength (y), `Rgba16Float`
//! - depth, reverse-Z

use std::sync::Arc;

use aether_config::RenderConfig;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::context::GraphicsContext;
use crate::device::{CLEAR_DEPTH, DeviceError, DrawCall, TextureSource};
use crate::program::{
    Fragment, FragmentOutput, FragmentProgram, GeometryKind, RenderProgramDescriptor,
    ShaderResources, TextureBindingKind,
};
use crate::resource::{Extent2d, ProgramId, RenderTarget, TargetDescriptor, TextureFormat};

/// Colour formats of the Gbuffer attachments, in binding order.
pub const GBUFFER_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
];

/// Surface attributes written by the standard geometry program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceMaterial {
    pub albedo: Vec3,
    pub ambient_occlusion: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub emissive: f32,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            ambient_occlusion: 1.0,
            roughness: 0.5,
            metalness: 0.0,
            emissive: 0.0,
        }
    }
}

impl SurfaceMaterial {
    pub fn to_uniform(&self) -> SurfaceUniform {
        SurfaceUniform {
            albedo_ao: self.albedo.extend(self.ambient_occlusion).to_array(),
            params: [self.roughness, self.metalness, self.emissive, 0.0],
        }
    }
}

/// GPU layout of [`SurfaceMaterial`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SurfaceUniform {
    pub albedo_ao: [f32; 4],
    /// x = roughness, y = metalness, z = emissive.
    pub params: [f32; 4],
}

static_assertions::assert_eq_size!(SurfaceUniform, [u8; 32]);

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct AmbientUniform {
    sky: [f32; 4],
    ground: [f32; 4],
    /// x = intensity.
    params: [f32; 4],
}

struct SurfaceFragment;

impl FragmentProgram for SurfaceFragment {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let m: SurfaceUniform = res.uniform();
        Some(FragmentOutput([
            Vec4::from(m.albedo_ao),
            fragment.world_normal.extend(m.params[0]),
            Vec4::new(m.params[1], m.params[2], 0.0, 1.0),
            Vec4::ZERO,
        ]))
    }
}

struct AmbientResolve;

impl FragmentProgram for AmbientResolve {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let (x, y) = (fragment.pixel.x as i32, fragment.pixel.y as i32);
        let albedo = res.texture(0).load(x, y, 0);
        let depth = res.texture(3).load(x, y, 0).x;
        if depth <= CLEAR_DEPTH {
            return Some(FragmentOutput::single(albedo.truncate().extend(1.0)));
        }
        let u: AmbientUniform = res.uniform();
        let normal = res.texture(1).load(x, y, 0).truncate();
        let material = res.texture(2).load(x, y, 0);
        let t = normal.y * 0.5 + 0.5;
        let light = Vec4::from(u.ground).truncate().lerp(Vec4::from(u.sky).truncate(), t) * u.params[0];
        let rgb = albedo.truncate();
        let lit = rgb * albedo.w * light + rgb * material.y;
        Some(FragmentOutput::single(lit.extend(1.0)))
    }
}

/// Offscreen multi-target surface filled by the geometry pass.
pub struct Gbuffer {
    target: RenderTarget,
    surface_program: ProgramId,
    resolve_program: ProgramId,
    clear_color: Vec4,
    ambient: AmbientUniform,
}

impl Gbuffer {
    pub fn new(
        ctx: &mut GraphicsContext,
        size: Extent2d,
        config: &RenderConfig,
    ) -> Result<Self, DeviceError> {
        let surface_program = ctx.create_render_program(RenderProgramDescriptor {
            label: "gbuffer-surface",
            wgsl: GBUFFER_SURFACE_SHADER_SOURCE,
            geometry: GeometryKind::Mesh,
            textures: Vec::new(),
            fragment: Some(Arc::new(SurfaceFragment)),
        })?;
        let resolve_program = ctx.create_render_program(RenderProgramDescriptor {
            label: "gbuffer-ambient-resolve",
            wgsl: AMBIENT_RESOLVE_SHADER_SOURCE,
            geometry: GeometryKind::FullScreen,
            textures: vec![
                TextureBindingKind::Color2d,
                TextureBindingKind::Color2d,
                TextureBindingKind::Color2d,
                TextureBindingKind::Depth,
            ],
            fragment: Some(Arc::new(AmbientResolve)),
        })?;
        let c = config.clear_color;
        Ok(Self {
            target: Self::create_target(ctx, size)?,
            surface_program,
            resolve_program,
            clear_color: Vec4::new(c[0], c[1], c[2], 1.0),
            ambient: AmbientUniform {
                sky: Vec3::from(config.ambient_sky).extend(0.0).to_array(),
                ground: Vec3::from(config.ambient_ground).extend(0.0).to_array(),
                params: [config.ambient_intensity, 0.0, 0.0, 0.0],
            },
        })
    }

    fn create_target(ctx: &mut GraphicsContext, size: Extent2d) -> Result<RenderTarget, DeviceError> {
        ctx.create_target(&TargetDescriptor {
            label: "gbuffer".into(),
            size,
            color: GBUFFER_FORMATS.to_vec(),
            depth: true,
        })
    }

    /// Reallocate every attachment at `size`. The old target is released.
    pub fn initialize(&mut self, ctx: &mut GraphicsContext, size: Extent2d) -> Result<(), DeviceError> {
        self.target = Self::create_target(ctx, size)?;
        Ok(())
    }

    /// Bind for drawing with a full viewport, clearing colour and depth when
    /// `clear` is set.
    pub fn enable(&self, ctx: &mut GraphicsContext, clear: bool) -> Result<(), DeviceError> {
        ctx.bind_target(self.target.id())?;
        if clear {
            ctx.set_clear_color(self.clear_color);
            ctx.clear(true, true)?;
        }
        Ok(())
    }

    /// Ambient resolve into the currently bound target.
    pub fn draw(&self, ctx: &mut GraphicsContext) -> Result<(), DeviceError> {
        let id = self.target.id();
        let sources = [
            TextureSource::TargetColor(id, 0),
            TextureSource::TargetColor(id, 1),
            TextureSource::TargetColor(id, 2),
            TextureSource::TargetDepth(id),
        ];
        ctx.draw(&DrawCall::full_screen(
            self.resolve_program,
            bytemuck::bytes_of(&self.ambient),
            &sources,
        ))
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn size(&self) -> Extent2d {
        self.target.size()
    }

    /// Program writing a [`SurfaceMaterial`] into every attachment.
    pub fn surface_program(&self) -> ProgramId {
        self.surface_program
    }

    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }
}

pub const GBUFFER_SURFACE_SHADER_SOURCE: &str = r#"
struct SurfaceMaterial {
    albedo_ao: vec4<f32>,
    params: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> material: SurfaceMaterial;

struct GbufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) material: vec4<f32>,
};

@fragment
fn fs_main(in: VertexOutput) -> GbufferOutput {
    var out: GbufferOutput;
    out.albedo = material.albedo_ao;
    out.normal = vec4<f32>(normalize(in.world_normal), material.params.x);
    out.material = vec4<f32>(material.params.y, material.params.z, 0.0, 1.0);
    return out;
}
"#;

pub const AMBIENT_RESOLVE_SHADER_SOURCE: &str = r#"
struct Ambient {
    sky: vec4<f32>,
    ground: vec4<f32>,
    params: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> ambient: Ambient;
@group(1) @binding(1)
var albedo_tex: texture_2d<f32>;
@group(1) @binding(2)
var normal_tex: texture_2d<f32>;
@group(1) @binding(3)
var material_tex: texture_2d<f32>;
@group(1) @binding(4)
var depth_tex: texture_depth_2d;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = vec2<i32>(floor(in.clip_position.xy));
    let albedo = textureLoad(albedo_tex, p, 0);
    let depth = textureLoad(depth_tex, p, 0);
    if depth <= 0.0 {
        return vec4<f32>(albedo.rgb, 1.0);
    }
    let n = textureLoad(normal_tex, p, 0).xyz;
    let m = textureLoad(material_tex, p, 0);
    let light = mix(ambient.ground.rgb, ambient.sky.rgb, n.y * 0.5 + 0.5) * ambient.params.x;
    return vec4<f32>(albedo.rgb * albedo.a * light + albedo.rgb * m.y, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_passes_clear_colour_through() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let config = RenderConfig::default();
        let gbuffer = Gbuffer::new(&mut ctx, Extent2d::new(4, 4), &config).unwrap();
        ctx.set_color_write(true);
        gbuffer.enable(&mut ctx, true).unwrap();

        let out = ctx
            .create_target(&TargetDescriptor {
                label: "out".into(),
                size: Extent2d::new(4, 4),
                color: vec![TextureFormat::Rgba16Float],
                depth: false,
            })
            .unwrap();
        ctx.bind_target(out.id()).unwrap();
        gbuffer.draw(&mut ctx).unwrap();

        let color = ctx.read_color(out.id(), 0).unwrap();
        let expected = gbuffer.clear_color();
        assert!(color.texels.iter().all(|t| *t == expected));
    }

    #[test]
    fn test_initialize_replaces_target() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let mut gbuffer = Gbuffer::new(&mut ctx, Extent2d::new(4, 4), &RenderConfig::default()).unwrap();
        let old = gbuffer.target().id();
        gbuffer.initialize(&mut ctx, Extent2d::new(8, 2)).unwrap();
        assert_ne!(gbuffer.target().id(), old);
        assert_eq!(gbuffer.size(), Extent2d::new(8, 2));
        assert_eq!(ctx.maintain(), 1);
        assert!(ctx.target_size(old).is_none());
    }

    #[test]
    fn test_surface_uniform_packs_material() {
        let m = SurfaceMaterial {
            albedo: Vec3::new(0.1, 0.2, 0.3),
            ambient_occlusion: 0.5,
            roughness: 0.7,
            metalness: 1.0,
            emissive: 2.0,
        };
        let u = m.to_uniform();
        assert_eq!(u.albedo_ao, [0.1, 0.2, 0.3, 0.5]);
        assert_eq!(u.params, [0.7, 1.0, 2.0, 0.0]);
    }
}
