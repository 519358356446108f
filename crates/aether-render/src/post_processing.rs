//! HDR target and final composite: bloom, exposure, tone mapping.

use std::sync::Arc;

use aether_config::{PostProcessingSettings, ToneMapOperator};
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec3, Vec4};

use crate::context::GraphicsContext;
use crate::device::{DeviceError, DrawCall, TextureSource};
use crate::program::{
    Fragment, FragmentOutput, FragmentProgram, GeometryKind, RenderProgramDescriptor,
    ShaderResources, TextureBindingKind,
};
use crate::resource::{Extent2d, ProgramId, RenderTarget, TargetDescriptor, TargetId, TextureFormat};

/// Cross-shaped blur taps: offset and weight. Weights sum to one.
const BLOOM_TAPS: [(i32, i32, f32); 9] = [
    (0, 0, 0.2),
    (1, 0, 0.12),
    (-1, 0, 0.12),
    (0, 1, 0.12),
    (0, -1, 0.12),
    (2, 0, 0.08),
    (-2, 0, 0.08),
    (0, 2, 0.08),
    (0, -2, 0.08),
];

const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PostUniform {
    /// x = bloom on, y = threshold, z = intensity, w = exposure.
    bloom_exposure: [f32; 4],
    /// x = operator (0 none, 1 Reinhard, 2 ACES).
    tone_map: [f32; 4],
}

impl PostUniform {
    fn new(settings: &PostProcessingSettings) -> Self {
        let operator = match settings.tone_map {
            ToneMapOperator::None => 0.0,
            ToneMapOperator::Reinhard => 1.0,
            ToneMapOperator::Aces => 2.0,
        };
        Self {
            bloom_exposure: [
                if settings.bloom { 1.0 } else { 0.0 },
                settings.bloom_threshold,
                settings.bloom_intensity,
                settings.exposure,
            ],
            tone_map: [operator, 0.0, 0.0, 0.0],
        }
    }
}

/// Tone-map a linear HDR colour.
pub fn tone_map(color: Vec3, operator: ToneMapOperator) -> Vec3 {
    match operator {
        ToneMapOperator::None => color.clamp(Vec3::ZERO, Vec3::ONE),
        ToneMapOperator::Reinhard => color / (Vec3::ONE + color),
        ToneMapOperator::Aces => {
            let c = color.max(Vec3::ZERO);
            ((c * (2.51 * c + 0.03)) / (c * (2.43 * c + 0.59) + 0.14)).clamp(Vec3::ZERO, Vec3::ONE)
        }
    }
}

fn bright_part(color: Vec3, threshold: f32) -> Vec3 {
    let luma = color.dot(LUMA);
    color * ((luma - threshold).max(0.0) / luma.max(1e-4))
}

struct Composite;

impl FragmentProgram for Composite {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let u: PostUniform = res.uniform();
        let src = res.texture(0);
        let p = fragment.pixel.as_ivec2();
        let mut color = src.load(p.x, p.y, 0).truncate();
        if u.bloom_exposure[0] > 0.5 {
            let glow: Vec3 = BLOOM_TAPS
                .iter()
                .map(|&(dx, dy, w)| {
                    let q = p + IVec2::new(dx, dy);
                    bright_part(src.load(q.x, q.y, 0).truncate(), u.bloom_exposure[1]) * w
                })
                .sum();
            color += glow * u.bloom_exposure[2];
        }
        color *= u.bloom_exposure[3];
        let operator = match u.tone_map[0] as u32 {
            0 => ToneMapOperator::None,
            1 => ToneMapOperator::Reinhard,
            _ => ToneMapOperator::Aces,
        };
        Some(FragmentOutput::single(tone_map(color, operator).extend(1.0)))
    }
}

/// Owns the HDR target the lighting and forward passes render into.
pub struct PostProcessingRenderer {
    target: RenderTarget,
    program: ProgramId,
}

impl PostProcessingRenderer {
    pub fn new(ctx: &mut GraphicsContext, size: Extent2d) -> Result<Self, DeviceError> {
        let program = ctx.create_render_program(RenderProgramDescriptor {
            label: "post-processing-composite",
            wgsl: POST_PROCESSING_SHADER_SOURCE,
            geometry: GeometryKind::FullScreen,
            textures: vec![TextureBindingKind::Color2d],
            fragment: Some(Arc::new(Composite)),
        })?;
        let target = ctx.create_target(&TargetDescriptor {
            label: "post-processing".into(),
            size,
            color: vec![TextureFormat::Rgba16Float],
            depth: true,
        })?;
        Ok(Self { target, program })
    }

    /// Bind the HDR target for drawing.
    pub fn enable_input(&self, ctx: &mut GraphicsContext) -> Result<(), DeviceError> {
        ctx.bind_target(self.target.id())
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Composite the HDR target into `output`.
    pub fn draw(
        &self,
        ctx: &mut GraphicsContext,
        output: TargetId,
        settings: &PostProcessingSettings,
    ) -> Result<(), DeviceError> {
        ctx.bind_target(output)?;
        let uniform = PostUniform::new(settings);
        let sources = [TextureSource::TargetColor(self.target.id(), 0)];
        ctx.draw(&DrawCall::full_screen(
            self.program,
            bytemuck::bytes_of(&uniform),
            &sources,
        ))
    }
}

pub const POST_PROCESSING_SHADER_SOURCE: &str = r#"
struct PostParams {
    bloom_exposure: vec4<f32>,
    tone_map: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> params: PostParams;
@group(1) @binding(1)
var hdr: texture_2d<f32>;

const LUMA: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);

fn load_clamped(p: vec2<i32>) -> vec3<f32> {
    let size = vec2<i32>(textureDimensions(hdr));
    return textureLoad(hdr, clamp(p, vec2<i32>(0), size - 1), 0).rgb;
}

fn bright_part(c: vec3<f32>) -> vec3<f32> {
    let luma = dot(c, LUMA);
    return c * (max(luma - params.bloom_exposure.y, 0.0) / max(luma, 1e-4));
}

fn tone_map(c: vec3<f32>) -> vec3<f32> {
    let op = u32(params.tone_map.x);
    if op == 0u {
        return clamp(c, vec3<f32>(0.0), vec3<f32>(1.0));
    }
    if op == 1u {
        return c / (vec3<f32>(1.0) + c);
    }
    let x = max(c, vec3<f32>(0.0));
    return clamp((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = vec2<i32>(floor(in.clip_position.xy));
    var color = load_clamped(p);
    if params.bloom_exposure.x > 0.5 {
        var glow = bright_part(load_clamped(p)) * 0.2;
        for (var i = 1; i <= 2; i++) {
            let w = select(0.08, 0.12, i == 1);
            glow += bright_part(load_clamped(p + vec2<i32>(i, 0))) * w;
            glow += bright_part(load_clamped(p - vec2<i32>(i, 0))) * w;
            glow += bright_part(load_clamped(p + vec2<i32>(0, i))) * w;
            glow += bright_part(load_clamped(p - vec2<i32>(0, i))) * w;
        }
        color += glow * params.bloom_exposure.z;
    }
    color *= params.bloom_exposure.w;
    return vec4<f32>(tone_map(color), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_map_operators() {
        let c = Vec3::new(0.5, 1.0, 4.0);
        assert_eq!(tone_map(c, ToneMapOperator::None), Vec3::new(0.5, 1.0, 1.0));
        assert_eq!(tone_map(c, ToneMapOperator::Reinhard), Vec3::new(1.0 / 3.0, 0.5, 0.8));
        let aces = tone_map(c, ToneMapOperator::Aces);
        assert!(aces.x < aces.y && aces.y <= aces.z && aces.z <= 1.0);
        assert_eq!(tone_map(Vec3::ZERO, ToneMapOperator::Aces), Vec3::ZERO);
    }

    #[test]
    fn test_bright_part_is_zero_below_threshold() {
        assert_eq!(bright_part(Vec3::splat(0.5), 1.0), Vec3::ZERO);
        assert!(bright_part(Vec3::splat(4.0), 1.0).x > 0.0);
    }

    #[test]
    fn test_bloom_taps_sum_to_one() {
        let sum: f32 = BLOOM_TAPS.iter().map(|t| t.2).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_composite_without_bloom_is_tone_mapped_input() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let post = PostProcessingRenderer::new(&mut ctx, Extent2d::new(4, 4)).unwrap();
        post.enable_input(&mut ctx).unwrap();
        ctx.set_clear_color(Vec4::new(3.0, 1.0, 0.0, 1.0));
        ctx.clear(true, true).unwrap();

        let settings = PostProcessingSettings {
            bloom: false,
            exposure: 1.0,
            tone_map: ToneMapOperator::Reinhard,
            ..Default::default()
        };
        post.draw(&mut ctx, TargetId::SURFACE, &settings).unwrap();
        let out = ctx.read_color(TargetId::SURFACE, 0).unwrap();
        assert!(out.texels.iter().all(|t| *t == Vec4::new(0.75, 0.5, 0.0, 1.0)));
    }
}
