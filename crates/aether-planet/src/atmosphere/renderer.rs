//! Per-planet sky and aerial perspective compositor.

use std::sync::Arc;

use aether_render::{
    BlendEquation, BlendFactor, BlendFunction, CLEAR_DEPTH, DrawCall, ForwardPass, Fragment,
    FragmentOutput, FragmentProgram, GeometryKind, GraphicsContext, ProgramId,
    RenderProgramDescriptor, ShaderResources, TextureBindingKind, TextureSource,
    reconstruct_world_position,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use super::precompute::AtmosphereLuts;
use super::scatter::{AtmosphereParams, PrecomputeUniform, ScatteringModel};
use crate::error::AtmosphereError;

/// Planet placement and lighting for one atmosphere draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanetView {
    pub center: Vec3,
    /// World-space radius of the ground sphere.
    pub radius: f32,
    /// Unit direction towards the sun.
    pub sun_direction: Vec3,
    pub sun_intensity: f32,
}

/// Compositor uniform block, 224 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct AtmosphereUniform {
    pub model: PrecomputeUniform,
    pub inv_view_proj: [[f32; 4]; 4],
    /// Camera world position; w is kilometres per world unit.
    pub camera_world: [f32; 4],
    /// Planet centre and world radius.
    pub planet: [f32; 4],
    /// Direction towards the sun and its intensity.
    pub sun: [f32; 4],
}

static_assertions::assert_eq_size!(AtmosphereUniform, [u8; 224]);

impl AtmosphereUniform {
    pub fn new(
        params: &AtmosphereParams,
        luts: &AtmosphereLuts,
        pass: &ForwardPass,
        planet: &PlanetView,
    ) -> Self {
        let km_per_unit = params.bottom_radius / planet.radius.max(f32::EPSILON);
        Self {
            model: PrecomputeUniform::new(params, luts.dimensions(), false),
            inv_view_proj: pass.inverse_view_proj.to_cols_array_2d(),
            camera_world: pass.camera_position.extend(km_per_unit).to_array(),
            planet: planet.center.extend(planet.radius).to_array(),
            sun: planet
                .sun_direction
                .normalize_or_zero()
                .extend(planet.sun_intensity)
                .to_array(),
        }
    }
}

struct Composite;

impl FragmentProgram for Composite {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let u: AtmosphereUniform = res.uniform();
        let model = ScatteringModel::from_uniform(&u.model);
        let inv_view_proj = Mat4::from_cols_array_2d(&u.inv_view_proj);
        let camera = Vec4::from(u.camera_world).truncate();
        let km_per_unit = u.camera_world[3];
        let center = Vec4::from(u.planet).truncate();
        let sun = Vec4::from(u.sun);

        let p = fragment.pixel.as_ivec2();
        let size = res.target_size;
        let depth = res.texture(0).load(p.x, p.y, 0).x;
        let near = reconstruct_world_position(p, size, 1.0, inv_view_proj);
        let view = (near - camera).normalize_or_zero();
        if view == Vec3::ZERO {
            return None;
        }
        let surface = (depth > CLEAR_DEPTH).then(|| {
            reconstruct_world_position(p, size, depth, inv_view_proj).distance(camera) * km_per_unit
        });

        let (radiance, attenuation) = model.sky_radiance(
            res.texture(1),
            res.texture(2),
            (camera - center) * km_per_unit,
            view,
            surface,
            sun.truncate(),
        )?;
        let alpha = if surface.is_some() {
            attenuation.dot(Vec3::ONE) / 3.0
        } else {
            0.0
        };
        Some(FragmentOutput::single((radiance * sun.w).extend(alpha)))
    }
}

/// Composites sky and aerial perspective for one planet.
///
/// Lookup tables come from [`AtmoPreComputer`](crate::AtmoPreComputer) and
/// may be shared with other planets using the same parameters.
pub struct Atmosphere {
    params: AtmosphereParams,
    luts: Option<Arc<AtmosphereLuts>>,
    program: ProgramId,
}

impl Atmosphere {
    pub fn new(ctx: &mut GraphicsContext, params: AtmosphereParams) -> Result<Self, AtmosphereError> {
        let program = ctx.create_render_program(RenderProgramDescriptor {
            label: "atmosphere-composite",
            wgsl: ATMOSPHERE_SHADER_SOURCE,
            geometry: GeometryKind::FullScreen,
            textures: vec![
                TextureBindingKind::Depth,
                TextureBindingKind::Color2d,
                TextureBindingKind::Color3d,
            ],
            fragment: Some(Arc::new(Composite)),
        })?;
        Ok(Self {
            params,
            luts: None,
            program,
        })
    }

    pub fn params(&self) -> &AtmosphereParams {
        &self.params
    }

    pub fn luts(&self) -> Option<&Arc<AtmosphereLuts>> {
        self.luts.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.luts.is_some()
    }

    pub(crate) fn set_luts(&mut self, luts: Arc<AtmosphereLuts>) {
        self.luts = Some(luts);
    }

    /// Blend sky and aerial perspective over the bound forward target.
    /// Depth test and blend state are restored afterwards.
    pub fn draw(
        &self,
        ctx: &mut GraphicsContext,
        pass: &ForwardPass,
        planet: &PlanetView,
    ) -> Result<(), AtmosphereError> {
        let luts = self.luts.as_ref().ok_or(AtmosphereError::NotReady)?;
        let uniform = AtmosphereUniform::new(&self.params, luts, pass, planet);
        let sources = [
            pass.scene_depth,
            TextureSource::Texture(luts.transmittance()),
            TextureSource::Texture(luts.inscatter()),
        ];

        let previous = *ctx.state();
        ctx.set_depth_test(false);
        ctx.set_blend(true);
        ctx.set_blend_equation(BlendEquation::Add);
        ctx.set_blend_function(BlendFunction {
            src: BlendFactor::One,
            dst: BlendFactor::SrcAlpha,
        });
        let result = ctx.draw(&DrawCall::full_screen(
            self.program,
            bytemuck::bytes_of(&uniform),
            &sources,
        ));
        ctx.set_blend_function(previous.blend_function);
        ctx.set_blend_equation(previous.blend_equation);
        ctx.set_blend(previous.blend);
        ctx.set_depth_test(previous.depth_test);
        Ok(result?)
    }
}

pub const ATMOSPHERE_SHADER_SOURCE: &str = concat!(
    r#"
struct Composite {
    radii: vec4<f32>,
    rayleigh: vec4<f32>,
    mie: vec4<f32>,
    lut_size: vec4<u32>,
    inscatter_size: vec4<u32>,
    samples: vec4<u32>,
    flags: vec4<u32>,
    inv_view_proj: mat4x4<f32>,
    camera_world: vec4<f32>,
    planet: vec4<f32>,
    sun: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> atmo: Composite;
@group(1) @binding(1)
var scene_depth: texture_depth_2d;
@group(1) @binding(2)
var transmittance_lut: texture_2d<f32>;
@group(1) @binding(3)
var inscatter_lut: texture_3d<f32>;

fn world_at(p: vec2<i32>, size: vec2<f32>, depth: f32) -> vec3<f32> {
    let uv = (vec2<f32>(p) + 0.5) / size;
    let w = atmo.inv_view_proj * vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    return w.xyz / w.w;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = vec2<i32>(floor(in.clip_position.xy));
    let size = vec2<f32>(textureDimensions(scene_depth));
    let depth = textureLoad(scene_depth, p, 0);
    let camera = atmo.camera_world.xyz;
    let scale = atmo.camera_world.w;
    let view = normalize(world_at(p, size, 1.0) - camera);
    let has_surface = depth > 0.0;
    var t = 0.0;
    if has_surface {
        t = distance(world_at(p, size, depth), camera) * scale;
    }

    var x = (camera - atmo.planet.xyz) * scale;
    var r = length(x);
    var mu = dot(x, view) / r;
    let rt = atmo.radii.y;
    if r > rt {
        let disc = r * r * mu * mu - r * r + rt * rt;
        if disc < 0.0 {
            discard;
        }
        let d = -r * mu - sqrt(disc);
        if d <= 0.0 {
            discard;
        }
        x += d * view;
        t -= d;
        mu = (r * mu + d) / rt;
        r = rt;
    }
    if has_surface && t <= 0.0 {
        discard;
    }

    let sun = atmo.sun.xyz;
    let nu = dot(view, sun);
    let mu_s = dot(x, sun) / r;
    var insc = max(inscatter4(inscatter_lut, r, mu, mu_s, nu), vec4<f32>(0.0));
    var attenuation = vec3<f32>(1.0);
    if has_surface {
        let x0 = x + t * view;
        let r0 = length(x0);
        let mu0 = dot(x0, view) / r0;
        let mu_s0 = dot(x0, sun) / r0;
        attenuation = transmittance_between(transmittance_lut, r, mu, t);
        if r0 > atmo.radii.x + 0.01 {
            let far = inscatter4(inscatter_lut, r0, mu0, mu_s0, nu);
            insc = max(insc - attenuation.rgbr * far, vec4<f32>(0.0));
        }
    }
    let radiance = max(insc.rgb * rayleigh_phase(nu) + mie_from_combined(insc) * mie_phase(nu), vec3<f32>(0.0));
    var alpha = 0.0;
    if has_surface {
        alpha = dot(attenuation, vec3<f32>(1.0)) / 3.0;
    }
    return vec4<f32>(radiance * atmo.sun.w, alpha);
}
"#,
    scattering_wgsl!()
);

#[cfg(test)]
mod tests {
    use aether_render::{Camera, Extent2d, TargetId};

    use super::*;

    fn pass(size: Extent2d) -> ForwardPass {
        let camera = Camera::default();
        ForwardPass {
            view_proj: camera.view_projection_matrix(),
            inverse_view_proj: camera.inverse_view_projection_matrix(),
            camera_position: camera.position,
            camera,
            scene_depth: TextureSource::TargetDepth(TargetId::SURFACE),
            size,
        }
    }

    #[test]
    fn test_draw_without_tables_is_not_ready() {
        let size = Extent2d::new(4, 4);
        let mut ctx = GraphicsContext::headless(size);
        let atmosphere = Atmosphere::new(&mut ctx, AtmosphereParams::earth()).unwrap();
        let planet = PlanetView {
            center: Vec3::new(0.0, -1000.0, 0.0),
            radius: 1000.0,
            sun_direction: Vec3::Y,
            sun_intensity: 1.0,
        };
        assert!(!atmosphere.is_ready());
        let draws = ctx.device_stats().draws;
        assert!(matches!(
            atmosphere.draw(&mut ctx, &pass(size), &planet),
            Err(AtmosphereError::NotReady)
        ));
        assert_eq!(ctx.device_stats().draws, draws);
    }

    #[test]
    fn test_programs_are_shared_between_planets() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let a = Atmosphere::new(&mut ctx, AtmosphereParams::earth()).unwrap();
        let b = Atmosphere::new(&mut ctx, AtmosphereParams::default()).unwrap();
        assert_eq!(a.program, b.program);
    }
}
