//! Per-light accumulation from the Gbuffer into the HDR target.
//!
//! Point lights rasterize a sphere bounding their radius, so only covered
//! pixels are shaded. Directional lights cover the whole screen. Both are
//! drawn with additive blending and write alpha 0.

use std::sync::Arc;

use aether_lighting::{Light, LightKind, LightUniform, SceneLight, attenuation};
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Mat4, Vec2, Vec3, Vec4};

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::device::{CLEAR_DEPTH, DeviceError, DrawCall, TextureSource};
use crate::gbuffer::Gbuffer;
use crate::mesh::MeshData;
use crate::program::{
    DrawTransform, Fragment, FragmentOutput, FragmentProgram, GeometryKind,
    RenderProgramDescriptor, ShaderResources, TextureBindingKind,
};
use crate::resource::{Extent2d, Mesh, ProgramId, RenderTarget, TargetDescriptor};
use crate::shadow::ShadowMap;
use crate::texture_data::TextureData;

/// Inflates the tessellated sphere so it encloses the true light radius.
const VOLUME_SCALE: f32 = 1.05;

/// Uniform block of both light volume programs, 192 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightingUniform {
    pub light: LightUniform,
    pub inv_view_proj: [[f32; 4]; 4],
    /// xyz = camera position.
    pub camera_pos: [f32; 4],
}

static_assertions::assert_eq_size!(LightingUniform, [u8; 192]);

/// World position of pixel `p` at reverse-Z `depth`.
pub fn reconstruct_world_position(
    p: IVec2,
    size: Extent2d,
    depth: f32,
    inv_view_proj: Mat4,
) -> Vec3 {
    let uv = (p.as_vec2() + 0.5) / Vec2::new(size.width as f32, size.height as f32);
    let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = inv_view_proj * ndc;
    world.truncate() / world.w
}

/// Fraction of four shadow-map taps around `world` that see the light.
fn shadow_factor(u: &LightUniform, shadow: &TextureData, world: Vec3) -> f32 {
    let clip = u.shadow_matrix() * world.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if uv.min_element() < 0.0 || uv.max_element() > 1.0 || ndc.z < 0.0 {
        return 1.0;
    }
    let res = Vec2::new(shadow.width as f32, shadow.height as f32);
    let base = (uv * res - 0.5).floor().as_ivec2();
    let bias = u.params[2];
    let lit = [IVec2::ZERO, IVec2::X, IVec2::Y, IVec2::ONE]
        .iter()
        .filter(|o| {
            let q = base + **o;
            ndc.z + bias >= shadow.load(q.x, q.y, 0).x
        })
        .count();
    lit as f32 / 4.0
}

struct LightVolumeFragment;

impl FragmentProgram for LightVolumeFragment {
    fn shade(&self, fragment: &Fragment, res: &ShaderResources<'_>) -> Option<FragmentOutput> {
        let p = fragment.pixel.as_ivec2();
        let depth = res.texture(3).load(p.x, p.y, 0).x;
        if depth <= CLEAR_DEPTH {
            return None;
        }
        let u: LightingUniform = res.uniform();
        let light = u.light;
        let world = reconstruct_world_position(
            p,
            res.target_size,
            depth,
            Mat4::from_cols_array_2d(&u.inv_view_proj),
        );

        let albedo = res.texture(0).load(p.x, p.y, 0).truncate();
        let normal_rough = res.texture(1).load(p.x, p.y, 0);
        let n = normal_rough.truncate().normalize_or_zero();
        let roughness = normal_rough.w;
        let metalness = res.texture(2).load(p.x, p.y, 0).x;

        let vector = Vec3::from_slice(&light.vector_kind[..3]);
        let (l, falloff) = match light.kind() {
            LightKind::Directional => (-vector.normalize_or_zero(), 1.0),
            LightKind::Point => {
                let to_light = vector - world;
                let d = to_light.length();
                (to_light / d.max(1e-6), attenuation(d, light.params[0]))
            }
        };
        let n_dot_l = n.dot(l).max(0.0);
        if n_dot_l <= 0.0 || falloff <= 0.0 {
            return Some(FragmentOutput::single(Vec4::ZERO));
        }

        let v = (Vec3::from_slice(&u.camera_pos[..3]) - world).normalize_or_zero();
        let h = (l + v).normalize_or_zero();
        let shininess = 256.0 + (4.0 - 256.0) * roughness;
        let spec_color = Vec3::splat(0.04).lerp(albedo, metalness);
        let specular = spec_color * n.dot(h).max(0.0).powf(shininess) * (1.0 - roughness);
        let diffuse = albedo * (1.0 - metalness);

        let visibility = if light.has_shadow() {
            shadow_factor(&light, res.texture(4), world)
        } else {
            1.0
        };
        let radiance = Vec3::from_slice(&light.radiance_pad[..3]);
        let color = (diffuse + specular) * radiance * n_dot_l * falloff * visibility;
        Some(FragmentOutput::single(color.extend(0.0)))
    }
}

/// Accumulates each light's contribution into the bound target.
pub struct LightVolumeRenderer {
    point_program: ProgramId,
    directional_program: ProgramId,
    sphere: Mesh,
    // Bound in the shadow slot when a light has no map.
    no_shadow: RenderTarget,
}

impl LightVolumeRenderer {
    pub fn new(ctx: &mut GraphicsContext) -> Result<Self, DeviceError> {
        let textures = vec![
            TextureBindingKind::Color2d,
            TextureBindingKind::Color2d,
            TextureBindingKind::Color2d,
            TextureBindingKind::Depth,
            TextureBindingKind::Depth,
        ];
        let fragment: Arc<dyn FragmentProgram> = Arc::new(LightVolumeFragment);
        let point_program = ctx.create_render_program(RenderProgramDescriptor {
            label: "light-volume-point",
            wgsl: LIGHT_VOLUME_SHADER_SOURCE,
            geometry: GeometryKind::Mesh,
            textures: textures.clone(),
            fragment: Some(fragment.clone()),
        })?;
        let directional_program = ctx.create_render_program(RenderProgramDescriptor {
            label: "light-volume-directional",
            wgsl: LIGHT_VOLUME_SHADER_SOURCE,
            geometry: GeometryKind::FullScreen,
            textures,
            fragment: Some(fragment),
        })?;
        let sphere = ctx.create_mesh(&MeshData::uv_sphere(24, 16))?;
        let no_shadow = ctx.create_target(&TargetDescriptor {
            label: "light-volume-no-shadow".into(),
            size: Extent2d::new(1, 1),
            color: Vec::new(),
            depth: true,
        })?;
        Ok(Self {
            point_program,
            directional_program,
            sphere,
            no_shadow,
        })
    }

    /// Shade `light` over the Gbuffer into the currently bound target.
    /// Blend, cull and depth state are the caller's.
    pub fn draw(
        &self,
        ctx: &mut GraphicsContext,
        gbuffer: &Gbuffer,
        camera: &Camera,
        light: &SceneLight<'_>,
        shadow: Option<&ShadowMap>,
    ) -> Result<(), DeviceError> {
        let view_proj = camera.view_projection_matrix();
        let uniform = LightingUniform {
            light: light
                .light
                .to_uniform(shadow.map(|m| (m.view_proj, m.target.size().width))),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
        };
        let g = gbuffer.target().id();
        let shadow_target = shadow.map_or(self.no_shadow.id(), |m| m.target.id());
        let sources = [
            TextureSource::TargetColor(g, 0),
            TextureSource::TargetColor(g, 1),
            TextureSource::TargetColor(g, 2),
            TextureSource::TargetDepth(g),
            TextureSource::TargetDepth(shadow_target),
        ];
        let bytes = bytemuck::bytes_of(&uniform);
        match light.light {
            Light::Point(point) => {
                let model = point.volume_transform() * Mat4::from_scale(Vec3::splat(VOLUME_SCALE));
                ctx.draw(&DrawCall::mesh(
                    self.point_program,
                    &self.sphere,
                    DrawTransform::new(model, view_proj),
                    bytes,
                    &sources,
                ))
            }
            Light::Directional(_) => ctx.draw(&DrawCall::full_screen(
                self.directional_program,
                bytes,
                &sources,
            )),
        }
    }
}

pub const LIGHT_VOLUME_SHADER_SOURCE: &str = r#"
struct Light {
    vector_kind: vec4<f32>,
    radiance_pad: vec4<f32>,
    params: vec4<f32>,
    shadow_view_proj: mat4x4<f32>,
};

struct Lighting {
    light: Light,
    inv_view_proj: mat4x4<f32>,
    camera_pos: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> u: Lighting;
@group(1) @binding(1)
var albedo_tex: texture_2d<f32>;
@group(1) @binding(2)
var normal_tex: texture_2d<f32>;
@group(1) @binding(3)
var material_tex: texture_2d<f32>;
@group(1) @binding(4)
var depth_tex: texture_depth_2d;
@group(1) @binding(5)
var shadow_tex: texture_depth_2d;

fn attenuation(d: f32, radius: f32) -> f32 {
    if d >= radius {
        return 0.0;
    }
    let ratio = d / radius;
    let t = max(1.0 - ratio * ratio, 0.0);
    return t * t / (d * d + 1.0);
}

fn shadow_factor(world: vec3<f32>) -> f32 {
    let clip = u.light.shadow_view_proj * vec4<f32>(world, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if min(uv.x, uv.y) < 0.0 || max(uv.x, uv.y) > 1.0 || ndc.z < 0.0 {
        return 1.0;
    }
    let size = vec2<i32>(textureDimensions(shadow_tex));
    let base = vec2<i32>(floor(uv * vec2<f32>(size) - 0.5));
    var lit = 0.0;
    for (var i = 0; i < 4; i++) {
        let q = clamp(base + vec2<i32>(i & 1, i >> 1), vec2<i32>(0), size - 1);
        if ndc.z + u.light.params.z >= textureLoad(shadow_tex, q, 0) {
            lit += 1.0;
        }
    }
    return lit / 4.0;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = vec2<i32>(floor(in.clip_position.xy));
    let depth = textureLoad(depth_tex, p, 0);
    if depth <= 0.0 {
        discard;
    }
    let size = vec2<f32>(textureDimensions(depth_tex));
    let uv = (vec2<f32>(p) + 0.5) / size;
    let h = u.inv_view_proj * vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = h.xyz / h.w;

    let albedo = textureLoad(albedo_tex, p, 0).rgb;
    let nr = textureLoad(normal_tex, p, 0);
    let n = normalize(nr.xyz);
    let roughness = nr.w;
    let metalness = textureLoad(material_tex, p, 0).x;

    var l: vec3<f32>;
    var falloff = 1.0;
    if u.light.vector_kind.w < 0.5 {
        l = -normalize(u.light.vector_kind.xyz);
    } else {
        let to_light = u.light.vector_kind.xyz - world;
        let d = length(to_light);
        l = to_light / max(d, 1e-6);
        falloff = attenuation(d, u.light.params.x);
    }
    let n_dot_l = max(dot(n, l), 0.0);
    if n_dot_l <= 0.0 || falloff <= 0.0 {
        return vec4<f32>(0.0);
    }

    let v = normalize(u.camera_pos.xyz - world);
    let hv = normalize(l + v);
    let shininess = mix(256.0, 4.0, roughness);
    let spec_color = mix(vec3<f32>(0.04), albedo, metalness);
    let specular = spec_color * pow(max(dot(n, hv), 0.0), shininess) * (1.0 - roughness);
    let diffuse = albedo * (1.0 - metalness);

    var visibility = 1.0;
    if u.light.params.y > 0.5 {
        visibility = shadow_factor(world);
    }
    let color = (diffuse + specular) * u.light.radiance_pad.rgb * n_dot_l * falloff * visibility;
    return vec4<f32>(color, 0.0);
}
"#;

#[cfg(test)]
mod tests {
    use aether_config::RenderConfig;
    use aether_lighting::{DirectionalLight, LightId, PointLight};

    use super::*;
    use crate::gbuffer::SurfaceMaterial;
    use crate::resource::TextureFormat;
    use crate::scene::GeometryPass;
    use crate::state::{BlendEquation, BlendFunction, CullFace};

    const SIZE: Extent2d = Extent2d {
        width: 16,
        height: 16,
    };

    /// Gbuffer holding a ground plane seen from above, plus an HDR output.
    fn scene() -> (GraphicsContext, Gbuffer, Camera, RenderTarget) {
        let mut ctx = GraphicsContext::headless(SIZE);
        let gbuffer = Gbuffer::new(&mut ctx, SIZE, &RenderConfig::default()).unwrap();
        let camera = Camera {
            aspect_ratio: 1.0,
            ..Camera::looking_at(Vec3::new(0.0, 5.0, 0.01), Vec3::ZERO, Vec3::Y)
        };
        let plane = ctx.create_mesh(&MeshData::plane()).unwrap();
        ctx.set_depth_test(true);
        gbuffer.enable(&mut ctx, true).unwrap();
        let pass = GeometryPass {
            view_proj: camera.view_projection_matrix(),
            camera: camera.clone(),
            surface_program: gbuffer.surface_program(),
        };
        pass.draw_mesh(
            &mut ctx,
            &plane,
            Mat4::from_scale(Vec3::splat(100.0)),
            &SurfaceMaterial::default(),
        )
        .unwrap();

        let out = ctx
            .create_target(&TargetDescriptor {
                label: "hdr".into(),
                size: SIZE,
                color: vec![TextureFormat::Rgba16Float],
                depth: false,
            })
            .unwrap();
        ctx.bind_target(out.id()).unwrap();
        ctx.set_clear_color(Vec4::ZERO);
        ctx.clear(true, false).unwrap();
        ctx.set_depth_test(false);
        ctx.set_blend(true);
        ctx.set_blend_equation(BlendEquation::Add);
        ctx.set_blend_function(BlendFunction::ADDITIVE);
        ctx.set_cull(true);
        ctx.set_cull_face(CullFace::Front);
        (ctx, gbuffer, camera, out)
    }

    #[test]
    fn test_lighting_uniform_layout() {
        assert_eq!(std::mem::size_of::<LightingUniform>(), 192);
    }

    #[test]
    fn test_reconstruct_inverts_projection() {
        let camera = Camera {
            aspect_ratio: 1.0,
            ..Camera::looking_at(Vec3::new(0.0, 5.0, 0.01), Vec3::ZERO, Vec3::Y)
        };
        let vp = camera.view_projection_matrix();
        let world = Vec3::new(0.3, 0.0, -0.2);
        let clip = vp * world.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let size = Extent2d::new(1000, 1000);
        let px = ((ndc.x * 0.5 + 0.5) * 1000.0 - 0.5).round() as i32;
        let py = ((0.5 - ndc.y * 0.5) * 1000.0 - 0.5).round() as i32;
        let back = reconstruct_world_position(IVec2::new(px, py), size, ndc.z, vp.inverse());
        assert!((back - world).length() < 0.01);
    }

    #[test]
    fn test_directional_light_lights_facing_surface() {
        let (mut ctx, gbuffer, camera, out) = scene();
        let volumes = LightVolumeRenderer::new(&mut ctx).unwrap();
        let sun = Light::from(DirectionalLight::new(Vec3::NEG_Y, 2.0));
        let light = SceneLight { id: LightId(1), light: &sun };
        volumes.draw(&mut ctx, &gbuffer, &camera, &light, None).unwrap();

        let color = ctx.read_color(out.id(), 0).unwrap();
        let center = color.load(8, 8, 0);
        // Diffuse albedo 0.8 at normal incidence.
        assert!(center.x >= 1.6 - 1e-3, "{center}");
        assert_eq!(center.w, 0.0);
    }

    #[test]
    fn test_point_light_is_bounded_by_radius() {
        let (mut ctx, gbuffer, camera, out) = scene();
        let volumes = LightVolumeRenderer::new(&mut ctx).unwrap();
        let lamp = Light::from(PointLight {
            position: Vec3::new(0.0, 0.5, 0.0),
            brightness: 5.0,
            radius: 1.0,
            ..Default::default()
        });
        let light = SceneLight { id: LightId(2), light: &lamp };
        volumes.draw(&mut ctx, &gbuffer, &camera, &light, None).unwrap();

        let color = ctx.read_color(out.id(), 0).unwrap();
        assert!(color.load(8, 8, 0).x > 0.0);
        assert_eq!(color.load(0, 0, 0), Vec4::ZERO);
    }
}
