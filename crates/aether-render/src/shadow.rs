//! Depth-only shadow maps, one per shadow-casting light.

use aether_lighting::{LightId, SceneLight, ShadowProjections};
use glam::Mat4;
use rustc_hash::FxHashMap;

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::device::DeviceError;
use crate::program::{GeometryKind, RenderProgramDescriptor};
use crate::resource::{Extent2d, ProgramId, RenderTarget, TargetDescriptor};
use crate::scene::{Entity, ShadowPass};

/// A light's depth target and the view-projection it was rendered with.
pub struct ShadowMap {
    pub target: RenderTarget,
    pub view_proj: Mat4,
}

/// What the shadow pass needs from one scene.
pub struct ShadowCasters<'a> {
    pub camera: &'a Camera,
    pub lights: &'a [SceneLight<'a>],
    pub entities: &'a [Box<dyn Entity>],
}

/// Owns shadow maps keyed by [`LightId`].
///
/// Maps are created the first frame a light casts, reused while it keeps
/// casting and released once it stops.
pub struct ShadowRenderer {
    maps: FxHashMap<LightId, ShadowMap>,
    projections: ShadowProjections,
    resolution: u32,
    distance: f32,
    depth_program: ProgramId,
}

impl ShadowRenderer {
    pub fn new(
        ctx: &mut GraphicsContext,
        resolution: u32,
        distance: f32,
        projections: ShadowProjections,
    ) -> Result<Self, DeviceError> {
        let depth_program = ctx.create_render_program(RenderProgramDescriptor {
            label: "shadow-depth",
            wgsl: "",
            geometry: GeometryKind::Mesh,
            textures: Vec::new(),
            fragment: None,
        })?;
        Ok(Self {
            maps: FxHashMap::default(),
            projections,
            resolution: resolution.max(1),
            distance,
            depth_program,
        })
    }

    /// Render every projectable shadow caster. Expects depth test on and
    /// colour writes off. Returns the number of maps rendered.
    pub fn render(
        &mut self,
        ctx: &mut GraphicsContext,
        scenes: &[ShadowCasters<'_>],
    ) -> Result<usize, DeviceError> {
        let mut live = Vec::new();
        for scene in scenes {
            let frustum = scene.camera.shadow_frustum(self.distance);
            for light in scene.lights {
                let Some(view_proj) = self.projections.project(light.light, &frustum, self.resolution)
                else {
                    continue;
                };
                let map = match self.maps.entry(light.id) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        log::debug!("creating shadow map for light {:?}", light.id);
                        let target = ctx.create_target(&TargetDescriptor {
                            label: format!("shadow-map-{}", light.id.0),
                            size: Extent2d::new(self.resolution, self.resolution),
                            color: Vec::new(),
                            depth: true,
                        })?;
                        e.insert(ShadowMap {
                            target,
                            view_proj,
                        })
                    }
                };
                map.view_proj = view_proj;
                ctx.bind_target(map.target.id())?;
                ctx.clear(false, true)?;

                let pass = ShadowPass {
                    light: *light,
                    view_proj,
                    program: self.depth_program,
                };
                for entity in scene.entities {
                    entity.draw_shadow(ctx, &pass)?;
                }
                live.push(light.id);
            }
        }
        self.maps.retain(|id, _| live.contains(id));
        Ok(live.len())
    }

    pub fn set_projections(&mut self, projections: ShadowProjections) {
        self.projections = projections;
    }

    /// Map rendered for `id` this frame.
    pub fn map(&self, id: LightId) -> Option<&ShadowMap> {
        self.maps.get(&id)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use aether_lighting::{DirectionalLight, Light, PointLight};
    use glam::Vec3;

    use super::*;
    use crate::gbuffer::SurfaceMaterial;
    use crate::mesh::MeshData;
    use crate::scene::MeshEntity;

    fn setup() -> (GraphicsContext, ShadowRenderer) {
        let mut ctx = GraphicsContext::headless(Extent2d::new(8, 8));
        let shadows = ShadowRenderer::new(&mut ctx, 32, 50.0, ShadowProjections::default()).unwrap();
        ctx.set_depth_test(true);
        ctx.set_color_write(false);
        (ctx, shadows)
    }

    #[test]
    fn test_maps_follow_casting_lights() {
        let (mut ctx, mut shadows) = setup();
        let camera = Camera::looking_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
        let sun = Light::from(DirectionalLight::new(Vec3::new(0.2, -1.0, 0.1), 1.0));
        let lamp = Light::from(PointLight {
            casts_shadow: true,
            ..Default::default()
        });
        let mesh = ctx.create_mesh(&MeshData::cube()).unwrap();
        let entities: Vec<Box<dyn Entity>> = vec![Box::new(MeshEntity::new(
            mesh,
            Mat4::IDENTITY,
            SurfaceMaterial::default(),
        ))];

        let lights = [
            SceneLight { id: LightId(1), light: &sun },
            SceneLight { id: LightId(2), light: &lamp },
        ];
        let scenes = [ShadowCasters {
            camera: &camera,
            lights: &lights,
            entities: &entities,
        }];
        // No point projection is registered, so only the sun renders.
        assert_eq!(shadows.render(&mut ctx, &scenes).unwrap(), 1);
        let map = shadows.map(LightId(1)).unwrap();
        let depth = ctx.read_depth(map.target.id()).unwrap();
        assert!(depth.texels.iter().any(|t| t.x > 0.0));
        assert!(shadows.map(LightId(2)).is_none());

        let scenes = [ShadowCasters {
            camera: &camera,
            lights: &[],
            entities: &entities,
        }];
        assert_eq!(shadows.render(&mut ctx, &scenes).unwrap(), 0);
        assert_eq!(shadows.map_count(), 0);
        assert_eq!(ctx.maintain(), 1);
    }

    #[test]
    fn test_map_is_reused_across_frames() {
        let (mut ctx, mut shadows) = setup();
        let camera = Camera::default();
        let sun = Light::from(DirectionalLight::default());
        let lights = [SceneLight { id: LightId(7), light: &sun }];
        let scenes = [ShadowCasters {
            camera: &camera,
            lights: &lights,
            entities: &[],
        }];
        shadows.render(&mut ctx, &scenes).unwrap();
        let first = shadows.map(LightId(7)).unwrap().target.id();
        shadows.render(&mut ctx, &scenes).unwrap();
        assert_eq!(shadows.map(LightId(7)).unwrap().target.id(), first);
    }
}
