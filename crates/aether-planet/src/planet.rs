//! A spherical planet body with an atmosphere.

use aether_render::{
    Camera, DeviceError, Entity, ForwardPass, GeometryPass, GraphicsContext, Mesh, MeshData,
    ShadowPass, SurfaceMaterial,
};
use glam::{Mat4, Vec3};
use tracing::warn;

use crate::atmosphere::{Atmosphere, AtmosphereParams, PlanetView};
use crate::error::AtmosphereError;

const SPHERE_SEGMENTS: u32 = 64;
const SPHERE_RINGS: u32 = 32;

/// Near plane as a fraction of the fitted far plane.
const NEAR_FAR_RATIO: f32 = 3e-6;

/// Planet surface plus its atmosphere compositor.
pub struct Planet {
    mesh: Mesh,
    center: Vec3,
    radius: f32,
    material: SurfaceMaterial,
    atmosphere: Atmosphere,
    sun_direction: Vec3,
    sun_intensity: f32,
}

impl Planet {
    pub fn new(
        ctx: &mut GraphicsContext,
        center: Vec3,
        radius: f32,
        params: AtmosphereParams,
    ) -> Result<Self, AtmosphereError> {
        let mesh = ctx.create_mesh(&MeshData::uv_sphere(SPHERE_SEGMENTS, SPHERE_RINGS))?;
        let atmosphere = Atmosphere::new(ctx, params)?;
        Ok(Self {
            mesh,
            center,
            radius,
            material: SurfaceMaterial {
                albedo: Vec3::new(0.45, 0.42, 0.38),
                roughness: 0.9,
                ..Default::default()
            },
            atmosphere,
            sun_direction: Vec3::Y,
            sun_intensity: 1.0,
        })
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Atmosphere thickness in world units.
    pub fn atmosphere_height(&self) -> f32 {
        let params = self.atmosphere.params();
        self.radius * (params.top_radius - params.bottom_radius) / params.bottom_radius
    }

    pub fn altitude(&self, position: Vec3) -> f32 {
        position.distance(self.center) - self.radius
    }

    pub fn atmosphere(&self) -> &Atmosphere {
        &self.atmosphere
    }

    pub fn atmosphere_mut(&mut self) -> &mut Atmosphere {
        &mut self.atmosphere
    }

    /// `to_sun` points from the planet towards the sun.
    pub fn set_sun(&mut self, to_sun: Vec3, intensity: f32) {
        self.sun_direction = to_sun.normalize_or(Vec3::Y);
        self.sun_intensity = intensity;
    }

    pub fn set_material(&mut self, material: SurfaceMaterial) {
        self.material = material;
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.center) * Mat4::from_scale(Vec3::splat(self.radius))
    }

    pub fn view(&self) -> PlanetView {
        PlanetView {
            center: self.center,
            radius: self.radius,
            sun_direction: self.sun_direction,
            sun_intensity: self.sun_intensity,
        }
    }

    /// Fit `camera`'s clip planes so the horizon and the far side of the
    /// atmosphere stay inside the frustum.
    pub fn fit_clip_planes(&self, camera: &mut Camera) {
        fit_clip_planes_to_planet(
            camera,
            self.center,
            self.radius,
            self.atmosphere_height(),
        );
    }
}

/// Far plane: ten times the distance to the horizon plus the horizon
/// distance of the atmosphere shell. Near plane follows at a fixed ratio.
pub fn fit_clip_planes_to_planet(camera: &mut Camera, center: Vec3, radius: f32, shell_height: f32) {
    let altitude = (camera.position.distance(center) - radius).max(0.0);
    let shell = radius + shell_height.max(0.0);
    let to_horizon = ((radius + altitude).powi(2) - radius * radius).max(0.0).sqrt();
    let beyond = (shell * shell - radius * radius).max(0.0).sqrt();
    camera.far = ((to_horizon + beyond) * 10.0).max(1.0);
    camera.near = camera.far * NEAR_FAR_RATIO;
}

impl Entity for Planet {
    fn draw_shadow(&self, ctx: &mut GraphicsContext, pass: &ShadowPass<'_>) -> Result<(), DeviceError> {
        pass.draw_mesh(ctx, &self.mesh, self.model_matrix())
    }

    fn draw(&self, ctx: &mut GraphicsContext, pass: &GeometryPass) -> Result<(), DeviceError> {
        pass.draw_mesh(ctx, &self.mesh, self.model_matrix(), &self.material)
    }

    fn draw_forward(&self, ctx: &mut GraphicsContext, pass: &ForwardPass) -> Result<(), DeviceError> {
        match self.atmosphere.draw(ctx, pass, &self.view()) {
            // Tables still precomputing; the sky stays empty until then.
            Ok(()) | Err(AtmosphereError::NotReady) => Ok(()),
            Err(AtmosphereError::Device(e)) => Err(e),
            Err(e) => {
                warn!("atmosphere draw skipped: {e}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aether_render::Extent2d;

    use super::*;

    #[test]
    fn test_clip_planes_grow_with_altitude() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(0.0, 1010.0, 0.0);
        fit_clip_planes_to_planet(&mut camera, Vec3::ZERO, 1000.0, 10.0);
        let low = camera.far;
        assert!(camera.near > 0.0 && camera.near < low);

        camera.position = Vec3::new(0.0, 3000.0, 0.0);
        fit_clip_planes_to_planet(&mut camera, Vec3::ZERO, 1000.0, 10.0);
        assert!(camera.far > low);
        assert!((camera.near / camera.far - NEAR_FAR_RATIO).abs() < 1e-9);
    }

    #[test]
    fn test_clip_planes_on_surface_cover_atmosphere() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(0.0, 0.0, -1000.0);
        fit_clip_planes_to_planet(&mut camera, Vec3::ZERO, 1000.0, 10.0);
        let beyond = (1010.0f32 * 1010.0 - 1000.0 * 1000.0).sqrt();
        assert!((camera.far - beyond * 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_atmosphere_height_scales_with_radius() {
        let mut ctx = GraphicsContext::headless(Extent2d::new(4, 4));
        let planet = Planet::new(&mut ctx, Vec3::ZERO, 636.0, AtmosphereParams::earth()).unwrap();
        assert!((planet.atmosphere_height() - 6.0).abs() < 1e-3);
        assert!((planet.altitude(Vec3::new(0.0, 646.0, 0.0)) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_forward_draw_before_tables_is_silent() {
        use aether_render::{TargetId, TextureSource};

        let size = Extent2d::new(4, 4);
        let mut ctx = GraphicsContext::headless(size);
        let planet = Planet::new(&mut ctx, Vec3::ZERO, 1000.0, AtmosphereParams::earth()).unwrap();
        let camera = Camera::default();
        let pass = ForwardPass {
            view_proj: camera.view_projection_matrix(),
            inverse_view_proj: camera.inverse_view_projection_matrix(),
            camera_position: camera.position,
            camera,
            scene_depth: TextureSource::TargetDepth(TargetId::SURFACE),
            size,
        };
        let draws = ctx.device_stats().draws;
        planet.draw_forward(&mut ctx, &pass).unwrap();
        assert_eq!(ctx.device_stats().draws, draws);
    }
}
