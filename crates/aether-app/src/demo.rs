//! Demo scene: one planet with an atmosphere, a sun and an orbiting camera.

use aether_config::{Config, PostProcessingSettings};
use aether_lighting::{DirectionalLight, Light, LightId, SceneLight};
use aether_planet::{AtmosphereError, AtmosphereParams, Planet};
use aether_render::{
    Camera, DeviceError, Entity, Extent2d, ForwardPass, FrameStats, GeometryPass, GraphicsContext,
    Scene,
};
use glam::{Quat, Vec3};

use crate::skybox::GradientSkybox;

const SUN_ID: LightId = LightId(1);

/// Sun radiance fed to the atmosphere per unit of light brightness.
const SKY_SUN_SCALE: f32 = 20.0;

/// Planet, sun and camera. The planet is drawn through the scene hooks so
/// the engine can hand its atmosphere to the precomputer between frames.
pub struct PlanetScene {
    camera: Camera,
    planet: Planet,
    skybox: GradientSkybox,
    entities: Vec<Box<dyn Entity>>,
    lights: Vec<(LightId, Light)>,
    post_processing: PostProcessingSettings,
    orbit_angle: f32,
    orbit_speed: f32,
    altitude: f32,
    last_stats: FrameStats,
}

impl PlanetScene {
    pub fn new(
        ctx: &mut GraphicsContext,
        config: &Config,
        size: Extent2d,
    ) -> Result<Self, AtmosphereError> {
        let planet_config = &config.planet;
        let radius = planet_config.radius.max(1.0);
        let planet = Planet::new(ctx, Vec3::ZERO, radius, AtmosphereParams::earth())?;
        let skybox = GradientSkybox::new(ctx)?;

        let mut sun = DirectionalLight::new(Vec3::new(-1.0, -1.0, -1.0), planet_config.sun_brightness);
        // A single sphere only shadows its own night side.
        sun.casts_shadow = false;

        let mut scene = Self {
            camera: Camera {
                aspect_ratio: size.aspect(),
                ..Camera::default()
            },
            planet,
            skybox,
            entities: Vec::new(),
            lights: vec![(SUN_ID, Light::Directional(sun))],
            post_processing: config.post_processing.clone(),
            orbit_angle: 0.0,
            orbit_speed: planet_config.orbit_speed,
            altitude: planet_config.camera_altitude.max(0.01),
            last_stats: FrameStats::default(),
        };
        scene.place_camera();
        scene.update_sun();
        Ok(scene)
    }

    /// Advance the orbit by `dt` seconds.
    pub fn update(&mut self, dt: f64) {
        self.orbit_angle = (self.orbit_angle + self.orbit_speed * dt as f32) % std::f32::consts::TAU;
        self.place_camera();
        self.update_sun();
    }

    pub fn set_aspect(&mut self, size: Extent2d) {
        self.camera
            .set_aspect_ratio(size.width as f32, size.height as f32);
    }

    pub fn planet(&self) -> &Planet {
        &self.planet
    }

    pub fn planet_mut(&mut self) -> &mut Planet {
        &mut self.planet
    }

    pub fn altitude(&self) -> f32 {
        self.planet.altitude(self.camera.position)
    }

    pub fn sun(&self) -> Option<&DirectionalLight> {
        self.lights.iter().find_map(|(_, light)| match light {
            Light::Directional(sun) => Some(sun),
            Light::Point(_) => None,
        })
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    /// Camera on a circular orbit, looking along the orbit at the horizon.
    fn place_camera(&mut self) {
        let center = self.planet.center();
        let distance = self.planet.radius() + self.altitude;
        let (sin, cos) = self.orbit_angle.sin_cos();
        let radial = Vec3::new(sin, 0.0, -cos);
        let tangent = Vec3::new(cos, 0.0, sin);
        let position = center + radial * distance;
        let aspect = self.camera.aspect_ratio;
        self.camera = Camera {
            aspect_ratio: aspect,
            ..Camera::looking_at(position, position + tangent, radial)
        };
        self.planet.fit_clip_planes(&mut self.camera);
        self.skybox.up = radial;
    }

    fn update_sun(&mut self) {
        if let Some(sun) = self.sun().cloned() {
            self.planet
                .set_sun(sun.to_light(), sun.brightness * SKY_SUN_SCALE);
        }
    }

    /// Rotate the sun about the planet's y axis.
    pub fn rotate_sun(&mut self, angle: f32) {
        for (_, light) in &mut self.lights {
            if let Light::Directional(sun) = light {
                let direction = Quat::from_rotation_y(angle) * sun.direction;
                sun.set_direction(direction);
            }
        }
        self.update_sun();
    }
}

impl Scene for PlanetScene {
    fn name(&self) -> &str {
        "planet"
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn entities(&self) -> &[Box<dyn Entity>] {
        &self.entities
    }

    fn lights(&self) -> Vec<SceneLight<'_>> {
        self.lights
            .iter()
            .map(|(id, light)| SceneLight { id: *id, light })
            .collect()
    }

    fn skybox(&self) -> Option<&dyn Entity> {
        Some(&self.skybox)
    }

    fn post_processing(&self) -> PostProcessingSettings {
        self.post_processing.clone()
    }

    fn draw(&mut self, ctx: &mut GraphicsContext, pass: &GeometryPass) -> Result<(), DeviceError> {
        Entity::draw(&self.planet, ctx, pass)
    }

    fn draw_forward(
        &mut self,
        ctx: &mut GraphicsContext,
        pass: &ForwardPass,
    ) -> Result<(), DeviceError> {
        Entity::draw_forward(&self.planet, ctx, pass)
    }

    fn post_draw(&mut self, stats: &FrameStats) {
        self.last_stats = *stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> (GraphicsContext, PlanetScene) {
        let size = Extent2d::new(8, 4);
        let mut ctx = GraphicsContext::headless(size);
        let scene = PlanetScene::new(&mut ctx, &Config::default(), size).unwrap();
        (ctx, scene)
    }

    #[test]
    fn test_camera_starts_at_configured_altitude() {
        let (_ctx, scene) = scene();
        let expected = Config::default().planet.camera_altitude;
        assert!((scene.altitude() - expected).abs() < 1e-2);
        assert!(scene.camera().near < scene.camera().far);
    }

    #[test]
    fn test_orbit_keeps_altitude_and_moves_camera() {
        let (_ctx, mut scene) = scene();
        let start = scene.camera().position;
        scene.update(10.0);
        assert_ne!(scene.camera().position, start);
        assert!((scene.altitude() - Config::default().planet.camera_altitude).abs() < 1e-2);
    }

    #[test]
    fn test_rotating_sun_updates_light() {
        let (_ctx, mut scene) = scene();
        let before = scene.sun().unwrap().direction;
        scene.rotate_sun(1.0);
        let after = scene.sun().unwrap().direction;
        assert!((after.length() - 1.0).abs() < 1e-5);
        assert!(after.distance(before) > 0.1);
    }

    #[test]
    fn test_planet_drawn_through_scene_hooks() {
        let (_ctx, scene) = scene();
        assert!(scene.entities().is_empty());
        assert!(scene.skybox().is_some());
        assert_eq!(scene.lights().len(), 1);
    }
}
