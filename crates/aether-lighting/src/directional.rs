//! Directional light: an infinitely distant source such as the sun.

/// CPU-side directional light description.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Normalized direction vector pointing FROM the light (toward the surface).
    pub direction: glam::Vec3,
    /// Linear RGB color of the light (not premultiplied by brightness).
    pub color: glam::Vec3,
    /// Scalar brightness multiplier.
    pub brightness: f32,
    /// Render a shadow map for this light each frame.
    pub casts_shadow: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: glam::Vec3::new(-1.0, -1.0, -1.0).normalize(),
            color: glam::Vec3::ONE,
            brightness: 1.0,
            casts_shadow: true,
        }
    }
}

impl DirectionalLight {
    /// Light pointing along `direction` with white color.
    pub fn new(direction: glam::Vec3, brightness: f32) -> Self {
        let mut light = Self {
            brightness,
            ..Default::default()
        };
        light.set_direction(direction);
        light
    }

    /// Set the light direction, normalizing the input.
    ///
    /// # Panics
    ///
    /// Panics if the input vector has near-zero length.
    pub fn set_direction(&mut self, dir: glam::Vec3) {
        let len = dir.length();
        assert!(len > 1e-6, "directional light direction must not be zero");
        self.direction = dir / len;
    }

    /// Direction from a surface point toward the light.
    pub fn to_light(&self) -> glam::Vec3 {
        -self.direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_direction_is_normalized() {
        let light = DirectionalLight::default();
        assert!((light.direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_new_normalizes() {
        let light = DirectionalLight::new(glam::Vec3::new(3.0, -4.0, 0.0), 0.99);
        assert!((light.direction.length() - 1.0).abs() < 1e-6);
        assert!((light.brightness - 0.99).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "must not be zero")]
    fn test_zero_direction_panics() {
        let mut light = DirectionalLight::default();
        light.set_direction(glam::Vec3::ZERO);
    }

    #[test]
    fn test_to_light_opposes_direction() {
        let light = DirectionalLight::new(glam::Vec3::NEG_Y, 1.0);
        assert_eq!(light.to_light(), glam::Vec3::Y);
    }
}
