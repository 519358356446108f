//! Point light: localized light source with windowed inverse-square falloff.

/// CPU-side point light descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    /// Position in world space.
    pub position: glam::Vec3,
    /// Linear RGB color.
    pub color: glam::Vec3,
    /// Scalar brightness multiplier.
    pub brightness: f32,
    /// Radius of the light volume. Beyond this distance contribution is zero.
    pub radius: f32,
    /// Request a shadow map. Only honored when a point projection is registered.
    pub casts_shadow: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: glam::Vec3::ZERO,
            color: glam::Vec3::ONE,
            brightness: 1.0,
            radius: 10.0,
            casts_shadow: false,
        }
    }
}

impl PointLight {
    /// Model matrix placing a unit sphere over the light volume.
    pub fn volume_transform(&self) -> glam::Mat4 {
        glam::Mat4::from_scale_rotation_translation(
            glam::Vec3::splat(self.radius),
            glam::Quat::IDENTITY,
            self.position,
        )
    }

    /// Whether `point` lies inside the light volume.
    pub fn contains(&self, point: glam::Vec3) -> bool {
        self.position.distance_squared(point) < self.radius * self.radius
    }
}

/// Compute attenuation at a given distance from a point light.
///
/// Inverse-square falloff windowed so it reaches exactly zero at `radius`.
/// Returns a value in `[0.0, 1.0]`.
pub fn attenuation(distance: f32, radius: f32) -> f32 {
    if distance >= radius {
        return 0.0;
    }
    // +1.0 keeps d=0 finite.
    let inv_sq = 1.0 / (distance * distance + 1.0);
    let ratio = distance / radius;
    let t = (1.0 - ratio * ratio).max(0.0);
    inv_sq * t * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attenuation_zero_at_radius() {
        assert_eq!(attenuation(10.0, 10.0), 0.0);
        assert_eq!(attenuation(11.0, 10.0), 0.0);
    }

    #[test]
    fn test_attenuation_one_at_origin() {
        assert!((attenuation(0.0, 10.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_attenuation_monotonic() {
        let mut prev = attenuation(0.0, 20.0);
        for i in 1..40 {
            let a = attenuation(i as f32 * 0.5, 20.0);
            assert!(a <= prev, "attenuation increased at step {i}");
            prev = a;
        }
    }

    #[test]
    fn test_volume_transform_scales_unit_sphere() {
        let light = PointLight {
            position: glam::Vec3::new(1.0, 2.0, 3.0),
            radius: 4.0,
            ..Default::default()
        };
        let edge = light.volume_transform().transform_point3(glam::Vec3::X);
        assert!((edge - glam::Vec3::new(5.0, 2.0, 3.0)).length() < 1e-5);
        assert!(light.contains(glam::Vec3::new(1.0, 2.0, 6.5)));
        assert!(!light.contains(edge + glam::Vec3::X));
    }
}
