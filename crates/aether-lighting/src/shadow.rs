//! Shadow projections: how a light's depth view is fit to the camera.
//!
//! Each light type gets its own [`ShadowProjection`]. Directional lights use an
//! orthographic fit around the camera frustum slice. No point-light projection
//! ships by default; register one with [`ShadowProjections::with_point`].

use crate::{Light, LightKind};

/// Constant depth bias applied by the lighting shaders (reverse-Z units).
pub const DEPTH_BIAS: f32 = 0.0015;

/// The part of the camera a shadow must cover.
#[derive(Clone, Copy, Debug)]
pub struct ShadowFrustum {
    /// Camera view matrix.
    pub view: glam::Mat4,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect: f32,
    /// Camera near plane.
    pub near: f32,
    /// Farthest distance that receives shadows.
    pub far: f32,
}

/// Computes the view-projection used to render and sample a light's shadow map.
pub trait ShadowProjection: Send + Sync {
    /// Returns `None` when the light cannot be projected by this strategy.
    fn light_view_proj(
        &self,
        light: &Light,
        frustum: &ShadowFrustum,
        resolution: u32,
    ) -> Option<glam::Mat4>;
}

/// Orthographic projection enclosing the camera frustum slice, for
/// directional lights.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrthographicFit;

impl ShadowProjection for OrthographicFit {
    fn light_view_proj(
        &self,
        light: &Light,
        frustum: &ShadowFrustum,
        resolution: u32,
    ) -> Option<glam::Mat4> {
        let Light::Directional(sun) = light else {
            return None;
        };
        let proj = glam::Mat4::perspective_rh(
            frustum.fov_y,
            frustum.aspect,
            frustum.near,
            frustum.far.max(frustum.near + 1e-3),
        );
        let inv_vp = (proj * frustum.view).inverse();
        Some(compute_directional_matrix(sun.direction, inv_vp, resolution))
    }
}

/// Per-kind projection registry.
pub struct ShadowProjections {
    directional: Option<Box<dyn ShadowProjection>>,
    point: Option<Box<dyn ShadowProjection>>,
}

impl Default for ShadowProjections {
    fn default() -> Self {
        Self {
            directional: Some(Box::new(OrthographicFit)),
            point: None,
        }
    }
}

impl ShadowProjections {
    /// Registry with no strategies at all; every light renders unshadowed.
    pub fn none() -> Self {
        Self {
            directional: None,
            point: None,
        }
    }

    /// Replace the directional strategy.
    pub fn with_directional(mut self, projection: impl ShadowProjection + 'static) -> Self {
        self.directional = Some(Box::new(projection));
        self
    }

    /// Register a point-light strategy.
    pub fn with_point(mut self, projection: impl ShadowProjection + 'static) -> Self {
        self.point = Some(Box::new(projection));
        self
    }

    /// Strategy for a light kind, if one is registered.
    pub fn for_kind(&self, kind: LightKind) -> Option<&dyn ShadowProjection> {
        match kind {
            LightKind::Directional => self.directional.as_deref(),
            LightKind::Point => self.point.as_deref(),
        }
    }

    /// View-projection for `light`, or `None` when it should render
    /// unshadowed.
    pub fn project(
        &self,
        light: &Light,
        frustum: &ShadowFrustum,
        resolution: u32,
    ) -> Option<glam::Mat4> {
        if !light.casts_shadow() {
            return None;
        }
        self.for_kind(light.kind())?
            .light_view_proj(light, frustum, resolution)
    }
}

/// Tight reverse-Z orthographic light matrix around the frustum described by
/// `camera_view_proj_inv` (standard 0..1 depth), with texel snapping.
pub fn compute_directional_matrix(
    light_dir: glam::Vec3,
    camera_view_proj_inv: glam::Mat4,
    resolution: u32,
) -> glam::Mat4 {
    let world_corners = NDC_CORNERS.map(|c| camera_view_proj_inv.project_point3(c));

    let center = world_corners.iter().copied().sum::<glam::Vec3>() / world_corners.len() as f32;
    let light_up = if light_dir.y.abs() > 0.99 {
        glam::Vec3::Z
    } else {
        glam::Vec3::Y
    };
    let light_view = glam::Mat4::look_to_rh(center, light_dir, light_up);

    let mut min = glam::Vec3::splat(f32::MAX);
    let mut max = glam::Vec3::splat(f32::MIN);
    for corner in &world_corners {
        let ls = light_view.transform_point3(*corner);
        min = min.min(ls);
        max = max.max(ls);
    }

    // Snap to texels so the map does not swim as the camera moves.
    let res = resolution.max(1) as f32;
    let texel = glam::Vec2::new((max.x - min.x) / res, (max.y - min.y) / res);
    if texel.x > 0.0 {
        min.x = (min.x / texel.x).floor() * texel.x;
        max.x = (max.x / texel.x).ceil() * texel.x;
    }
    if texel.y > 0.0 {
        min.y = (min.y / texel.y).floor() * texel.y;
        max.y = (max.y / texel.y).ceil() * texel.y;
    }

    // Casters between the light and the slice still need to land in the map.
    let depth = max.z - min.z;
    let near = -max.z - depth;
    let far = -min.z;
    // Swapped planes: near maps to 1, far maps to 0.
    let ortho = glam::Mat4::orthographic_rh(min.x, max.x, min.y, max.y, far, near);

    ortho * light_view
}

const NDC_CORNERS: [glam::Vec3; 8] = [
    glam::Vec3::new(-1.0, -1.0, 0.0),
    glam::Vec3::new(1.0, -1.0, 0.0),
    glam::Vec3::new(1.0, 1.0, 0.0),
    glam::Vec3::new(-1.0, 1.0, 0.0),
    glam::Vec3::new(-1.0, -1.0, 1.0),
    glam::Vec3::new(1.0, -1.0, 1.0),
    glam::Vec3::new(1.0, 1.0, 1.0),
    glam::Vec3::new(-1.0, 1.0, 1.0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectionalLight, PointLight};

    fn frustum() -> ShadowFrustum {
        ShadowFrustum {
            view: glam::Mat4::look_to_rh(
                glam::Vec3::new(0.0, 10.0, 0.0),
                glam::Vec3::NEG_Z,
                glam::Vec3::Y,
            ),
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 50.0,
        }
    }

    #[test]
    fn test_directional_matrix_is_finite() {
        let light_dir = glam::Vec3::new(0.3, -1.0, 0.2).normalize();
        let matrix = compute_directional_matrix(light_dir, glam::Mat4::IDENTITY, 2048);
        assert!(matrix.to_cols_array().iter().all(|v| v.is_finite()));
        assert_ne!(matrix, glam::Mat4::IDENTITY);
    }

    #[test]
    fn test_fit_contains_frustum_points() {
        let f = frustum();
        let sun: Light = DirectionalLight::new(glam::Vec3::new(0.2, -1.0, 0.1), 1.0).into();
        let m = OrthographicFit.light_view_proj(&sun, &f, 1024).unwrap();
        // A point in the middle of the camera slice must land inside the map.
        let p = m.project_point3(glam::Vec3::new(0.0, 10.0, -20.0));
        assert!(p.x.abs() <= 1.0 && p.y.abs() <= 1.0, "{p}");
        assert!((0.0..=1.0).contains(&p.z), "{p}");
    }

    #[test]
    fn test_reverse_z_closer_to_light_is_larger() {
        let f = frustum();
        let sun: Light = DirectionalLight::new(glam::Vec3::NEG_Y, 1.0).into();
        let m = OrthographicFit.light_view_proj(&sun, &f, 1024).unwrap();
        let high = m.project_point3(glam::Vec3::new(0.0, 12.0, -20.0));
        let low = m.project_point3(glam::Vec3::new(0.0, 8.0, -20.0));
        assert!(high.z > low.z);
    }

    #[test]
    fn test_orthographic_fit_rejects_point_lights() {
        let lamp: Light = PointLight::default().into();
        assert!(OrthographicFit.light_view_proj(&lamp, &frustum(), 512).is_none());
    }

    #[test]
    fn test_default_registry_has_no_point_projection() {
        let lamp: Light = PointLight {
            casts_shadow: true,
            ..Default::default()
        }
        .into();
        let projections = ShadowProjections::default();
        assert!(projections.for_kind(LightKind::Point).is_none());
        assert!(projections.project(&lamp, &frustum(), 512).is_none());
    }

    #[test]
    fn test_non_casting_light_is_not_projected() {
        let mut sun = DirectionalLight::default();
        sun.casts_shadow = false;
        let light: Light = sun.into();
        assert!(
            ShadowProjections::default()
                .project(&light, &frustum(), 512)
                .is_none()
        );
    }

    struct Fixed(glam::Mat4);

    impl ShadowProjection for Fixed {
        fn light_view_proj(&self, _: &Light, _: &ShadowFrustum, _: u32) -> Option<glam::Mat4> {
            Some(self.0)
        }
    }

    #[test]
    fn test_registered_point_projection_is_used() {
        let lamp: Light = PointLight {
            casts_shadow: true,
            ..Default::default()
        }
        .into();
        let m = glam::Mat4::from_scale(glam::Vec3::splat(3.0));
        let projections = ShadowProjections::default().with_point(Fixed(m));
        assert_eq!(projections.project(&lamp, &frustum(), 512), Some(m));
    }
}
