//! Camera producing view and projection matrices for a scene.

use aether_lighting::ShadowFrustum;
use glam::{Mat4, Quat, Vec3};

/// A perspective camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect_ratio: f32,
    /// Near clip plane distance (always positive).
    pub near: f32,
    /// Far clip plane distance (always positive, > near).
    pub far: f32,
}

impl Camera {
    /// Camera at `position` looking at `target`.
    pub fn looking_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        Self {
            position,
            rotation,
            ..Self::default()
        }
    }

    /// Compute the view matrix (inverse of camera transform).
    pub fn view_matrix(&self) -> Mat4 {
        (Mat4::from_translation(self.position) * Mat4::from_quat(self.rotation)).inverse()
    }

    /// Reverse-Z perspective: near maps to z=1, far to z=0.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect_ratio, self.far, self.near)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn inverse_view_projection_matrix(&self) -> Mat4 {
        self.view_projection_matrix().inverse()
    }

    /// The forward direction vector (-Z in camera space).
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn set_aspect_ratio(&mut self, width: f32, height: f32) {
        self.aspect_ratio = width / height.max(1.0);
    }

    /// Slice of the view frustum that receives shadows, ending at `distance`.
    pub fn shadow_frustum(&self, distance: f32) -> ShadowFrustum {
        ShadowFrustum {
            view: self.view_matrix(),
            fov_y: self.fov_y,
            aspect: self.aspect_ratio,
            near: self.near,
            far: distance.clamp(self.near * 2.0, self.far),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect_ratio: 16.0 / 9.0,
            near: 0.1,
            far: 10000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_camera_looks_down_neg_z() {
        let forward = Camera::default().forward();
        assert!((forward - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn test_reverse_z_maps_near_to_one_and_far_to_zero() {
        let camera = Camera {
            near: 1.0,
            far: 100.0,
            ..Camera::default()
        };
        let proj = camera.projection_matrix();
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -1.0));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert!((near.z - 1.0).abs() < 1e-5);
        assert!(far.z.abs() < 1e-5);
    }

    #[test]
    fn test_looking_at_faces_target() {
        let camera = Camera::looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        assert!((camera.forward() - Vec3::NEG_Z).length() < 1e-5);
        let inv_view = camera.view_matrix().inverse();
        assert!((inv_view.col(3).truncate() - camera.position).length() < 1e-4);
    }

    #[test]
    fn test_shadow_frustum_clamps_distance() {
        let camera = Camera {
            near: 0.5,
            far: 50.0,
            ..Camera::default()
        };
        assert_eq!(camera.shadow_frustum(500.0).far, 50.0);
        assert_eq!(camera.shadow_frustum(0.1).far, 1.0);
    }
}
