//! The light sum type and its GPU-side uniform.

use bytemuck::{Pod, Zeroable};

use crate::{DirectionalLight, PointLight};

/// Stable identity of a light across frames, assigned by its owner.
///
/// Shadow maps are cached per id, so an id must not be reused for a
/// different light while the old one is still alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub u64);

/// Discriminant of [`Light`], also written into the uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Infinitely distant light.
    Directional,
    /// Local light with a bounded volume.
    Point,
}

/// A light owned by a scene.
#[derive(Clone, Debug, PartialEq)]
pub enum Light {
    /// Sun-like light.
    Directional(DirectionalLight),
    /// Local light.
    Point(PointLight),
}

/// Non-owning view of a scene light, valid for one frame.
#[derive(Clone, Copy, Debug)]
pub struct SceneLight<'a> {
    /// Identity used to key per-light resources.
    pub id: LightId,
    /// The borrowed light.
    pub light: &'a Light,
}

impl Light {
    /// Which variant this is.
    pub fn kind(&self) -> LightKind {
        match self {
            Self::Directional(_) => LightKind::Directional,
            Self::Point(_) => LightKind::Point,
        }
    }

    /// Whether the owner asked for a shadow map.
    pub fn casts_shadow(&self) -> bool {
        match self {
            Self::Directional(l) => l.casts_shadow,
            Self::Point(l) => l.casts_shadow,
        }
    }

    /// Color premultiplied by brightness.
    pub fn radiance(&self) -> glam::Vec3 {
        match self {
            Self::Directional(l) => l.color * l.brightness,
            Self::Point(l) => l.color * l.brightness,
        }
    }

    /// Build the GPU-side uniform. `shadow` is the light's view-projection
    /// when a shadow map was rendered for it this frame.
    pub fn to_uniform(&self, shadow: Option<(glam::Mat4, u32)>) -> LightUniform {
        let (vector, kind, radius) = match self {
            Self::Directional(l) => (l.direction, 0.0, 0.0),
            Self::Point(l) => (l.position, 1.0, l.radius),
        };
        let radiance = self.radiance();
        let (shadow_view_proj, has_shadow, texel) = match shadow {
            Some((m, resolution)) => (m, 1.0, 1.0 / resolution.max(1) as f32),
            None => (glam::Mat4::IDENTITY, 0.0, 0.0),
        };
        LightUniform {
            vector_kind: [vector.x, vector.y, vector.z, kind],
            radiance_pad: [radiance.x, radiance.y, radiance.z, 0.0],
            params: [radius, has_shadow, crate::DEPTH_BIAS, texel],
            shadow_view_proj: shadow_view_proj.to_cols_array_2d(),
        }
    }
}

impl From<DirectionalLight> for Light {
    fn from(light: DirectionalLight) -> Self {
        Self::Directional(light)
    }
}

impl From<PointLight> for Light {
    fn from(light: PointLight) -> Self {
        Self::Point(light)
    }
}

/// GPU-side light description, 112 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightUniform {
    /// xyz = direction (directional) or position (point), w = kind (0 / 1).
    pub vector_kind: [f32; 4],
    /// xyz = color * brightness, w = padding.
    pub radiance_pad: [f32; 4],
    /// x = radius, y = has shadow map, z = depth bias, w = shadow texel size.
    pub params: [f32; 4],
    /// Light view-projection used to look up the shadow map.
    pub shadow_view_proj: [[f32; 4]; 4],
}

static_assertions::assert_eq_size!(LightUniform, [u8; 112]);

impl LightUniform {
    /// Decoded kind.
    pub fn kind(&self) -> LightKind {
        if self.vector_kind[3] < 0.5 {
            LightKind::Directional
        } else {
            LightKind::Point
        }
    }

    /// Whether a shadow map is bound for this light.
    pub fn has_shadow(&self) -> bool {
        self.params[1] > 0.5
    }

    /// Shadow view-projection as a matrix.
    pub fn shadow_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array_2d(&self.shadow_view_proj)
    }
}
