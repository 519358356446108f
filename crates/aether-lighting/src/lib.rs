//! Light types, their GPU uniform layout, and pluggable shadow projections.

mod directional;
mod light;
mod point;
mod shadow;

pub use directional::DirectionalLight;
pub use light::{Light, LightId, LightKind, LightUniform, SceneLight};
pub use point::{PointLight, attenuation};
pub use shadow::{
    DEPTH_BIAS, OrthographicFit, ShadowFrustum, ShadowProjection, ShadowProjections,
    compute_directional_matrix,
};
