//! Bruneton-style precomputed atmospheric scattering.
//!
//! [`AtmoPreComputer`] fills transmittance, irradiance and inscatter lookup
//! tables a step at a time; [`Atmosphere`] composites sky and aerial
//! perspective from them during the forward pass.

#[macro_use]
mod wgsl;

mod kernels;
mod precompute;
mod renderer;
mod scatter;

pub use kernels::{Lut, Stage};
pub use precompute::{AtmoPreComputer, AtmosphereLuts, PrecomputeProgress, PrecomputeState};
pub use renderer::{ATMOSPHERE_SHADER_SOURCE, Atmosphere, AtmosphereUniform, PlanetView};
pub use scatter::{
    AtmosphereParams, InscatterLayer, LutDimensions, LutKey, PrecomputeUniform, ScatteringModel,
    mie_phase, rayleigh_phase,
};
