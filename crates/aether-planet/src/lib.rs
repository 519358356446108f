//! Planet bodies and precomputed atmospheric scattering.
//!
//! [`AtmoPreComputer`] builds the scattering lookup tables incrementally,
//! one step per tick, and shares finished tables between every
//! [`Atmosphere`] with the same physical parameters. [`Planet`] is a scene
//! entity that draws the ground sphere and composites its atmosphere in the
//! forward pass.

pub mod atmosphere;
pub mod error;
pub mod planet;

pub use atmosphere::{
    AtmoPreComputer, Atmosphere, AtmosphereLuts, AtmosphereParams, LutDimensions, LutKey,
    PlanetView, PrecomputeProgress, PrecomputeState,
};
pub use error::AtmosphereError;
pub use planet::{Planet, fit_clip_planes_to_planet};
