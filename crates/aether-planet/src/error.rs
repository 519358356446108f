//! Errors raised by atmosphere precomputation and compositing.

use aether_render::DeviceError;
use thiserror::Error;

use crate::atmosphere::{Lut, Stage};

/// Errors from [`AtmoPreComputer`](crate::AtmoPreComputer) and
/// [`Atmosphere`](crate::Atmosphere).
#[derive(Debug, Error)]
pub enum AtmosphereError {
    /// The atmosphere has no lookup tables yet.
    #[error("atmosphere lookup tables are not ready")]
    NotReady,

    /// The tables for this atmosphere were already computed; nothing was done.
    #[error("atmosphere precomputation already finished")]
    AlreadyFinished,

    #[error("atmosphere precomputer used before init")]
    NotInitialized,

    /// Another atmosphere's tables are being computed.
    #[error("atmosphere precomputer is busy with different parameters")]
    Busy,

    /// A stage would read a table no earlier stage has produced.
    #[error("stage '{stage}' reads {missing:?} before it was produced")]
    OutOfOrder { stage: Stage, missing: Lut },

    #[error(transparent)]
    Device(#[from] DeviceError),
}
