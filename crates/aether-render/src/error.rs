use crate::device::DeviceError;

/// Failures of the frame pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A render target could not be (re)built; callers treat this as fatal.
    #[error("failed to create {what}")]
    TargetCreation {
        what: &'static str,
        #[source]
        source: DeviceError,
    },
}
