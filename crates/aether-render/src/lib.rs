//! Deferred frame pipeline: device abstraction, draw-state cache, Gbuffer,
//! shadow and light-volume renderers, post-processing, and the
//! [`RenderPipeline`] that sequences them each frame.
//!
//! Two backends implement [`GraphicsDevice`]: [`WgpuDevice`] for real windows
//! and [`HeadlessDevice`], a CPU reference rasterizer used by tests and
//! headless runs. Both execute the same programs.

pub mod camera;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod gbuffer;
pub mod gpu;
pub mod headless;
pub mod light_volume;
pub mod mesh;
pub mod pipeline;
pub mod post_processing;
pub mod program;
pub mod resource;
pub mod scene;
pub mod shadow;
pub mod state;
pub mod stats;
pub mod texture_data;
pub mod wgpu_device;

pub use camera::Camera;
pub use context::GraphicsContext;
pub use device::{
    CLEAR_DEPTH, ComputeDispatch, DeviceError, DeviceStats, DrawCall, Geometry, GraphicsDevice,
    TextureSource,
};
pub use error::RenderError;
pub use events::{ResizeSubscription, WindowEvents};
pub use gbuffer::{GBUFFER_FORMATS, Gbuffer, SurfaceMaterial, SurfaceUniform};
pub use gpu::{GpuContext, GpuContextError, SurfaceError, init_gpu_blocking};
pub use headless::HeadlessDevice;
pub use light_volume::{LightVolumeRenderer, LightingUniform, reconstruct_world_position};
pub use mesh::{MeshData, Vertex};
pub use pipeline::{Pass, PassInspector, RenderPipeline};
pub use post_processing::{PostProcessingRenderer, tone_map};
pub use program::{
    ComputeKernel, ComputeProgramDescriptor, DrawTransform, Fragment, FragmentOutput,
    FragmentProgram, GeometryKind, MAX_COLOR_ATTACHMENTS, MAX_COMPUTE_OUTPUTS,
    RenderProgramDescriptor, ShaderResources, TextureBindingKind, WORKGROUP_SIZE,
};
pub use resource::{
    Extent2d, Mesh, MeshId, ProgramId, RenderTarget, ResourceId, TargetDescriptor, TargetId,
    Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureId,
};
pub use scene::{Entity, ForwardPass, GeometryPass, MeshEntity, OverlayRenderer, Scene, ShadowPass};
pub use shadow::{ShadowCasters, ShadowMap, ShadowRenderer};
pub use state::{
    BlendEquation, BlendFactor, BlendFunction, CullFace, DrawState, GraphicsStateCache,
    StateChange, StateStats, Viewport,
};
pub use stats::FrameStats;
pub use texture_data::TextureData;
pub use wgpu_device::WgpuDevice;
