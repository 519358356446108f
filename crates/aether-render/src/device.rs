//! The backend seam: everything the pipeline asks of a graphics device.

use crate::mesh::MeshData;
use crate::program::{ComputeProgramDescriptor, DrawTransform, RenderProgramDescriptor};
use crate::resource::{
    Extent2d, Mesh, MeshId, ProgramId, RenderTarget, TargetDescriptor, TargetId, Texture,
    TextureDescriptor, TextureFormat, TextureId,
};
use crate::state::StateChange;
use crate::texture_data::TextureData;

/// Depth value a cleared depth buffer holds (reverse-Z far plane).
pub const CLEAR_DEPTH: f32 = 0.0;

/// Errors raised by a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A handle did not refer to a live resource.
    #[error("unknown {kind} {id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    /// A draw or dispatch supplied the wrong number of textures.
    #[error("program '{label}' expects {expected} textures, got {got}")]
    BindingMismatch {
        label: &'static str,
        expected: usize,
        got: usize,
    },

    /// The program id names a program of the other kind.
    #[error("program '{label}' is not a {expected} program")]
    WrongProgramKind {
        label: &'static str,
        expected: &'static str,
    },

    /// A draw sampled the target it renders into.
    #[error("target {0:?} is both sampled and rendered to")]
    FeedbackLoop(TargetId),

    /// Requested attachment does not exist on the target.
    #[error("target {target:?} has no {attachment} attachment")]
    MissingAttachment {
        target: TargetId,
        attachment: &'static str,
    },

    /// Source and destination of a blit differ in size.
    #[error("blit size mismatch: {src:?} -> {dst:?}")]
    BlitSizeMismatch { src: Extent2d, dst: Extent2d },

    /// Zero-sized or oversized allocation.
    #[error("invalid size {width}x{height}x{depth} for '{label}'")]
    InvalidSize {
        label: String,
        width: u32,
        height: u32,
        depth: u32,
    },

    /// Format cannot be used in the requested role.
    #[error("format {format:?} cannot be used as {usage}")]
    UnsupportedFormat {
        format: TextureFormat,
        usage: &'static str,
    },

    /// Surface acquisition failed.
    #[error("surface error: {0}")]
    Surface(#[from] crate::gpu::SurfaceError),

    /// GPU readback failed.
    #[error("readback failed: {0}")]
    Readback(String),
}

/// Where a sampled texture comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureSource {
    Texture(TextureId),
    /// Colour attachment `index` of a target.
    TargetColor(TargetId, usize),
    /// Depth attachment of a target.
    TargetDepth(TargetId),
}

/// Geometry of one draw.
#[derive(Clone, Copy, Debug)]
pub enum Geometry {
    /// Viewport-covering triangle.
    FullScreen,
    /// Indexed mesh with its transform.
    Mesh {
        mesh: MeshId,
        transform: DrawTransform,
    },
}

/// One draw into the currently bound draw target, with the current state.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub geometry: Geometry,
    pub uniforms: &'a [u8],
    pub textures: &'a [TextureSource],
}

impl<'a> DrawCall<'a> {
    /// Full-screen draw.
    pub fn full_screen(
        program: ProgramId,
        uniforms: &'a [u8],
        textures: &'a [TextureSource],
    ) -> Self {
        Self {
            program,
            geometry: Geometry::FullScreen,
            uniforms,
            textures,
        }
    }

    /// Mesh draw.
    pub fn mesh(
        program: ProgramId,
        mesh: &Mesh,
        transform: DrawTransform,
        uniforms: &'a [u8],
        textures: &'a [TextureSource],
    ) -> Self {
        Self {
            program,
            geometry: Geometry::Mesh {
                mesh: mesh.id(),
                transform,
            },
            uniforms,
            textures,
        }
    }
}

/// One compute dispatch.
#[derive(Clone, Copy, Debug)]
pub struct ComputeDispatch<'a> {
    pub program: ProgramId,
    pub uniforms: &'a [u8],
    pub inputs: &'a [TextureId],
    /// May repeat entries of `inputs`; the device then reads the old contents.
    pub outputs: &'a [TextureId],
}

/// Work counters since device creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub draws: u64,
    pub dispatches: u64,
    pub clears: u64,
    pub blits: u64,
    pub state_changes: u64,
    pub presents: u64,
}

/// A graphics backend.
///
/// Draw state (depth, cull, blend, targets, viewport, clear colour) is set
/// only through [`apply_state`](Self::apply_state), which
/// [`GraphicsStateCache`](crate::GraphicsStateCache) alone calls; `clear`,
/// `blit_depth` and `draw` read whatever is currently applied.
pub trait GraphicsDevice {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Free resources whose handles were dropped. Returns how many.
    fn maintain(&mut self) -> usize;

    fn surface_size(&self) -> Extent2d;

    /// Resize the presentable surface.
    fn resize_surface(&mut self, size: Extent2d);

    /// Size of a live target, `None` once released.
    fn target_size(&self, target: TargetId) -> Option<Extent2d>;

    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget, DeviceError>;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture, DeviceError>;

    /// Upload texels. `data` must match the texture's dimensions.
    fn write_texture(&mut self, texture: TextureId, data: &TextureData) -> Result<(), DeviceError>;

    fn create_mesh(&mut self, data: &MeshData) -> Result<Mesh, DeviceError>;

    fn create_render_program(
        &mut self,
        desc: RenderProgramDescriptor,
    ) -> Result<ProgramId, DeviceError>;

    fn create_compute_program(
        &mut self,
        desc: ComputeProgramDescriptor,
    ) -> Result<ProgramId, DeviceError>;

    /// Apply one state change.
    fn apply_state(&mut self, change: StateChange);

    /// Clear the bound draw target's colour attachments to the current clear
    /// colour and/or its depth to [`CLEAR_DEPTH`].
    fn clear(&mut self, color: bool, depth: bool) -> Result<(), DeviceError>;

    /// Copy the bound read target's depth into the bound draw target's depth.
    fn blit_depth(&mut self) -> Result<(), DeviceError>;

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), DeviceError>;

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> Result<(), DeviceError>;

    /// Read back a colour attachment. Blocks until the GPU is done.
    fn read_color(&mut self, target: TargetId, attachment: usize)
    -> Result<TextureData, DeviceError>;

    /// Read back a depth attachment. Blocks until the GPU is done.
    fn read_depth(&mut self, target: TargetId) -> Result<TextureData, DeviceError>;

    /// Read back a texture. Blocks until the GPU is done.
    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, DeviceError>;

    /// Submit the frame and present the surface.
    fn present(&mut self) -> Result<(), DeviceError>;

    fn stats(&self) -> DeviceStats;
}
