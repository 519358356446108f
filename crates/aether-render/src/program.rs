//! Program descriptors shared by every backend.
//!
//! A program pairs WGSL source (run by the wgpu backend) with a CPU
//! implementation of the same stage (run by the headless backend). Binding
//! layout is fixed so the two can never disagree:
//!
//! Render programs:
//! - `@group(0) @binding(0)`: [`DrawTransform`] (model, view-projection)
//! - `@group(1) @binding(0)`: the program's own uniform block
//! - `@group(1) @binding(1..)`: textures, read with `textureLoad`
//!
//! Compute programs:
//! - `@group(0) @binding(0)`: uniform block
//! - `@group(0) @binding(1..=n)`: input textures
//! - `@group(0) @binding(n+1..)`: `rgba32float` storage outputs
//!
//! The vertex stage is shared and supplied by the backend: render WGSL only
//! defines `fs_main`, which receives the prelude's `VertexOutput`
//! (`clip_position`, `world_position`, `world_normal`, `uv`). Normals are
//! transformed by the upper 3x3 of the model matrix, so models are expected
//! to scale uniformly.
//!
//! Compute entry points are named `main` and use `@workgroup_size(8, 8, 1)`;
//! the dispatch covers the first output's width, height and depth.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, UVec3, Vec2, Vec3, Vec4};

use crate::resource::{Extent2d, TextureDimension};
use crate::texture_data::TextureData;

/// Maximum colour attachments a target may have.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Maximum storage outputs of a compute program.
pub const MAX_COMPUTE_OUTPUTS: usize = 2;

/// Compute workgroup edge in x and y.
pub const WORKGROUP_SIZE: u32 = 8;

/// What a render program rasterizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Indexed [`Vertex`](crate::Vertex) meshes transformed by [`DrawTransform`].
    Mesh,
    /// One triangle covering the viewport at the far plane. Never face-culled.
    FullScreen,
}

/// Kind of texture a binding slot expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureBindingKind {
    /// `texture_2d<f32>`.
    Color2d,
    /// `texture_3d<f32>`.
    Color3d,
    /// `texture_depth_2d`.
    Depth,
}

/// Per-draw transform at `@group(0) @binding(0)`, 128 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawTransform {
    pub model: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl DrawTransform {
    pub fn new(model: glam::Mat4, view_proj: glam::Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view_proj: view_proj.to_cols_array_2d(),
        }
    }

    pub fn model(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array_2d(&self.model)
    }

    pub fn view_proj(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array_2d(&self.view_proj)
    }
}

impl Default for DrawTransform {
    fn default() -> Self {
        Self::new(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY)
    }
}

/// Interpolated inputs of one fragment.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
    /// Pixel coordinate inside the bound target.
    pub pixel: UVec2,
    /// Position inside the viewport, `(0, 0)` top-left to `(1, 1)`.
    pub screen_uv: Vec2,
    /// Reverse-Z depth of the fragment.
    pub depth: f32,
    /// World-space position (mesh geometry only).
    pub world_position: Vec3,
    /// World-space normal, normalized (mesh geometry only).
    pub world_normal: Vec3,
    /// Vertex texture coordinate (mesh geometry only).
    pub uv: Vec2,
}

/// Uniform bytes and bound textures visible to a CPU stage.
pub struct ShaderResources<'a> {
    pub uniforms: &'a [u8],
    pub textures: Vec<&'a TextureData>,
    /// Size of the bound draw target (render programs) or first output (compute).
    pub target_size: Extent2d,
}

impl ShaderResources<'_> {
    /// Read the uniform block as `T`. Missing bytes read as zero.
    pub fn uniform<T: Pod>(&self) -> T {
        let size = std::mem::size_of::<T>();
        if self.uniforms.len() >= size {
            bytemuck::pod_read_unaligned(&self.uniforms[..size])
        } else {
            let mut padded = vec![0u8; size];
            padded[..self.uniforms.len()].copy_from_slice(self.uniforms);
            bytemuck::pod_read_unaligned(&padded)
        }
    }

    /// Texture bound at slot `index` (binding `index + 1`).
    pub fn texture(&self, index: usize) -> &TextureData {
        self.textures[index]
    }
}

/// CPU fragment stage. Returning `None` discards the fragment.
pub trait FragmentProgram: Send + Sync {
    fn shade(&self, fragment: &Fragment, resources: &ShaderResources<'_>) -> Option<FragmentOutput>;
}

/// One colour per attachment; extra entries are ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FragmentOutput(pub [Vec4; MAX_COLOR_ATTACHMENTS]);

impl FragmentOutput {
    /// Same value for attachment 0 only.
    pub fn single(color: Vec4) -> Self {
        let mut out = [Vec4::ZERO; MAX_COLOR_ATTACHMENTS];
        out[0] = color;
        Self(out)
    }
}

/// CPU compute stage, invoked once per texel of the first output.
pub trait ComputeKernel: Send + Sync {
    fn texel(&self, coord: UVec3, resources: &ShaderResources<'_>) -> [Vec4; MAX_COMPUTE_OUTPUTS];
}

/// Everything needed to register a render program.
#[derive(Clone)]
pub struct RenderProgramDescriptor {
    pub label: &'static str,
    /// Defines `fs_main`; empty for depth-only programs.
    pub wgsl: &'static str,
    pub geometry: GeometryKind,
    pub textures: Vec<TextureBindingKind>,
    /// CPU fragment stage; `None` for depth-only programs, which draw only
    /// into depth-only targets. GPU-only programs also leave this `None`.
    pub fragment: Option<Arc<dyn FragmentProgram>>,
}

/// Everything needed to register a compute program.
#[derive(Clone)]
pub struct ComputeProgramDescriptor {
    pub label: &'static str,
    /// Must define `main`.
    pub wgsl: &'static str,
    pub inputs: Vec<TextureBindingKind>,
    pub outputs: Vec<TextureDimension>,
    pub kernel: Arc<dyn ComputeKernel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Params {
        a: f32,
        b: f32,
    }

    #[test]
    fn test_uniform_reads_short_buffer_as_zero() {
        let bytes = 3.0f32.to_ne_bytes();
        let res = ShaderResources {
            uniforms: &bytes,
            textures: Vec::new(),
            target_size: Extent2d::new(1, 1),
        };
        let p: Params = res.uniform();
        assert_eq!((p.a, p.b), (3.0, 0.0));
    }

    #[test]
    fn test_draw_transform_layout() {
        assert_eq!(std::mem::size_of::<DrawTransform>(), 128);
        let m = glam::Mat4::from_translation(Vec3::X);
        let t = DrawTransform::new(m, glam::Mat4::IDENTITY);
        assert_eq!(t.model(), m);
    }
}
