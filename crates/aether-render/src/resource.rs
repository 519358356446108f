//! Typed resource ids, descriptors, and RAII handles.
//!
//! Devices hand out [`RenderTarget`], [`Texture`] and [`Mesh`] handles. Dropping a
//! handle does not touch the device directly; it pushes the id onto the
//! device's [`ReleaseQueue`], which the device drains in `maintain`.

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    /// Build an extent, clamping each side to at least one pixel.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Number of pixels.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Width / height.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Identifies a render target (a framebuffer in GL terms).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

impl TargetId {
    /// The presentable window surface. Always exists.
    pub const SURFACE: TargetId = TargetId(0);
}

/// Identifies a standalone texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Identifies uploaded mesh geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Identifies a registered render or compute program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Any releasable resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Target(TargetId),
    Texture(TextureId),
    Mesh(MeshId),
}

/// Texel formats the engine allocates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit normalized colour.
    Rgba8Unorm,
    /// HDR colour.
    Rgba16Float,
    /// Full-precision data (lookup tables).
    Rgba32Float,
    /// Reverse-Z depth.
    Depth32Float,
}

impl TextureFormat {
    /// Whether this is a depth format.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

/// 2D or 3D texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    D3,
}

/// Parameters for a standalone texture.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// 1 for 2D textures.
    pub depth: u32,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
}

impl TextureDescriptor {
    /// A 2D texture.
    pub fn d2(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            depth: 1,
            format,
            dimension: TextureDimension::D2,
        }
    }

    /// A 3D texture.
    pub fn d3(
        label: impl Into<String>,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
    ) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            depth,
            format,
            dimension: TextureDimension::D3,
        }
    }

    /// Total texel count.
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
}

/// Parameters for an offscreen render target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetDescriptor {
    pub label: String,
    pub size: Extent2d,
    /// One entry per colour attachment, in binding order.
    pub color: Vec<TextureFormat>,
    /// Attach a `Depth32Float` buffer.
    pub depth: bool,
}

/// Sending side of a device's release channel.
#[derive(Clone, Debug)]
pub struct ReleaseQueue {
    tx: Sender<ResourceId>,
}

impl ReleaseQueue {
    /// Create a queue plus the receiver the owning device drains.
    pub fn new() -> (Self, Receiver<ResourceId>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn release(&self, id: ResourceId) {
        // The device may already be gone; then there is nothing to free.
        let _ = self.tx.send(id);
    }
}

/// Owned render target. Released when dropped.
#[derive(Debug)]
pub struct RenderTarget {
    id: TargetId,
    size: Extent2d,
    color: Vec<TextureFormat>,
    depth: bool,
    release: ReleaseQueue,
}

impl RenderTarget {
    /// Wrap a freshly created device target.
    pub fn new(id: TargetId, desc: &TargetDescriptor, release: ReleaseQueue) -> Self {
        Self {
            id,
            size: desc.size,
            color: desc.color.clone(),
            depth: desc.depth,
            release,
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn size(&self) -> Extent2d {
        self.size
    }

    /// Formats of the colour attachments.
    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.color
    }

    pub fn has_depth(&self) -> bool {
        self.depth
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.release.release(ResourceId::Target(self.id));
    }
}

/// Owned texture. Released when dropped.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    desc: TextureDescriptor,
    release: ReleaseQueue,
}

impl Texture {
    /// Wrap a freshly created device texture.
    pub fn new(id: TextureId, desc: TextureDescriptor, release: ReleaseQueue) -> Self {
        Self { id, desc, release }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.release.release(ResourceId::Texture(self.id));
    }
}

/// Owned mesh geometry. Released when dropped.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    index_count: u32,
    release: ReleaseQueue,
}

impl Mesh {
    /// Wrap freshly uploaded geometry.
    pub fn new(id: MeshId, index_count: u32, release: ReleaseQueue) -> Self {
        Self {
            id,
            index_count,
            release,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.release.release(ResourceId::Mesh(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_clamps_zero() {
        assert_eq!(Extent2d::new(0, 0), Extent2d { width: 1, height: 1 });
    }

    #[test]
    fn test_dropping_handles_enqueues_release() {
        let (queue, rx) = ReleaseQueue::new();
        let desc = TargetDescriptor {
            label: "t".into(),
            size: Extent2d::new(4, 4),
            color: vec![TextureFormat::Rgba8Unorm],
            depth: true,
        };
        let target = RenderTarget::new(TargetId(3), &desc, queue.clone());
        let mesh = Mesh::new(MeshId(9), 36, queue);
        assert!(rx.try_recv().is_err());

        drop(target);
        drop(mesh);
        let released: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            released,
            vec![
                ResourceId::Target(TargetId(3)),
                ResourceId::Mesh(MeshId(9))
            ]
        );
    }

    #[test]
    fn test_release_after_receiver_dropped_is_silent() {
        let (queue, rx) = ReleaseQueue::new();
        drop(rx);
        let tex = Texture::new(
            TextureId(1),
            TextureDescriptor::d2("x", 2, 2, TextureFormat::Rgba32Float),
            queue,
        );
        drop(tex);
    }

    #[test]
    fn test_texel_count_includes_depth() {
        let desc = TextureDescriptor::d3("lut", 8, 4, 2, TextureFormat::Rgba32Float);
        assert_eq!(desc.texel_count(), 64);
    }
}
