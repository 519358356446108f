//! Vertex format and procedural meshes.
//!
//! Every mesh program consumes [`Vertex`]. Triangles wind counter-clockwise
//! when seen from outside, matching `wgpu::FrontFace::Ccw`.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Vertex with position, normal, and texture coordinates (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

static_assertions::assert_eq_size!(Vertex, [u8; 32]);

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
        }
    }

    /// Vertex buffer layout: locations 0 (position), 1 (normal), 2 (uv).
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        use wgpu::{VertexAttribute, VertexFormat};

        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    offset: (std::mem::size_of::<[f32; 3]>() * 2) as wgpu::BufferAddress,
                    shader_location: 2,
                    format: VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// CPU-side indexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit sphere centred at the origin.
    pub fn uv_sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        for r in 0..=rings {
            let theta = std::f32::consts::PI * r as f32 / rings as f32;
            for s in 0..=segments {
                let phi = std::f32::consts::TAU * s as f32 / segments as f32;
                let p = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                let uv = Vec2::new(s as f32 / segments as f32, r as f32 / rings as f32);
                vertices.push(Vertex::new(p, p, uv));
            }
        }

        let stride = segments + 1;
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
        for r in 0..rings {
            for s in 0..segments {
                let a = r * stride + s;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        Self { vertices, indices }
    }

    /// Cube spanning `[-1, 1]` on every axis, flat-shaded.
    pub fn cube() -> Self {
        let mut mesh = Self::default();
        for n in [Vec3::X, Vec3::NEG_X, Vec3::Z, Vec3::NEG_Z] {
            mesh.push_face(n, Vec3::Y);
        }
        mesh.push_face(Vec3::Y, Vec3::NEG_Z);
        mesh.push_face(Vec3::NEG_Y, Vec3::Z);
        mesh
    }

    /// Square in the XZ plane facing +Y, spanning `[-1, 1]`.
    pub fn plane() -> Self {
        let mut mesh = Self::default();
        mesh.push_face(Vec3::Y, Vec3::NEG_Z);
        // push_face offsets along the normal; flatten back to y = 0.
        for v in &mut mesh.vertices {
            v.position[1] = 0.0;
        }
        mesh
    }

    fn push_face(&mut self, normal: Vec3, up: Vec3) {
        let right = up.cross(normal);
        let base = self.vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (u, v) in corners {
            let p = normal + right * u + up * v;
            let uv = Vec2::new((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5);
            self.vertices.push(Vertex::new(p, normal, uv));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward_winding(mesh: &MeshData) {
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].position));
            let n = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(n.dot(centroid) >= -1e-6, "inward triangle {tri:?}");
        }
    }

    #[test]
    fn test_vertex_layout_stride() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 32);
        assert_eq!(layout.attributes.len(), 3);
    }

    #[test]
    fn test_sphere_vertices_on_unit_sphere() {
        let sphere = MeshData::uv_sphere(16, 8);
        for v in &sphere.vertices {
            assert!((Vec3::from(v.position).length() - 1.0).abs() < 1e-5);
        }
        assert_eq!(sphere.triangle_count(), 16 * 8 * 2);
    }

    #[test]
    fn test_sphere_winds_outward() {
        assert_outward_winding(&MeshData::uv_sphere(12, 6));
    }

    #[test]
    fn test_cube_winds_outward() {
        let cube = MeshData::cube();
        assert_eq!(cube.triangle_count(), 12);
        assert_outward_winding(&cube);
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = MeshData::plane();
        let tri = &plane.indices[..3];
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(plane.vertices[i as usize].position));
        assert!((b - a).cross(c - a).y > 0.0);
        assert!(plane.vertices.iter().all(|v| v.position[1] == 0.0));
    }
}
