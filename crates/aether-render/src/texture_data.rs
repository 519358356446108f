//! CPU-side texel storage with clamp-to-edge filtering.
//!
//! The headless device stores every attachment and texture as a
//! [`TextureData`] regardless of format, and readbacks from any device return
//! one. Depth attachments keep their value in the `x` channel.

use glam::{Vec2, Vec3, Vec4};

/// A 1-, 2- or 3-dimensional block of RGBA `f32` texels, row-major, slices last.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub texels: Vec<Vec4>,
}

impl TextureData {
    /// Zero-filled texture.
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self::filled(width, height, depth, Vec4::ZERO)
    }

    /// Texture with every texel set to `value`.
    pub fn filled(width: u32, height: u32, depth: u32, value: Vec4) -> Self {
        let count = width as usize * height as usize * depth.max(1) as usize;
        Self {
            width,
            height,
            depth: depth.max(1),
            texels: vec![value; count],
        }
    }

    /// Linear index of a texel. Coordinates must be in range.
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.height as usize + y as usize) * self.width as usize + x as usize
    }

    /// Fetch a texel, clamping coordinates to the edge.
    pub fn load(&self, x: i32, y: i32, z: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        let z = z.clamp(0, self.depth as i32 - 1) as u32;
        self.texels[self.index(x, y, z)]
    }

    /// Write a texel. Out-of-range writes are ignored.
    pub fn store(&mut self, x: u32, y: u32, z: u32, value: Vec4) {
        if x < self.width && y < self.height && z < self.depth {
            let i = self.index(x, y, z);
            self.texels[i] = value;
        }
    }

    /// Overwrite every texel.
    pub fn fill(&mut self, value: Vec4) {
        self.texels.fill(value);
    }

    /// Bilinear sample of slice 0 at normalized `uv` (texel centres at `(i + 0.5) / n`).
    pub fn sample_2d(&self, uv: Vec2) -> Vec4 {
        let p = uv * Vec2::new(self.width as f32, self.height as f32) - 0.5;
        let base = p.floor();
        let f = p - base;
        let (x, y) = (base.x as i32, base.y as i32);
        let top = self.load(x, y, 0).lerp(self.load(x + 1, y, 0), f.x);
        let bottom = self.load(x, y + 1, 0).lerp(self.load(x + 1, y + 1, 0), f.x);
        top.lerp(bottom, f.y)
    }

    /// Trilinear sample at normalized `uvw`.
    pub fn sample_3d(&self, uvw: Vec3) -> Vec4 {
        let p = uvw * Vec3::new(self.width as f32, self.height as f32, self.depth as f32) - 0.5;
        let base = p.floor();
        let f = p - base;
        let (x, y, z) = (base.x as i32, base.y as i32, base.z as i32);
        let slice = |z: i32| {
            let top = self.load(x, y, z).lerp(self.load(x + 1, y, z), f.x);
            let bottom = self.load(x, y + 1, z).lerp(self.load(x + 1, y + 1, z), f.x);
            top.lerp(bottom, f.y)
        };
        slice(z).lerp(slice(z + 1), f.z)
    }

    /// Exact bitwise equality, distinguishing `-0.0` from `0.0` and comparing NaNs by payload.
    pub fn bit_eq(&self, other: &Self) -> bool {
        (self.width, self.height, self.depth) == (other.width, other.height, other.depth)
            && self
                .texels
                .iter()
                .zip(&other.texels)
                .all(|(a, b)| a.to_array().map(f32::to_bits) == b.to_array().map(f32::to_bits))
    }

    /// Largest per-channel absolute difference. Infinite when sizes differ.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        if (self.width, self.height, self.depth) != (other.width, other.height, other.depth) {
            return f32::INFINITY;
        }
        self.texels
            .iter()
            .zip(&other.texels)
            .map(|(a, b)| (*a - *b).abs().max_element())
            .fold(0.0, f32::max)
    }

    /// Sum of all texels.
    pub fn sum(&self) -> Vec4 {
        self.texels.iter().copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_clamps_to_edge() {
        let mut t = TextureData::new(2, 2, 1);
        t.store(1, 1, 0, Vec4::ONE);
        assert_eq!(t.load(5, 9, 0), Vec4::ONE);
        assert_eq!(t.load(-3, -3, 0), Vec4::ZERO);
    }

    #[test]
    fn test_sample_2d_hits_texel_centres_exactly() {
        let mut t = TextureData::new(2, 1, 1);
        t.store(0, 0, 0, Vec4::splat(2.0));
        t.store(1, 0, 0, Vec4::splat(4.0));
        assert_eq!(t.sample_2d(Vec2::new(0.25, 0.5)), Vec4::splat(2.0));
        assert_eq!(t.sample_2d(Vec2::new(0.75, 0.5)), Vec4::splat(4.0));
        assert_eq!(t.sample_2d(Vec2::new(0.5, 0.5)), Vec4::splat(3.0));
    }

    #[test]
    fn test_sample_3d_interpolates_between_slices() {
        let mut t = TextureData::new(1, 1, 2);
        t.store(0, 0, 1, Vec4::splat(1.0));
        let mid = t.sample_3d(Vec3::new(0.5, 0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bit_eq_distinguishes_signed_zero() {
        let a = TextureData::filled(1, 1, 1, Vec4::ZERO);
        let b = TextureData::filled(1, 1, 1, Vec4::new(-0.0, 0.0, 0.0, 0.0));
        assert_eq!(a, b);
        assert!(!a.bit_eq(&b));
        assert!(a.bit_eq(&a.clone()));
    }

    #[test]
    fn test_max_abs_diff() {
        let a = TextureData::filled(2, 2, 1, Vec4::ONE);
        let mut b = a.clone();
        b.store(1, 0, 0, Vec4::new(1.0, 1.5, 1.0, 1.0));
        assert_eq!(a.max_abs_diff(&b), 0.5);
        assert_eq!(a.max_abs_diff(&TextureData::new(1, 1, 1)), f32::INFINITY);
    }
}
