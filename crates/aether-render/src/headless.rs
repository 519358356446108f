//! CPU reference device.
//!
//! Runs the CPU half of every program: a scanline-free half-space rasterizer
//! with homogeneous clipping, perspective-correct interpolation, a top-left
//! fill rule, reverse-Z depth testing, face culling and blending, plus a
//! per-texel compute executor. Deterministic and single-threaded, so it backs
//! the test suite and `--headless` runs.
//!
//! Every format is stored as `f32` RGBA; no quantization is applied.

use crossbeam_channel::Receiver;
use glam::{Mat3, UVec2, UVec3, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::device::{
    CLEAR_DEPTH, ComputeDispatch, DeviceError, DeviceStats, DrawCall, Geometry, GraphicsDevice,
    TextureSource,
};
use crate::mesh::{MeshData, Vertex};
use crate::program::{
    ComputeProgramDescriptor, DrawTransform, Fragment, FragmentProgram, MAX_COLOR_ATTACHMENTS,
    RenderProgramDescriptor, ShaderResources,
};
use crate::resource::{
    Extent2d, Mesh, MeshId, ProgramId, ReleaseQueue, RenderTarget, ResourceId, TargetDescriptor,
    TargetId, Texture, TextureDescriptor, TextureId,
};
use crate::state::{BlendEquation, BlendFactor, CullFace, DrawState, StateChange};
use crate::texture_data::TextureData;

/// Minimum clip-space `w` kept by the near clipper.
const W_EPSILON: f32 = 1e-5;

struct CpuTarget {
    size: Extent2d,
    color: Vec<TextureData>,
    depth: Option<TextureData>,
}

impl CpuTarget {
    fn new(size: Extent2d, color_count: usize, depth: bool) -> Self {
        Self {
            size,
            color: (0..color_count)
                .map(|_| TextureData::new(size.width, size.height, 1))
                .collect(),
            depth: depth.then(|| {
                TextureData::filled(size.width, size.height, 1, Vec4::splat(CLEAR_DEPTH))
            }),
        }
    }
}

struct CpuTexture {
    desc: TextureDescriptor,
    data: TextureData,
}

enum CpuProgram {
    Render(RenderProgramDescriptor),
    Compute(ComputeProgramDescriptor),
}

/// Software implementation of [`GraphicsDevice`].
pub struct HeadlessDevice {
    targets: FxHashMap<TargetId, CpuTarget>,
    textures: FxHashMap<TextureId, CpuTexture>,
    meshes: FxHashMap<MeshId, MeshData>,
    programs: Vec<CpuProgram>,
    state: DrawState,
    next_id: u32,
    release: ReleaseQueue,
    released: Receiver<ResourceId>,
    stats: DeviceStats,
}

impl HeadlessDevice {
    /// Device whose surface has one colour attachment of `size`.
    pub fn new(size: Extent2d) -> Self {
        let (release, released) = ReleaseQueue::new();
        let mut targets = FxHashMap::default();
        targets.insert(TargetId::SURFACE, CpuTarget::new(size, 1, false));
        Self {
            targets,
            textures: FxHashMap::default(),
            meshes: FxHashMap::default(),
            programs: Vec::new(),
            state: DrawState::default(),
            next_id: 1,
            release,
            released,
            stats: DeviceStats::default(),
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn render_program(&self, id: ProgramId) -> Result<RenderProgramDescriptor, DeviceError> {
        match self.programs.get(id.0 as usize) {
            Some(CpuProgram::Render(desc)) => Ok(desc.clone()),
            Some(CpuProgram::Compute(desc)) => Err(DeviceError::WrongProgramKind {
                label: desc.label,
                expected: "render",
            }),
            None => Err(unknown("program", id.0)),
        }
    }

    fn compute_program(&self, id: ProgramId) -> Result<ComputeProgramDescriptor, DeviceError> {
        match self.programs.get(id.0 as usize) {
            Some(CpuProgram::Compute(desc)) => Ok(desc.clone()),
            Some(CpuProgram::Render(desc)) => Err(DeviceError::WrongProgramKind {
                label: desc.label,
                expected: "compute",
            }),
            None => Err(unknown("program", id.0)),
        }
    }

    fn resolve(&self, source: TextureSource) -> Result<&TextureData, DeviceError> {
        match source {
            TextureSource::Texture(id) => self
                .textures
                .get(&id)
                .map(|t| &t.data)
                .ok_or_else(|| unknown("texture", id.0)),
            TextureSource::TargetColor(id, index) => self
                .targets
                .get(&id)
                .ok_or_else(|| unknown("target", id.0))?
                .color
                .get(index)
                .ok_or(DeviceError::MissingAttachment {
                    target: id,
                    attachment: "color",
                }),
            TextureSource::TargetDepth(id) => self
                .targets
                .get(&id)
                .ok_or_else(|| unknown("target", id.0))?
                .depth
                .as_ref()
                .ok_or(DeviceError::MissingAttachment {
                    target: id,
                    attachment: "depth",
                }),
        }
    }

    fn rasterize(
        &self,
        desc: &RenderProgramDescriptor,
        call: &DrawCall<'_>,
        target: &mut CpuTarget,
    ) -> Result<(), DeviceError> {
        let textures = call
            .textures
            .iter()
            .map(|s| self.resolve(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let resources = ShaderResources {
            uniforms: call.uniforms,
            textures,
            target_size: target.size,
        };
        let mut raster = Raster {
            state: &self.state,
            fragment: desc.fragment.as_deref(),
            resources: &resources,
            target,
        };
        match call.geometry {
            Geometry::FullScreen => raster.full_screen(),
            Geometry::Mesh { mesh, transform } => {
                let data = self
                    .meshes
                    .get(&mesh)
                    .ok_or_else(|| unknown("mesh", mesh.0))?;
                raster.mesh(data, &transform);
            }
        }
        Ok(())
    }
}

fn unknown(kind: &'static str, id: u32) -> DeviceError {
    DeviceError::UnknownHandle { kind, id }
}

impl GraphicsDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn maintain(&mut self) -> usize {
        let mut freed = 0;
        for id in self.released.try_iter() {
            let removed = match id {
                ResourceId::Target(t) if t != TargetId::SURFACE => self.targets.remove(&t).is_some(),
                ResourceId::Target(_) => false,
                ResourceId::Texture(t) => self.textures.remove(&t).is_some(),
                ResourceId::Mesh(m) => self.meshes.remove(&m).is_some(),
            };
            freed += usize::from(removed);
        }
        freed
    }

    fn surface_size(&self) -> Extent2d {
        self.targets
            .get(&TargetId::SURFACE)
            .map(|t| t.size)
            .unwrap_or_default()
    }

    fn resize_surface(&mut self, size: Extent2d) {
        self.targets
            .insert(TargetId::SURFACE, CpuTarget::new(size, 1, false));
    }

    fn target_size(&self, target: TargetId) -> Option<Extent2d> {
        self.targets.get(&target).map(|t| t.size)
    }

    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget, DeviceError> {
        validate_target(desc)?;
        let id = TargetId(self.alloc_id());
        self.targets
            .insert(id, CpuTarget::new(desc.size, desc.color.len(), desc.depth));
        Ok(RenderTarget::new(id, desc, self.release.clone()))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture, DeviceError> {
        validate_texture(desc)?;
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            CpuTexture {
                desc: desc.clone(),
                data: TextureData::new(desc.width, desc.height, desc.depth),
            },
        );
        Ok(Texture::new(id, desc.clone(), self.release.clone()))
    }

    fn write_texture(&mut self, texture: TextureId, data: &TextureData) -> Result<(), DeviceError> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| unknown("texture", texture.0))?;
        if (data.width, data.height, data.depth) != (tex.desc.width, tex.desc.height, tex.desc.depth)
        {
            return Err(DeviceError::InvalidSize {
                label: tex.desc.label.clone(),
                width: data.width,
                height: data.height,
                depth: data.depth,
            });
        }
        tex.data = data.clone();
        Ok(())
    }

    fn create_mesh(&mut self, data: &MeshData) -> Result<Mesh, DeviceError> {
        validate_mesh(data)?;
        let id = MeshId(self.alloc_id());
        self.meshes.insert(id, data.clone());
        Ok(Mesh::new(id, data.indices.len() as u32, self.release.clone()))
    }

    fn create_render_program(
        &mut self,
        desc: RenderProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(CpuProgram::Render(desc));
        Ok(id)
    }

    fn create_compute_program(
        &mut self,
        desc: ComputeProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(CpuProgram::Compute(desc));
        Ok(id)
    }

    fn apply_state(&mut self, change: StateChange) {
        self.state.apply(change);
        self.stats.state_changes += 1;
    }

    fn clear(&mut self, color: bool, depth: bool) -> Result<(), DeviceError> {
        let id = self.state.draw_target;
        let clear_color = self.state.clear_color;
        let color = color && self.state.color_write;
        let target = self
            .targets
            .get_mut(&id)
            .ok_or_else(|| unknown("target", id.0))?;
        if color {
            for attachment in &mut target.color {
                attachment.fill(clear_color);
            }
        }
        if depth && let Some(d) = &mut target.depth {
            d.fill(Vec4::splat(CLEAR_DEPTH));
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn blit_depth(&mut self) -> Result<(), DeviceError> {
        let (src_id, dst_id) = (self.state.read_target, self.state.draw_target);
        let src = self
            .targets
            .get(&src_id)
            .ok_or_else(|| unknown("target", src_id.0))?;
        let src_size = src.size;
        let depth = src.depth.clone().ok_or(DeviceError::MissingAttachment {
            target: src_id,
            attachment: "depth",
        })?;
        let dst = self
            .targets
            .get_mut(&dst_id)
            .ok_or_else(|| unknown("target", dst_id.0))?;
        if dst.size != src_size {
            return Err(DeviceError::BlitSizeMismatch {
                src: src_size,
                dst: dst.size,
            });
        }
        let slot = dst.depth.as_mut().ok_or(DeviceError::MissingAttachment {
            target: dst_id,
            attachment: "depth",
        })?;
        *slot = depth;
        self.stats.blits += 1;
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), DeviceError> {
        let desc = self.render_program(call.program)?;
        if call.textures.len() != desc.textures.len() {
            return Err(DeviceError::BindingMismatch {
                label: desc.label,
                expected: desc.textures.len(),
                got: call.textures.len(),
            });
        }
        let target_id = self.state.draw_target;
        let samples_target = call.textures.iter().any(|s| match s {
            TextureSource::TargetColor(t, _) | TextureSource::TargetDepth(t) => *t == target_id,
            TextureSource::Texture(_) => false,
        });
        if samples_target {
            return Err(DeviceError::FeedbackLoop(target_id));
        }

        let mut target = self
            .targets
            .remove(&target_id)
            .ok_or_else(|| unknown("target", target_id.0))?;
        let result = self.rasterize(&desc, call, &mut target);
        self.targets.insert(target_id, target);
        result?;
        self.stats.draws += 1;
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> Result<(), DeviceError> {
        let desc = self.compute_program(dispatch.program)?;
        if dispatch.inputs.len() != desc.inputs.len() {
            return Err(DeviceError::BindingMismatch {
                label: desc.label,
                expected: desc.inputs.len(),
                got: dispatch.inputs.len(),
            });
        }
        if dispatch.outputs.len() != desc.outputs.len() || dispatch.outputs.is_empty() {
            return Err(DeviceError::BindingMismatch {
                label: desc.label,
                expected: desc.outputs.len(),
                got: dispatch.outputs.len(),
            });
        }

        let mut outputs = Vec::with_capacity(dispatch.outputs.len());
        for id in dispatch.outputs {
            match self.textures.remove(id) {
                Some(tex) => outputs.push((*id, tex)),
                None => {
                    for (id, tex) in outputs {
                        self.textures.insert(id, tex);
                    }
                    return Err(unknown("texture", id.0));
                }
            }
        }

        // Inputs that are also outputs read the pre-dispatch contents.
        let aliased: Vec<Option<TextureData>> = dispatch
            .inputs
            .iter()
            .map(|id| {
                outputs
                    .iter()
                    .find(|(out, _)| out == id)
                    .map(|(_, t)| t.data.clone())
            })
            .collect();
        let textures: Option<Vec<&TextureData>> = dispatch
            .inputs
            .iter()
            .zip(&aliased)
            .map(|(id, alias)| alias.as_ref().or_else(|| self.textures.get(id).map(|t| &t.data)))
            .collect();

        let result = match textures {
            Some(textures) => {
                let first = &outputs[0].1.data;
                let (w, h, d) = (first.width, first.height, first.depth);
                let resources = ShaderResources {
                    uniforms: dispatch.uniforms,
                    textures,
                    target_size: Extent2d::new(w, h),
                };
                let mut results = Vec::with_capacity(w as usize * h as usize * d as usize);
                for z in 0..d {
                    for y in 0..h {
                        for x in 0..w {
                            results.push(desc.kernel.texel(UVec3::new(x, y, z), &resources));
                        }
                    }
                }
                Ok((results, (w, h, d)))
            }
            None => Err(DeviceError::UnknownHandle {
                kind: "texture",
                id: u32::MAX,
            }),
        };

        if let Ok((results, (w, h, d))) = &result {
            let mut i = 0;
            for z in 0..*d {
                for y in 0..*h {
                    for x in 0..*w {
                        for (slot, (_, out)) in outputs.iter_mut().enumerate() {
                            out.data.store(x, y, z, results[i][slot]);
                        }
                        i += 1;
                    }
                }
            }
        }
        for (id, tex) in outputs {
            self.textures.insert(id, tex);
        }
        result?;
        self.stats.dispatches += 1;
        Ok(())
    }

    fn read_color(
        &mut self,
        target: TargetId,
        attachment: usize,
    ) -> Result<TextureData, DeviceError> {
        self.resolve(TextureSource::TargetColor(target, attachment))
            .cloned()
    }

    fn read_depth(&mut self, target: TargetId) -> Result<TextureData, DeviceError> {
        self.resolve(TextureSource::TargetDepth(target)).cloned()
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, DeviceError> {
        self.resolve(TextureSource::Texture(texture)).cloned()
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.stats.presents += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

pub(crate) fn validate_target(desc: &TargetDescriptor) -> Result<(), DeviceError> {
    if desc.size.width == 0 || desc.size.height == 0 || desc.color.len() > MAX_COLOR_ATTACHMENTS {
        return Err(DeviceError::InvalidSize {
            label: desc.label.clone(),
            width: desc.size.width,
            height: desc.size.height,
            depth: desc.color.len() as u32,
        });
    }
    if let Some(format) = desc.color.iter().copied().find(|f| f.is_depth()) {
        return Err(DeviceError::UnsupportedFormat {
            format,
            usage: "a colour attachment",
        });
    }
    Ok(())
}

pub(crate) fn validate_texture(desc: &TextureDescriptor) -> Result<(), DeviceError> {
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        return Err(DeviceError::InvalidSize {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
        });
    }
    if desc.format.is_depth() {
        return Err(DeviceError::UnsupportedFormat {
            format: desc.format,
            usage: "a standalone texture",
        });
    }
    Ok(())
}

pub(crate) fn validate_mesh(data: &MeshData) -> Result<(), DeviceError> {
    let count = data.vertices.len() as u32;
    if data.indices.len() % 3 != 0 || data.indices.iter().any(|&i| i >= count) {
        return Err(DeviceError::InvalidSize {
            label: "mesh".to_string(),
            width: count,
            height: data.indices.len() as u32,
            depth: 1,
        });
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    world: Vec3,
    normal: Vec3,
    uv: Vec2,
}

impl ClipVertex {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
            normal: self.normal.lerp(other.normal, t),
            uv: self.uv.lerp(other.uv, t),
        }
    }
}

#[derive(Clone, Copy)]
struct ScreenVertex {
    pos: Vec2,
    ndc: Vec2,
    z: f32,
    inv_w: f32,
    world: Vec3,
    normal: Vec3,
    uv: Vec2,
}

struct Raster<'a, 'r> {
    state: &'a DrawState,
    fragment: Option<&'a dyn FragmentProgram>,
    resources: &'a ShaderResources<'r>,
    target: &'a mut CpuTarget,
}

impl Raster<'_, '_> {
    /// Pixel bounds `[x0, x1) x [y0, y1)` of the viewport inside the target.
    fn bounds(&self) -> (u32, u32, u32, u32) {
        let vp = self.state.viewport;
        let size = self.target.size;
        (
            vp.x.min(size.width),
            vp.y.min(size.height),
            (vp.x + vp.width).min(size.width),
            (vp.y + vp.height).min(size.height),
        )
    }

    fn screen_uv(&self, px: f32, py: f32) -> Vec2 {
        let vp = self.state.viewport;
        Vec2::new(
            (px - vp.x as f32) / vp.width.max(1) as f32,
            (py - vp.y as f32) / vp.height.max(1) as f32,
        )
    }

    fn full_screen(&mut self) {
        let (x0, y0, x1, y1) = self.bounds();
        for y in y0..y1 {
            for x in x0..x1 {
                let screen_uv = self.screen_uv(x as f32 + 0.5, y as f32 + 0.5);
                self.write_fragment(&Fragment {
                    pixel: UVec2::new(x, y),
                    screen_uv,
                    depth: CLEAR_DEPTH,
                    world_position: Vec3::ZERO,
                    world_normal: Vec3::ZERO,
                    uv: screen_uv,
                });
            }
        }
    }

    fn mesh(&mut self, data: &MeshData, transform: &DrawTransform) {
        let model = transform.model();
        let view_proj = transform.view_proj();
        let normal_matrix = Mat3::from_mat4(model);
        let to_clip = |v: &Vertex| {
            let world = model.transform_point3(Vec3::from(v.position));
            ClipVertex {
                clip: view_proj * world.extend(1.0),
                world,
                normal: normal_matrix * Vec3::from(v.normal),
                uv: Vec2::from(v.uv),
            }
        };

        for tri in data.indices.chunks_exact(3) {
            let polygon = clip_polygon(vec![
                to_clip(&data.vertices[tri[0] as usize]),
                to_clip(&data.vertices[tri[1] as usize]),
                to_clip(&data.vertices[tri[2] as usize]),
            ]);
            if polygon.len() < 3 {
                continue;
            }
            let screen: Vec<ScreenVertex> = polygon.iter().map(|v| self.to_screen(v)).collect();

            let ndc_area: f32 = (0..screen.len())
                .map(|i| {
                    let a = screen[i].ndc;
                    let b = screen[(i + 1) % screen.len()].ndc;
                    a.x * b.y - b.x * a.y
                })
                .sum();
            if ndc_area == 0.0 {
                continue;
            }
            let front = ndc_area > 0.0;
            if self.state.cull {
                let culled = match self.state.cull_face {
                    CullFace::Front => front,
                    CullFace::Back => !front,
                };
                if culled {
                    continue;
                }
            }
            for i in 1..screen.len() - 1 {
                self.triangle(screen[0], screen[i], screen[i + 1]);
            }
        }
    }

    fn to_screen(&self, v: &ClipVertex) -> ScreenVertex {
        let vp = self.state.viewport;
        let inv_w = 1.0 / v.clip.w;
        let ndc = v.clip.truncate() * inv_w;
        ScreenVertex {
            pos: Vec2::new(
                vp.x as f32 + (ndc.x * 0.5 + 0.5) * vp.width as f32,
                vp.y as f32 + (0.5 - ndc.y * 0.5) * vp.height as f32,
            ),
            ndc: ndc.truncate(),
            z: ndc.z,
            inv_w,
            world: v.world * inv_w,
            normal: v.normal * inv_w,
            uv: v.uv * inv_w,
        }
    }

    fn triangle(&mut self, a: ScreenVertex, b: ScreenVertex, c: ScreenVertex) {
        let (a, mut b, mut c) = (a, b, c);
        let mut area = edge(a.pos, b.pos, c.pos);
        if area == 0.0 {
            return;
        }
        if area < 0.0 {
            std::mem::swap(&mut b, &mut c);
            area = -area;
        }

        let (x0, y0, x1, y1) = self.bounds();
        let min = a.pos.min(b.pos).min(c.pos);
        let max = a.pos.max(b.pos).max(c.pos);
        let px0 = (min.x.floor().max(x0 as f32)) as u32;
        let py0 = (min.y.floor().max(y0 as f32)) as u32;
        let px1 = (max.x.ceil().min(x1 as f32)).max(0.0) as u32;
        let py1 = (max.y.ceil().min(y1 as f32)).max(0.0) as u32;

        for py in py0..py1 {
            for px in px0..px1 {
                let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let w0 = edge(b.pos, c.pos, p);
                let w1 = edge(c.pos, a.pos, p);
                let w2 = edge(a.pos, b.pos, p);
                if !(covers(w0, b.pos, c.pos) && covers(w1, c.pos, a.pos) && covers(w2, a.pos, b.pos))
                {
                    continue;
                }
                let (l0, l1, l2) = (w0 / area, w1 / area, w2 / area);
                let inv_w = l0 * a.inv_w + l1 * b.inv_w + l2 * c.inv_w;
                let persp = |fa: Vec3, fb: Vec3, fc: Vec3| (fa * l0 + fb * l1 + fc * l2) / inv_w;
                let uv = (a.uv * l0 + b.uv * l1 + c.uv * l2) / inv_w;
                self.write_fragment(&Fragment {
                    pixel: UVec2::new(px, py),
                    screen_uv: self.screen_uv(p.x, p.y),
                    depth: l0 * a.z + l1 * b.z + l2 * c.z,
                    world_position: persp(a.world, b.world, c.world),
                    world_normal: persp(a.normal, b.normal, c.normal).normalize_or_zero(),
                    uv,
                });
            }
        }
    }

    fn write_fragment(&mut self, fragment: &Fragment) {
        let (x, y) = (fragment.pixel.x, fragment.pixel.y);
        let depth_test = self.state.depth_test;
        if depth_test
            && let Some(depth) = &self.target.depth
            && fragment.depth < depth.load(x as i32, y as i32, 0).x
        {
            return;
        }

        let output = match self.fragment {
            Some(program) => match program.shade(fragment, self.resources) {
                Some(out) => Some(out),
                None => return,
            },
            None => None,
        };

        if depth_test && let Some(depth) = &mut self.target.depth {
            depth.store(x, y, 0, Vec4::splat(fragment.depth));
        }

        if let Some(out) = output
            && self.state.color_write
        {
            for (attachment, src) in self.target.color.iter_mut().zip(out.0) {
                let dst = attachment.load(x as i32, y as i32, 0);
                attachment.store(x, y, 0, blend(self.state, src, dst));
            }
        }
    }
}

/// Sutherland-Hodgman against `w > eps`, `z >= 0` and `z <= w`.
fn clip_polygon(mut polygon: Vec<ClipVertex>) -> Vec<ClipVertex> {
    let planes: [fn(&Vec4) -> f32; 3] = [|c| c.w - W_EPSILON, |c| c.z, |c| c.w - c.z];
    for plane in planes {
        if polygon.is_empty() {
            break;
        }
        let mut out = Vec::with_capacity(polygon.len() + 2);
        for i in 0..polygon.len() {
            let cur = polygon[i];
            let next = polygon[(i + 1) % polygon.len()];
            let (dc, dn) = (plane(&cur.clip), plane(&next.clip));
            if dc >= 0.0 {
                out.push(cur);
            }
            if (dc >= 0.0) != (dn >= 0.0) {
                out.push(cur.lerp(&next, dc / (dc - dn)));
            }
        }
        polygon = out;
    }
    polygon
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Top-left fill rule for positively oriented triangles in y-down space.
fn covers(w: f32, from: Vec2, to: Vec2) -> bool {
    let d = to - from;
    w > 0.0 || (w == 0.0 && (d.y < 0.0 || (d.y == 0.0 && d.x > 0.0)))
}

fn blend(state: &DrawState, src: Vec4, dst: Vec4) -> Vec4 {
    if !state.blend {
        return src;
    }
    let factor = |f: BlendFactor| match f {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::SrcAlpha => Vec4::splat(src.w),
        BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
    };
    let s = src * factor(state.blend_function.src);
    let d = dst * factor(state.blend_function.dst);
    match state.blend_equation {
        BlendEquation::Add => s + d,
        BlendEquation::Subtract => s - d,
        BlendEquation::ReverseSubtract => d - s,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::program::{
        ComputeKernel, FragmentOutput, GeometryKind, MAX_COMPUTE_OUTPUTS, TextureBindingKind,
    };
    use crate::resource::{TextureDimension, TextureFormat};
    use crate::state::{BlendFunction, Viewport};

    struct Solid(Vec4);

    impl FragmentProgram for Solid {
        fn shade(&self, _: &Fragment, _: &ShaderResources<'_>) -> Option<FragmentOutput> {
            Some(FragmentOutput::single(self.0))
        }
    }

    fn solid_program(device: &mut HeadlessDevice, geometry: GeometryKind, color: Vec4) -> ProgramId {
        device
            .create_render_program(RenderProgramDescriptor {
                label: "solid",
                wgsl: "",
                geometry,
                textures: Vec::new(),
                fragment: Some(Arc::new(Solid(color))),
            })
            .unwrap()
    }

    fn offscreen(device: &mut HeadlessDevice, size: u32) -> RenderTarget {
        let target = device
            .create_target(&TargetDescriptor {
                label: "t".into(),
                size: Extent2d::new(size, size),
                color: vec![TextureFormat::Rgba16Float],
                depth: true,
            })
            .unwrap();
        device.apply_state(StateChange::DrawTarget(target.id()));
        device.apply_state(StateChange::Viewport(Viewport::full(target.size())));
        target
    }

    #[test]
    fn test_full_screen_covers_viewport_once() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 8);
        let program = solid_program(&mut device, GeometryKind::FullScreen, Vec4::ONE);
        device.apply_state(StateChange::Blend(true));
        device.apply_state(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        device
            .draw(&DrawCall::full_screen(program, &[], &[]))
            .unwrap();
        let color = device.read_color(target.id(), 0).unwrap();
        assert!(color.texels.iter().all(|t| *t == Vec4::ONE));
    }

    #[test]
    fn test_adjacent_triangles_do_not_overlap() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 16);
        let program = solid_program(&mut device, GeometryKind::Mesh, Vec4::splat(0.25));
        let quad = MeshData {
            vertices: [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
                .map(|(x, y)| Vertex::new(Vec3::new(x, y, 0.5), Vec3::Z, Vec2::ZERO))
                .to_vec(),
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        let mesh = device.create_mesh(&quad).unwrap();
        device.apply_state(StateChange::Blend(true));
        device.apply_state(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        device
            .draw(&DrawCall::mesh(program, &mesh, DrawTransform::default(), &[], &[]))
            .unwrap();
        let color = device.read_color(target.id(), 0).unwrap();
        assert!(
            color.texels.iter().all(|t| *t == Vec4::splat(0.25)),
            "every pixel covered exactly once"
        );
    }

    #[test]
    fn test_back_face_culling_discards_clockwise() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 8);
        let program = solid_program(&mut device, GeometryKind::Mesh, Vec4::ONE);
        let tri = MeshData {
            // Clockwise in NDC.
            vertices: [(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0)]
                .map(|(x, y)| Vertex::new(Vec3::new(x, y, 0.5), Vec3::Z, Vec2::ZERO))
                .to_vec(),
            indices: vec![0, 1, 2],
        };
        let mesh = device.create_mesh(&tri).unwrap();
        device.apply_state(StateChange::Cull(true));
        device
            .draw(&DrawCall::mesh(program, &mesh, DrawTransform::default(), &[], &[]))
            .unwrap();
        assert_eq!(device.read_color(target.id(), 0).unwrap().sum(), Vec4::ZERO);

        device.apply_state(StateChange::CullFace(CullFace::Front));
        device
            .draw(&DrawCall::mesh(program, &mesh, DrawTransform::default(), &[], &[]))
            .unwrap();
        assert!(device.read_color(target.id(), 0).unwrap().sum().x > 0.0);
    }

    #[test]
    fn test_reverse_z_depth_test_keeps_nearest() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 4);
        let near = solid_program(&mut device, GeometryKind::Mesh, Vec4::X);
        let far = solid_program(&mut device, GeometryKind::Mesh, Vec4::Y);
        let quad = |z: f32| MeshData {
            vertices: [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
                .map(|(x, y)| Vertex::new(Vec3::new(x, y, z), Vec3::Z, Vec2::ZERO))
                .to_vec(),
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        let near_mesh = device.create_mesh(&quad(0.9)).unwrap();
        let far_mesh = device.create_mesh(&quad(0.1)).unwrap();
        device.apply_state(StateChange::DepthTest(true));
        device
            .draw(&DrawCall::mesh(near, &near_mesh, DrawTransform::default(), &[], &[]))
            .unwrap();
        device
            .draw(&DrawCall::mesh(far, &far_mesh, DrawTransform::default(), &[], &[]))
            .unwrap();
        let color = device.read_color(target.id(), 0).unwrap();
        assert!(color.texels.iter().all(|t| *t == Vec4::X));
        let depth = device.read_depth(target.id()).unwrap();
        assert!(depth.texels.iter().all(|t| (t.x - 0.9).abs() < 1e-6));
    }

    #[test]
    fn test_sampling_bound_target_is_a_feedback_loop() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 4);
        let program = device
            .create_render_program(RenderProgramDescriptor {
                label: "copy",
                wgsl: "",
                geometry: GeometryKind::FullScreen,
                textures: vec![TextureBindingKind::Color2d],
                fragment: Some(Arc::new(Solid(Vec4::ONE))),
            })
            .unwrap();
        let sources = [TextureSource::TargetColor(target.id(), 0)];
        let err = device
            .draw(&DrawCall::full_screen(program, &[], &sources))
            .unwrap_err();
        assert!(matches!(err, DeviceError::FeedbackLoop(_)));
    }

    #[test]
    fn test_dropped_target_is_released_on_maintain() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let target = offscreen(&mut device, 4);
        let id = target.id();
        drop(target);
        assert!(device.target_size(id).is_some());
        assert_eq!(device.maintain(), 1);
        assert!(device.target_size(id).is_none());
        assert!(device.target_size(TargetId::SURFACE).is_some());
    }

    struct Accumulate;

    impl ComputeKernel for Accumulate {
        fn texel(&self, coord: UVec3, res: &ShaderResources<'_>) -> [Vec4; MAX_COMPUTE_OUTPUTS] {
            let old = res.texture(0).load(coord.x as i32, coord.y as i32, coord.z as i32);
            [old + Vec4::ONE, Vec4::ZERO]
        }
    }

    #[test]
    fn test_dispatch_reads_aliased_output_before_writing() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let program = device
            .create_compute_program(ComputeProgramDescriptor {
                label: "accumulate",
                wgsl: "",
                inputs: vec![TextureBindingKind::Color3d],
                outputs: vec![TextureDimension::D3],
                kernel: Arc::new(Accumulate),
            })
            .unwrap();
        let tex = device
            .create_texture(&TextureDescriptor::d3("acc", 2, 2, 2, TextureFormat::Rgba32Float))
            .unwrap();
        for _ in 0..3 {
            device
                .dispatch(&ComputeDispatch {
                    program,
                    uniforms: &[],
                    inputs: &[tex.id()],
                    outputs: &[tex.id()],
                })
                .unwrap();
        }
        let data = device.read_texture(tex.id()).unwrap();
        assert!(data.texels.iter().all(|t| *t == Vec4::splat(3.0)));
        assert_eq!(device.stats().dispatches, 3);
    }

    #[test]
    fn test_blit_depth_requires_matching_sizes() {
        let mut device = HeadlessDevice::new(Extent2d::new(4, 4));
        let a = offscreen(&mut device, 4);
        let b = offscreen(&mut device, 8);
        device.apply_state(StateChange::ReadTarget(a.id()));
        device.apply_state(StateChange::DrawTarget(b.id()));
        assert!(matches!(
            device.blit_depth(),
            Err(DeviceError::BlitSizeMismatch { .. })
        ));
    }
}
