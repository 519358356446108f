//! wgpu implementation of [`GraphicsDevice`].
//!
//! Commands are recorded into one encoder that is submitted on present,
//! readback and texture upload. Each draw records its own render pass with
//! `LoadOp::Load`, so passes see everything recorded before them. Render
//! pipelines are created on first use for each combination of program,
//! attachment formats and fixed-function state.
//!
//! The surface target is an offscreen `Rgba8Unorm` backbuffer; present copies
//! it into the swapchain image with a full-screen pass so the sRGB conversion
//! happens there.

use std::num::NonZeroU64;

use crossbeam_channel::Receiver;
use half::f16;
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use crate::device::{
    CLEAR_DEPTH, ComputeDispatch, DeviceError, DeviceStats, DrawCall, Geometry, GraphicsDevice,
    TextureSource,
};
use crate::gpu::GpuContext;
use crate::headless::{validate_mesh, validate_target, validate_texture};
use crate::mesh::{MeshData, Vertex};
use crate::program::{
    ComputeProgramDescriptor, DrawTransform, GeometryKind, RenderProgramDescriptor,
    TextureBindingKind, WORKGROUP_SIZE,
};
use crate::resource::{
    Extent2d, Mesh, MeshId, ProgramId, ReleaseQueue, RenderTarget, ResourceId, TargetDescriptor,
    TargetId, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureId,
};
use crate::state::{BlendEquation, BlendFactor, BlendFunction, CullFace, DrawState, StateChange};
use crate::texture_data::TextureData;

/// Uniform buffers are padded to at least this many bytes.
const MIN_UNIFORM_SIZE: usize = 256;

/// Declarations shared by every render program.
pub const RENDER_PRELUDE_WGSL: &str = r#"
struct DrawTransform {
    model: mat4x4<f32>,
    view_proj: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> draw_transform: DrawTransform;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};
"#;

/// Vertex stage for [`GeometryKind::Mesh`].
pub const MESH_VERTEX_WGSL: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = draw_transform.model * vec4<f32>(in.position, 1.0);
    var out: VertexOutput;
    out.clip_position = draw_transform.view_proj * world;
    out.world_position = world.xyz;
    out.world_normal = (draw_transform.model * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}
"#;

/// Vertex stage for [`GeometryKind::FullScreen`]: one triangle at depth 0.
pub const FULL_SCREEN_VERTEX_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.clip_position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.world_position = vec3<f32>(0.0);
    out.world_normal = vec3<f32>(0.0);
    out.uv = uv;
    return out;
}
"#;

const PRESENT_WGSL: &str = r#"
@group(1) @binding(1)
var backbuffer: texture_2d<f32>;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureLoad(backbuffer, vec2<i32>(floor(in.clip_position.xy)), 0);
}
"#;

struct GpuTarget {
    size: Extent2d,
    color: Vec<(wgpu::Texture, TextureFormat)>,
    depth: Option<wgpu::Texture>,
}

struct GpuTexture {
    desc: TextureDescriptor,
    texture: wgpu::Texture,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuRenderProgram {
    desc: RenderProgramDescriptor,
    module: wgpu::ShaderModule,
    transform_layout: wgpu::BindGroupLayout,
    resource_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
}

struct GpuComputeProgram {
    desc: ComputeProgramDescriptor,
    bind_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

enum GpuProgram {
    Render(GpuRenderProgram),
    Compute(GpuComputeProgram),
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    color: Vec<TextureFormat>,
    depth: bool,
    depth_test: bool,
    cull: Option<CullFace>,
    blend: Option<(BlendEquation, BlendFunction)>,
    color_write: bool,
    surface: Option<wgpu::TextureFormat>,
}

/// GPU backend.
pub struct WgpuDevice {
    gpu: GpuContext,
    targets: FxHashMap<TargetId, GpuTarget>,
    textures: FxHashMap<TextureId, GpuTexture>,
    meshes: FxHashMap<MeshId, GpuMesh>,
    programs: Vec<GpuProgram>,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    present_program: Option<ProgramId>,
    state: DrawState,
    encoder: Option<wgpu::CommandEncoder>,
    next_id: u32,
    release: ReleaseQueue,
    released: Receiver<ResourceId>,
    stats: DeviceStats,
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext, size: Extent2d) -> Self {
        let (release, released) = ReleaseQueue::new();
        let mut device = Self {
            gpu,
            targets: FxHashMap::default(),
            textures: FxHashMap::default(),
            meshes: FxHashMap::default(),
            programs: Vec::new(),
            pipelines: FxHashMap::default(),
            present_program: None,
            state: DrawState::default(),
            encoder: None,
            next_id: 1,
            release,
            released,
            stats: DeviceStats::default(),
        };
        device.resize_surface(size);
        device
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("aether-frame-encoder"),
                })
        })
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit([encoder.finish()]);
        }
    }

    fn gpu_target(&self, id: TargetId) -> Result<&GpuTarget, DeviceError> {
        self.targets.get(&id).ok_or(DeviceError::UnknownHandle {
            kind: "target",
            id: id.0,
        })
    }

    fn create_gpu_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        dimension: TextureDimension,
    ) -> wgpu::Texture {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        if format == TextureFormat::Rgba32Float {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if dimension == TextureDimension::D2 && format != TextureFormat::Rgba32Float {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: match dimension {
                TextureDimension::D2 => wgpu::TextureDimension::D2,
                TextureDimension::D3 => wgpu::TextureDimension::D3,
            },
            format: wgpu_format(format),
            usage,
            view_formats: &[],
        })
    }

    fn source_view(&self, source: TextureSource) -> Result<wgpu::TextureView, DeviceError> {
        match source {
            TextureSource::Texture(id) => self
                .textures
                .get(&id)
                .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()))
                .ok_or(DeviceError::UnknownHandle {
                    kind: "texture",
                    id: id.0,
                }),
            TextureSource::TargetColor(id, index) => self
                .gpu_target(id)?
                .color
                .get(index)
                .map(|(t, _)| t.create_view(&wgpu::TextureViewDescriptor::default()))
                .ok_or(DeviceError::MissingAttachment {
                    target: id,
                    attachment: "color",
                }),
            TextureSource::TargetDepth(id) => self
                .gpu_target(id)?
                .depth
                .as_ref()
                .map(|t| {
                    t.create_view(&wgpu::TextureViewDescriptor {
                        aspect: wgpu::TextureAspect::DepthOnly,
                        ..Default::default()
                    })
                })
                .ok_or(DeviceError::MissingAttachment {
                    target: id,
                    attachment: "depth",
                }),
        }
    }

    fn uniform_buffer(&self, label: &str, bytes: &[u8]) -> wgpu::Buffer {
        let size = bytes.len().max(MIN_UNIFORM_SIZE).next_multiple_of(16);
        let mut padded = vec![0u8; size];
        padded[..bytes.len()].copy_from_slice(bytes);
        self.gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &padded,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    fn render_pipeline(
        &mut self,
        program: ProgramId,
        target: TargetId,
        surface: Option<wgpu::TextureFormat>,
    ) -> Result<wgpu::RenderPipeline, DeviceError> {
        let Some(GpuProgram::Render(prog)) = self.programs.get(program.0 as usize) else {
            return Err(DeviceError::UnknownHandle {
                kind: "render program",
                id: program.0,
            });
        };
        let gpu_target = self.gpu_target(target)?;
        let state = &self.state;
        let key = PipelineKey {
            program,
            color: gpu_target.color.iter().map(|(_, f)| *f).collect(),
            depth: gpu_target.depth.is_some(),
            depth_test: state.depth_test,
            cull: (state.cull && prog.desc.geometry == GeometryKind::Mesh)
                .then_some(state.cull_face),
            blend: state
                .blend
                .then_some((state.blend_equation, state.blend_function)),
            color_write: state.color_write,
            surface,
        };
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }

        log::debug!("creating render pipeline for '{}'", prog.desc.label);
        let blend = key.blend.map(|(equation, function)| {
            let component = blend_component(equation, function);
            wgpu::BlendState {
                color: component,
                alpha: component,
            }
        });
        let write_mask = if key.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = match surface {
            Some(format) => vec![Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            None => key
                .color
                .iter()
                .map(|f| {
                    Some(wgpu::ColorTargetState {
                        format: wgpu_format(*f),
                        blend,
                        write_mask,
                    })
                })
                .collect(),
        };
        let vertex_buffers = match prog.desc.geometry {
            GeometryKind::Mesh => vec![Vertex::layout()],
            GeometryKind::FullScreen => Vec::new(),
        };
        let pipeline = self
            .gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(prog.desc.label),
                layout: Some(&prog.layout),
                vertex: wgpu::VertexState {
                    module: &prog.module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.cull.map(|face| match face {
                        CullFace::Front => wgpu::Face::Front,
                        CullFace::Back => wgpu::Face::Back,
                    }),
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: (key.depth && surface.is_none()).then(|| wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: key.depth_test,
                    depth_compare: if key.depth_test {
                        wgpu::CompareFunction::GreaterEqual // reverse-Z
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: (!prog.desc.wgsl.is_empty()).then(|| wgpu::FragmentState {
                    module: &prog.module,
                    entry_point: Some("fs_main"),
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview_mask: None,
                cache: None,
            });
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Record one draw into `color_views`/`depth_view`.
    fn record_draw(
        &mut self,
        call: &DrawCall<'_>,
        pipeline: &wgpu::RenderPipeline,
        color_views: &[wgpu::TextureView],
        depth_view: Option<&wgpu::TextureView>,
        viewport: (f32, f32, f32, f32),
    ) -> Result<(), DeviceError> {
        let Some(GpuProgram::Render(prog)) = self.programs.get(call.program.0 as usize) else {
            return Err(DeviceError::UnknownHandle {
                kind: "render program",
                id: call.program.0,
            });
        };

        let transform = match call.geometry {
            Geometry::Mesh { transform, .. } => transform,
            Geometry::FullScreen => DrawTransform::default(),
        };
        let transform_buffer = self.uniform_buffer("draw-transform", bytemuck::bytes_of(&transform));
        let uniform_buffer = self.uniform_buffer(prog.desc.label, call.uniforms);
        let views = call
            .textures
            .iter()
            .map(|s| self.source_view(*s))
            .collect::<Result<Vec<_>, _>>()?;

        let transform_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw-transform-bind-group"),
            layout: &prog.transform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: transform_buffer.as_entire_binding(),
            }],
        });
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        entries.extend(views.iter().enumerate().map(|(i, view)| wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        let resource_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(prog.desc.label),
            layout: &prog.resource_layout,
            entries: &entries,
        });

        let mesh = match call.geometry {
            Geometry::Mesh { mesh, .. } => Some(self.meshes.get(&mesh).ok_or(
                DeviceError::UnknownHandle {
                    kind: "mesh",
                    id: mesh.0,
                },
            )?),
            Geometry::FullScreen => None,
        };

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("aether-frame-encoder"),
                })
        });
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(prog.desc.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            let (x, y, w, h) = viewport;
            pass.set_viewport(x, y, w, h, 0.0, 1.0);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &transform_group, &[]);
            pass.set_bind_group(1, &resource_group, &[]);
            match mesh {
                Some(mesh) => {
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                None => pass.draw(0..3, 0..1),
            }
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn read_gpu_texture(
        &mut self,
        texture: &wgpu::Texture,
        format: TextureFormat,
    ) -> Result<TextureData, DeviceError> {
        let (width, height, depth) = (
            texture.width(),
            texture.height(),
            texture.depth_or_array_layers(),
        );
        let bpp = bytes_per_texel(format);
        let unpadded = width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aether-readback"),
            size: u64::from(padded * height * depth),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder();
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: depth,
            },
        );
        self.gpu.queue.submit([encoder.finish()]);

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.gpu.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DeviceError::Readback(e.to_string())),
            Err(e) => return Err(DeviceError::Readback(e.to_string())),
        }

        let mapped = slice.get_mapped_range();
        let mut data = TextureData::new(width, height, depth);
        for z in 0..depth {
            for y in 0..height {
                let row = ((z * height + y) * padded) as usize;
                for x in 0..width {
                    let at = row + (x * bpp) as usize;
                    let texel = decode_texel(format, &mapped[at..at + bpp as usize]);
                    data.store(x, y, z, texel);
                }
            }
        }
        drop(mapped);
        buffer.unmap();
        Ok(data)
    }

    fn present_to_surface(&mut self) -> Result<(), DeviceError> {
        let Some(format) = self.gpu.surface.as_ref().map(|s| s.format) else {
            self.flush();
            return Ok(());
        };
        let program = match self.present_program {
            Some(id) => id,
            None => {
                let id = self.create_render_program(RenderProgramDescriptor {
                    label: "present",
                    wgsl: PRESENT_WGSL,
                    geometry: GeometryKind::FullScreen,
                    textures: vec![TextureBindingKind::Color2d],
                    fragment: None,
                })?;
                self.present_program = Some(id);
                id
            }
        };
        let Some(frame) = self.gpu.current_texture()? else {
            self.flush();
            return Ok(());
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let pipeline = self.render_pipeline(program, TargetId::SURFACE, Some(format))?;
        let size = frame.texture.size();
        let sources = [TextureSource::TargetColor(TargetId::SURFACE, 0)];
        self.record_draw(
            &DrawCall::full_screen(program, &[], &sources),
            &pipeline,
            &[view],
            None,
            (0.0, 0.0, size.width as f32, size.height as f32),
        )?;
        self.flush();
        frame.present();
        Ok(())
    }
}

impl GraphicsDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
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
        self.flush();
        self.gpu.resize(size.width, size.height);
        let backbuffer = self.create_gpu_texture(
            "backbuffer",
            size.width,
            size.height,
            1,
            TextureFormat::Rgba8Unorm,
            TextureDimension::D2,
        );
        self.targets.insert(
            TargetId::SURFACE,
            GpuTarget {
                size,
                color: vec![(backbuffer, TextureFormat::Rgba8Unorm)],
                depth: None,
            },
        );
    }

    fn target_size(&self, target: TargetId) -> Option<Extent2d> {
        self.targets.get(&target).map(|t| t.size)
    }

    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget, DeviceError> {
        validate_target(desc)?;
        let (w, h) = (desc.size.width, desc.size.height);
        let color = desc
            .color
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let label = format!("{}-color{i}", desc.label);
                (
                    self.create_gpu_texture(&label, w, h, 1, *f, TextureDimension::D2),
                    *f,
                )
            })
            .collect();
        let depth = desc.depth.then(|| {
            self.gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{}-depth", desc.label)),
                size: wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Depth32Float,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        let id = TargetId(self.alloc_id());
        self.targets.insert(
            id,
            GpuTarget {
                size: desc.size,
                color,
                depth,
            },
        );
        Ok(RenderTarget::new(id, desc, self.release.clone()))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture, DeviceError> {
        validate_texture(desc)?;
        let texture = self.create_gpu_texture(
            &desc.label,
            desc.width,
            desc.height,
            desc.depth,
            desc.format,
            desc.dimension,
        );
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            GpuTexture {
                desc: desc.clone(),
                texture,
            },
        );
        Ok(Texture::new(id, desc.clone(), self.release.clone()))
    }

    fn write_texture(&mut self, texture: TextureId, data: &TextureData) -> Result<(), DeviceError> {
        // Uploads run ahead of recorded commands on submit.
        self.flush();
        let tex = self.textures.get(&texture).ok_or(DeviceError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let desc = &tex.desc;
        if (data.width, data.height, data.depth) != (desc.width, desc.height, desc.depth) {
            return Err(DeviceError::InvalidSize {
                label: desc.label.clone(),
                width: data.width,
                height: data.height,
                depth: data.depth,
            });
        }
        let bpp = bytes_per_texel(desc.format);
        let mut bytes = Vec::with_capacity(data.texels.len() * bpp as usize);
        for texel in &data.texels {
            encode_texel(desc.format, *texel, &mut bytes);
        }
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * bpp),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
        );
        Ok(())
    }

    fn create_mesh(&mut self, data: &MeshData) -> Result<Mesh, DeviceError> {
        validate_mesh(data)?;
        let vertex_buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh-vertex-buffer"),
                contents: bytemuck::cast_slice(&data.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh-index-buffer"),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let id = MeshId(self.alloc_id());
        let index_count = data.indices.len() as u32;
        self.meshes.insert(
            id,
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count,
            },
        );
        Ok(Mesh::new(id, index_count, self.release.clone()))
    }

    fn create_render_program(
        &mut self,
        desc: RenderProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        let vertex = match desc.geometry {
            GeometryKind::Mesh => MESH_VERTEX_WGSL,
            GeometryKind::FullScreen => FULL_SCREEN_VERTEX_WGSL,
        };
        let source = format!("{RENDER_PRELUDE_WGSL}{vertex}{}", desc.wgsl);
        let device = &self.gpu.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let transform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw-transform-layout"),
            entries: &[uniform_entry(0, stages)],
        });
        let mut entries = vec![uniform_entry(0, stages)];
        entries.extend(desc.textures.iter().enumerate().map(|(i, kind)| {
            texture_entry(i as u32 + 1, *kind, wgpu::ShaderStages::FRAGMENT)
        }));
        let resource_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&transform_layout, &resource_layout],
            immediate_size: 0,
        });
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(GpuProgram::Render(GpuRenderProgram {
            desc,
            module,
            transform_layout,
            resource_layout,
            layout,
        }));
        Ok(id)
    }

    fn create_compute_program(
        &mut self,
        desc: ComputeProgramDescriptor,
    ) -> Result<ProgramId, DeviceError> {
        let device = &self.gpu.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.wgsl.into()),
        });
        let mut entries = vec![uniform_entry(0, wgpu::ShaderStages::COMPUTE)];
        entries.extend(desc.inputs.iter().enumerate().map(|(i, kind)| {
            texture_entry(i as u32 + 1, *kind, wgpu::ShaderStages::COMPUTE)
        }));
        let first_output = desc.inputs.len() as u32 + 1;
        entries.extend(desc.outputs.iter().enumerate().map(|(i, dim)| {
            wgpu::BindGroupLayoutEntry {
                binding: first_output + i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba32Float,
                    view_dimension: match dim {
                        TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                        TextureDimension::D3 => wgpu::TextureViewDimension::D3,
                    },
                },
                count: None,
            }
        }));
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&bind_layout],
            immediate_size: 0,
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(GpuProgram::Compute(GpuComputeProgram {
            desc,
            bind_layout,
            pipeline,
        }));
        Ok(id)
    }

    fn apply_state(&mut self, change: StateChange) {
        self.state.apply(change);
        self.stats.state_changes += 1;
    }

    fn clear(&mut self, color: bool, depth: bool) -> Result<(), DeviceError> {
        let target = self.gpu_target(self.state.draw_target)?;
        let c = self.state.clear_color.as_dvec4();
        let clear_color = color && self.state.color_write;
        let color_views: Vec<wgpu::TextureView> = target
            .color
            .iter()
            .map(|(t, _)| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let depth_view = target
            .depth
            .as_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = self.encoder();
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: if clear_color {
                                wgpu::LoadOp::Clear(wgpu::Color {
                                    r: c.x,
                                    g: c.y,
                                    b: c.z,
                                    a: c.w,
                                })
                            } else {
                                wgpu::LoadOp::Load
                            },
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_view.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: if depth {
                                wgpu::LoadOp::Clear(CLEAR_DEPTH)
                            } else {
                                wgpu::LoadOp::Load
                            },
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.encoder = Some(encoder);
        self.stats.clears += 1;
        Ok(())
    }

    fn blit_depth(&mut self) -> Result<(), DeviceError> {
        let (src_id, dst_id) = (self.state.read_target, self.state.draw_target);
        let src = self.gpu_target(src_id)?;
        let dst = self.gpu_target(dst_id)?;
        if src.size != dst.size {
            return Err(DeviceError::BlitSizeMismatch {
                src: src.size,
                dst: dst.size,
            });
        }
        let (Some(src_depth), Some(dst_depth)) = (&src.depth, &dst.depth) else {
            return Err(DeviceError::MissingAttachment {
                target: if src.depth.is_none() { src_id } else { dst_id },
                attachment: "depth",
            });
        };
        let (src_depth, dst_depth, size) = (src_depth.clone(), dst_depth.clone(), src.size);
        let mut encoder = self.encoder();
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src_depth,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::DepthOnly,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst_depth,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::DepthOnly,
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.encoder = Some(encoder);
        self.stats.blits += 1;
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), DeviceError> {
        let (label, expected) = match self.programs.get(call.program.0 as usize) {
            Some(GpuProgram::Render(p)) => (p.desc.label, p.desc.textures.len()),
            Some(GpuProgram::Compute(p)) => {
                return Err(DeviceError::WrongProgramKind {
                    label: p.desc.label,
                    expected: "render",
                });
            }
            None => {
                return Err(DeviceError::UnknownHandle {
                    kind: "program",
                    id: call.program.0,
                });
            }
        };
        if call.textures.len() != expected {
            return Err(DeviceError::BindingMismatch {
                label,
                expected,
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

        let pipeline = self.render_pipeline(call.program, target_id, None)?;
        let target = self.gpu_target(target_id)?;
        let color_views: Vec<wgpu::TextureView> = target
            .color
            .iter()
            .map(|(t, _)| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let depth_view = target
            .depth
            .as_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));
        let vp = self.state.viewport;
        let size = target.size;
        let x = vp.x.min(size.width);
        let y = vp.y.min(size.height);
        let viewport = (
            x as f32,
            y as f32,
            vp.width.min(size.width - x).max(1) as f32,
            vp.height.min(size.height - y).max(1) as f32,
        );
        self.record_draw(call, &pipeline, &color_views, depth_view.as_ref(), viewport)?;
        self.stats.draws += 1;
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> Result<(), DeviceError> {
        let prog = match self.programs.get(dispatch.program.0 as usize) {
            Some(GpuProgram::Compute(p)) => p,
            Some(GpuProgram::Render(p)) => {
                return Err(DeviceError::WrongProgramKind {
                    label: p.desc.label,
                    expected: "compute",
                });
            }
            None => {
                return Err(DeviceError::UnknownHandle {
                    kind: "program",
                    id: dispatch.program.0,
                });
            }
        };
        let label = prog.desc.label;
        if dispatch.inputs.len() != prog.desc.inputs.len() {
            return Err(DeviceError::BindingMismatch {
                label,
                expected: prog.desc.inputs.len(),
                got: dispatch.inputs.len(),
            });
        }
        if dispatch.outputs.len() != prog.desc.outputs.len() || dispatch.outputs.is_empty() {
            return Err(DeviceError::BindingMismatch {
                label,
                expected: prog.desc.outputs.len(),
                got: dispatch.outputs.len(),
            });
        }
        let lookup = |id: &TextureId| {
            self.textures.get(id).ok_or(DeviceError::UnknownHandle {
                kind: "texture",
                id: id.0,
            })
        };
        let outputs = dispatch
            .outputs
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(out) = outputs
            .iter()
            .find(|t| t.desc.format != TextureFormat::Rgba32Float)
        {
            return Err(DeviceError::UnsupportedFormat {
                format: out.desc.format,
                usage: "a compute output",
            });
        }

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("aether-frame-encoder"),
                })
        });

        // Inputs that are also outputs are read from a snapshot.
        let mut input_views = Vec::with_capacity(dispatch.inputs.len());
        for id in dispatch.inputs {
            let input = lookup(id)?;
            if dispatch.outputs.contains(id) {
                let copy = self.create_gpu_texture(
                    "compute-input-snapshot",
                    input.desc.width,
                    input.desc.height,
                    input.desc.depth,
                    input.desc.format,
                    input.desc.dimension,
                );
                encoder.copy_texture_to_texture(
                    input.texture.as_image_copy(),
                    copy.as_image_copy(),
                    input.texture.size(),
                );
                input_views.push(copy.create_view(&wgpu::TextureViewDescriptor::default()));
            } else {
                input_views.push(
                    input
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                );
            }
        }
        let output_views: Vec<wgpu::TextureView> = outputs
            .iter()
            .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();

        let uniform_buffer = self.uniform_buffer(label, dispatch.uniforms);
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (i, view) in input_views.iter().chain(&output_views).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &prog.bind_layout,
            entries: &entries,
        });

        let first = &outputs[0].desc;
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&prog.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                first.width.div_ceil(WORKGROUP_SIZE),
                first.height.div_ceil(WORKGROUP_SIZE),
                first.depth,
            );
        }
        self.encoder = Some(encoder);
        self.stats.dispatches += 1;
        Ok(())
    }

    fn read_color(
        &mut self,
        target: TargetId,
        attachment: usize,
    ) -> Result<TextureData, DeviceError> {
        let (texture, format) = self
            .gpu_target(target)?
            .color
            .get(attachment)
            .cloned()
            .ok_or(DeviceError::MissingAttachment {
                target,
                attachment: "color",
            })?;
        self.read_gpu_texture(&texture, format)
    }

    fn read_depth(&mut self, target: TargetId) -> Result<TextureData, DeviceError> {
        let texture = self
            .gpu_target(target)?
            .depth
            .clone()
            .ok_or(DeviceError::MissingAttachment {
                target,
                attachment: "depth",
            })?;
        self.read_gpu_texture(&texture, TextureFormat::Depth32Float)
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<TextureData, DeviceError> {
        let tex = self.textures.get(&texture).ok_or(DeviceError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let (gpu_texture, format) = (tex.texture.clone(), tex.desc.format);
        self.read_gpu_texture(&gpu_texture, format)
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.present_to_surface()?;
        self.stats.presents += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(16),
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    kind: TextureBindingKind,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    let (sample_type, view_dimension) = match kind {
        TextureBindingKind::Color2d => (
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D2,
        ),
        TextureBindingKind::Color3d => (
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D3,
        ),
        TextureBindingKind::Depth => {
            (wgpu::TextureSampleType::Depth, wgpu::TextureViewDimension::D2)
        }
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn blend_component(equation: BlendEquation, function: BlendFunction) -> wgpu::BlendComponent {
    let factor = |f: BlendFactor| match f {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    };
    wgpu::BlendComponent {
        src_factor: factor(function.src),
        dst_factor: factor(function.dst),
        operation: match equation {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
            BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        },
    }
}

fn bytes_per_texel(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Depth32Float => 4,
        TextureFormat::Rgba16Float => 8,
        TextureFormat::Rgba32Float => 16,
    }
}

fn decode_texel(format: TextureFormat, bytes: &[u8]) -> glam::Vec4 {
    let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    match format {
        TextureFormat::Rgba8Unorm => {
            glam::Vec4::new(bytes[0] as f32, bytes[1] as f32, bytes[2] as f32, bytes[3] as f32)
                / 255.0
        }
        TextureFormat::Rgba16Float => {
            let h = |i: usize| f16::from_le_bytes([bytes[i], bytes[i + 1]]).to_f32();
            glam::Vec4::new(h(0), h(2), h(4), h(6))
        }
        TextureFormat::Rgba32Float => glam::Vec4::new(f32_at(0), f32_at(4), f32_at(8), f32_at(12)),
        TextureFormat::Depth32Float => glam::Vec4::splat(f32_at(0)),
    }
}

fn encode_texel(format: TextureFormat, texel: glam::Vec4, out: &mut Vec<u8>) {
    match format {
        TextureFormat::Rgba8Unorm => {
            for c in texel.to_array() {
                out.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
        TextureFormat::Rgba16Float => {
            for c in texel.to_array() {
                out.extend_from_slice(&f16::from_f32(c).to_le_bytes());
            }
        }
        TextureFormat::Rgba32Float => {
            for c in texel.to_array() {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        TextureFormat::Depth32Float => out.extend_from_slice(&texel.x.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_float_texels_round_to_nearest() {
        let mut bytes = Vec::new();
        encode_texel(TextureFormat::Rgba16Float, glam::Vec4::new(0.7, -2.5, 1e9, 1.0), &mut bytes);
        assert_eq!(bytes.len(), 8);
        // 0.7 lies closer to 0x399a than to the truncated 0x3999.
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x399a);
        let back = decode_texel(TextureFormat::Rgba16Float, &bytes);
        assert!((back.x - 0.7).abs() < 2e-4);
        assert_eq!(back.y, -2.5);
        assert_eq!(back.z, f32::INFINITY);
        assert_eq!(back.w, 1.0);
    }

    #[test]
    fn test_texel_codecs() {
        let mut bytes = Vec::new();
        encode_texel(TextureFormat::Rgba8Unorm, glam::Vec4::new(0.0, 1.0, 2.0, -1.0), &mut bytes);
        assert_eq!(bytes, vec![0, 255, 255, 0]);
        let back = decode_texel(TextureFormat::Rgba8Unorm, &bytes);
        assert_eq!(back, glam::Vec4::new(0.0, 1.0, 1.0, 0.0));
    }

    #[test]
    fn test_blend_component_maps_equation() {
        let c = blend_component(BlendEquation::ReverseSubtract, BlendFunction::ALPHA);
        assert_eq!(c.operation, wgpu::BlendOperation::ReverseSubtract);
        assert_eq!(c.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(c.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn test_every_render_prelude_declares_vs_main() {
        assert!(MESH_VERTEX_WGSL.contains("fn vs_main"));
        assert!(FULL_SCREEN_VERTEX_WGSL.contains("fn vs_main"));
        assert!(RENDER_PRELUDE_WGSL.contains("struct VertexOutput"));
    }
}
