//! [`RenderDevice`] on wgpu.
//!
//! wgpu has no immediate-mode context, so calls are recorded and replayed at
//! [`present`](RenderDevice::present):
//!
//! - every draw snapshots the pipeline state and uniform offsets in effect
//!   when it was issued
//! - uniforms are appended to one staging buffer and bound with dynamic
//!   offsets, so later writes never clobber earlier draws
//! - consecutive draws into the same target share one render pass; binding
//!   another target or clearing after a draw starts a new one
//! - a pass into a shadow cube is replayed once per cube face, with the face
//!   transform picked by dynamic offset
//!
//! Meshes are uploaded on first draw and cached by [`MeshId`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use wgpu::util::DeviceExt;

use super::{
    BlendMode, ClearFlags, CullMode, DepthCubeMap, DrawItem, Framebuffer, FrameUniforms,
    LightUniforms, PolygonMode, Program, ProgramDesc, ProgramKind, RasterState, ReleaseQueue,
    RenderDevice, ResourceId, ResourceKind, SHADOW_MAP_SLOT, ShadowUniforms, Viewport,
};
use crate::error::DeviceError;
use crate::gpu::GpuContext;
use crate::mesh::{MeshData, MeshId, Vertex3d};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MIN_UNIFORM_CAPACITY: u64 = 64 * 1024;
/// Frames a cached mesh survives without being drawn.
const MESH_RETENTION_FRAMES: u64 = 300;

const ADDITIVE: wgpu::BlendComponent = wgpu::BlendComponent {
    src_factor: wgpu::BlendFactor::One,
    dst_factor: wgpu::BlendFactor::One,
    operation: wgpu::BlendOperation::Add,
};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameBlock {
    projection: [[f32; 4]; 4],
    camera_position: [f32; 3],
    light_count: u32,
    acne_bias: f32,
    pcf_radius_scale_factor: f32,
    depth_debug: u32,
    _pad: f32,
}

impl From<&FrameUniforms> for FrameBlock {
    fn from(u: &FrameUniforms) -> Self {
        Self {
            projection: u.projection.to_cols_array_2d(),
            camera_position: u.camera_position.to_array(),
            light_count: u.light_count,
            acne_bias: u.acne_bias,
            pcf_radius_scale_factor: u.pcf_radius_scale_factor,
            depth_debug: u32::from(u.depth_debug),
            _pad: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct LightBlock {
    eye_to_world: [[f32; 4]; 4],
    position_eye: [f32; 3],
    far_plane: f32,
    position_world: [f32; 3],
    _pad0: f32,
    color: [f32; 3],
    _pad1: f32,
    ambient: [f32; 3],
    _pad2: f32,
}

impl From<&LightUniforms> for LightBlock {
    fn from(u: &LightUniforms) -> Self {
        Self {
            eye_to_world: u.eye_to_world.to_cols_array_2d(),
            position_eye: u.position_eye.to_array(),
            far_plane: u.far_plane,
            position_world: u.position_world.to_array(),
            _pad0: 0.0,
            color: u.color.to_array(),
            _pad1: 0.0,
            ambient: u.ambient.to_array(),
            _pad2: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ObjectBlock {
    world: [[f32; 4]; 4],
    model_view: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    albedo: [f32; 4],
    emission: [f32; 4],
    surface: [f32; 4],
}

impl From<&DrawItem<'_>> for ObjectBlock {
    fn from(item: &DrawItem<'_>) -> Self {
        let material = item.material;
        Self {
            world: item.world.to_cols_array_2d(),
            model_view: item.model_view.to_cols_array_2d(),
            normal_matrix: glam::Mat4::from_mat3(item.normal_matrix).to_cols_array_2d(),
            albedo: material.albedo.extend(material.opacity).to_array(),
            emission: material.emission.extend(0.0).to_array(),
            surface: [material.roughness, material.metalness, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowFaceBlock {
    view_proj: [[f32; 4]; 4],
    light_position: [f32; 3],
    far_plane: f32,
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Runs a wgpu build step, turning a validation panic into its message.
fn catch_build<T>(build: impl FnOnce() -> T) -> Result<T, String> {
    std::panic::catch_unwind(AssertUnwindSafe(build)).map_err(|payload| {
        payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown validation error".to_string())
    })
}

fn uniform_layout(device: &wgpu::Device, label: &str, size: u64) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(size),
            },
            count: None,
        }],
    })
}

fn uniform_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    size: u64,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: wgpu::BufferSize::new(size),
            }),
        }],
    })
}

fn block_size<T>() -> u64 {
    std::mem::size_of::<T>() as u64
}

struct Layouts {
    frame: wgpu::BindGroupLayout,
    light: wgpu::BindGroupLayout,
    object: wgpu::BindGroupLayout,
    shadow_face: wgpu::BindGroupLayout,
    shadow_map: wgpu::BindGroupLayout,
    lit: wgpu::PipelineLayout,
    shadow: wgpu::PipelineLayout,
}

impl Layouts {
    fn new(device: &wgpu::Device) -> Self {
        let frame = uniform_layout(device, "Frame Layout", block_size::<FrameBlock>());
        let light = uniform_layout(device, "Light Layout", block_size::<LightBlock>());
        let object = uniform_layout(device, "Object Layout", block_size::<ObjectBlock>());
        let shadow_face =
            uniform_layout(device, "Shadow Face Layout", block_size::<ShadowFaceBlock>());

        let shadow_map = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Map Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let lit = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Lit Pipeline Layout"),
            bind_group_layouts: &[&frame, &light, &object, &shadow_map],
            push_constant_ranges: &[],
        });
        let shadow = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Pipeline Layout"),
            bind_group_layouts: &[&shadow_face, &object],
            push_constant_ranges: &[],
        });

        Self {
            frame,
            light,
            object,
            shadow_face,
            shadow_map,
            lit,
            shadow,
        }
    }
}

/// Per-frame uniform data addressed by dynamic offset.
struct UniformArena {
    alignment: u32,
    staging: Vec<u8>,
    buffer: wgpu::Buffer,
    capacity: u64,
    frame: wgpu::BindGroup,
    light: wgpu::BindGroup,
    object: wgpu::BindGroup,
    shadow_face: wgpu::BindGroup,
}

impl UniformArena {
    fn new(device: &wgpu::Device, layouts: &Layouts, capacity: u64) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Arena"),
            size: capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            alignment,
            staging: Vec::new(),
            frame: uniform_bind_group(
                device,
                "Frame Uniforms",
                &layouts.frame,
                &buffer,
                block_size::<FrameBlock>(),
            ),
            light: uniform_bind_group(
                device,
                "Light Uniforms",
                &layouts.light,
                &buffer,
                block_size::<LightBlock>(),
            ),
            object: uniform_bind_group(
                device,
                "Object Uniforms",
                &layouts.object,
                &buffer,
                block_size::<ObjectBlock>(),
            ),
            shadow_face: uniform_bind_group(
                device,
                "Shadow Face Uniforms",
                &layouts.shadow_face,
                &buffer,
                block_size::<ShadowFaceBlock>(),
            ),
            buffer,
            capacity,
        }
    }

    /// Appends a block and returns its offset.
    fn push<T: bytemuck::Pod>(&mut self, value: &T) -> u32 {
        let offset = align_to(self.staging.len() as u32, self.alignment);
        self.staging.resize(offset as usize, 0);
        self.staging.extend_from_slice(bytemuck::bytes_of(value));
        offset
    }

    fn stride<T>(&self) -> u32 {
        align_to(std::mem::size_of::<T>() as u32, self.alignment)
    }

    /// Copies the staged blocks to the GPU, growing the buffer first if needed.
    fn upload(&mut self, gpu: &GpuContext, layouts: &Layouts) {
        let needed = self.staging.len() as u64;
        if needed > self.capacity {
            let capacity = needed.next_power_of_two().max(MIN_UNIFORM_CAPACITY);
            log::debug!("growing uniform arena to {capacity} bytes");
            *self = Self {
                staging: std::mem::take(&mut self.staging),
                ..Self::new(&gpu.device, layouts, capacity)
            };
        }
        if !self.staging.is_empty() {
            gpu.queue.write_buffer(&self.buffer, 0, &self.staging);
        }
    }
}

struct GpuProgram {
    kind: ProgramKind,
    module: wgpu::ShaderModule,
}

struct GpuCube {
    size: u32,
    _texture: wgpu::Texture,
    face_views: Vec<wgpu::TextureView>,
    bind_group: wgpu::BindGroup,
}

impl GpuCube {
    fn new(
        device: &wgpu::Device,
        layouts: &Layouts,
        sampler: &wgpu::Sampler,
        label: &str,
        size: u32,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let face_views = (0..6)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Shadow Cube Face"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        let cube_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Shadow Cube"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            array_layer_count: Some(6),
            ..Default::default()
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Map Bind Group"),
            layout: &layouts.shadow_map,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&cube_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        Self {
            size,
            _texture: texture,
            face_views,
            bind_group,
        }
    }
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    last_used: u64,
}

impl GpuMesh {
    fn upload(device: &wgpu::Device, mesh: &MeshData, frame: u64) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice::<Vertex3d, u8>(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        log::trace!("uploaded mesh {:?}", mesh.id());
        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            last_used: frame,
        }
    }
}

struct ScreenDepth {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl ScreenDepth {
    fn new(gpu: &GpuContext) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Screen Depth"),
            size: wgpu::Extent3d {
                width: gpu.width(),
                height: gpu.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
            size: (gpu.width(), gpu.height()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ResourceId,
    raster: RasterState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Screen,
    Cube(ResourceId),
}

#[derive(Clone, Copy, Debug)]
enum DrawBindings {
    Lit {
        frame: u32,
        light: u32,
        shadow_map: Option<ResourceId>,
    },
    Shadow {
        faces: u32,
    },
}

#[derive(Debug)]
struct RecordedDraw {
    mesh: MeshId,
    pipeline: PipelineKey,
    viewport: Viewport,
    object: u32,
    bindings: DrawBindings,
}

#[derive(Debug)]
struct RecordedPass {
    target: Target,
    clear_color: Option<[f32; 4]>,
    clear_depth: bool,
    draws: Vec<RecordedDraw>,
}

impl RecordedPass {
    fn new(target: Target) -> Self {
        Self {
            target,
            clear_color: None,
            clear_depth: false,
            draws: Vec::new(),
        }
    }
}

/// Raster state as the pipeline for `kind` will actually see it.
fn effective_raster(kind: ProgramKind, raster: RasterState, line_mode: bool) -> RasterState {
    let polygon = if line_mode {
        raster.polygon
    } else {
        PolygonMode::Fill
    };
    match kind {
        ProgramKind::Lit => RasterState { polygon, ..raster },
        ProgramKind::Shadow => RasterState {
            blend: BlendMode::Disabled,
            color_write: false,
            polygon,
            ..raster
        },
    }
}

fn build_pipeline(
    gpu: &GpuContext,
    layouts: &Layouts,
    program: &GpuProgram,
    raster: RasterState,
) -> wgpu::RenderPipeline {
    let cull_mode = match raster.cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    };
    let polygon_mode = match raster.polygon {
        PolygonMode::Fill => wgpu::PolygonMode::Fill,
        PolygonMode::Line => wgpu::PolygonMode::Line,
    };

    let (label, layout, front_face, depth_compare) = match program.kind {
        ProgramKind::Lit => (
            "Lit Pipeline",
            &layouts.lit,
            wgpu::FrontFace::Ccw,
            wgpu::CompareFunction::LessEqual,
        ),
        // The shadow shader flips clip-space y, which mirrors winding.
        ProgramKind::Shadow => (
            "Shadow Pipeline",
            &layouts.shadow,
            wgpu::FrontFace::Cw,
            wgpu::CompareFunction::Less,
        ),
    };

    let color_target = [Some(wgpu::ColorTargetState {
        format: gpu.config.format,
        blend: match raster.blend {
            BlendMode::Disabled => None,
            BlendMode::Additive => Some(wgpu::BlendState {
                color: ADDITIVE,
                alpha: ADDITIVE,
            }),
        },
        write_mask: if raster.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        },
    })];
    let targets: &[Option<wgpu::ColorTargetState>] = match program.kind {
        ProgramKind::Lit => &color_target,
        ProgramKind::Shadow => &[],
    };

    gpu.device
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: Some("vs_main"),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some("fs_main"),
                targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face,
                cull_mode,
                polygon_mode,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
}

/// Applies `viewport` clipped to a `target`-sized attachment. Returns false
/// when nothing of it remains.
fn apply_viewport(pass: &mut wgpu::RenderPass<'_>, viewport: Viewport, target: (u32, u32)) -> bool {
    let x = viewport.x.min(target.0);
    let y = viewport.y.min(target.1);
    let width = viewport.width.min(target.0 - x);
    let height = viewport.height.min(target.1 - y);
    if width == 0 || height == 0 {
        return false;
    }
    pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
    true
}

/// The wgpu rendering backend.
pub struct WgpuDevice {
    gpu: GpuContext,
    layouts: Layouts,
    uniforms: UniformArena,
    sampler: wgpu::Sampler,
    fallback_cube: GpuCube,
    screen_depth: ScreenDepth,

    releases: ReleaseQueue,
    next_id: u64,
    programs: HashMap<ResourceId, GpuProgram>,
    cubes: HashMap<ResourceId, GpuCube>,
    framebuffers: HashMap<ResourceId, ResourceId>,
    pipelines: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
    meshes: HashMap<MeshId, GpuMesh>,
    frame: u64,
    line_mode_warned: bool,

    program: Option<ResourceId>,
    framebuffer: Option<ResourceId>,
    viewport: Viewport,
    raster: RasterState,
    frame_offset: Option<u32>,
    light_offset: Option<u32>,
    shadow_offset: Option<u32>,
    shadow_map: Option<ResourceId>,
    passes: Vec<RecordedPass>,
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        let layouts = Layouts::new(&gpu.device);
        let uniforms = UniformArena::new(&gpu.device, &layouts, MIN_UNIFORM_CAPACITY);
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Map Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        let fallback_cube = GpuCube::new(&gpu.device, &layouts, &sampler, "Fallback Cube", 1);
        let screen_depth = ScreenDepth::new(&gpu);
        let viewport = Viewport::new(gpu.width(), gpu.height());

        Self {
            gpu,
            layouts,
            uniforms,
            sampler,
            fallback_cube,
            screen_depth,
            releases: ReleaseQueue::new(),
            next_id: 1,
            programs: HashMap::new(),
            cubes: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            meshes: HashMap::new(),
            frame: 0,
            line_mode_warned: false,
            program: None,
            framebuffer: None,
            viewport,
            raster: RasterState::default(),
            frame_offset: None,
            light_offset: None,
            shadow_offset: None,
            shadow_map: None,
            passes: Vec::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the surface. A screen viewport follows the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        if self.framebuffer.is_none() {
            self.viewport = Viewport::new(self.gpu.width(), self.gpu.height());
        }
    }

    fn allocate(&mut self) -> ResourceId {
        let id = ResourceId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn collect_releases(&mut self) {
        for (kind, id) in self.releases.drain() {
            let known = match kind {
                ResourceKind::Program => {
                    self.pipelines.retain(|key, _| key.program != id);
                    self.programs.remove(&id).is_some()
                }
                ResourceKind::DepthCube => self.cubes.remove(&id).is_some(),
                ResourceKind::Framebuffer => self.framebuffers.remove(&id).is_some(),
            };
            if !known {
                log::warn!("release of unknown {kind:?} {id:?}");
            }
            if self.program == Some(id) {
                self.program = None;
            }
            if self.framebuffer == Some(id) {
                self.framebuffer = None;
            }
            if self.shadow_map == Some(id) {
                self.shadow_map = None;
            }
            log::trace!("released {kind:?} {id:?}");
        }
    }

    fn current_target(&self) -> Option<Target> {
        match self.framebuffer {
            None => Some(Target::Screen),
            Some(fb) => self.framebuffers.get(&fb).map(|cube| Target::Cube(*cube)),
        }
    }

    fn pass_for(&mut self, target: Target) -> &mut RecordedPass {
        if self.passes.last().is_none_or(|p| p.target != target) {
            self.passes.push(RecordedPass::new(target));
        }
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    /// Builds the pipeline for `key` if it is not cached yet. False when the
    /// pipeline cannot be built.
    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if let Some(cached) = self.pipelines.get(&key) {
            return cached.is_some();
        }
        let Some(program) = self.programs.get(&key.program) else {
            return false;
        };
        let built = catch_build(|| build_pipeline(&self.gpu, &self.layouts, program, key.raster));
        let pipeline = match built {
            Ok(pipeline) => {
                log::debug!("built pipeline for {:?} {:?}", program.kind, key.raster);
                Some(pipeline)
            }
            Err(reason) => {
                log::error!("pipeline for {:?} failed: {reason}", key.raster);
                None
            }
        };
        let ok = pipeline.is_some();
        self.pipelines.insert(key, pipeline);
        ok
    }

    fn upload_mesh(&mut self, mesh: &MeshData) {
        let frame = self.frame;
        let device = &self.gpu.device;
        self.meshes
            .entry(mesh.id())
            .and_modify(|m| m.last_used = frame)
            .or_insert_with(|| GpuMesh::upload(device, mesh, frame));
    }

    fn submit_frame(&mut self) -> Result<(), DeviceError> {
        let output = match self.gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost; reconfiguring and skipping frame");
                self.gpu.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface timed out; skipping frame");
                return Ok(());
            }
            Err(e) => return Err(DeviceError::Surface(e.to_string())),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        if self.screen_depth.size != (self.gpu.width(), self.gpu.height()) {
            self.screen_depth = ScreenDepth::new(&self.gpu);
        }
        self.uniforms.upload(&self.gpu, &self.layouts);
        if self.passes.is_empty() {
            let mut pass = RecordedPass::new(Target::Screen);
            pass.clear_color = Some([0.0, 0.0, 0.0, 1.0]);
            pass.clear_depth = true;
            self.passes.push(pass);
        }

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        for pass in &self.passes {
            match pass.target {
                Target::Screen => self.encode_screen_pass(&mut encoder, &view, pass),
                Target::Cube(cube) => self.encode_cube_pass(&mut encoder, cube, pass),
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn encode_screen_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        pass: &RecordedPass,
    ) {
        let color_load = match pass.clear_color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = if pass.clear_depth {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Screen Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.screen_depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let size = (self.gpu.width(), self.gpu.height());
        for draw in &pass.draws {
            let DrawBindings::Lit {
                frame,
                light,
                shadow_map,
            } = draw.bindings
            else {
                continue;
            };
            let (Some(Some(pipeline)), Some(mesh)) =
                (self.pipelines.get(&draw.pipeline), self.meshes.get(&draw.mesh))
            else {
                continue;
            };
            if !apply_viewport(&mut render_pass, draw.viewport, size) {
                continue;
            }
            let shadow_group = shadow_map
                .and_then(|id| self.cubes.get(&id))
                .map_or(&self.fallback_cube.bind_group, |cube| &cube.bind_group);

            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &self.uniforms.frame, &[frame]);
            render_pass.set_bind_group(1, &self.uniforms.light, &[light]);
            render_pass.set_bind_group(2, &self.uniforms.object, &[draw.object]);
            render_pass.set_bind_group(3, shadow_group, &[]);
            render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }

    fn encode_cube_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cube_id: ResourceId,
        pass: &RecordedPass,
    ) {
        let Some(cube) = self.cubes.get(&cube_id) else {
            log::warn!("skipping pass into released cube {cube_id:?}");
            return;
        };
        let stride = self.uniforms.stride::<ShadowFaceBlock>();
        let depth_load = if pass.clear_depth {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        for (face, face_view) in cube.face_views.iter().enumerate() {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Cube Face"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: face_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &pass.draws {
                let DrawBindings::Shadow { faces } = draw.bindings else {
                    continue;
                };
                let (Some(Some(pipeline)), Some(mesh)) =
                    (self.pipelines.get(&draw.pipeline), self.meshes.get(&draw.mesh))
                else {
                    continue;
                };
                if !apply_viewport(&mut render_pass, draw.viewport, (cube.size, cube.size)) {
                    continue;
                }

                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(
                    0,
                    &self.uniforms.shadow_face,
                    &[faces + face as u32 * stride],
                );
                render_pass.set_bind_group(1, &self.uniforms.object, &[draw.object]);
                render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                render_pass
                    .set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
    }

    fn end_frame(&mut self) {
        self.passes.clear();
        self.uniforms.staging.clear();
        self.frame_offset = None;
        self.light_offset = None;
        self.shadow_offset = None;
        self.collect_releases();

        let frame = self.frame;
        self.meshes
            .retain(|_, mesh| frame.saturating_sub(mesh.last_used) <= MESH_RETENTION_FRAMES);
        self.frame += 1;
    }
}

impl RenderDevice for WgpuDevice {
    fn surface_size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Program, DeviceError> {
        let build_error = |reason: String| DeviceError::ProgramBuild {
            label: desc.label.clone(),
            reason,
        };

        let module = catch_build(|| {
            self.gpu
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&desc.label),
                    source: wgpu::ShaderSource::Wgsl(desc.source.into()),
                })
        })
        .map_err(build_error)?;
        let program = GpuProgram {
            kind: desc.kind,
            module,
        };

        // Building the default pipeline checks the shader against its layout.
        let raster = effective_raster(desc.kind, RasterState::default(), true);
        let pipeline = catch_build(|| build_pipeline(&self.gpu, &self.layouts, &program, raster))
            .map_err(build_error)?;

        let id = self.allocate();
        self.programs.insert(id, program);
        self.pipelines
            .insert(PipelineKey { program: id, raster }, Some(pipeline));
        log::debug!("built program '{}' ({:?})", desc.label, desc.kind);
        Ok(Program::new(
            self.releases.handle(ResourceKind::Program, id),
            desc.kind,
        ))
    }

    fn create_depth_cube(&mut self, label: &str, size: u32) -> Result<DepthCubeMap, DeviceError> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if size == 0 || size > max {
            return Err(DeviceError::TextureCreate {
                label: label.to_string(),
                reason: format!("cube face size {size} outside 1..={max}"),
            });
        }
        let cube = GpuCube::new(
            &self.gpu.device,
            &self.layouts,
            &self.sampler,
            label,
            size,
        );
        let id = self.allocate();
        self.cubes.insert(id, cube);
        log::debug!("created depth cube '{label}' ({size}x{size})");
        Ok(DepthCubeMap::new(
            self.releases.handle(ResourceKind::DepthCube, id),
            size,
        ))
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        depth: &DepthCubeMap,
    ) -> Result<Framebuffer, DeviceError> {
        let Some(cube) = self.cubes.get(&depth.id()) else {
            return Err(DeviceError::UnknownResource(depth.id()));
        };
        if cube.size != depth.size() {
            return Err(DeviceError::FramebufferIncomplete {
                label: label.to_string(),
                reason: format!(
                    "depth attachment is {} texels, handle says {}",
                    cube.size,
                    depth.size()
                ),
            });
        }
        let id = self.allocate();
        self.framebuffers.insert(id, depth.id());
        Ok(Framebuffer::new(
            self.releases.handle(ResourceKind::Framebuffer, id),
            depth,
        ))
    }

    fn bound_program(&self) -> Option<ResourceId> {
        self.program
    }

    fn bind_program(&mut self, program: Option<ResourceId>) {
        self.program = program;
    }

    fn bound_framebuffer(&self) -> Option<ResourceId> {
        self.framebuffer
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<ResourceId>) {
        self.framebuffer = framebuffer;
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn raster_state(&self) -> RasterState {
        self.raster
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.raster = state;
    }

    fn clear(&mut self, flags: ClearFlags) {
        let Some(target) = self.current_target() else {
            log::warn!("clear with an unknown framebuffer bound");
            return;
        };
        let reuse = self
            .passes
            .last()
            .is_some_and(|p| p.target == target && p.draws.is_empty());
        if !reuse {
            self.passes.push(RecordedPass::new(target));
        }
        let pass = self.pass_for(target);
        if flags.color.is_some() {
            pass.clear_color = flags.color;
        }
        pass.clear_depth |= flags.depth;
    }

    fn set_shadow_uniforms(&mut self, uniforms: &ShadowUniforms) {
        let mut base = None;
        for view_proj in &uniforms.face_view_proj {
            let offset = self.uniforms.push(&ShadowFaceBlock {
                view_proj: view_proj.to_cols_array_2d(),
                light_position: uniforms.light_position.to_array(),
                far_plane: uniforms.far_plane,
            });
            if base.is_none() {
                base = Some(offset);
            }
        }
        self.shadow_offset = base;
    }

    fn set_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.frame_offset = Some(self.uniforms.push(&FrameBlock::from(uniforms)));
    }

    fn set_light_uniforms(&mut self, uniforms: &LightUniforms) {
        self.light_offset = Some(self.uniforms.push(&LightBlock::from(uniforms)));
    }

    fn bind_shadow_map(&mut self, slot: u32, map: &DepthCubeMap) {
        if slot != SHADOW_MAP_SLOT {
            log::warn!("shadow map bound to slot {slot}; only {SHADOW_MAP_SLOT} is sampled");
        }
        self.shadow_map = Some(map.id());
    }

    fn draw(&mut self, item: &DrawItem<'_>) {
        let Some(program) = self.program else {
            log::warn!("draw without a bound program");
            return;
        };
        let Some(kind) = self.programs.get(&program).map(|p| p.kind) else {
            log::warn!("draw with unknown program {program:?}");
            return;
        };
        let Some(target) = self.current_target() else {
            log::warn!("draw with an unknown framebuffer bound");
            return;
        };

        let bindings = match (kind, target) {
            (ProgramKind::Lit, Target::Screen) => {
                let (Some(frame), Some(light)) = (self.frame_offset, self.light_offset) else {
                    log::warn!("lit draw before frame and light uniforms were set");
                    return;
                };
                DrawBindings::Lit {
                    frame,
                    light,
                    shadow_map: self.shadow_map,
                }
            }
            (ProgramKind::Shadow, Target::Cube(_)) => {
                let Some(faces) = self.shadow_offset else {
                    log::warn!("shadow draw before shadow uniforms were set");
                    return;
                };
                DrawBindings::Shadow { faces }
            }
            (kind, target) => {
                log::warn!("{kind:?} program cannot draw into {target:?}");
                return;
            }
        };
        if item.mesh.index_count() == 0 {
            return;
        }

        let line_mode = self.gpu.supports_line_mode();
        if self.raster.polygon == PolygonMode::Line && !line_mode && !self.line_mode_warned {
            log::warn!("line polygon mode unsupported; drawing filled");
            self.line_mode_warned = true;
        }
        let key = PipelineKey {
            program,
            raster: effective_raster(kind, self.raster, line_mode),
        };
        if !self.ensure_pipeline(key) {
            return;
        }

        self.upload_mesh(item.mesh);
        let object = self.uniforms.push(&ObjectBlock::from(item));
        let viewport = self.viewport;
        self.pass_for(target).draws.push(RecordedDraw {
            mesh: item.mesh.id(),
            pipeline: key,
            viewport,
            object,
            bindings,
        });
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        let result = self.submit_frame();
        self.end_frame();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_match_wgsl_sizes() {
        assert_eq!(block_size::<FrameBlock>(), 96);
        assert_eq!(block_size::<LightBlock>(), 128);
        assert_eq!(block_size::<ObjectBlock>(), 240);
        assert_eq!(block_size::<ShadowFaceBlock>(), 80);
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(300, 256), 512);
    }

    #[test]
    fn shadow_programs_ignore_color_state() {
        let raster = RasterState {
            blend: BlendMode::Additive,
            cull: CullMode::Front,
            color_write: true,
            polygon: PolygonMode::Line,
        };
        let shadow = effective_raster(ProgramKind::Shadow, raster, true);
        assert_eq!(shadow.blend, BlendMode::Disabled);
        assert!(!shadow.color_write);
        assert_eq!(shadow.cull, CullMode::Front);

        let lit = effective_raster(ProgramKind::Lit, raster, false);
        assert_eq!(lit.polygon, PolygonMode::Fill);
        assert_eq!(lit.blend, BlendMode::Additive);
    }

    #[test]
    fn build_panics_become_messages() {
        let err = catch_build(|| -> u32 { panic!("bad shader") }).unwrap_err();
        assert_eq!(err, "bad shader");
        let err = catch_build(|| -> u32 { panic!("{}", String::from("bad layout")) }).unwrap_err();
        assert_eq!(err, "bad layout");
    }
}
