//! The graphics context the render list and pipelines draw through.
//!
//! [`RenderDevice`] models a single immediate-mode context: one bound program,
//! one bound framebuffer, one viewport and one set of rasterizer toggles
//! ([`RasterState`]). Every call takes effect before the next one. Components
//! that change state scope the change with a [`StateGuard`], which puts back
//! whatever differs when it goes out of scope.
//!
//! Two implementations ship with the crate:
//!
//! - [`WgpuDevice`] renders to a window surface through wgpu
//! - [`RecordingDevice`] records every call without touching a GPU, for tests
//!   and headless inspection
//!
//! GPU resources are returned as owning handles ([`Program`],
//! [`DepthCubeMap`], [`Framebuffer`]). Dropping a handle queues its release;
//! the device frees the underlying object the next time it gets control.

mod recording;
mod resource;
mod state;
mod wgpu_device;

pub use recording::{Command, RecordingDevice};
pub use resource::{
    DepthCubeMap, Framebuffer, Program, ReleaseQueue, ResourceHandle, ResourceId, ResourceKind,
};
pub use state::StateGuard;
pub use wgpu_device::WgpuDevice;

use glam::{Mat3, Mat4, Vec3};

use crate::error::DeviceError;
use crate::mesh::{Material, MeshData};

/// Texture unit the lit pass samples the shadow cube from.
pub const SHADOW_MAP_SLOT: u32 = 4;

/// Which uniform interface a program exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Depth-only cube pass: [`ShadowUniforms`] plus per-draw model data.
    Shadow,
    /// Forward lit pass: [`FrameUniforms`], [`LightUniforms`], per-draw
    /// model and material data, and a shadow cube.
    Lit,
}

/// Everything needed to build a program.
#[derive(Clone, Debug)]
pub struct ProgramDesc {
    pub label: String,
    pub kind: ProgramKind,
    /// WGSL source.
    pub source: &'static str,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// `src = ONE, dst = ONE`.
    Additive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

/// Process-wide rasterizer toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub blend: BlendMode,
    pub cull: CullMode,
    pub color_write: bool,
    pub polygon: PolygonMode,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Disabled,
            cull: CullMode::Back,
            color_write: true,
            polygon: PolygonMode::Fill,
        }
    }
}

/// Target rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Which buffers of the bound target a clear resets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearFlags {
    pub color: Option<[f32; 4]>,
    pub depth: bool,
}

impl ClearFlags {
    pub const DEPTH: Self = Self {
        color: None,
        depth: true,
    };

    pub fn color_and_depth(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: true,
        }
    }
}

/// Per-light inputs of the shadow program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowUniforms {
    /// Projection times view for +X, -X, +Y, -Y, +Z, -Z.
    pub face_view_proj: [Mat4; 6],
    pub light_position: Vec3,
    pub far_plane: f32,
}

/// Per-frame inputs of the lit program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniforms {
    pub projection: Mat4,
    /// Camera position in world space; the PCF disk widens with distance from it.
    pub camera_position: Vec3,
    pub light_count: u32,
    pub acne_bias: f32,
    pub pcf_radius_scale_factor: f32,
    pub depth_debug: bool,
}

/// Per-light inputs of the lit program.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightUniforms {
    pub position_eye: Vec3,
    pub position_world: Vec3,
    /// Inverse view matrix; takes eye-space fragments back to world space
    /// for the cube lookup.
    pub eye_to_world: Mat4,
    pub far_plane: f32,
    pub color: Vec3,
    pub ambient: Vec3,
}

/// One mesh draw with its transforms already composed.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem<'a> {
    pub mesh: &'a MeshData,
    pub material: &'a Material,
    pub world: Mat4,
    pub model_view: Mat4,
    /// Inverse transpose of the model-view's upper 3×3.
    pub normal_matrix: Mat3,
}

/// An immediate-mode graphics context.
pub trait RenderDevice {
    /// Size of the presentation surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Program, DeviceError>;

    /// Allocates a six-layer square depth texture.
    fn create_depth_cube(&mut self, label: &str, size: u32) -> Result<DepthCubeMap, DeviceError>;

    /// Builds an off-screen target rendering into `depth` and validates it.
    fn create_framebuffer(
        &mut self,
        label: &str,
        depth: &DepthCubeMap,
    ) -> Result<Framebuffer, DeviceError>;

    fn bound_program(&self) -> Option<ResourceId>;
    fn bind_program(&mut self, program: Option<ResourceId>);

    /// `None` is the window surface.
    fn bound_framebuffer(&self) -> Option<ResourceId>;
    fn bind_framebuffer(&mut self, framebuffer: Option<ResourceId>);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);

    fn raster_state(&self) -> RasterState;
    fn set_raster_state(&mut self, state: RasterState);

    /// Clears the bound target.
    fn clear(&mut self, flags: ClearFlags);

    fn set_shadow_uniforms(&mut self, uniforms: &ShadowUniforms);
    fn set_frame_uniforms(&mut self, uniforms: &FrameUniforms);
    fn set_light_uniforms(&mut self, uniforms: &LightUniforms);
    fn bind_shadow_map(&mut self, slot: u32, map: &DepthCubeMap);

    /// Draws with the currently bound program, target and state.
    fn draw(&mut self, item: &DrawItem<'_>);

    /// Finishes the frame.
    fn present(&mut self) -> Result<(), DeviceError>;

    fn set_blend(&mut self, blend: BlendMode) {
        let state = self.raster_state();
        self.set_raster_state(RasterState { blend, ..state });
    }

    fn set_cull(&mut self, cull: CullMode) {
        let state = self.raster_state();
        self.set_raster_state(RasterState { cull, ..state });
    }

    fn set_color_write(&mut self, color_write: bool) {
        let state = self.raster_state();
        self.set_raster_state(RasterState {
            color_write,
            ..state
        });
    }

    fn set_polygon_mode(&mut self, polygon: PolygonMode) {
        let state = self.raster_state();
        self.set_raster_state(RasterState { polygon, ..state });
    }

    /// Binds the window surface with a viewport covering all of it.
    fn bind_screen(&mut self) {
        let (width, height) = self.surface_size();
        self.bind_framebuffer(None);
        self.set_viewport(Viewport::new(width, height));
    }
}
