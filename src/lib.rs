//! # Penumbra
//!
//! **A forward renderer with multi-light soft shadows from omnidirectional lights.**
//!
//! Build a scene graph of lights and meshes, flatten it into a render list
//! each frame, and hand the list to the [`DefaultPipeline`]. For every light
//! the pipeline renders a depth cube map, then shades all drawables with
//! percentage-closer filtered shadows, adding each light on top of the last.
//!
//! ## Quick Start
//!
//! ```no_run
//! use penumbra::*;
//!
//! fn main() -> penumbra::Result<()> {
//!     let scene = SceneGraph::new(
//!         Node::new("root")
//!             .with_child(Node::light("Omni001", Light::default())
//!                 .with_matrix(Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0))))
//!             .with_child(Node::drawable("floor", Mesh::new(MeshData::plane(40.0), Material::default())))
//!             .with_child(Node::drawable("box", Mesh::new(MeshData::cube(), Material::default()))
//!                 .with_matrix(Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)))),
//!     );
//!
//!     run(RendererConfig::default(), scene)
//! }
//! ```
//!
//! ## Headless
//!
//! Every pass draws through the [`RenderDevice`] trait. [`RecordingDevice`]
//! implements it without a GPU and keeps a log of every call, which is how
//! the pipelines are tested:
//!
//! ```
//! use penumbra::*;
//!
//! let root = Node::new("root")
//!     .with_child(Node::light("L1", Light::default()))
//!     .with_child(Node::drawable("D1", Mesh::new(MeshData::cube(), Material::default())));
//! let mut list = RenderList::new();
//! list.process(&root)?;
//!
//! let mut device = RecordingDevice::new(320, 240);
//! DefaultPipeline::new().render(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, &list)?;
//! assert_eq!(device.raster_state(), RasterState::default());
//! # Ok::<(), penumbra::RenderError>(())
//! ```

mod app;
mod camera;
mod config;
mod device;
mod error;
mod geometry;
mod gpu;
mod input;
mod mesh;
mod orbit_camera;
mod pipeline;
mod render_list;
pub mod scene;

pub use app::{CONTROLLED_LIGHT, apply_controls, run};
pub use camera::Camera;
pub use config::{
    CameraConfig, ConfigError, LightConfig, MIN_SHADOW_MAP_SIZE, RendererConfig, ShadingConfig,
    ShadowConfig, WindowConfig,
};
pub use device::{
    BlendMode, ClearFlags, Command, CullMode, DepthCubeMap, DrawItem, Framebuffer, FrameUniforms,
    LightUniforms, PolygonMode, Program, ProgramDesc, ProgramKind, RasterState, RecordingDevice,
    ReleaseQueue, RenderDevice, ResourceHandle, ResourceId, ResourceKind, SHADOW_MAP_SLOT,
    ShadowUniforms, StateGuard, Viewport, WgpuDevice,
};
pub use error::{DeviceError, RenderError, Result};
pub use geometry::{GeometryError, GeometryLoader, RawGeometry};
pub use gpu::GpuContext;
pub use input::Input;
pub use mesh::{Material, Mesh, MeshData, MeshId, Transform, Vertex3d};
pub use orbit_camera::{OrbitCamera, OrbitMode};
pub use pipeline::{
    DefaultPipeline, Lifecycle, LifecycleState, Pipeline, ShadowPipeline, cube_face_views,
};
pub use render_list::{DrawableEntry, LightEntry, RenderEntry, RenderList, Renderable};
pub use scene::{Light, LightProjection, Node, NodeRole, SceneGraph, SceneLoader, traverse};

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
pub use winit::keyboard::KeyCode;
