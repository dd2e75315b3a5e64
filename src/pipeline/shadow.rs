use glam::{Mat4, Vec3};

use super::{Lifecycle, Pipeline};
use crate::config::ShadowConfig;
use crate::device::{
    ClearFlags, CullMode, DepthCubeMap, Framebuffer, PolygonMode, Program, ProgramDesc,
    ProgramKind, RasterState, RenderDevice, ShadowUniforms, StateGuard, Viewport,
};
use crate::error::{DeviceError, RenderError, Result};
use crate::render_list::RenderList;
use crate::scene::Light;

const SHADER: &str = include_str!("../shaders/shadow.wgsl");

/// Look direction and up vector of each cube face, in +X, -X, +Y, -Y, +Z, -Z
/// order.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View matrices for the six faces of a cube map centered on `position`.
pub fn cube_face_views(position: Vec3) -> [Mat4; 6] {
    CUBE_FACES.map(|(dir, up)| Mat4::look_at_rh(position, position + dir, up))
}

struct ShadowResources {
    program: Program,
    framebuffer: Framebuffer,
    depth_map: DepthCubeMap,
}

/// Renders one point light's omnidirectional shadow map.
///
/// Each invocation overwrites the cube: every texel stores the distance from
/// the light to the nearest occluder in that direction, divided by the light's
/// far plane. The pass only writes depth and by default renders back faces,
/// which keeps lit front faces from shadowing themselves.
pub struct ShadowPipeline {
    lifecycle: Lifecycle,
    map_size: u32,
    front_face_culling: bool,
    resources: Option<ShadowResources>,
}

impl ShadowPipeline {
    /// Default cube face edge in texels.
    pub const DEFAULT_MAP_SIZE: u32 = 1024;

    pub fn new(map_size: u32) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            map_size,
            front_face_culling: true,
            resources: None,
        }
    }

    pub fn from_config(config: &ShadowConfig) -> Self {
        Self {
            front_face_culling: config.front_face_culling,
            ..Self::new(config.map_size)
        }
    }

    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    /// Changes the cube resolution; resources are rebuilt on the next render.
    pub fn set_map_size(&mut self, map_size: u32) {
        if map_size != self.map_size {
            self.map_size = map_size;
            self.lifecycle.mark_dirty();
        }
    }

    pub fn front_face_culling(&self) -> bool {
        self.front_face_culling
    }

    /// With front-face culling on, only back faces reach the cube.
    pub fn set_front_face_culling(&mut self, enabled: bool) {
        self.front_face_culling = enabled;
        log::info!("shadow front-face culling: {enabled}");
    }

    /// The cube written by the last render, if resources exist.
    pub fn shadow_map(&self) -> Option<&DepthCubeMap> {
        self.resources.as_ref().map(|r| &r.depth_map)
    }

    /// Renders the drawables of `list` into the cube for `light`.
    ///
    /// `light_inverse` is the inverse of the light's world matrix. On return the
    /// device's program, framebuffer, viewport and raster state are what they
    /// were on entry.
    ///
    /// Fails with [`RenderError::InvalidArgument`] for an empty list, before
    /// the device is touched, and with [`RenderError::ResourceBuild`] when lazy
    /// initialization fails.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        light_inverse: Mat4,
        light: &Light,
        list: &RenderList<'_>,
    ) -> Result<()> {
        if list.is_empty() {
            log::error!("shadow pass: render list is empty");
            return Err(RenderError::InvalidArgument(
                "shadow pass needs a non-empty render list".to_string(),
            ));
        }

        self.ensure_initialized(device)?;
        let resources = self.resources.as_ref().ok_or_else(|| {
            RenderError::State("shadow pass has no resources after init".to_string())
        })?;

        let position = light_inverse.inverse().w_axis.truncate();
        let projection = light.projection_matrix();
        let uniforms = ShadowUniforms {
            face_view_proj: cube_face_views(position).map(|view| projection * view),
            light_position: position,
            far_plane: light.far_plane(),
        };
        let cull = if self.front_face_culling {
            CullMode::Front
        } else {
            CullMode::Back
        };

        let mut gpu = StateGuard::new(device);
        gpu.bind_program(Some(resources.program.id()));
        gpu.set_shadow_uniforms(&uniforms);
        gpu.bind_framebuffer(Some(resources.framebuffer.id()));
        gpu.set_viewport(Viewport::new(self.map_size, self.map_size));
        let state = gpu.raster_state();
        gpu.set_raster_state(RasterState {
            cull,
            color_write: false,
            polygon: PolygonMode::Fill,
            ..state
        });
        gpu.clear(ClearFlags::DEPTH);

        list.draw_drawables(&mut *gpu, Mat4::IDENTITY);

        log::trace!(
            "shadow pass: {} drawables from {position}",
            list.drawables().len()
        );
        Ok(())
    }
}

impl Default for ShadowPipeline {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAP_SIZE)
    }
}

fn build_failed(error: DeviceError) -> RenderError {
    log::error!("shadow pass: {error}");
    RenderError::ResourceBuild(error)
}

impl Pipeline for ShadowPipeline {
    fn name(&self) -> &str {
        "shadow"
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn init(&mut self, device: &mut dyn RenderDevice) -> Result<bool> {
        if self.lifecycle.is_initialized() {
            return Ok(false);
        }

        let program = device
            .create_program(&ProgramDesc {
                label: "shadow".to_string(),
                kind: ProgramKind::Shadow,
                source: SHADER,
            })
            .map_err(build_failed)?;
        let depth_map = device
            .create_depth_cube("shadow cube", self.map_size)
            .map_err(build_failed)?;
        let framebuffer = device
            .create_framebuffer("shadow target", &depth_map)
            .map_err(build_failed)?;

        self.resources = Some(ShadowResources {
            program,
            framebuffer,
            depth_map,
        });
        self.lifecycle.mark_initialized();
        log::debug!("shadow pass initialized ({0}x{0} cube)", self.map_size);
        Ok(true)
    }

    fn free(&mut self) -> Result<()> {
        // A dirty pass still owns the resources of its last build.
        if self.resources.is_none() {
            return Err(RenderError::State(
                "shadow pass freed while not initialized".to_string(),
            ));
        }
        self.resources = None;
        self.lifecycle.mark_freed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BlendMode, Command, RecordingDevice};
    use crate::mesh::{Material, Mesh, MeshData};
    use crate::scene::Node;
    use glam::Vec4Swizzles;

    fn scene() -> Node {
        Node::new("root")
            .with_child(
                Node::light("lamp", Light::default())
                    .with_matrix(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0))),
            )
            .with_child(Node::drawable(
                "box",
                Mesh::new(MeshData::cube(), Material::default()),
            ))
    }

    #[test]
    fn face_views_look_along_axes() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let views = cube_face_views(position);
        for (view, (dir, up)) in views.iter().zip(CUBE_FACES) {
            // The face direction lands on the view's -Z axis.
            let ahead = *view * (position + dir).extend(1.0);
            assert!(ahead.xyz().abs_diff_eq(Vec3::NEG_Z, 1e-5));
            // The up vector maps onto +Y.
            assert!(view.transform_vector3(up).abs_diff_eq(Vec3::Y, 1e-5));
        }
    }

    #[test]
    fn empty_list_touches_nothing() {
        let mut device = RecordingDevice::new(64, 64);
        let mut shadow = ShadowPipeline::new(32);
        let list = RenderList::new();

        let err = shadow
            .render(&mut device, Mat4::IDENTITY, &Light::default(), &list)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(device.resources_created(), 0);
        assert!(device.commands().is_empty());
        assert!(shadow.needs_init());
    }

    #[test]
    fn renders_back_faces_depth_only_then_restores() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();
        let light = list.lights()[0];

        let mut device = RecordingDevice::new(640, 480);
        let mut shadow = ShadowPipeline::new(32);
        shadow
            .render(&mut device, light.matrix.inverse(), light.item, &list)
            .unwrap();

        let draw = device.draws().next().cloned().unwrap();
        let Command::Draw {
            framebuffer,
            raster,
            program,
            ..
        } = draw
        else {
            unreachable!()
        };
        assert!(framebuffer.is_some());
        assert!(program.is_some());
        assert_eq!(raster.cull, CullMode::Front);
        assert!(!raster.color_write);
        assert_eq!(device.draw_count(), 1);

        let uniforms = device
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::ShadowUniforms(u) => Some(*u),
                _ => None,
            })
            .unwrap();
        assert!(uniforms.light_position.abs_diff_eq(Vec3::new(0.0, 5.0, 0.0), 1e-5));
        assert_eq!(uniforms.far_plane, light.item.far_plane());

        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.bound_program(), None);
        assert_eq!(device.viewport(), Viewport::new(640, 480));
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn keeps_caller_blend_and_honors_culling_toggle() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        device.set_blend(BlendMode::Additive);
        let mut shadow = ShadowPipeline::new(32);
        shadow.set_front_face_culling(false);
        shadow
            .render(&mut device, Mat4::IDENTITY, &Light::default(), &list)
            .unwrap();

        let Some(Command::Draw { raster, .. }) = device.draws().next() else {
            unreachable!()
        };
        assert_eq!(raster.cull, CullMode::Back);
        assert_eq!(device.raster_state().blend, BlendMode::Additive);
    }

    #[test]
    fn failed_validation_stays_dirty_and_retries() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        device.fail_framebuffer_validation(true);
        let mut shadow = ShadowPipeline::new(32);

        let err = shadow
            .render(&mut device, Mat4::IDENTITY, &Light::default(), &list)
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceBuild(_)));
        assert!(shadow.needs_init());
        assert!(shadow.shadow_map().is_none());
        // Program and cube built before the failure were released.
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.draw_count(), 0);

        device.fail_framebuffer_validation(false);
        shadow
            .render(&mut device, Mat4::IDENTITY, &Light::default(), &list)
            .unwrap();
        assert!(shadow.is_initialized());
        assert_eq!(device.live_resources(), 3);
    }

    #[test]
    fn free_releases_once_and_resizing_rebuilds() {
        let mut device = RecordingDevice::new(64, 64);
        let mut shadow = ShadowPipeline::new(32);
        assert!(matches!(shadow.free(), Err(RenderError::State(_))));

        assert!(shadow.init(&mut device).unwrap());
        assert!(!shadow.init(&mut device).unwrap());
        assert_eq!(device.resources_created(), 3);

        shadow.set_map_size(64);
        assert!(shadow.needs_init());
        assert!(shadow.init(&mut device).unwrap());
        assert_eq!(shadow.shadow_map().unwrap().size(), 64);
        assert_eq!(device.live_resources(), 3);

        shadow.free().unwrap();
        assert!(shadow.free().is_err());
        drop(shadow);
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.releases().len(), 6);
    }
}
