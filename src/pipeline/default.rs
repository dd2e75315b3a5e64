use glam::Mat4;

use super::{Lifecycle, Pipeline, ShadowPipeline};
use crate::config::RendererConfig;
use crate::device::{
    BlendMode, FrameUniforms, LightUniforms, PolygonMode, Program, ProgramDesc, ProgramKind,
    RenderDevice, SHADOW_MAP_SLOT, StateGuard,
};
use crate::error::{RenderError, Result};
use crate::render_list::RenderList;

const SHADER: &str = include_str!("../shaders/lit.wgsl");

/// Multi-light forward shading with soft cube-map shadows.
///
/// Every frame, for each light in the render list, the pipeline refreshes the
/// light's shadow cube and draws all drawables lit by that light. The first
/// light writes the base image; the rest are blended on top additively.
///
/// ```
/// use penumbra::*;
///
/// let root = Node::new("root")
///     .with_child(Node::light("L1", Light::default()))
///     .with_child(Node::drawable("D1", Mesh::new(MeshData::cube(), Material::default())));
///
/// let mut list = RenderList::new();
/// list.process(&root)?;
///
/// let mut device = RecordingDevice::new(640, 480);
/// let mut pipeline = DefaultPipeline::new();
/// let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0));
/// let projection = Mat4::perspective_rh(45f32.to_radians(), 640.0 / 480.0, 1.0, 1000.0);
/// pipeline.render(&mut device, view, projection, &list)?;
///
/// assert_eq!(device.draw_count(), 2); // shadow cube + lit pass
/// # Ok::<(), penumbra::RenderError>(())
/// ```
pub struct DefaultPipeline {
    lifecycle: Lifecycle,
    program: Option<Program>,
    shadow: ShadowPipeline,
    wireframe: bool,
    depth_debug: bool,
    acne_bias: f32,
    pcf_radius_scale_factor: f32,
}

impl DefaultPipeline {
    pub const MIN_ACNE_BIAS: f32 = 0.0;
    pub const MIN_PCF_RADIUS_SCALE_FACTOR: f32 = 1.0;

    pub fn new() -> Self {
        Self::from_config(&RendererConfig::default())
    }

    /// Builds a pipeline with the tunables and shadow settings of `config`.
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            program: None,
            shadow: ShadowPipeline::from_config(&config.shadow),
            wireframe: config.shading.wireframe,
            depth_debug: config.shading.depth_debug,
            acne_bias: config.shading.acne_bias.max(Self::MIN_ACNE_BIAS),
            pcf_radius_scale_factor: config
                .shading
                .pcf_radius_scale_factor
                .max(Self::MIN_PCF_RADIUS_SCALE_FACTOR),
        }
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn set_wireframe(&mut self, enabled: bool) {
        self.wireframe = enabled;
        log::info!("wireframe: {enabled}");
    }

    pub fn depth_debug(&self) -> bool {
        self.depth_debug
    }

    /// Shows the normalized shadow depth instead of shaded color.
    pub fn set_depth_debug(&mut self, enabled: bool) {
        self.depth_debug = enabled;
        log::info!("depth debug: {enabled}");
    }

    pub fn front_face_culling(&self) -> bool {
        self.shadow.front_face_culling()
    }

    pub fn set_front_face_culling(&mut self, enabled: bool) {
        self.shadow.set_front_face_culling(enabled);
    }

    pub fn acne_bias(&self) -> f32 {
        self.acne_bias
    }

    /// Adds `delta` to the acne bias, never going below zero.
    pub fn incr_bias(&mut self, delta: f32) {
        self.acne_bias = (self.acne_bias + delta).max(Self::MIN_ACNE_BIAS);
        log::info!("acne bias: {}", self.acne_bias);
    }

    pub fn pcf_radius_scale_factor(&self) -> f32 {
        self.pcf_radius_scale_factor
    }

    /// Adds `delta` to the PCF radius scale factor, never going below 1.
    ///
    /// Larger values tighten the sample disk and sharpen shadow edges.
    pub fn incr_pcf_radius(&mut self, delta: f32) {
        self.pcf_radius_scale_factor =
            (self.pcf_radius_scale_factor + delta).max(Self::MIN_PCF_RADIUS_SCALE_FACTOR);
        log::info!("pcf radius scale factor: {}", self.pcf_radius_scale_factor);
    }

    pub fn shadow_pipeline(&self) -> &ShadowPipeline {
        &self.shadow
    }

    pub fn shadow_pipeline_mut(&mut self) -> &mut ShadowPipeline {
        &mut self.shadow
    }

    /// Shades every drawable of `list` once per light of `list`.
    ///
    /// `view` is the inverse of the camera pose. The caller binds and clears
    /// the screen beforehand; every state this call changes is put back before
    /// it returns.
    ///
    /// Fails with [`RenderError::InvalidArgument`] for an empty list and
    /// [`RenderError::State`] for a list without lights, in both cases before
    /// the device is touched.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        view: Mat4,
        projection: Mat4,
        list: &RenderList<'_>,
    ) -> Result<()> {
        if list.is_empty() {
            log::error!("lit pass: render list is empty");
            return Err(RenderError::InvalidArgument(
                "lit pass needs a non-empty render list".to_string(),
            ));
        }
        let lights = list.lights();
        if lights.is_empty() {
            log::error!("lit pass: render list has no lights");
            return Err(RenderError::State(
                "lit pass needs at least one light".to_string(),
            ));
        }

        self.ensure_initialized(device)?;
        let program = self
            .program
            .as_ref()
            .map(Program::id)
            .ok_or_else(|| RenderError::State("lit pass has no program after init".to_string()))?;

        let eye_to_world = view.inverse();
        let mut gpu = StateGuard::new(device);
        gpu.bind_program(Some(program));
        gpu.set_frame_uniforms(&FrameUniforms {
            projection,
            camera_position: eye_to_world.w_axis.truncate(),
            light_count: lights.len() as u32,
            acne_bias: self.acne_bias,
            pcf_radius_scale_factor: self.pcf_radius_scale_factor,
            depth_debug: self.depth_debug,
        });
        if self.wireframe {
            gpu.set_polygon_mode(PolygonMode::Line);
        }

        for (index, entry) in lights.iter().enumerate() {
            if index == 1 {
                gpu.set_blend(BlendMode::Additive);
            }

            self.shadow
                .render(&mut *gpu, entry.matrix.inverse(), entry.item, list)?;
            gpu.bind_program(Some(program));

            gpu.set_light_uniforms(&LightUniforms {
                position_eye: (view * entry.matrix).w_axis.truncate(),
                position_world: entry.matrix.w_axis.truncate(),
                eye_to_world,
                far_plane: entry.item.far_plane(),
                color: entry.item.color,
                ambient: entry.item.ambient,
            });
            if let Some(map) = self.shadow.shadow_map() {
                gpu.bind_shadow_map(SHADOW_MAP_SLOT, map);
            }

            list.draw_drawables(&mut *gpu, view);
            log::trace!("lit pass: light {index} ({})", entry.name);
        }

        if lights.len() > 1 {
            gpu.set_blend(BlendMode::Disabled);
        }
        if self.wireframe {
            gpu.set_polygon_mode(PolygonMode::Fill);
        }
        Ok(())
    }
}

impl Default for DefaultPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline for DefaultPipeline {
    fn name(&self) -> &str {
        "default"
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
                label: "lit".to_string(),
                kind: ProgramKind::Lit,
                source: SHADER,
            })
            .map_err(|e| {
                log::error!("lit pass: {e}");
                RenderError::ResourceBuild(e)
            })?;
        self.shadow.init(device)?;

        self.program = Some(program);
        self.lifecycle.mark_initialized();
        log::debug!("lit pass initialized");
        Ok(true)
    }

    fn free(&mut self) -> Result<()> {
        if !self.lifecycle.is_initialized() {
            return Err(RenderError::State(
                "lit pass freed while not initialized".to_string(),
            ));
        }
        self.program = None;
        if self.shadow.shadow_map().is_some() {
            self.shadow.free()?;
        }
        self.lifecycle.mark_freed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Command, RecordingDevice};
    use crate::mesh::{Material, Mesh, MeshData};
    use crate::scene::{Light, Node};
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    fn scene(lights: usize) -> Node {
        let mut root = Node::new("root").with_child(Node::drawable(
            "box",
            Mesh::new(MeshData::cube(), Material::default()),
        ));
        for i in 0..lights {
            root.add_child(
                Node::light(format!("light{i}"), Light::default())
                    .with_matrix(Mat4::from_translation(Vec3::new(i as f32, 4.0, 0.0))),
            );
        }
        root
    }

    fn view() -> Mat4 {
        Mat4::look_at_rh(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y)
    }

    #[test]
    fn tunables_clamp_at_their_floors() {
        let mut pipeline = DefaultPipeline::new();
        assert_abs_diff_eq!(pipeline.acne_bias(), 0.05);
        pipeline.incr_bias(-1.0);
        assert_abs_diff_eq!(pipeline.acne_bias(), 0.0);
        pipeline.incr_bias(0.25);
        assert_abs_diff_eq!(pipeline.acne_bias(), 0.25);

        assert_abs_diff_eq!(pipeline.pcf_radius_scale_factor(), 16.0);
        pipeline.incr_pcf_radius(-1000.0);
        assert_abs_diff_eq!(pipeline.pcf_radius_scale_factor(), 1.0);
        pipeline.incr_pcf_radius(2.0);
        assert_abs_diff_eq!(pipeline.pcf_radius_scale_factor(), 3.0);
    }

    #[test]
    fn toggles_reach_the_shadow_pass() {
        let mut pipeline = DefaultPipeline::new();
        assert!(pipeline.front_face_culling());
        pipeline.set_front_face_culling(false);
        assert!(!pipeline.shadow_pipeline().front_face_culling());

        pipeline.set_wireframe(true);
        pipeline.set_depth_debug(true);
        assert!(pipeline.wireframe() && pipeline.depth_debug());
    }

    #[test]
    fn empty_list_creates_and_changes_nothing() {
        let mut device = RecordingDevice::new(64, 64);
        let mut pipeline = DefaultPipeline::new();
        let list = RenderList::new();

        let err = pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
        assert_eq!(device.resources_created(), 0);
        assert_eq!(device.state_changes(), 0);
    }

    #[test]
    fn list_without_lights_is_a_state_error() {
        let root = scene(0);
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        let mut pipeline = DefaultPipeline::new();
        let err = pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap_err();
        assert!(matches!(err, RenderError::State(_)));
        assert!(device.commands().is_empty());
    }

    #[test]
    fn failed_program_build_retries_next_frame() {
        let root = scene(1);
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        device.fail_program_build(Some(ProgramKind::Shadow));
        let mut pipeline = DefaultPipeline::new();

        let err = pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceBuild(_)));
        assert!(pipeline.needs_init());
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.draw_count(), 0);

        device.fail_program_build(None);
        pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap();
        assert!(pipeline.is_initialized());
        assert_eq!(device.live_resources(), 4);
    }

    #[test]
    fn light_uniforms_carry_eye_and_world_positions() {
        let root = scene(1);
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        let mut pipeline = DefaultPipeline::new();
        pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap();

        let uniforms = device
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::LightUniforms(u) => Some(*u),
                _ => None,
            })
            .unwrap();
        let world = Vec3::new(0.0, 4.0, 0.0);
        assert!(uniforms.position_world.abs_diff_eq(world, 1e-5));
        assert!(
            uniforms
                .position_eye
                .abs_diff_eq(view().transform_point3(world), 1e-4)
        );
        assert!(
            uniforms
                .eye_to_world
                .transform_point3(uniforms.position_eye)
                .abs_diff_eq(world, 1e-4)
        );
        assert_abs_diff_eq!(uniforms.far_plane, 125.0);

        let frame = device
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::FrameUniforms(f) => Some(*f),
                _ => None,
            })
            .unwrap();
        assert_eq!(frame.light_count, 1);
        assert!(
            frame
                .camera_position
                .abs_diff_eq(Vec3::new(0.0, 2.0, 10.0), 1e-4)
        );
    }

    #[test]
    fn pcf_spread_grows_with_camera_distance() {
        // The sample disk is sized from the uploaded camera position.
        assert!(SHADER.contains("distance(frame.camera_position, world_pos)"));
        assert!(!SHADER.contains("length(in.eye_pos)"));
    }

    #[test]
    fn wireframe_wraps_the_draws_and_is_restored() {
        let root = scene(2);
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        let mut pipeline = DefaultPipeline::new();
        pipeline.set_wireframe(true);
        pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap();

        let lit: Vec<_> = device
            .draws()
            .filter_map(|c| match c {
                Command::Draw {
                    framebuffer: None,
                    raster,
                    ..
                } => Some(*raster),
                _ => None,
            })
            .collect();
        assert_eq!(lit.len(), 2);
        assert!(lit.iter().all(|r| r.polygon == PolygonMode::Line));
        assert_eq!(device.raster_state().polygon, PolygonMode::Fill);
    }

    #[test]
    fn free_and_drop_release_everything_once() {
        let root = scene(1);
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(64, 64);
        let mut pipeline = DefaultPipeline::new();
        assert!(pipeline.free().is_err());
        pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap();
        assert_eq!(device.resources_created(), 4);

        pipeline.free().unwrap();
        assert_eq!(device.live_resources(), 0);
        assert!(pipeline.free().is_err());

        pipeline
            .render(&mut device, view(), Mat4::IDENTITY, &list)
            .unwrap();
        drop(pipeline);
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.releases().len(), 8);
    }
}
