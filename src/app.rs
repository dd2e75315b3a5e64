//! Window runner for the demo.
//!
//! [`run`] opens a window, creates a [`WgpuDevice`] for it and drives one
//! frame per redraw: controls, render list, lit pass, present. The scene is
//! owned by the runner so keyboard controls can move lights between frames.

use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec3};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::KeyCode;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::device::{ClearFlags, RenderDevice, WgpuDevice};
use crate::error::{RenderError, Result};
use crate::gpu::GpuContext;
use crate::input::Input;
use crate::orbit_camera::OrbitCamera;
use crate::pipeline::DefaultPipeline;
use crate::render_list::RenderList;
use crate::scene::SceneGraph;

/// Name of the light the movement keys act on.
pub const CONTROLLED_LIGHT: &str = "Omni001";

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];
const LIGHT_STEP: f32 = 1.0;
const BIAS_STEP: f32 = 0.05;
const PCF_STEP: f32 = 2.0;

/// Applies this frame's key presses to the pipeline tunables and the scene.
///
/// | key | action |
/// |-----|--------|
/// | `W` | toggle wireframe |
/// | `D` | toggle depth visualisation |
/// | `Space` | toggle front-face culling in the shadow pass |
/// | `I` / `K` | move `Omni001` up / down |
/// | `J` / `L` | move `Omni001` along +X / -X |
/// | `C` / `V` | acne bias -0.05 / +0.05 |
/// | `Y` / `X` | PCF radius scale +2 / -2 |
///
/// Returns `true` when `Escape` asks to quit.
pub fn apply_controls(input: &Input, pipeline: &mut DefaultPipeline, scene: &mut SceneGraph) -> bool {
    if input.key_pressed(KeyCode::KeyW) {
        pipeline.set_wireframe(!pipeline.wireframe());
    }
    if input.key_pressed(KeyCode::KeyD) {
        pipeline.set_depth_debug(!pipeline.depth_debug());
    }
    if input.key_pressed(KeyCode::Space) {
        pipeline.set_front_face_culling(!pipeline.front_face_culling());
    }
    if input.key_pressed(KeyCode::KeyC) {
        pipeline.incr_bias(-BIAS_STEP);
    }
    if input.key_pressed(KeyCode::KeyV) {
        pipeline.incr_bias(BIAS_STEP);
    }
    if input.key_pressed(KeyCode::KeyY) {
        pipeline.incr_pcf_radius(PCF_STEP);
    }
    if input.key_pressed(KeyCode::KeyX) {
        pipeline.incr_pcf_radius(-PCF_STEP);
    }

    let moves = [
        (KeyCode::KeyI, Vec3::Y),
        (KeyCode::KeyK, Vec3::NEG_Y),
        (KeyCode::KeyJ, Vec3::X),
        (KeyCode::KeyL, Vec3::NEG_X),
    ];
    for (key, direction) in moves {
        if input.key_pressed(key) {
            move_light(scene, direction * LIGHT_STEP);
        }
    }

    input.key_pressed(KeyCode::Escape)
}

/// Translates the controlled light in its own frame.
fn move_light(scene: &mut SceneGraph, step: Vec3) {
    match scene.find_mut(CONTROLLED_LIGHT) {
        Ok(node) => {
            let matrix = node.matrix() * Mat4::from_translation(step);
            node.set_matrix(matrix);
            log::info!(
                "{CONTROLLED_LIGHT} moved to {:?}",
                matrix.w_axis.truncate()
            );
        }
        Err(e) => log::warn!("cannot move light: {e}"),
    }
}

/// Opens a window and renders `scene` until it is closed.
///
/// Blocks the calling thread. Window or GPU setup failures end the loop and
/// are returned; per-frame failures are logged and the loop continues.
pub fn run(config: RendererConfig, scene: SceneGraph) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|e| RenderError::Window(e.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PenumbraApp::Pending {
        config,
        scene: Some(scene),
        error: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| RenderError::Window(e.to_string()))?;

    match app {
        PenumbraApp::Pending { error: Some(e), .. } => Err(e),
        _ => Ok(()),
    }
}

enum PenumbraApp {
    Pending {
        config: RendererConfig,
        scene: Option<SceneGraph>,
        error: Option<RenderError>,
    },
    Running(Box<Running>),
}

struct Running {
    window: Arc<Window>,
    device: WgpuDevice,
    pipeline: DefaultPipeline,
    scene: SceneGraph,
    orbit: OrbitCamera,
    input: Input,
    last_frame: Instant,
    last_error: Option<String>,
}

impl Running {
    fn start(
        event_loop: &ActiveEventLoop,
        config: &RendererConfig,
        scene: SceneGraph,
    ) -> Result<Self> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.window.title)
            .with_inner_size(winit::dpi::LogicalSize::new(
                config.window.width,
                config.window.height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| RenderError::Window(e.to_string()))?,
        );

        let gpu = GpuContext::new(window.clone())?;
        let device = WgpuDevice::new(gpu);

        log::info!("scene graph:\n{}", scene.tree_string());
        let orbit = OrbitCamera::new(Camera::from_config(&config.camera));

        Ok(Self {
            window,
            device,
            pipeline: DefaultPipeline::from_config(config),
            scene,
            orbit,
            input: Input::new(),
            last_frame: Instant::now(),
            last_error: None,
        })
    }

    fn frame(&mut self) -> Result<()> {
        let camera = self.orbit.camera();
        let aspect = self.device.gpu().aspect();

        let mut list = RenderList::new();
        list.process(self.scene.root())?;

        self.device.bind_screen();
        self.device.clear(ClearFlags::color_and_depth(CLEAR_COLOR));
        let rendered = self.pipeline.render(
            &mut self.device,
            camera.view(),
            camera.projection(aspect),
            &list,
        );
        // Present even after a failed pass so the cleared frame reaches the screen.
        self.device.present().map_err(RenderError::Surface)?;
        rendered
    }

    /// Logs a frame failure once until it changes or clears.
    fn report(&mut self, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                if self.last_error.take().is_some() {
                    log::info!("rendering recovered");
                }
            }
            Err(e) => {
                let message = e.to_string();
                if self.last_error.as_deref() != Some(message.as_str()) {
                    log::error!("frame failed: {message}");
                    self.last_error = Some(message);
                }
            }
        }
    }
}

impl ApplicationHandler for PenumbraApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let PenumbraApp::Pending {
            config,
            scene,
            error,
        } = self
        else {
            return;
        };
        let Some(graph) = scene.take() else {
            return;
        };

        match Running::start(event_loop, config, graph) {
            Ok(running) => {
                running.window.request_redraw();
                *self = PenumbraApp::Running(Box::new(running));
            }
            Err(e) => {
                log::error!("startup failed: {e}");
                *error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let PenumbraApp::Running(app) = self else {
            return;
        };

        app.input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                app.device.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(app.last_frame).as_secs_f32();
                app.last_frame = now;

                app.orbit.update(&app.input, dt);
                if apply_controls(&app.input, &mut app.pipeline, &mut app.scene) {
                    event_loop.exit();
                    return;
                }

                let outcome = app.frame();
                app.report(outcome);

                app.input.begin_frame();
                app.window.request_redraw();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Material, Mesh, MeshData};
    use crate::scene::{Light, Node};

    fn scene() -> SceneGraph {
        SceneGraph::new(
            Node::new("root")
                .with_child(
                    Node::light(CONTROLLED_LIGHT, Light::default())
                        .with_matrix(Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0))),
                )
                .with_child(Node::drawable(
                    "floor",
                    Mesh::new(MeshData::plane(10.0), Material::default()),
                )),
        )
    }

    fn light_position(scene: &SceneGraph) -> Vec3 {
        scene
            .find(CONTROLLED_LIGHT)
            .unwrap()
            .matrix()
            .w_axis
            .truncate()
    }

    #[test]
    fn toggles_fire_once_per_press() {
        let mut input = Input::new();
        let mut pipeline = DefaultPipeline::new();
        let mut scene = scene();
        let culling = pipeline.front_face_culling();

        input.press_key(KeyCode::KeyW);
        input.press_key(KeyCode::KeyD);
        input.press_key(KeyCode::Space);
        assert!(!apply_controls(&input, &mut pipeline, &mut scene));
        assert!(pipeline.wireframe());
        assert!(pipeline.depth_debug());
        assert_eq!(pipeline.front_face_culling(), !culling);

        // Held keys do not toggle again on the next frame.
        input.begin_frame();
        apply_controls(&input, &mut pipeline, &mut scene);
        assert!(pipeline.wireframe());
    }

    #[test]
    fn movement_keys_translate_light() {
        let mut input = Input::new();
        let mut pipeline = DefaultPipeline::new();
        let mut scene = scene();

        input.press_key(KeyCode::KeyI);
        input.press_key(KeyCode::KeyL);
        apply_controls(&input, &mut pipeline, &mut scene);
        assert!(light_position(&scene).abs_diff_eq(Vec3::new(-1.0, 11.0, 0.0), 1e-6));

        input.release_key(KeyCode::KeyI);
        input.release_key(KeyCode::KeyL);
        input.begin_frame();
        input.press_key(KeyCode::KeyK);
        input.press_key(KeyCode::KeyJ);
        apply_controls(&input, &mut pipeline, &mut scene);
        assert!(light_position(&scene).abs_diff_eq(Vec3::new(0.0, 10.0, 0.0), 1e-6));
    }

    #[test]
    fn tunable_keys_step_and_clamp() {
        let mut input = Input::new();
        let mut pipeline = DefaultPipeline::new();
        let mut scene = scene();
        let bias = pipeline.acne_bias();
        let pcf = pipeline.pcf_radius_scale_factor();

        input.press_key(KeyCode::KeyV);
        input.press_key(KeyCode::KeyY);
        apply_controls(&input, &mut pipeline, &mut scene);
        assert!((pipeline.acne_bias() - (bias + 0.05)).abs() < 1e-6);
        assert!((pipeline.pcf_radius_scale_factor() - (pcf + 2.0)).abs() < 1e-6);

        for _ in 0..100 {
            pipeline.incr_pcf_radius(-PCF_STEP);
            pipeline.incr_bias(-BIAS_STEP);
        }
        assert_eq!(pipeline.pcf_radius_scale_factor(), 1.0);
        assert_eq!(pipeline.acne_bias(), 0.0);
    }

    #[test]
    fn missing_light_is_not_fatal() {
        let mut input = Input::new();
        let mut pipeline = DefaultPipeline::new();
        let mut scene = SceneGraph::new(Node::new("root"));

        input.press_key(KeyCode::KeyI);
        assert!(!apply_controls(&input, &mut pipeline, &mut scene));
    }

    #[test]
    fn escape_requests_quit() {
        let mut input = Input::new();
        input.press_key(KeyCode::Escape);
        assert!(apply_controls(
            &input,
            &mut DefaultPipeline::new(),
            &mut scene()
        ));
    }
}
