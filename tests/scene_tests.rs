//! Scene graph to frame tests.
//!
//! Tests for:
//! - world matrix composition through nested nodes
//! - render list processing contract (reset, double process)
//! - scene files feeding the pipeline, including STL meshes on disk
//! - light edits between frames

use penumbra::*;

fn cube(name: &str) -> Node {
    Node::drawable(name, Mesh::new(MeshData::cube(), Material::default()))
}

fn lit_worlds(device: &RecordingDevice) -> Vec<Mat4> {
    device
        .draws()
        .filter_map(|c| match c {
            Command::Draw {
                framebuffer: None,
                world,
                ..
            } => Some(*world),
            _ => None,
        })
        .collect()
}

#[test]
fn three_levels_compose_root_first() {
    let a = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
    let b = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
    let c = Mat4::from_scale(Vec3::splat(2.0)) * Mat4::from_translation(Vec3::Z);

    let graph = SceneGraph::new(
        Node::new("root")
            .with_child(
                Node::light("L1", Light::default())
                    .with_matrix(Mat4::from_translation(Vec3::Y * 20.0)),
            )
            .with_child(
                Node::new("A").with_matrix(a).with_child(
                    Node::new("B")
                        .with_matrix(b)
                        .with_child(cube("C").with_matrix(c)),
                ),
            ),
    );

    let expected = a * b * c;
    assert!(graph.world_matrix_of("C").unwrap().abs_diff_eq(expected, 1e-5));
    assert_eq!(graph.parent_of("C").map(Node::name), Some("B"));
    assert!(graph.parent_of("root").is_none());

    let mut list = RenderList::new();
    list.process(graph.root()).unwrap();
    assert!(list.drawables()[0].matrix.abs_diff_eq(expected, 1e-5));

    let mut device = RecordingDevice::new(320, 240);
    DefaultPipeline::new()
        .render(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, &list)
        .unwrap();
    let worlds = lit_worlds(&device);
    assert_eq!(worlds.len(), 1);
    assert!(worlds[0].abs_diff_eq(expected, 1e-5));
}

#[test]
fn list_must_be_reset_between_frames() {
    let root = Node::new("root")
        .with_child(Node::light("L1", Light::default()))
        .with_child(cube("D1"));

    let mut list = RenderList::new();
    list.process(&root).unwrap();
    assert!(matches!(list.process(&root), Err(RenderError::State(_))));
    assert_eq!(list.len(), 2);

    list.reset();
    list.process(&root).unwrap();
    assert_eq!(list.len(), 2);
}

#[test]
fn lights_without_drawables_render_nothing_lit() {
    let root = Node::new("root").with_child(Node::light("L1", Light::default()));
    let mut list = RenderList::new();
    list.process(&root).unwrap();

    let mut device = RecordingDevice::new(320, 240);
    DefaultPipeline::new()
        .render(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, &list)
        .unwrap();
    assert_eq!(device.draw_count(), 0);
}

#[test]
fn drawables_without_lights_are_rejected() {
    let root = Node::new("root").with_child(cube("D1"));
    let mut list = RenderList::new();
    list.process(&root).unwrap();

    let mut device = RecordingDevice::new(320, 240);
    let result =
        DefaultPipeline::new().render(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, &list);
    assert!(matches!(result, Err(RenderError::State(_))));
    assert!(device.commands().is_empty());
}

#[test]
fn scene_file_renders_every_drawable_per_light() {
    let dir = std::env::temp_dir().join(format!("penumbra-scene-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("wedge.stl"),
        "solid wedge
facet normal 0 0 1
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 0 1 0
  endloop
endfacet
endsolid wedge
",
    )
    .unwrap();
    let scene_path = dir.join("scene.toml");
    std::fs::write(
        &scene_path,
        r#"
        name = "room"

        [[nodes]]
        name = "Omni001"
        kind = "light"
        translation = [0.0, 10.0, 0.0]

        [[nodes]]
        name = "Omni002"
        kind = "light"
        translation = [6.0, 4.0, 0.0]
        color = [0.2, 0.2, 0.5]

        [[nodes]]
        name = "floor"
        kind = "plane"
        size = 30.0

        [[nodes]]
        name = "shelf"
        translation = [0.0, 2.0, 0.0]

        [[nodes.children]]
        name = "wedge"
        kind = "stl"
        path = "wedge.stl"
        "#,
    )
    .unwrap();

    let graph = SceneLoader::load_file(&scene_path, LightConfig::default()).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(graph.light("Omni002").unwrap().color, Vec3::new(0.2, 0.2, 0.5));
    assert_eq!(graph.drawable("wedge").unwrap().data().index_count(), 3);
    assert!(matches!(graph.light("floor"), Err(RenderError::InvalidArgument(_))));
    assert!(matches!(graph.find("missing"), Err(RenderError::State(_))));

    let mut list = RenderList::new();
    list.process(graph.root()).unwrap();
    assert_eq!(list.lights().len(), 2);
    assert_eq!(list.drawables().len(), 2);

    let mut device = RecordingDevice::new(800, 600);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 8.0, 20.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 1.0, 1000.0);
    DefaultPipeline::new()
        .render(&mut device, view, projection, &list)
        .unwrap();

    // Two lights times two drawables, once into the cube and once lit.
    assert_eq!(device.draw_count(), 8);
    assert_eq!(lit_worlds(&device).len(), 4);
}

#[test]
fn moved_light_is_seen_next_frame() {
    let mut graph = SceneGraph::new(
        Node::new("root")
            .with_child(
                Node::light(CONTROLLED_LIGHT, Light::default())
                    .with_matrix(Mat4::from_translation(Vec3::Y * 5.0)),
            )
            .with_child(cube("D1")),
    );
    let mut pipeline = DefaultPipeline::new();
    let mut device = RecordingDevice::new(320, 240);

    let mut positions = Vec::new();
    for _ in 0..2 {
        {
            let mut list = RenderList::new();
            list.process(graph.root()).unwrap();
            pipeline
                .render(&mut device, Mat4::IDENTITY, Mat4::IDENTITY, &list)
                .unwrap();
        }
        positions.extend(device.take_commands().into_iter().filter_map(|c| match c {
            Command::ShadowUniforms(u) => Some(u.light_position),
            _ => None,
        }));

        let mut input = Input::new();
        input.press_key(KeyCode::KeyL);
        apply_controls(&input, &mut pipeline, &mut graph);
    }

    assert_eq!(positions.len(), 2);
    assert!(positions[0].abs_diff_eq(Vec3::new(0.0, 5.0, 0.0), 1e-5));
    assert!(positions[1].abs_diff_eq(Vec3::new(-1.0, 5.0, 0.0), 1e-5));
    // Resources are built once and reused.
    assert_eq!(device.resources_created(), 4);
}
