use std::process::ExitCode;

use penumbra::{
    Light, LightProjection, Mat4, Material, Mesh, MeshData, Node, Quat, RendererConfig,
    SceneGraph, SceneLoader, Vec3,
};

const CONFIG_PATH: &str = "penumbra.toml";

fn main() -> ExitCode {
    let config = RendererConfig::load_or_default(CONFIG_PATH);
    let filter = config
        .as_ref()
        .map(|c| c.log_filter.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match config {
        Ok(config) => config.validated(),
        Err(e) => {
            log::error!("cannot load {CONFIG_PATH}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let scene = match std::env::args().nth(1) {
        Some(path) => match SceneLoader::load_file(&path, config.light.clone()) {
            Ok(scene) => scene,
            Err(e) => {
                log::error!("cannot load scene {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => default_scene(&config),
    };

    match penumbra::run(config, scene) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// A floor with a few props and two lights.
fn default_scene(config: &RendererConfig) -> SceneGraph {
    let projection = LightProjection::from(&config.light);
    let key = Light::new(Vec3::new(1.0, 0.95, 0.85), Vec3::splat(0.08)).with_projection(projection);
    let fill = Light::new(Vec3::new(0.25, 0.3, 0.45), Vec3::ZERO).with_projection(projection);

    let grey = Material::default()
        .albedo(Vec3::splat(0.7))
        .roughness(0.9);
    let red = Material::default()
        .albedo(Vec3::new(0.8, 0.2, 0.15))
        .roughness(0.4);
    let blue = Material::default()
        .albedo(Vec3::new(0.2, 0.35, 0.8))
        .roughness(0.2);

    let pedestal = Node::new("pedestal")
        .with_matrix(Mat4::from_translation(Vec3::new(4.0, 0.0, -3.0)))
        .with_child(
            Node::drawable("column", Mesh::new(MeshData::cube(), grey))
                .with_matrix(Mat4::from_scale_rotation_translation(
                    Vec3::new(1.5, 4.0, 1.5),
                    Quat::IDENTITY,
                    Vec3::new(0.0, 2.0, 0.0),
                )),
        )
        .with_child(
            Node::drawable("ball", Mesh::new(MeshData::sphere(32, 16), blue))
                .with_matrix(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0))),
        );

    let root = Node::new("root")
        .with_child(
            Node::light("Omni001", key)
                .with_matrix(Mat4::from_translation(Vec3::new(-2.0, 12.0, 4.0))),
        )
        .with_child(
            Node::light("Omni002", fill)
                .with_matrix(Mat4::from_translation(Vec3::new(14.0, 8.0, 10.0))),
        )
        .with_child(Node::drawable("floor", Mesh::new(MeshData::plane(60.0), grey)))
        .with_child(
            Node::drawable("crate", Mesh::new(MeshData::cube(), red)).with_matrix(
                Mat4::from_scale_rotation_translation(
                    Vec3::splat(3.0),
                    Quat::from_rotation_y(0.6),
                    Vec3::new(-5.0, 1.5, 2.0),
                ),
            ),
        )
        .with_child(pedestal);

    SceneGraph::new(root)
}
