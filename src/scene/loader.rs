//! TOML scene descriptions.
//!
//! ```toml
//! name = "world"
//!
//! [[nodes]]
//! name = "Omni001"
//! kind = "light"
//! translation = [0.0, 10.0, 0.0]
//! color = [1.0, 0.9, 0.8]
//!
//! [[nodes]]
//! name = "floor"
//! kind = "plane"
//! size = 40.0
//! material = { albedo = [0.6, 0.6, 0.6], roughness = 0.9 }
//!
//! [[nodes]]
//! name = "table"
//! translation = [0.0, 1.0, 0.0]
//!
//! [[nodes.children]]
//! name = "teapot"
//! kind = "stl"
//! path = "teapot.stl"
//! ```

use std::path::{Path, PathBuf};

use glam::{EulerRot, Quat, Vec3};
use serde::Deserialize;

use super::graph::SceneGraph;
use super::light::{Light, LightProjection};
use super::node::{Node, NodeRole};
use crate::config::{ConfigError, LightConfig};
use crate::geometry::GeometryLoader;
use crate::mesh::{Material, Mesh, MeshData, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Node,
    Light,
    Cube,
    Sphere,
    Plane,
    Stl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub albedo: [f32; 3],
    pub emission: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        let material = Material::default();
        Self {
            albedo: material.albedo.into(),
            emission: material.emission.into(),
            roughness: material.roughness,
            metalness: material.metalness,
        }
    }
}

impl From<&MaterialDesc> for Material {
    fn from(desc: &MaterialDesc) -> Self {
        Material::default()
            .albedo(desc.albedo.into())
            .emission(desc.emission.into())
            .roughness(desc.roughness)
            .metalness(desc.metalness)
    }
}

/// One node of a scene description.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDesc {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub translation: [f32; 3],
    /// XYZ euler angles in degrees.
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],

    // light
    pub color: Option<[f32; 3]>,
    pub ambient: Option<[f32; 3]>,
    pub fov_degrees: Option<f32>,
    pub near: Option<f32>,
    pub far: Option<f32>,

    // geometry
    pub size: Option<f32>,
    pub segments: Option<u32>,
    pub rings: Option<u32>,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub material: MaterialDesc,

    #[serde(default)]
    pub children: Vec<NodeDesc>,
}

fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

/// A whole scene: a root name and its top-level nodes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneDesc {
    pub name: String,
    pub nodes: Vec<NodeDesc>,
}

impl Default for SceneDesc {
    fn default() -> Self {
        Self {
            name: "root".to_string(),
            nodes: Vec::new(),
        }
    }
}

/// Builds scene graphs from descriptions.
///
/// Relative STL paths resolve against `base_dir`; lights without explicit
/// planes get the projection from `light_defaults`.
pub struct SceneLoader {
    base_dir: PathBuf,
    light_defaults: LightConfig,
}

impl SceneLoader {
    pub fn new(base_dir: impl Into<PathBuf>, light_defaults: LightConfig) -> Self {
        Self {
            base_dir: base_dir.into(),
            light_defaults,
        }
    }

    /// Reads a scene file, resolving meshes relative to its directory.
    pub fn load_file(
        path: impl AsRef<Path>,
        light_defaults: LightConfig,
    ) -> Result<SceneGraph, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let graph = Self::new(base_dir, light_defaults).load_str(&text)?;
        log::info!(
            "loaded scene {} ({} nodes)",
            path.display(),
            graph.node_count()
        );
        Ok(graph)
    }

    pub fn load_str(&self, text: &str) -> Result<SceneGraph, ConfigError> {
        let desc: SceneDesc = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        self.build(&desc)
    }

    pub fn build(&self, desc: &SceneDesc) -> Result<SceneGraph, ConfigError> {
        let mut root = Node::new(desc.name.clone());
        for node in &desc.nodes {
            root.add_child(self.build_node(node)?);
        }
        Ok(SceneGraph::new(root))
    }

    fn build_node(&self, desc: &NodeDesc) -> Result<Node, ConfigError> {
        let role = match desc.kind {
            NodeKind::Node => NodeRole::Structural,
            NodeKind::Light => NodeRole::Light(self.light(desc)),
            kind => NodeRole::Drawable(Mesh::new(
                self.geometry(kind, desc)?,
                Material::from(&desc.material),
            )),
        };

        let [rx, ry, rz] = desc.rotation.map(f32::to_radians);
        let local = Transform::from_position(desc.translation.into())
            .rotation(Quat::from_euler(EulerRot::XYZ, rx, ry, rz))
            .scale(desc.scale.into())
            .matrix();

        let mut node = Node::with_role(desc.name.clone(), role).with_matrix(local);
        for child in &desc.children {
            node.add_child(self.build_node(child)?);
        }
        Ok(node)
    }

    fn light(&self, desc: &NodeDesc) -> Light {
        let defaults = Light::default();
        let mut fov = desc.fov_degrees.unwrap_or(self.light_defaults.fov_degrees);
        if (fov - LightProjection::CUBE_FACE_FOV_DEGREES).abs() > 1e-3 {
            log::warn!("light '{}' fov {fov} degrees reset to 90", desc.name);
            fov = LightProjection::CUBE_FACE_FOV_DEGREES;
        }
        let projection = LightProjection {
            fov_y: fov.to_radians(),
            near: desc.near.unwrap_or(self.light_defaults.near),
            far: desc.far.unwrap_or(self.light_defaults.far),
        };
        Light::new(
            desc.color.map(Vec3::from).unwrap_or(defaults.color),
            desc.ambient.map(Vec3::from).unwrap_or(defaults.ambient),
        )
        .with_projection(projection)
    }

    fn geometry(&self, kind: NodeKind, desc: &NodeDesc) -> Result<MeshData, ConfigError> {
        Ok(match kind {
            NodeKind::Cube => MeshData::cube(),
            NodeKind::Sphere => {
                MeshData::sphere(desc.segments.unwrap_or(32), desc.rings.unwrap_or(16))
            }
            NodeKind::Plane => MeshData::plane(desc.size.unwrap_or(1.0)),
            NodeKind::Stl => {
                let path = desc.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!("stl node '{}' has no path", desc.name))
                })?;
                GeometryLoader::from_stl(self.base_dir.join(path))
                    .smooth_normals()
                    .build()?
            }
            NodeKind::Node | NodeKind::Light => {
                return Err(ConfigError::Invalid(format!(
                    "node '{}' has no geometry",
                    desc.name
                )));
            }
        })
    }
}
