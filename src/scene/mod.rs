//! Scene graph: named transform nodes, lights, and traversal.
//!
//! A scene is an owned tree of [`Node`]s. Each node carries a local matrix and
//! a [`NodeRole`] saying whether it is a light, a drawable, or purely
//! structural. World matrices are never stored; [`traverse`] recomputes them
//! on every walk, so moving a parent moves its whole subtree on the next frame.
//!
//! # Example
//!
//! ```
//! use penumbra::*;
//!
//! let mut graph = SceneGraph::new(
//!     Node::new("root")
//!         .with_child(Node::light("Omni001", Light::default())
//!             .with_matrix(Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0))))
//!         .with_child(Node::drawable("floor", Mesh::new(MeshData::plane(20.0), Material::default()))),
//! );
//!
//! // Move the light between frames.
//! graph.find_mut("Omni001")?.set_matrix(Mat4::from_translation(Vec3::new(2.0, 10.0, 0.0)));
//! # Ok::<(), penumbra::RenderError>(())
//! ```

mod graph;
mod light;
mod loader;
mod node;

pub use graph::{SceneGraph, traverse};
pub use light::{Light, LightProjection};
pub use loader::{MaterialDesc, NodeDesc, NodeKind, SceneDesc, SceneLoader};
pub use node::{Node, NodeRole};
