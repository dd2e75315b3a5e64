use glam::Mat4;

use super::light::Light;
use super::node::Node;
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;

/// Walks the tree depth-first in pre-order, handing every node its world
/// matrix before descending into its children.
///
/// `base` is the matrix the root's local transform is composed onto; pass
/// [`Mat4::IDENTITY`] for a tree that is not embedded in anything. Children
/// are visited in their stored order and the tree itself is never modified.
///
/// ```
/// use penumbra::{traverse, Mat4, Node, Vec3};
///
/// let root = Node::new("root")
///     .with_matrix(Mat4::from_translation(Vec3::X))
///     .with_child(Node::new("child").with_matrix(Mat4::from_translation(Vec3::Y)));
///
/// let mut seen = Vec::new();
/// traverse(&root, Mat4::IDENTITY, &mut |node, world| {
///     seen.push((node.name().to_string(), world.w_axis.truncate()));
/// });
/// assert_eq!(seen[1], ("child".to_string(), Vec3::new(1.0, 1.0, 0.0)));
/// ```
pub fn traverse<'a, F>(root: &'a Node, base: Mat4, visit: &mut F)
where
    F: FnMut(&'a Node, Mat4),
{
    let world = base * root.matrix();
    visit(root, world);
    for child in root.children() {
        traverse(child, world, visit);
    }
}

/// Owns the root of a scene and answers name lookups.
///
/// Names are expected to be unique; when they are not, lookups return the
/// first node in traversal order.
#[derive(Clone, Debug)]
pub struct SceneGraph {
    root: Node,
}

impl SceneGraph {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    /// Looks up a node by name.
    pub fn find(&self, name: &str) -> Result<&Node> {
        self.root.find(name).ok_or_else(|| missing(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.root.find_mut(name).ok_or_else(|| missing(name))
    }

    /// Looks up a light by node name.
    pub fn light(&self, name: &str) -> Result<&Light> {
        self.find(name)?
            .as_light()
            .ok_or_else(|| wrong_role(name, "light"))
    }

    pub fn light_mut(&mut self, name: &str) -> Result<&mut Light> {
        self.find_mut(name)?
            .as_light_mut()
            .ok_or_else(|| wrong_role(name, "light"))
    }

    /// Looks up a drawable by node name.
    pub fn drawable(&self, name: &str) -> Result<&Mesh> {
        self.find(name)?
            .as_drawable()
            .ok_or_else(|| wrong_role(name, "drawable"))
    }

    pub fn drawable_mut(&mut self, name: &str) -> Result<&mut Mesh> {
        self.find_mut(name)?
            .as_drawable_mut()
            .ok_or_else(|| wrong_role(name, "drawable"))
    }

    /// Parent of the named node. `None` for the root or an unknown name.
    pub fn parent_of(&self, name: &str) -> Option<&Node> {
        let path = self.root.path_to(name)?;
        path.len().checked_sub(2).map(|i| path[i])
    }

    /// World matrix of the named node, composed root-first.
    pub fn world_matrix_of(&self, name: &str) -> Result<Mat4> {
        let path = self.root.path_to(name).ok_or_else(|| missing(name))?;
        Ok(path
            .iter()
            .fold(Mat4::IDENTITY, |world, node| world * node.matrix()))
    }

    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    pub fn tree_string(&self) -> String {
        self.root.tree_string()
    }
}

fn missing(name: &str) -> RenderError {
    log::error!("scene has no node named '{name}'");
    RenderError::State(format!("no node named '{name}'"))
}

fn wrong_role(name: &str, expected: &str) -> RenderError {
    log::error!("node '{name}' is not a {expected}");
    RenderError::InvalidArgument(format!("node '{name}' is not a {expected}"))
}
