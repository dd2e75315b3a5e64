use std::fmt::Write as _;

use glam::Mat4;

use super::light::Light;
use crate::mesh::Mesh;

/// What a node contributes to rendering.
///
/// Structural nodes only carry a transform; their children are still visited.
#[derive(Clone, Debug)]
pub enum NodeRole {
    Structural,
    Light(Light),
    Drawable(Mesh),
}

impl NodeRole {
    fn tag(&self) -> &'static str {
        match self {
            NodeRole::Structural => "node",
            NodeRole::Light(_) => "light",
            NodeRole::Drawable(_) => "mesh",
        }
    }
}

/// A named transform node owning its children.
///
/// Only the local matrix is stored. World matrices are recomputed by every
/// traversal (see [`traverse`](super::traverse)).
///
/// # Example
///
/// ```
/// use penumbra::{Light, Node, Vec3, Mat4};
///
/// let root = Node::new("root")
///     .with_child(
///         Node::new("arm")
///             .with_matrix(Mat4::from_translation(Vec3::X))
///             .with_child(Node::light("lamp", Light::default())),
///     );
/// assert!(root.find("lamp").is_some());
/// assert_eq!(root.node_count(), 3);
/// ```
#[derive(Clone, Debug)]
pub struct Node {
    name: String,
    local: Mat4,
    role: NodeRole,
    children: Vec<Node>,
}

impl Node {
    /// Creates a structural node with an identity transform.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_role(name, NodeRole::Structural)
    }

    pub fn light(name: impl Into<String>, light: Light) -> Self {
        Self::with_role(name, NodeRole::Light(light))
    }

    pub fn drawable(name: impl Into<String>, mesh: Mesh) -> Self {
        Self::with_role(name, NodeRole::Drawable(mesh))
    }

    pub fn with_role(name: impl Into<String>, role: NodeRole) -> Self {
        Self {
            name: name.into(),
            local: Mat4::IDENTITY,
            role,
            children: Vec::new(),
        }
    }

    pub fn with_matrix(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local transform relative to the parent.
    pub fn matrix(&self) -> Mat4 {
        self.local
    }

    pub fn set_matrix(&mut self, local: Mat4) {
        self.local = local;
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    pub fn role_mut(&mut self) -> &mut NodeRole {
        &mut self.role
    }

    pub fn as_light(&self) -> Option<&Light> {
        match &self.role {
            NodeRole::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.role {
            NodeRole::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_drawable(&self) -> Option<&Mesh> {
        match &self.role {
            NodeRole::Drawable(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_drawable_mut(&mut self) -> Option<&mut Mesh> {
        match &mut self.role {
            NodeRole::Drawable(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }

    /// Appends a child and returns a reference to it.
    pub fn add_child(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Detaches the first direct child called `name`, along with its subtree.
    pub fn remove_child(&mut self, name: &str) -> Option<Node> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Depth-first, pre-order search by name. The first match wins.
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(name))
    }

    /// The chain of nodes from `self` down to the node called `name`, both
    /// ends included.
    pub fn path_to(&self, name: &str) -> Option<Vec<&Node>> {
        if self.name == name {
            return Some(vec![self]);
        }
        self.children.iter().find_map(|child| {
            child.path_to(name).map(|mut path| {
                path.insert(0, self);
                path
            })
        })
    }

    /// Number of nodes in this subtree, `self` included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Node::node_count).sum::<usize>()
    }

    /// Indented dump of the subtree, one node per line.
    pub fn tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{}{} [{}]", "  ".repeat(depth), self.name, self.role.tag());
        for child in &self.children {
            child.write_tree(out, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Material, MeshData};

    fn sample() -> Node {
        Node::new("root")
            .with_child(
                Node::new("a")
                    .with_child(Node::light("lamp", Light::default()))
                    .with_child(Node::new("a2")),
            )
            .with_child(Node::drawable(
                "box",
                Mesh::new(MeshData::cube(), Material::default()),
            ))
    }

    #[test]
    fn find_searches_depth_first() {
        let root = sample();
        assert!(root.find("lamp").and_then(Node::as_light).is_some());
        assert!(root.find("box").and_then(Node::as_drawable).is_some());
        assert!(root.find("missing").is_none());
    }

    #[test]
    fn path_includes_both_ends() {
        let root = sample();
        let names: Vec<_> = root
            .path_to("lamp")
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        assert_eq!(names, ["root", "a", "lamp"]);
    }

    #[test]
    fn remove_child_detaches_subtree() {
        let mut root = sample();
        let a = root.remove_child("a").unwrap();
        assert_eq!(a.node_count(), 3);
        assert_eq!(root.node_count(), 2);
        assert!(root.find("lamp").is_none());
    }

    #[test]
    fn tree_string_indents_children() {
        let dump = sample().tree_string();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines[0], "root [node]");
        assert_eq!(lines[2], "    lamp [light]");
        assert_eq!(lines[4], "  box [mesh]");
    }
}
