//! Per-frame flattening of the scene graph.
//!
//! A [`RenderList`] is rebuilt every frame: [`reset`](RenderList::reset), then
//! [`process`](RenderList::process) the root. The result holds borrowed
//! references into the scene, so the borrow checker keeps the scene alive and
//! unmodified for as long as the list is in use.
//!
//! ```
//! use penumbra::*;
//!
//! let root = Node::new("root")
//!     .with_child(Node::light("L1", Light::default()))
//!     .with_child(Node::drawable("D1", Mesh::new(MeshData::cube(), Material::default())));
//!
//! let mut list = RenderList::new();
//! list.reset();
//! list.process(&root)?;
//! assert_eq!(list.lights().len(), 1);
//! assert_eq!(list.drawables().len(), 1);
//! # Ok::<(), penumbra::RenderError>(())
//! ```

use glam::{Mat3, Mat4};

use crate::device::{DrawItem, RenderDevice};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::scene::{Light, Node, NodeRole, traverse};

/// A renderable reference paired with its world matrix at traversal time.
#[derive(Debug)]
pub struct RenderEntry<'a, T> {
    pub name: &'a str,
    pub item: &'a T,
    pub matrix: Mat4,
}

impl<T> Clone for RenderEntry<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RenderEntry<'_, T> {}

pub type LightEntry<'a> = RenderEntry<'a, Light>;
pub type DrawableEntry<'a> = RenderEntry<'a, Mesh>;

/// Either kind of list entry, as yielded by [`RenderList::entries`].
#[derive(Clone, Copy, Debug)]
pub enum Renderable<'a> {
    Light(LightEntry<'a>),
    Drawable(DrawableEntry<'a>),
}

/// Lights and drawables reachable from a root, each in traversal order.
#[derive(Debug, Default)]
pub struct RenderList<'a> {
    lights: Vec<LightEntry<'a>>,
    drawables: Vec<DrawableEntry<'a>>,
    processed: bool,
}

impl<'a> RenderList<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry. Safe to call any number of times.
    pub fn reset(&mut self) {
        self.lights.clear();
        self.drawables.clear();
        self.processed = false;
    }

    /// Collects lights and drawables under `root`.
    ///
    /// Structural nodes add nothing but their children are still visited.
    /// Processing again without a [`reset`](Self::reset) in between is
    /// rejected with [`RenderError::State`] and leaves the list unchanged.
    pub fn process(&mut self, root: &'a Node) -> Result<()> {
        self.process_with_base(root, Mat4::IDENTITY)
    }

    /// Like [`process`](Self::process), composing every world matrix onto `base`.
    pub fn process_with_base(&mut self, root: &'a Node, base: Mat4) -> Result<()> {
        if self.processed {
            log::error!("render list processed twice without a reset");
            return Err(RenderError::State(
                "render list must be reset before processing".to_string(),
            ));
        }

        traverse(root, base, &mut |node: &'a Node, matrix| match node.role() {
            NodeRole::Light(light) => self.lights.push(RenderEntry {
                name: node.name(),
                item: light,
                matrix,
            }),
            NodeRole::Drawable(mesh) => self.drawables.push(RenderEntry {
                name: node.name(),
                item: mesh,
                matrix,
            }),
            NodeRole::Structural => {}
        });
        self.processed = true;

        log::trace!(
            "render list: {} lights, {} drawables",
            self.lights.len(),
            self.drawables.len()
        );
        Ok(())
    }

    pub fn lights(&self) -> &[LightEntry<'a>] {
        &self.lights
    }

    pub fn drawables(&self) -> &[DrawableEntry<'a>] {
        &self.drawables
    }

    /// Lights first, then drawables.
    pub fn entries(&self) -> impl Iterator<Item = Renderable<'a>> + '_ {
        self.lights
            .iter()
            .copied()
            .map(Renderable::Light)
            .chain(self.drawables.iter().copied().map(Renderable::Drawable))
    }

    pub fn len(&self) -> usize {
        self.lights.len() + self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issues one draw per drawable, composing model-view with `view`.
    pub fn draw_drawables(&self, device: &mut dyn RenderDevice, view: Mat4) {
        for entry in &self.drawables {
            let model_view = view * entry.matrix;
            device.draw(&DrawItem {
                mesh: entry.item.data(),
                material: entry.item.material(),
                world: entry.matrix,
                model_view,
                normal_matrix: Mat3::from_mat4(model_view).inverse().transpose(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Command, RecordingDevice};
    use crate::mesh::{Material, MeshData};
    use glam::Vec3;

    fn cube(name: &str) -> Node {
        Node::drawable(name, Mesh::new(MeshData::cube(), Material::default()))
    }

    fn scene() -> Node {
        Node::new("root")
            .with_child(cube("d1"))
            .with_child(
                Node::new("group")
                    .with_matrix(Mat4::from_translation(Vec3::X))
                    .with_child(Node::light("l1", Light::default()))
                    .with_child(cube("d2")),
            )
            .with_child(Node::light("l2", Light::default()))
    }

    #[test]
    fn partitions_in_traversal_order() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let lights: Vec<_> = list.lights().iter().map(|e| e.name).collect();
        let drawables: Vec<_> = list.drawables().iter().map(|e| e.name).collect();
        assert_eq!(lights, ["l1", "l2"]);
        assert_eq!(drawables, ["d1", "d2"]);
        assert_eq!(list.len(), 4);

        assert_eq!(list.lights()[0].matrix, Mat4::from_translation(Vec3::X));
        assert_eq!(list.drawables()[0].matrix, Mat4::IDENTITY);

        let order: Vec<_> = list
            .entries()
            .map(|e| match e {
                Renderable::Light(l) => l.name,
                Renderable::Drawable(d) => d.name,
            })
            .collect();
        assert_eq!(order, ["l1", "l2", "d1", "d2"]);
    }

    #[test]
    fn second_process_without_reset_is_rejected() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();
        assert!(matches!(list.process(&root), Err(RenderError::State(_))));
        assert_eq!(list.len(), 4);

        list.reset();
        list.reset();
        assert!(list.is_empty());
        list.process(&root).unwrap();
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn draws_every_drawable_with_world_matrix() {
        let root = scene();
        let mut list = RenderList::new();
        list.process(&root).unwrap();

        let mut device = RecordingDevice::new(32, 32);
        list.draw_drawables(&mut device, Mat4::IDENTITY);

        let worlds: Vec<_> = device
            .draws()
            .map(|c| match c {
                Command::Draw { world, .. } => *world,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            worlds,
            [Mat4::IDENTITY, Mat4::from_translation(Vec3::X)]
        );
    }
}
