use std::cell::RefCell;
use std::rc::Rc;

use super::ProgramKind;

/// Device-assigned identifier of a GPU resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Program,
    DepthCube,
    Framebuffer,
}

/// Releases queued by dropped handles, drained by the owning device.
///
/// The queue is shared between a device and every handle it created, so a
/// handle can outlive a borrow of the device and still be freed.
#[derive(Clone, Debug, Default)]
pub struct ReleaseQueue(Rc<RefCell<Vec<(ResourceKind, ResourceId)>>>);

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a freshly created resource in an owning handle.
    pub fn handle(&self, kind: ResourceKind, id: ResourceId) -> ResourceHandle {
        ResourceHandle {
            id,
            kind,
            queue: self.clone(),
        }
    }

    /// Takes every pending release, oldest first.
    pub fn drain(&self) -> Vec<(ResourceKind, ResourceId)> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Owns one device resource; queues its release when dropped.
#[derive(Debug)]
pub struct ResourceHandle {
    id: ResourceId,
    kind: ResourceKind,
    queue: ReleaseQueue,
}

impl ResourceHandle {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        log::trace!("releasing {:?} {:?}", self.kind, self.id);
        self.queue.0.borrow_mut().push((self.kind, self.id));
    }
}

/// A linked shader program.
#[derive(Debug)]
pub struct Program {
    handle: ResourceHandle,
    kind: ProgramKind,
}

impl Program {
    pub fn new(handle: ResourceHandle, kind: ProgramKind) -> Self {
        Self { handle, kind }
    }

    pub fn id(&self) -> ResourceId {
        self.handle.id()
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }
}

/// A square depth texture with six layers, sampled as a cube.
#[derive(Debug)]
pub struct DepthCubeMap {
    handle: ResourceHandle,
    size: u32,
}

impl DepthCubeMap {
    pub fn new(handle: ResourceHandle, size: u32) -> Self {
        Self { handle, size }
    }

    pub fn id(&self) -> ResourceId {
        self.handle.id()
    }

    /// Edge length of one face in texels.
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// An off-screen render target writing into a [`DepthCubeMap`].
#[derive(Debug)]
pub struct Framebuffer {
    handle: ResourceHandle,
    depth: ResourceId,
    size: u32,
}

impl Framebuffer {
    pub fn new(handle: ResourceHandle, depth: &DepthCubeMap) -> Self {
        Self {
            handle,
            depth: depth.id(),
            size: depth.size(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.handle.id()
    }

    pub fn depth_id(&self) -> ResourceId {
        self.depth
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_handles_queues_one_release_each() {
        let queue = ReleaseQueue::new();
        let cube = DepthCubeMap::new(
            queue.handle(ResourceKind::DepthCube, ResourceId::new(1)),
            64,
        );
        let framebuffer = Framebuffer::new(
            queue.handle(ResourceKind::Framebuffer, ResourceId::new(2)),
            &cube,
        );
        assert!(queue.is_empty());
        assert_eq!(framebuffer.depth_id(), cube.id());

        drop(framebuffer);
        drop(cube);
        assert_eq!(
            queue.drain(),
            [
                (ResourceKind::Framebuffer, ResourceId::new(2)),
                (ResourceKind::DepthCube, ResourceId::new(1)),
            ]
        );
        assert!(queue.drain().is_empty());
    }
}
