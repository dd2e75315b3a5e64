use std::ops::{Deref, DerefMut};

use super::{RasterState, RenderDevice, ResourceId, Viewport};

/// Scopes state changes on a [`RenderDevice`].
///
/// On creation the guard records the raster state, bound program, bound
/// framebuffer and viewport. On drop it restores each one that differs, so
/// early returns leave the device exactly as they found it. Untouched state
/// produces no calls.
///
/// The guard dereferences to the device, so it can be used in its place:
///
/// ```
/// use penumbra::{BlendMode, RecordingDevice, RenderDevice, StateGuard};
///
/// let mut device = RecordingDevice::new(640, 480);
/// {
///     let mut gpu = StateGuard::new(&mut device);
///     gpu.set_blend(BlendMode::Additive);
/// }
/// assert_eq!(device.raster_state().blend, BlendMode::Disabled);
/// ```
pub struct StateGuard<'d> {
    device: &'d mut dyn RenderDevice,
    raster: RasterState,
    program: Option<ResourceId>,
    framebuffer: Option<ResourceId>,
    viewport: Viewport,
}

impl<'d> StateGuard<'d> {
    pub fn new(device: &'d mut dyn RenderDevice) -> Self {
        Self {
            raster: device.raster_state(),
            program: device.bound_program(),
            framebuffer: device.bound_framebuffer(),
            viewport: device.viewport(),
            device,
        }
    }

    /// Raster state captured when the guard was created.
    pub fn saved_raster_state(&self) -> RasterState {
        self.raster
    }
}

impl<'d> Deref for StateGuard<'d> {
    type Target = dyn RenderDevice + 'd;

    fn deref(&self) -> &Self::Target {
        &*self.device
    }
}

impl<'d> DerefMut for StateGuard<'d> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.device
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.device.bound_framebuffer() != self.framebuffer {
            self.device.bind_framebuffer(self.framebuffer);
        }
        if self.device.viewport() != self.viewport {
            self.device.set_viewport(self.viewport);
        }
        if self.device.raster_state() != self.raster {
            self.device.set_raster_state(self.raster);
        }
        if self.device.bound_program() != self.program {
            self.device.bind_program(self.program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BlendMode, Command, CullMode, PolygonMode, RecordingDevice};

    #[test]
    fn restores_only_what_changed() {
        let mut device = RecordingDevice::new(800, 600);
        device.set_cull(CullMode::Back);
        device.clear_commands();

        {
            let mut gpu = StateGuard::new(&mut device);
            gpu.set_polygon_mode(PolygonMode::Line);
            gpu.set_blend(BlendMode::Additive);
        }

        let restored = device.raster_state();
        assert_eq!(restored, RasterState::default());
        // Two changes, one restore; framebuffer, viewport and program untouched.
        let commands = device.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[2], Command::SetRasterState(RasterState::default()));
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let mut device = RecordingDevice::new(800, 600);
        {
            let mut outer = StateGuard::new(&mut device);
            outer.set_blend(BlendMode::Additive);
            {
                let mut inner = StateGuard::new(&mut *outer);
                inner.set_color_write(false);
                inner.bind_framebuffer(Some(ResourceId::new(7)));
                inner.set_viewport(Viewport::new(16, 16));
            }
            assert_eq!(outer.raster_state().blend, BlendMode::Additive);
            assert!(outer.raster_state().color_write);
            assert_eq!(outer.bound_framebuffer(), None);
            assert_eq!(outer.viewport(), Viewport::new(800, 600));
        }
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn untouched_guard_issues_nothing() {
        let mut device = RecordingDevice::new(800, 600);
        drop(StateGuard::new(&mut device));
        assert!(device.commands().is_empty());
    }
}
