//! Render passes and their shared resource lifecycle.
//!
//! A pipeline owns GPU resources that are built lazily on first use. The
//! [`Lifecycle`] tracks whether they exist and whether they are stale:
//!
//! ```text
//!   new() ──► Dirty ──init()──► Initialized
//!               ▲                  │   │
//!               └── mark_dirty() ──┘   │ free()
//!                                      ▼
//!                               Uninitialized ──init()──► Initialized
//! ```
//!
//! A failed `init()` leaves the state where it was, so the next render tries
//! again.

mod default;
mod shadow;

pub use default::DefaultPipeline;
pub use shadow::{ShadowPipeline, cube_face_views};

use crate::device::RenderDevice;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Dirty,
    Initialized,
}

/// Initialization bookkeeping embedded in every pipeline.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts out dirty.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Dirty,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == LifecycleState::Initialized
    }

    /// True whenever resources must be (re)built before the next render.
    pub fn needs_init(&self) -> bool {
        self.state != LifecycleState::Initialized
    }

    /// Forces a rebuild on the next render.
    pub fn mark_dirty(&mut self) {
        if self.state == LifecycleState::Initialized {
            self.state = LifecycleState::Dirty;
        }
    }

    pub fn mark_initialized(&mut self) {
        self.state = LifecycleState::Initialized;
    }

    pub fn mark_freed(&mut self) {
        self.state = LifecycleState::Uninitialized;
    }
}

/// A render pass with lazily built GPU resources.
pub trait Pipeline {
    fn name(&self) -> &str;

    fn lifecycle(&self) -> &Lifecycle;

    /// Builds (or rebuilds) the pass's resources.
    ///
    /// Returns `Ok(false)` without touching the device when already
    /// initialized and clean. On error nothing is kept and the pipeline
    /// still needs initialization.
    fn init(&mut self, device: &mut dyn RenderDevice) -> Result<bool>;

    /// Releases every resource. Fails with [`State`](crate::RenderError::State)
    /// unless the pipeline is initialized.
    fn free(&mut self) -> Result<()>;

    fn is_initialized(&self) -> bool {
        self.lifecycle().is_initialized()
    }

    fn needs_init(&self) -> bool {
        self.lifecycle().needs_init()
    }

    /// Runs [`init`](Self::init) if needed.
    fn ensure_initialized(&mut self, device: &mut dyn RenderDevice) -> Result<()> {
        if self.needs_init() {
            self.init(device)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Dirty);
        assert!(lifecycle.needs_init());

        lifecycle.mark_initialized();
        assert!(!lifecycle.needs_init());

        lifecycle.mark_dirty();
        assert_eq!(lifecycle.state(), LifecycleState::Dirty);

        lifecycle.mark_initialized();
        lifecycle.mark_freed();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(lifecycle.needs_init());

        // Nothing to rebuild until something exists.
        lifecycle.mark_dirty();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }
}
