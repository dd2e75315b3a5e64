use std::collections::HashMap;

use glam::Mat4;

use super::{
    ClearFlags, DepthCubeMap, DrawItem, Framebuffer, FrameUniforms, LightUniforms, Program,
    ProgramDesc, ProgramKind, RasterState, ReleaseQueue, RenderDevice, ResourceId, ResourceKind,
    ShadowUniforms, Viewport,
};
use crate::error::DeviceError;
use crate::mesh::MeshId;

/// One call observed by a [`RecordingDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateProgram { id: ResourceId, kind: ProgramKind },
    CreateDepthCube { id: ResourceId, size: u32 },
    CreateFramebuffer { id: ResourceId, depth: ResourceId },
    Release { kind: ResourceKind, id: ResourceId },
    BindProgram(Option<ResourceId>),
    BindFramebuffer(Option<ResourceId>),
    SetViewport(Viewport),
    SetRasterState(RasterState),
    Clear(ClearFlags),
    ShadowUniforms(ShadowUniforms),
    FrameUniforms(FrameUniforms),
    LightUniforms(LightUniforms),
    BindShadowMap { slot: u32, map: ResourceId },
    Draw {
        mesh: MeshId,
        program: Option<ResourceId>,
        framebuffer: Option<ResourceId>,
        raster: RasterState,
        world: Mat4,
    },
    Present,
}

impl Command {
    fn mutates_state(&self) -> bool {
        !matches!(self, Command::Release { .. })
    }
}

/// A headless [`RenderDevice`] that records every call.
///
/// Useful for tests and for inspecting what a frame would submit. Resource
/// creation can be made to fail on demand to exercise error paths.
///
/// ```
/// use penumbra::{Command, RecordingDevice, RenderDevice, ClearFlags};
///
/// let mut device = RecordingDevice::new(640, 480);
/// device.clear(ClearFlags::DEPTH);
/// assert_eq!(device.commands(), [Command::Clear(ClearFlags::DEPTH)]);
/// ```
#[derive(Debug)]
pub struct RecordingDevice {
    commands: Vec<Command>,
    releases: ReleaseQueue,
    live: HashMap<ResourceId, ResourceKind>,
    next_id: u64,
    created: usize,
    surface: (u32, u32),
    program: Option<ResourceId>,
    framebuffer: Option<ResourceId>,
    viewport: Viewport,
    raster: RasterState,
    fail_program: Option<ProgramKind>,
    fail_framebuffer: bool,
}

impl RecordingDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            commands: Vec::new(),
            releases: ReleaseQueue::new(),
            live: HashMap::new(),
            next_id: 1,
            created: 0,
            surface: (width, height),
            program: None,
            framebuffer: None,
            viewport: Viewport::new(width, height),
            raster: RasterState::default(),
            fail_program: None,
            fail_framebuffer: false,
        }
    }

    /// Makes every later build of a program of `kind` fail. `None` clears it.
    pub fn fail_program_build(&mut self, kind: Option<ProgramKind>) {
        self.fail_program = kind;
    }

    /// Makes framebuffer validation fail until turned off again.
    pub fn fail_framebuffer_validation(&mut self, fail: bool) {
        self.fail_framebuffer = fail;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Commands other than releases.
    pub fn state_changes(&self) -> usize {
        self.commands.iter().filter(|c| c.mutates_state()).count()
    }

    /// Total resources created over the device's life.
    pub fn resources_created(&self) -> usize {
        self.created
    }

    /// Resources created and not yet released.
    pub fn live_resources(&mut self) -> usize {
        self.collect_releases();
        self.live.len()
    }

    /// Releases recorded so far, in order.
    pub fn releases(&mut self) -> Vec<(ResourceKind, ResourceId)> {
        self.collect_releases();
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Release { kind, id } => Some((*kind, *id)),
                _ => None,
            })
            .collect()
    }

    pub fn draws(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    fn collect_releases(&mut self) {
        for (kind, id) in self.releases.drain() {
            if self.live.remove(&id).is_none() {
                log::warn!("release of unknown {kind:?} {id:?}");
            }
            if self.program == Some(id) {
                self.program = None;
            }
            if self.framebuffer == Some(id) {
                self.framebuffer = None;
            }
            self.commands.push(Command::Release { kind, id });
        }
    }

    fn allocate(&mut self, kind: ResourceKind) -> ResourceId {
        let id = ResourceId::new(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.live.insert(id, kind);
        id
    }

    fn record(&mut self, command: Command) {
        self.collect_releases();
        self.commands.push(command);
    }
}

impl RenderDevice for RecordingDevice {
    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Program, DeviceError> {
        self.collect_releases();
        if self.fail_program == Some(desc.kind) {
            return Err(DeviceError::ProgramBuild {
                label: desc.label.clone(),
                reason: "build failure requested".to_string(),
            });
        }
        let id = self.allocate(ResourceKind::Program);
        self.record(Command::CreateProgram { id, kind: desc.kind });
        Ok(Program::new(
            self.releases.handle(ResourceKind::Program, id),
            desc.kind,
        ))
    }

    fn create_depth_cube(&mut self, label: &str, size: u32) -> Result<DepthCubeMap, DeviceError> {
        self.collect_releases();
        if size == 0 {
            return Err(DeviceError::TextureCreate {
                label: label.to_string(),
                reason: "zero-sized texture".to_string(),
            });
        }
        let id = self.allocate(ResourceKind::DepthCube);
        self.record(Command::CreateDepthCube { id, size });
        Ok(DepthCubeMap::new(
            self.releases.handle(ResourceKind::DepthCube, id),
            size,
        ))
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        depth: &DepthCubeMap,
    ) -> Result<Framebuffer, DeviceError> {
        self.collect_releases();
        if !self.live.contains_key(&depth.id()) {
            return Err(DeviceError::UnknownResource(depth.id()));
        }
        if self.fail_framebuffer {
            return Err(DeviceError::FramebufferIncomplete {
                label: label.to_string(),
                reason: "validation failure requested".to_string(),
            });
        }
        let id = self.allocate(ResourceKind::Framebuffer);
        self.record(Command::CreateFramebuffer {
            id,
            depth: depth.id(),
        });
        Ok(Framebuffer::new(
            self.releases.handle(ResourceKind::Framebuffer, id),
            depth,
        ))
    }

    fn bound_program(&self) -> Option<ResourceId> {
        self.program
    }

    fn bind_program(&mut self, program: Option<ResourceId>) {
        self.program = program;
        self.record(Command::BindProgram(program));
    }

    fn bound_framebuffer(&self) -> Option<ResourceId> {
        self.framebuffer
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<ResourceId>) {
        self.framebuffer = framebuffer;
        self.record(Command::BindFramebuffer(framebuffer));
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.record(Command::SetViewport(viewport));
    }

    fn raster_state(&self) -> RasterState {
        self.raster
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.raster = state;
        self.record(Command::SetRasterState(state));
    }

    fn clear(&mut self, flags: ClearFlags) {
        self.record(Command::Clear(flags));
    }

    fn set_shadow_uniforms(&mut self, uniforms: &ShadowUniforms) {
        self.record(Command::ShadowUniforms(*uniforms));
    }

    fn set_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.record(Command::FrameUniforms(*uniforms));
    }

    fn set_light_uniforms(&mut self, uniforms: &LightUniforms) {
        self.record(Command::LightUniforms(*uniforms));
    }

    fn bind_shadow_map(&mut self, slot: u32, map: &DepthCubeMap) {
        self.record(Command::BindShadowMap {
            slot,
            map: map.id(),
        });
    }

    fn draw(&mut self, item: &DrawItem<'_>) {
        self.record(Command::Draw {
            mesh: item.mesh.id(),
            program: self.program,
            framebuffer: self.framebuffer,
            raster: self.raster,
            world: item.world,
        });
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.record(Command::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow_desc() -> ProgramDesc {
        ProgramDesc {
            label: "test".to_string(),
            kind: ProgramKind::Shadow,
            source: "",
        }
    }

    #[test]
    fn tracks_live_resources() {
        let mut device = RecordingDevice::new(64, 64);
        let program = device.create_program(&shadow_desc()).unwrap();
        let cube = device.create_depth_cube("cube", 32).unwrap();
        let fb = device.create_framebuffer("fb", &cube).unwrap();
        assert_eq!(device.resources_created(), 3);
        assert_eq!(device.live_resources(), 3);

        drop(fb);
        drop(cube);
        assert_eq!(device.live_resources(), 1);
        drop(program);
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.releases().len(), 3);
    }

    #[test]
    fn injected_failures_create_nothing() {
        let mut device = RecordingDevice::new(64, 64);
        device.fail_program_build(Some(ProgramKind::Shadow));
        assert!(matches!(
            device.create_program(&shadow_desc()),
            Err(DeviceError::ProgramBuild { .. })
        ));

        device.fail_framebuffer_validation(true);
        let cube = device.create_depth_cube("cube", 32).unwrap();
        assert!(matches!(
            device.create_framebuffer("fb", &cube),
            Err(DeviceError::FramebufferIncomplete { .. })
        ));
        assert_eq!(device.resources_created(), 1);
    }

    #[test]
    fn releasing_bound_program_unbinds_it() {
        let mut device = RecordingDevice::new(64, 64);
        let program = device.create_program(&shadow_desc()).unwrap();
        device.bind_program(Some(program.id()));
        drop(program);
        device.clear(ClearFlags::DEPTH);
        assert_eq!(device.bound_program(), None);
    }
}
