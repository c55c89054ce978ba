//! Resource registry
//!
//! Owns every device object for the lifetime of the run. Handles are slots in
//! an arena guarded by generations; each record counts the live resources
//! that depend on it so nothing is disposed out from under a dependent.
//!
//! All creation happens before [`Registry::seal`]. After that the registry
//! only binds, uploads, reads back and submits, and at shutdown
//! [`Registry::dispose_all`] tears everything down in reverse creation order.

use crate::backend::{GpuBackend, SubmissionId};
use crate::commands::CommandList;
use crate::desc::{ResourceDesc, ShaderStage};
use crate::error::RenderError;
use crate::handle::{Handle, ResourceKind};

struct Entry {
    kind: ResourceKind,
    label: String,
    dependencies: Vec<Handle>,
    dependents: u32,
    shader_stage: Option<ShaderStage>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub struct Registry<B: GpuBackend> {
    backend: B,
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Live handles in creation order
    live: Vec<Handle>,
    sealed: bool,
}

impl<B: GpuBackend> Registry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slots: Vec::new(),
            free: Vec::new(),
            live: Vec::new(),
            sealed: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create a device object from its description.
    pub fn create(&mut self, desc: impl Into<ResourceDesc>) -> Result<Handle, RenderError> {
        let desc = desc.into();
        let kind = desc.kind();
        let label = desc.label();

        if self.sealed {
            return Err(RenderError::RegistrySealed(label));
        }

        let dependencies = desc.dependencies();
        for &(dep, expected) in &dependencies {
            let entry = self.entry(dep).map_err(|_| RenderError::ResourceCreation {
                kind,
                label: label.clone(),
                reason: format!("depends on {dep:?}, which is not live"),
            })?;
            if entry.kind != expected {
                return Err(RenderError::ResourceCreation {
                    kind,
                    label,
                    reason: format!("{dep:?} is a {}, expected a {expected}", entry.kind),
                });
            }
        }
        self.check_shader_stages(&desc, &label)?;

        let handle = match self.free.last() {
            Some(&index) => Handle::new(index, self.slots[index as usize].generation),
            None => Handle::new(self.slots.len() as u32, 0),
        };

        self.backend.create(handle, &desc)?;

        if self.free.last() == Some(&handle.index()) {
            self.free.pop();
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
        }

        for &(dep, _) in &dependencies {
            if let Some(entry) = self.slots[dep.index() as usize].entry.as_mut() {
                entry.dependents += 1;
            }
        }

        let shader_stage = match &desc {
            ResourceDesc::ShaderModule(d) => Some(d.stage),
            _ => None,
        };
        tracing::debug!("Created {kind} `{label}` as {handle:?}");

        self.slots[handle.index() as usize].entry = Some(Entry {
            kind,
            label,
            dependencies: dependencies.into_iter().map(|(h, _)| h).collect(),
            dependents: 0,
            shader_stage,
        });
        self.live.push(handle);
        Ok(handle)
    }

    /// Release a handle. Fails for stale handles and for handles other live
    /// resources still depend on.
    pub fn dispose(&mut self, handle: Handle) -> Result<(), RenderError> {
        let entry = self.entry(handle)?;
        if entry.dependents > 0 {
            return Err(RenderError::StillReferenced {
                kind: entry.kind,
                label: entry.label.clone(),
                dependents: entry.dependents,
            });
        }

        self.backend.dispose(handle);

        let slot = &mut self.slots[handle.index() as usize];
        let entry = slot.entry.take().ok_or(RenderError::StaleHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.live.retain(|&h| h != handle);

        for dep in &entry.dependencies {
            if let Some(dep_entry) = self.slots[dep.index() as usize].entry.as_mut() {
                dep_entry.dependents -= 1;
            }
        }

        tracing::debug!("Disposed {} `{}`", entry.kind, entry.label);
        Ok(())
    }

    /// Dispose every live handle, dependents before dependencies.
    ///
    /// A handle that cannot be disposed is logged and skipped; the rest are
    /// still released and the first failure is returned.
    pub fn dispose_all(&mut self) -> Result<(), RenderError> {
        let mut first_error = None;
        for handle in self.live.clone().into_iter().rev() {
            if let Err(e) = self.dispose(handle) {
                tracing::warn!("Could not dispose {handle:?}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Refuse further creation; the frame loop is about to start.
    pub fn seal(&mut self) {
        self.sealed = true;
        tracing::debug!("Registry sealed with {} live resources", self.live.len());
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.entry(handle).is_ok()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn kind_of(&self, handle: Handle) -> Result<ResourceKind, RenderError> {
        self.entry(handle).map(|entry| entry.kind)
    }

    pub fn label(&self, handle: Handle) -> Result<&str, RenderError> {
        self.entry(handle).map(|entry| entry.label.as_str())
    }

    pub fn write_buffer(&mut self, buffer: Handle, offset: u64, data: &[u8]) -> Result<(), RenderError> {
        self.expect_kind(buffer, ResourceKind::Buffer)?;
        self.backend.write_buffer(buffer, offset, data)
    }

    pub fn write_texture(&mut self, texture: Handle, pixels: &[u8]) -> Result<(), RenderError> {
        self.expect_kind(texture, ResourceKind::Texture)?;
        self.backend.write_texture(texture, pixels)
    }

    pub fn read_buffer(&mut self, buffer: Handle, out: &mut [u8]) -> Result<(), RenderError> {
        self.expect_kind(buffer, ResourceKind::Buffer)?;
        self.backend.read_buffer(buffer, out)
    }

    /// Let the device build whatever per-frame state `commands` needs
    /// without submitting it. Called once, after sealing, with a
    /// representative frame.
    pub fn prepare(&mut self, commands: &CommandList) -> Result<(), RenderError> {
        self.check_live(commands)?;
        self.backend.prepare(commands)
    }

    /// Submit a recorded frame after checking every handle it names is live.
    pub fn submit(&mut self, commands: &CommandList) -> Result<SubmissionId, RenderError> {
        self.check_live(commands)?;
        self.backend.submit(commands)
    }

    pub fn wait_for(&mut self, submission: SubmissionId) -> Result<(), RenderError> {
        self.backend.wait_for(submission)
    }

    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.backend.wait_idle()
    }

    /// Destroy the device. Call after [`Registry::dispose_all`].
    pub fn shutdown(mut self) -> B {
        if !self.live.is_empty() {
            tracing::warn!("Shutting down with {} live resources", self.live.len());
        }
        self.backend.shutdown();
        self.backend
    }

    fn entry(&self, handle: Handle) -> Result<&Entry, RenderError> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(RenderError::StaleHandle(handle))
    }

    fn check_live(&self, commands: &CommandList) -> Result<(), RenderError> {
        let mut stale = None;
        for command in commands.commands() {
            command.for_each_handle(|handle| {
                if stale.is_none() && !self.is_live(handle) {
                    stale = Some(handle);
                }
            });
        }
        stale.map_or(Ok(()), |handle| Err(RenderError::StaleHandle(handle)))
    }

    fn expect_kind(&self, handle: Handle, expected: ResourceKind) -> Result<(), RenderError> {
        let actual = self.kind_of(handle)?;
        if actual == expected {
            Ok(())
        } else {
            Err(RenderError::KindMismatch {
                handle,
                expected,
                actual,
            })
        }
    }

    fn check_shader_stages(&self, desc: &ResourceDesc, label: &str) -> Result<(), RenderError> {
        let wanted = match desc {
            ResourceDesc::GraphicsPipeline(d) => vec![
                (d.vertex.module, ShaderStage::Vertex),
                (d.fragment.module, ShaderStage::Fragment),
            ],
            ResourceDesc::ComputePipeline(d) => vec![(d.shader.module, ShaderStage::Compute)],
            _ => return Ok(()),
        };

        for (module, stage) in wanted {
            let actual = self.entry(module)?.shader_stage;
            if actual != Some(stage) {
                return Err(RenderError::ResourceCreation {
                    kind: desc.kind(),
                    label: label.to_string(),
                    reason: format!("{module:?} is a {actual:?} shader, expected {stage:?}"),
                });
            }
        }
        Ok(())
    }
}
