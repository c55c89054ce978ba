//! Rendering backend abstraction
//!
//! The device contract the frame engine consumes. [`WgpuBackend`] drives a
//! real GPU; [`HeadlessBackend`] keeps everything in host memory and is what
//! the engine tests run against.
//!
//! [`WgpuBackend`]: crate::WgpuBackend
//! [`HeadlessBackend`]: crate::HeadlessBackend

use crate::commands::CommandList;
use crate::desc::ResourceDesc;
use crate::error::RenderError;
use crate::handle::Handle;

/// Monotonically increasing id of one submitted command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(pub u64);

/// Device operations used by the registry and the frame driver.
///
/// Handles passed in are always live: the [`Registry`](crate::Registry)
/// checks generations and kinds before forwarding, and dependencies named by a
/// description are created before it and disposed after it.
pub trait GpuBackend {
    /// Create the device object for `desc` and remember it under `handle`.
    fn create(&mut self, handle: Handle, desc: &ResourceDesc) -> Result<(), RenderError>;

    /// Release the device object behind `handle`.
    fn dispose(&mut self, handle: Handle);

    fn write_buffer(&mut self, buffer: Handle, offset: u64, data: &[u8]) -> Result<(), RenderError>;

    /// Upload a full mip-0 image, tightly packed.
    fn write_texture(&mut self, texture: Handle, pixels: &[u8]) -> Result<(), RenderError>;

    /// Copy the first `out.len()` bytes of a buffer back to the host.
    ///
    /// Callers wait for every submission that writes the buffer first.
    fn read_buffer(&mut self, buffer: Handle, out: &mut [u8]) -> Result<(), RenderError>;

    /// Build any device state `commands` will need (bind groups, parameter
    /// storage) without submitting anything.
    fn prepare(&mut self, commands: &CommandList) -> Result<(), RenderError>;

    /// Record and submit one command stream.
    fn submit(&mut self, commands: &CommandList) -> Result<SubmissionId, RenderError>;

    /// Block until `submission` has finished executing.
    fn wait_for(&mut self, submission: SubmissionId) -> Result<(), RenderError>;

    /// Block until all submitted work has finished.
    fn wait_idle(&mut self) -> Result<(), RenderError>;

    /// Destroy the device. Every handle has been disposed by now.
    fn shutdown(&mut self);
}
