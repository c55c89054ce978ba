//! Spark Render System
//!
//! GPU resource model and per-frame command sequencing for the particle
//! compute → draw pipeline.
//!
//! Resources are created through a [`Registry`] which issues
//! generation-checked [`Handle`]s and forwards to a [`GpuBackend`]. Frames
//! are recorded into a [`CommandList`] by the [`CommandSequencer`] and
//! submitted as one stream.

pub mod backend;
pub mod capture;
pub mod commands;
pub mod desc;
pub mod error;
pub mod handle;
pub mod headless;
pub mod registry;
pub mod sequencer;
pub mod wgpu_backend;
pub mod window;

pub use backend::{GpuBackend, SubmissionId};
pub use capture::{Capture, CaptureLayout};
pub use commands::{ClearValues, Command, CommandList, ParamOffset};
pub use error::RenderError;
pub use handle::{Handle, ResourceKind};
pub use headless::{HeadlessBackend, HeadlessEvent, SubmissionStats};
pub use registry::Registry;
pub use sequencer::{dispatch_grid, CommandSequencer, FrameResources};
pub use wgpu_backend::{DeviceSettings, WgpuBackend};
pub use window::{create_window, window_attributes, WindowConfig};

pub use wgpu;
pub use winit;
