//! Spark Services Layer
//!
//! Platform-facing services: settings and input.

pub mod input;
pub mod settings;

pub use input::{CaptureTrigger, KeyboardState};
pub use settings::{Settings, SettingsError};
