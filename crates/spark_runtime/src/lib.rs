//! Spark Runtime
//!
//! Wires the engine crates into a running particle demo: builds the resource
//! set, drives frames through the fixed-timestep scheduler and tears
//! everything down on quit. The `spark` binary hosts it in a winit window.

pub mod app;
pub mod driver;
pub mod resources;

pub use driver::FrameDriver;
pub use resources::{create_resources, AssetBundle};
