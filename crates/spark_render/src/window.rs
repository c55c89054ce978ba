//! Window management
//!
//! Fixed-size presentation window via winit. Windows must be created inside
//! `ApplicationHandler::resumed` (winit 0.30+).

use std::sync::Arc;

use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Window, WindowAttributes},
};

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Spark Compute Particles".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Window attributes for a non-resizable window of exactly the configured
/// pixel size. The color target and capture layout assume that size.
pub fn window_attributes(config: &WindowConfig) -> WindowAttributes {
    Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .with_resizable(false)
}

pub fn create_window(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Arc<Window>, RenderError> {
    let window = event_loop
        .create_window(window_attributes(config))
        .map_err(|e| RenderError::Initialization(format!("window creation failed: {e}")))?;
    Ok(Arc::new(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_pin_the_size() {
        let config = WindowConfig {
            title: "test".into(),
            width: 320,
            height: 200,
        };
        let attrs = window_attributes(&config);
        assert_eq!(attrs.title, "test");
        assert!(!attrs.resizable);
        assert_eq!(
            attrs.inner_size,
            Some(PhysicalSize::new(320u32, 200u32).into())
        );
    }
}
