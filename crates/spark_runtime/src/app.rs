//! winit application host
//!
//! The window, device and driver are created in `resumed` (winit 0.30+). The
//! loop polls: every `about_to_wait` asks for a redraw and every redraw runs
//! one driver frame.

use std::sync::Arc;

use anyhow::{Context, Result};
use spark_core::time::FrameClock;
use spark_render::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};
use spark_render::{wgpu, DeviceSettings, Registry, WgpuBackend, WindowConfig};
use spark_services::settings::PresentMode;
use spark_services::{KeyboardState, Settings};

use crate::driver::FrameDriver;
use crate::resources::AssetBundle;

pub struct App {
    settings: Settings,
    assets: Option<AssetBundle>,
    window: Option<Arc<Window>>,
    driver: Option<FrameDriver<WgpuBackend>>,
    keyboard: KeyboardState,
    clock: FrameClock,
    quit: bool,
    error: Option<anyhow::Error>,
}

impl App {
    /// Assets are decoded up front so a missing file fails before a window
    /// appears.
    pub fn new(settings: Settings, assets: AssetBundle) -> Self {
        Self {
            settings,
            assets: Some(assets),
            window: None,
            driver: None,
            keyboard: KeyboardState::new(),
            clock: FrameClock::new(),
            quit: false,
            error: None,
        }
    }

    /// Initialization or frame error that ended the loop, if any.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let config = WindowConfig {
            title: self.settings.window.title.clone(),
            width: self.settings.window.width,
            height: self.settings.window.height,
        };
        let window = spark_render::create_window(event_loop, &config)?;

        let device_settings = DeviceSettings {
            frames_in_flight: self.settings.graphics.frames_in_flight,
            present_mode: present_mode(self.settings.graphics.present_mode),
        };
        let backend = pollster::block_on(WgpuBackend::new(window.clone(), &device_settings))
            .context("initializing graphics device")?;

        let assets = self.assets.take().context("assets already consumed")?;
        let driver = FrameDriver::new(Registry::new(backend), &self.settings, &assets)?;

        self.window = Some(window);
        self.driver = Some(driver);
        self.clock = FrameClock::new();
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        tracing::error!("{error:#}");
        self.error = Some(error);
        self.quit = true;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        let frame_time = self.clock.tick();
        match driver.frame(frame_time, &self.keyboard, self.quit) {
            Ok(report) if report.quit => event_loop.exit(),
            Ok(_) => {}
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn shutdown(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.shutdown() {
                tracing::error!("Shutdown failed: {e:#}");
                self.error.get_or_insert(e);
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.driver.is_some() || self.error.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested");
                self.quit = true;
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                self.keyboard.set(code, state == ElementState::Pressed);
            }
            WindowEvent::Focused(false) => self.keyboard.clear(),
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
    }
}
