//! Spark Runtime
//!
//! Boots the particle demo: logging, settings, assets, then the winit loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use spark_render::winit::event_loop::{ControlFlow, EventLoop};
use spark_runtime::app::App;
use spark_runtime::AssetBundle;
use spark_services::settings::DEFAULT_SETTINGS_FILE;
use spark_services::Settings;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Spark v{}", spark_core::VERSION);

    let settings_path = std::env::var_os("SPARK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = Settings::load_or_default(&settings_path).context("loading settings")?;
    let assets = AssetBundle::load(&settings.assets).context("loading assets")?;

    let event_loop = EventLoop::new().context("creating event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(settings, assets);
    event_loop.run_app(&mut app).context("running event loop")?;

    if let Some(error) = app.take_error() {
        return Err(error);
    }
    tracing::info!("Clean exit");
    Ok(())
}
