//! Frame driver
//!
//! Owns the registry and every piece of per-run state: the fixed-timestep
//! clock, the capture trigger and the command sequencer. One call to
//! [`FrameDriver::frame`] per wall-clock frame runs zero or more simulation
//! steps, then records and submits a frame when at least one step ran.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use spark_core::simulation;
use spark_core::time::{FixedTimestep, FrameReport, StepControl};
use spark_metrics::{Counter, FrameTimer};
use spark_render::winit::keyboard::KeyCode;
use spark_render::{Capture, CaptureLayout, CommandSequencer, FrameResources, GpuBackend, Registry};
use spark_services::{CaptureTrigger, KeyboardState, Settings};

use crate::resources::{create_resources, AssetBundle};

const STATS_INTERVAL: Duration = Duration::from_secs(2);

pub struct FrameDriver<B: GpuBackend> {
    registry: Registry<B>,
    resources: FrameResources,
    timestep: FixedTimestep,
    trigger: CaptureTrigger,
    /// Rising edge seen during a step, not yet consumed by a rendered frame
    capture_pending: bool,
    sequencer: CommandSequencer,
    capture: Capture,
    capture_key: KeyCode,
    capture_output: PathBuf,

    frame_timer: FrameTimer,
    counters: Counter,
    last_stats: Instant,
}

impl<B: GpuBackend> FrameDriver<B> {
    /// Build the resource set on `registry` and prepare the loop state.
    pub fn new(mut registry: Registry<B>, settings: &Settings, assets: &AssetBundle) -> Result<Self> {
        let step = settings.simulation.step()?;
        let resources =
            create_resources(&mut registry, settings, assets).context("creating frame resources")?;
        let layout = CaptureLayout::new(settings.window.width, settings.window.height);

        // Bind groups and parameter storage are built here, not on the first frame.
        let mut sequencer = CommandSequencer::new();
        let warmup = simulation::compute(0.0, step.as_secs_f64(), resources.particle_count);
        registry
            .prepare(sequencer.record(&resources, &warmup, false))
            .context("preparing frame commands")?;

        Ok(Self {
            registry,
            resources,
            timestep: FixedTimestep::new(step),
            trigger: CaptureTrigger::default(),
            capture_pending: false,
            sequencer,
            capture: Capture::new(layout),
            capture_key: settings.capture.key,
            capture_output: settings.capture.output.clone(),
            frame_timer: FrameTimer::new(120),
            counters: Counter::new(),
            last_stats: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Registry<B> {
        &self.registry
    }

    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    pub fn timestep(&self) -> &FixedTimestep {
        &self.timestep
    }

    pub fn trigger(&self) -> CaptureTrigger {
        self.trigger
    }

    /// Run one wall-clock frame.
    ///
    /// `quit` is honoured before every step; a frame that ran no steps, or
    /// was interrupted by quit, records nothing.
    pub fn frame(&mut self, frame_time: Duration, keyboard: &KeyboardState, quit: bool) -> Result<FrameReport> {
        let key_down = keyboard.is_down(self.capture_key);
        let trigger = &mut self.trigger;
        let pending = &mut self.capture_pending;

        let report = self.timestep.advance(frame_time, |_step| {
            if quit {
                return StepControl::Quit;
            }
            if trigger.update(key_down) {
                *pending = true;
            }
            StepControl::Continue
        });

        self.frame_timer.record(frame_time);
        self.counters.increment("steps", report.steps as u64);

        if report.render_due() {
            self.render()?;
        }
        self.log_stats();
        Ok(report)
    }

    fn render(&mut self) -> Result<()> {
        let uniforms = simulation::compute(
            self.timestep.seconds(),
            self.timestep.step().as_secs_f64(),
            self.resources.particle_count,
        );
        let capture = std::mem::take(&mut self.capture_pending);

        let commands = self.sequencer.record(&self.resources, &uniforms, capture);
        let submission = self.registry.submit(commands).context("submitting frame")?;
        self.counters.increment("renders", 1);

        if capture {
            self.write_capture(submission);
        }
        Ok(())
    }

    /// Read the transfer buffer back and hand it to the PNG encoder. Failures
    /// are logged; the loop keeps running.
    fn write_capture(&mut self, submission: spark_render::SubmissionId) {
        let pixels = match self
            .capture
            .read_back(&mut self.registry, self.resources.transfer_buffer, submission)
        {
            Ok(pixels) => pixels,
            Err(e) => {
                tracing::warn!("Capture readback failed: {e}");
                return;
            }
        };

        let layout = self.capture.layout();
        match spark_asset::save_png(&self.capture_output, layout.width, layout.height, pixels) {
            Ok(()) => {
                self.counters.increment("captures", 1);
                tracing::info!("Saved capture to {}", self.capture_output.display());
            }
            Err(e) => tracing::warn!("Capture not saved: {e}"),
        }
    }

    fn log_stats(&mut self) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        self.last_stats = Instant::now();

        let (min_ms, max_ms) = self.frame_timer.frame_time_range_ms();
        tracing::info!(
            "FPS: {:.1} ({:.2} ms avg, {:.2}..{:.2} ms) steps={} renders={} captures={} t={:.2}s",
            self.frame_timer.fps(),
            self.frame_timer.frame_time_ms(),
            min_ms,
            max_ms,
            self.counters.get("steps"),
            self.counters.get("renders"),
            self.counters.get("captures"),
            self.timestep.seconds(),
        );
        self.counters.reset_all();
    }

    /// Idle the device, dispose every handle (dependents first) and destroy
    /// the device. Returns the backend for inspection.
    pub fn shutdown(self) -> Result<B> {
        let mut registry = self.registry;
        registry.wait_idle().context("waiting for device idle")?;
        registry.dispose_all().context("disposing resources")?;
        tracing::info!("Shut down after {} steps", self.timestep.tick_count());
        Ok(registry.shutdown())
    }
}
