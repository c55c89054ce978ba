//! Full frame driver runs against the headless backend.

use std::path::PathBuf;
use std::time::Duration;

use spark_asset::RgbaImage;
use spark_core::particle::{particle_rng, spawn_particles, Particle};
use spark_render::desc::ShaderCode;
use spark_render::winit::keyboard::KeyCode;
use spark_render::{Command, HeadlessBackend, HeadlessEvent, Registry, RenderError};
use spark_runtime::{create_resources, AssetBundle, FrameDriver};
use spark_services::{CaptureTrigger, KeyboardState, Settings, SettingsError};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn temp_output(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spark_{}_{name}.png", std::process::id()))
}

fn settings(output: PathBuf) -> Settings {
    let mut settings = Settings::default();
    settings.window.width = WIDTH;
    settings.window.height = HEIGHT;
    settings.simulation.particle_count = 1024;
    settings.simulation.workgroup_size = 256;
    settings.simulation.seed = Some(42);
    settings.capture.output = output;
    settings.validate().unwrap();
    settings
}

fn assets() -> AssetBundle {
    AssetBundle {
        vertex: ShaderCode::Wgsl("@vertex fn main() {}".into()),
        fragment: ShaderCode::Wgsl("@fragment fn main() {}".into()),
        compute: ShaderCode::Wgsl("@compute @workgroup_size(256) fn main() {}".into()),
        sprite: RgbaImage::new(8, 8),
        gradient: RgbaImage::new(16, 1),
    }
}

fn driver(output: PathBuf) -> FrameDriver<HeadlessBackend> {
    FrameDriver::new(Registry::new(HeadlessBackend::new()), &settings(output), &assets()).unwrap()
}

fn backend(driver: &FrameDriver<HeadlessBackend>) -> &HeadlessBackend {
    driver.registry().backend()
}

#[test]
fn zero_step_frame_records_nothing() {
    let mut driver = driver(temp_output("zero_step"));
    let idle = KeyboardState::new();

    let report = driver.frame(ms(5), &idle, false).unwrap();

    assert_eq!(report.steps, 0);
    assert!(!report.render_due());
    let stats = backend(&driver).stats();
    assert_eq!(stats.submissions, 0);
    assert_eq!(stats.dispatches, 0);
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.presents, 0);
}

#[test]
fn short_frames_accumulate_into_steps() {
    let mut driver = driver(temp_output("accumulate"));
    let idle = KeyboardState::new();

    let steps: Vec<u32> = [5, 5, 20]
        .into_iter()
        .map(|f| driver.frame(ms(f), &idle, false).unwrap().steps)
        .collect();

    assert_eq!(steps, vec![0, 1, 2]);
    assert_eq!(driver.timestep().tick_count(), 3);
    assert_eq!(driver.timestep().accumulator(), Duration::ZERO);
    assert_eq!(driver.timestep().total_time(), ms(30));

    // One submission per frame that stepped, however many steps it ran.
    let stats = backend(&driver).stats();
    assert_eq!(stats.submissions, 2);
    assert_eq!(stats.dispatches, 2);
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.presents, 2);
}

#[test]
fn long_frame_is_clamped() {
    let mut driver = driver(temp_output("clamp"));
    let report = driver.frame(Duration::from_secs(2), &KeyboardState::new(), false).unwrap();
    assert_eq!(report.steps, 25);
    assert_eq!(driver.timestep().accumulator(), Duration::ZERO);
}

#[test]
fn dispatch_covers_every_particle() {
    let mut driver = driver(temp_output("dispatch"));
    driver.frame(ms(10), &KeyboardState::new(), false).unwrap();

    let commands = backend(&driver).last_commands().unwrap();
    let groups: Vec<[u32; 3]> = commands
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::DispatchCompute { groups, .. } => Some(*groups),
            _ => None,
        })
        .collect();
    assert_eq!(groups, vec![[4, 1, 1]]);
    assert!(commands
        .commands()
        .contains(&Command::Draw {
            vertex_count: 1024,
            first_vertex: 0
        }));
}

#[test]
fn particle_upload_reads_back_unchanged() {
    let settings = settings(temp_output("upload"));
    let mut registry = Registry::new(HeadlessBackend::new());
    let resources = create_resources(&mut registry, &settings, &assets()).unwrap();

    let mut bytes = vec![0u8; 1024 * std::mem::size_of::<Particle>()];
    registry.read_buffer(resources.particle_buffer, &mut bytes).unwrap();
    let read: Vec<Particle> = bytes
        .chunks_exact(std::mem::size_of::<Particle>())
        .map(bytemuck::pod_read_unaligned)
        .collect();

    let expected = spawn_particles(1024, &mut particle_rng(Some(42)));
    assert_eq!(read, expected);
    assert!(read.iter().all(|p| p.velocity == [0.0, 1.0]));
    assert_eq!(
        registry.backend().buffer_contents(resources.particle_buffer),
        Some(bytemuck::cast_slice::<Particle, u8>(&expected))
    );
}

#[test]
fn frame_state_is_prepared_before_the_loop() {
    let mut driver = driver(temp_output("prepared"));
    let events = backend(&driver).events();
    let prepared = events.iter().position(|e| *e == HeadlessEvent::Prepared).unwrap();
    let last_created = events
        .iter()
        .rposition(|e| matches!(e, HeadlessEvent::Created(_)))
        .unwrap();
    assert!(last_created < prepared);
    assert!(driver.registry().is_sealed());

    driver.frame(ms(10), &KeyboardState::new(), false).unwrap();
    let events = backend(&driver).events();
    assert_eq!(events.iter().filter(|e| **e == HeadlessEvent::Prepared).count(), 1);
    assert!(matches!(events.last(), Some(HeadlessEvent::Submitted(_))));
}

#[test]
fn unusable_step_fails_initialization_cleanly() {
    for step_seconds in [1e-10, 1e20] {
        let mut settings = settings(temp_output("bad_step"));
        settings.simulation.step_seconds = step_seconds;
        let result = FrameDriver::new(Registry::new(HeadlessBackend::new()), &settings, &assets());
        let err = result.err().unwrap();
        assert!(err.downcast_ref::<SettingsError>().is_some(), "{step_seconds}: {err:#}");
    }
}

#[test]
fn holding_the_capture_key_captures_once() {
    let output = temp_output("held_key");
    let _ = std::fs::remove_file(&output);
    let mut driver = driver(output.clone());
    let mut keyboard = KeyboardState::new();
    keyboard.set(KeyCode::KeyS, true);

    for _ in 0..10 {
        driver.frame(ms(20), &keyboard, false).unwrap();
    }

    assert_eq!(backend(&driver).stats().copies, 1);
    assert_eq!(driver.trigger(), CaptureTrigger::Handled);

    let image = spark_asset::load_rgba8(&output).unwrap();
    assert_eq!((image.width(), image.height()), (WIDTH, HEIGHT));
    assert_eq!(image.as_raw().len(), (WIDTH * HEIGHT * 4) as usize);
    // Headless devices only clear, so the capture is the clear color.
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    std::fs::remove_file(&output).unwrap();
}

#[test]
fn capture_waits_on_its_own_submission() {
    let output = temp_output("fence");
    let mut driver = driver(output.clone());
    let mut keyboard = KeyboardState::new();
    keyboard.set(KeyCode::KeyS, true);

    driver.frame(ms(10), &keyboard, false).unwrap();

    let events = backend(&driver).events();
    let submitted = events
        .iter()
        .rev()
        .find_map(|e| match e {
            HeadlessEvent::Submitted(id) => Some(*id),
            _ => None,
        })
        .unwrap();
    assert_eq!(events.last(), Some(&HeadlessEvent::WaitedFor(submitted)));
    assert!(!events.contains(&HeadlessEvent::WaitedIdle));
    let _ = std::fs::remove_file(&output);
}

#[test]
fn each_press_captures_again() {
    let output = temp_output("repress");
    let mut driver = driver(output.clone());
    let mut keyboard = KeyboardState::new();

    for _ in 0..2 {
        keyboard.set(KeyCode::KeyS, true);
        driver.frame(ms(30), &keyboard, false).unwrap();
        keyboard.set(KeyCode::KeyS, false);
        driver.frame(ms(10), &keyboard, false).unwrap();
    }

    assert_eq!(backend(&driver).stats().copies, 2);
    assert_eq!(driver.trigger(), CaptureTrigger::Idle);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn unwritable_capture_path_keeps_running() {
    let output = std::env::temp_dir()
        .join(format!("spark_{}_missing_dir", std::process::id()))
        .join("nested")
        .join("shot.png");
    let mut driver = driver(output.clone());
    let mut keyboard = KeyboardState::new();
    keyboard.set(KeyCode::KeyS, true);

    driver.frame(ms(10), &keyboard, false).unwrap();
    let report = driver.frame(ms(10), &keyboard, false).unwrap();

    assert_eq!(report.steps, 1);
    assert!(!output.exists());
    assert_eq!(backend(&driver).stats().submissions, 2);
}

#[test]
fn quit_stops_before_the_next_step() {
    let mut driver = driver(temp_output("quit"));
    let report = driver.frame(ms(50), &KeyboardState::new(), true).unwrap();

    assert!(report.quit);
    assert_eq!(report.steps, 0);
    assert_eq!(driver.timestep().tick_count(), 0);
    assert_eq!(backend(&driver).stats().submissions, 0);
}

#[test]
fn shutdown_idles_then_disposes_dependents_first() {
    let mut driver = driver(temp_output("shutdown"));
    driver.frame(ms(10), &KeyboardState::new(), false).unwrap();
    let live = driver.registry().live_count();
    assert_eq!(live, 15);

    let backend = driver.shutdown().unwrap();
    let events = backend.events();

    let created: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            HeadlessEvent::Created(h) => Some(*h),
            _ => None,
        })
        .collect();
    let mut reversed = created.clone();
    reversed.reverse();
    assert_eq!(backend.disposal_order(), reversed);

    let idle = events.iter().position(|e| *e == HeadlessEvent::WaitedIdle).unwrap();
    let first_dispose = events
        .iter()
        .position(|e| matches!(e, HeadlessEvent::Disposed(_)))
        .unwrap();
    assert!(idle < first_dispose);
    assert_eq!(events.last(), Some(&HeadlessEvent::Shutdown));
    assert_eq!(backend.live_objects(), 0);
    assert!(backend.is_shut_down());
}

#[test]
fn registry_is_sealed_once_the_loop_can_start() {
    let settings = settings(temp_output("sealed"));
    let mut registry = Registry::new(HeadlessBackend::new());
    create_resources(&mut registry, &settings, &assets()).unwrap();

    assert!(registry.is_sealed());
    let err = registry
        .create(spark_render::desc::SamplerDesc::linear_repeat("late"))
        .unwrap_err();
    assert!(matches!(err, RenderError::RegistrySealed(_)));
}

#[test]
fn malformed_shader_fails_initialization() {
    let mut bad = assets();
    bad.compute = ShaderCode::SpirV(vec![0xde, 0xad, 0xbe, 0xef]);
    let result = FrameDriver::new(
        Registry::new(HeadlessBackend::new()),
        &settings(temp_output("bad_shader")),
        &bad,
    );
    let err = result.err().unwrap();
    let render = err.downcast_ref::<RenderError>().unwrap();
    assert!(matches!(render, RenderError::ResourceCreation { .. }));
}
