//! Settings management

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use winit::keyboard::KeyCode;

/// Settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "spark.json";

/// Shortest simulation step accepted. One clamped frame runs at most 250 steps.
pub const MIN_STEP: Duration = Duration::from_millis(1);

/// Local size compiled into the shipped compute shader
pub const SHADER_WORKGROUP_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window: WindowSettings,
    pub graphics: GraphicsSettings,
    pub simulation: SimulationSettings,
    pub assets: AssetSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Presentation mode preference; falls back to vsync when unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub frames_in_flight: u32,
    pub present_mode: PresentMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub step_seconds: f64,
    pub particle_count: u32,
    /// Local size of the compute shader; must match the shader and divide
    /// `particle_count`
    pub workgroup_size: u32,
    /// Fixed seed for the initial particle field
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub compute_shader: PathBuf,
    pub particle_texture: PathBuf,
    pub gradient_texture: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub key: KeyCode,
    pub output: PathBuf,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Spark Compute Particles".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 1,
            present_mode: PresentMode::Immediate,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            step_seconds: 0.01,
            particle_count: 256 * 1024,
            workgroup_size: SHADER_WORKGROUP_SIZE,
            seed: None,
        }
    }
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("assets/shaders/particle.vert.wgsl"),
            fragment_shader: PathBuf::from("assets/shaders/particle.frag.wgsl"),
            compute_shader: PathBuf::from("assets/shaders/particle.comp.wgsl"),
            particle_texture: PathBuf::from("assets/textures/particle01_rgba.png"),
            gradient_texture: PathBuf::from("assets/textures/particle_gradient_rgba.png"),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            key: KeyCode::KeyS,
            output: PathBuf::from("screenshot.png"),
        }
    }
}

impl SimulationSettings {
    /// Fixed step as a `Duration`. Rejects values that do not convert or
    /// fall below [`MIN_STEP`].
    pub fn step(&self) -> Result<Duration, SettingsError> {
        let step = Duration::try_from_secs_f64(self.step_seconds).map_err(|e| {
            SettingsError::Invalid(format!(
                "simulation.step_seconds {} is not a valid duration: {e}",
                self.step_seconds
            ))
        })?;
        if step < MIN_STEP {
            return Err(SettingsError::Invalid(format!(
                "simulation.step_seconds must be at least {}, got {}",
                MIN_STEP.as_secs_f64(),
                self.step_seconds
            )));
        }
        Ok(step)
    }
}

impl Settings {
    /// Load and validate settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|err| match err {
            SettingsError::Parse { source, .. } => SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            tracing::info!("Loading settings from {}", path.display());
            Self::load(path)
        } else {
            tracing::info!("No settings file at {}, using defaults", path.display());
            let settings = Self::default();
            settings.validate()?;
            Ok(settings)
        }
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|source| SettingsError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let sim = &self.simulation;
        sim.step()?;
        if sim.workgroup_size != SHADER_WORKGROUP_SIZE {
            return Err(SettingsError::Invalid(format!(
                "simulation.workgroup_size must be {SHADER_WORKGROUP_SIZE} to match the compute shader, got {}",
                sim.workgroup_size
            )));
        }
        if sim.particle_count == 0 || sim.particle_count % sim.workgroup_size != 0 {
            return Err(SettingsError::Invalid(format!(
                "simulation.particle_count ({}) must be a non-zero multiple of workgroup_size ({})",
                sim.particle_count, sim.workgroup_size
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(SettingsError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if !(1..=3).contains(&self.graphics.frames_in_flight) {
            return Err(SettingsError::Invalid(format!(
                "graphics.frames_in_flight must be 1..=3, got {}",
                self.graphics.frames_in_flight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.simulation.step().unwrap(), Duration::from_millis(10));
        assert_eq!(settings.simulation.particle_count, 262_144);
        assert_eq!(settings.capture.key, KeyCode::KeyS);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = Settings::from_json(
            r#"{ "simulation": { "particle_count": 1024, "seed": 9 }, "window": { "title": "t" } }"#,
        )
        .unwrap();
        assert_eq!(settings.simulation.particle_count, 1024);
        assert_eq!(settings.simulation.seed, Some(9));
        assert_eq!(settings.simulation.workgroup_size, 256);
        assert_eq!(settings.window.title, "t");
        assert_eq!(settings.window.width, 1280);
        assert_eq!(settings.graphics.present_mode, PresentMode::Immediate);
    }

    #[test]
    fn indivisible_particle_count_is_rejected() {
        let err = Settings::from_json(r#"{ "simulation": { "particle_count": 1000 } }"#)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = Settings::from_json(r#"{ "simulation": { "step_seconds": 0.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn out_of_range_steps_are_rejected() {
        for text in [
            r#"{ "simulation": { "step_seconds": 1e-10 } }"#,
            r#"{ "simulation": { "step_seconds": 0.0005 } }"#,
            r#"{ "simulation": { "step_seconds": 1e20 } }"#,
            r#"{ "simulation": { "step_seconds": -0.01 } }"#,
        ] {
            let err = Settings::from_json(text).unwrap_err();
            assert!(matches!(err, SettingsError::Invalid(_)), "{text}");
        }

        let mut sim = SimulationSettings::default();
        sim.step_seconds = f64::NAN;
        assert!(sim.step().is_err());
        sim.step_seconds = 0.001;
        assert_eq!(sim.step().unwrap(), MIN_STEP);
    }

    #[test]
    fn workgroup_size_must_match_the_shader() {
        let err = Settings::from_json(
            r#"{ "simulation": { "particle_count": 1024, "workgroup_size": 64 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Settings::from_json("{ nope").unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings =
            Settings::load_or_default(Path::new("definitely/not/here/spark.json")).unwrap();
        assert_eq!(settings.window.width, 1280);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut settings = Settings::default();
        settings.capture.key = KeyCode::F12;
        let text = serde_json::to_string(&settings).unwrap();
        let back = Settings::from_json(&text).unwrap();
        assert_eq!(back.capture.key, KeyCode::F12);
    }
}
