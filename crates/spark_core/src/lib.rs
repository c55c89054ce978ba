//! Spark Core
//!
//! Contains the host-side simulation systems:
//! - Particle data model and initial distribution
//! - Per-step compute parameters
//! - Fixed-timestep scheduling

pub mod particle;
pub mod simulation;
pub mod time;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
