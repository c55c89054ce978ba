//! Particle state as laid out in the GPU buffer

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Particle count used when no configuration overrides it
pub const DEFAULT_PARTICLE_COUNT: u32 = 256 * 1024;

/// One simulated particle.
///
/// Layout: [position.xy | velocity.xy | gradient, pad, pad, pad], 32 bytes.
/// The trailing block is read as a `vec4` by the vertex stage, so the padding
/// keeps the struct a multiple of 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub gradient_position: f32,
    padding: [f32; 3],
}

impl Particle {
    /// Initial state for a particle spawned at `position`
    pub fn at(position: Vec2) -> Self {
        Self {
            position: position.to_array(),
            velocity: [0.0, 1.0],
            gradient_position: position.x / 2.0,
            padding: [0.0; 3],
        }
    }
}

/// Byte size of one particle in the vertex/storage buffer
pub const PARTICLE_STRIDE: u64 = std::mem::size_of::<Particle>() as u64;

/// Byte offset of the gradient block read by the vertex stage
pub const GRADIENT_OFFSET: u64 = std::mem::offset_of!(Particle, gradient_position) as u64;

/// Random source for the initial distribution.
///
/// A fixed seed gives a reproducible particle field.
pub fn particle_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Scatter `count` particles uniformly over [-1, 1]².
pub fn spawn_particles<R: Rng>(count: usize, rng: &mut R) -> Vec<Particle> {
    (0..count)
        .map(|_| {
            let x = rng.gen_range(-1.0f32..=1.0);
            let y = rng.gen_range(-1.0f32..=1.0);
            Particle::at(Vec2::new(x, y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_gpu_expectations() {
        assert_eq!(PARTICLE_STRIDE, 32);
        assert_eq!(GRADIENT_OFFSET, 16);
        assert_eq!(std::mem::align_of::<Particle>(), 4);
    }

    #[test]
    fn initial_state_derives_from_position() {
        let p = Particle::at(Vec2::new(0.5, -0.25));
        assert_eq!(p.position, [0.5, -0.25]);
        assert_eq!(p.velocity, [0.0, 1.0]);
        assert_eq!(p.gradient_position, 0.25);

        let words: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&p));
        assert_eq!(&words[5..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn spawned_particles_stay_in_the_unit_square() {
        let mut rng = particle_rng(Some(7));
        let particles = spawn_particles(4096, &mut rng);
        assert_eq!(particles.len(), 4096);
        for p in &particles {
            assert!((-1.0..=1.0).contains(&p.position[0]));
            assert!((-1.0..=1.0).contains(&p.position[1]));
            assert_eq!(p.gradient_position, p.position[0] / 2.0);
        }
    }

    #[test]
    fn seeded_spawn_is_reproducible() {
        let a = spawn_particles(64, &mut particle_rng(Some(42)));
        let b = spawn_particles(64, &mut particle_rng(Some(42)));
        assert_eq!(a, b);
    }
}
