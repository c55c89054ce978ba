//! Compute-stage parameters derived from the simulation clock

use glam::Vec2;

/// Horizontal swing of the attraction point
pub const DESTINATION_AMPLITUDE: f32 = 0.75;

/// Fraction of the scheduler step the GPU integrator advances per dispatch.
///
/// Slows the visible motion without changing how often steps run.
pub const DELTA_DAMPING: f32 = 0.25;

/// Uniform block consumed by the compute shader, 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SimulationUniforms {
    pub delta_time: f32,
    pub destination_x: f32,
    pub destination_y: f32,
    pub particle_count: u32,
}

impl SimulationUniforms {
    pub fn destination(&self) -> Vec2 {
        Vec2::new(self.destination_x, self.destination_y)
    }
}

/// Parameters for the dispatch that follows a step ending at `sim_clock_seconds`.
pub fn compute(sim_clock_seconds: f64, step_size_seconds: f64, particle_count: u32) -> SimulationUniforms {
    SimulationUniforms {
        delta_time: step_size_seconds as f32 * DELTA_DAMPING,
        destination_x: sim_clock_seconds.sin() as f32 * DESTINATION_AMPLITUDE,
        destination_y: 0.0,
        particle_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<SimulationUniforms>(), 16);
    }

    #[test]
    fn destination_follows_the_clock() {
        for i in 0..200 {
            let t = i as f64 * 0.037;
            let uniforms = compute(t, 0.01, 1024);
            let expected = 0.75 * t.sin() as f32;
            assert!((uniforms.destination_x - expected).abs() < 1e-6, "t={t}");
            assert_eq!(uniforms.destination_y, 0.0);
        }
    }

    #[test]
    fn delta_is_damped_step() {
        let uniforms = compute(0.0, 0.01, 1024);
        assert!((uniforms.delta_time - 0.0025).abs() < 1e-9);
        assert_eq!(uniforms.particle_count, 1024);
        assert_eq!(uniforms.destination(), Vec2::ZERO);
    }
}
