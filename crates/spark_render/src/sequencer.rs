//! Per-frame command sequencing
//!
//! One rendered frame is always the same stream: a compute dispatch that
//! advances the particles, a render pass that draws them as points, an
//! optional copy of the color target for capture, and a present.

use spark_core::simulation::SimulationUniforms;

use crate::commands::{ClearValues, CommandList};
use crate::handle::Handle;

/// Opaque black, far depth, zero stencil
pub const CLEAR: ClearValues = ClearValues {
    color: [0.0, 0.0, 0.0, 1.0],
    depth: 1.0,
    stencil: 0,
};

/// Handles the frame stream refers to, created once before the loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameResources {
    pub compute_pipeline: Handle,
    pub graphics_pipeline: Handle,
    pub particle_buffer: Handle,
    pub sprite_texture: Handle,
    pub gradient_texture: Handle,
    pub sampler: Handle,
    pub render_pass: Handle,
    pub framebuffer: Handle,
    pub color_texture: Handle,
    pub transfer_buffer: Handle,
    pub particle_count: u32,
    pub workgroup_size: u32,
}

/// Workgroup grid covering `count` invocations.
pub fn dispatch_grid(count: u32, group: u32) -> [u32; 3] {
    [count.div_ceil(group), 1, 1]
}

#[derive(Default)]
pub struct CommandSequencer {
    commands: CommandList,
}

impl CommandSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the frame stream. The previous frame's list is cleared and its
    /// storage reused.
    pub fn record(&mut self, res: &FrameResources, uniforms: &SimulationUniforms, capture: bool) -> &CommandList {
        let list = &mut self.commands;
        list.clear();

        list.bind_compute_pipeline(res.compute_pipeline);
        list.bind_compute_buffer(0, res.particle_buffer);
        let params = list.push_compute_params(uniforms);
        list.dispatch_compute(dispatch_grid(res.particle_count, res.workgroup_size), params);

        list.begin_render_pass(res.render_pass, res.framebuffer, CLEAR);
        list.bind_graphics_pipeline(res.graphics_pipeline);
        list.bind_vertex_buffer(0, res.particle_buffer, 0);
        list.bind_fragment_sampler(0, res.sprite_texture, res.sampler);
        list.bind_fragment_sampler(1, res.gradient_texture, res.sampler);
        list.draw(res.particle_count, 0);
        list.end_render_pass();

        if capture {
            list.copy_texture_to_buffer(res.color_texture, res.transfer_buffer);
        }
        list.present(res.color_texture, wgpu::FilterMode::Nearest);

        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    fn resources() -> FrameResources {
        let h = |i| Handle::new(i, 0);
        FrameResources {
            compute_pipeline: h(0),
            graphics_pipeline: h(1),
            particle_buffer: h(2),
            sprite_texture: h(3),
            gradient_texture: h(4),
            sampler: h(5),
            render_pass: h(6),
            framebuffer: h(7),
            color_texture: h(8),
            transfer_buffer: h(9),
            particle_count: 1024,
            workgroup_size: 256,
        }
    }

    fn uniforms() -> SimulationUniforms {
        spark_core::simulation::compute(0.5, 0.01, 1024)
    }

    #[test]
    fn grid_rounds_up() {
        assert_eq!(dispatch_grid(1024, 256), [4, 1, 1]);
        assert_eq!(dispatch_grid(1025, 256), [5, 1, 1]);
        assert_eq!(dispatch_grid(1, 256), [1, 1, 1]);
    }

    #[test]
    fn frame_stream_order() {
        let res = resources();
        let mut seq = CommandSequencer::new();
        let list = seq.record(&res, &uniforms(), false);

        let params = match list.commands()[2] {
            Command::DispatchCompute { params, .. } => params,
            ref other => panic!("expected a dispatch, got {other:?}"),
        };
        assert_eq!(params.get(), 0);

        let expected = vec![
            Command::BindComputePipeline(res.compute_pipeline),
            Command::BindComputeBuffer {
                slot: 0,
                buffer: res.particle_buffer,
            },
            Command::DispatchCompute {
                groups: [4, 1, 1],
                params,
            },
            Command::BeginRenderPass {
                render_pass: res.render_pass,
                framebuffer: res.framebuffer,
                clear: CLEAR,
            },
            Command::BindGraphicsPipeline(res.graphics_pipeline),
            Command::BindVertexBuffer {
                slot: 0,
                buffer: res.particle_buffer,
                offset: 0,
            },
            Command::BindFragmentSampler {
                slot: 0,
                texture: res.sprite_texture,
                sampler: res.sampler,
            },
            Command::BindFragmentSampler {
                slot: 1,
                texture: res.gradient_texture,
                sampler: res.sampler,
            },
            Command::Draw {
                vertex_count: 1024,
                first_vertex: 0,
            },
            Command::EndRenderPass,
            Command::Present {
                texture: res.color_texture,
                filter: wgpu::FilterMode::Nearest,
            },
        ];
        assert_eq!(list.commands(), expected.as_slice());

        let pushed: SimulationUniforms = bytemuck::pod_read_unaligned(&list.params()[..16]);
        assert_eq!(pushed, uniforms());
    }

    #[test]
    fn capture_copies_before_present() {
        let res = resources();
        let mut seq = CommandSequencer::new();
        let commands = seq.record(&res, &uniforms(), true).commands();
        let n = commands.len();

        assert_eq!(
            commands[n - 2],
            Command::CopyTextureToBuffer {
                texture: res.color_texture,
                buffer: res.transfer_buffer,
            }
        );
        assert!(matches!(commands[n - 1], Command::Present { .. }));
    }

    #[test]
    fn recording_twice_does_not_accumulate() {
        let res = resources();
        let mut seq = CommandSequencer::new();
        let first = seq.record(&res, &uniforms(), true).commands().len();
        let second = seq.record(&res, &uniforms(), true).commands().len();
        assert_eq!(first, second);
        assert_eq!(seq.record(&res, &uniforms(), false).params().len(), 16);
    }
}
