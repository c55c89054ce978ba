//! Recorded command stream
//!
//! A [`CommandList`] is the host-side form of one submission. It carries the
//! commands plus a block of transient shader parameters; pushing parameters
//! returns a [`ParamOffset`] the dispatch uses to find its copy.

use crate::handle::Handle;

/// Alignment of each pushed parameter copy (uniform dynamic offset alignment)
pub const PARAM_ALIGNMENT: usize = 256;

/// Offset token for one pushed parameter copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamOffset(u32);

impl ParamOffset {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Clear values applied when a render pass begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    /// Linear RGBA in [0, 1]
    pub color: [f64; 4],
    pub depth: f32,
    pub stencil: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    BindComputePipeline(Handle),
    BindComputeBuffer {
        slot: u32,
        buffer: Handle,
    },
    DispatchCompute {
        groups: [u32; 3],
        params: ParamOffset,
    },
    BeginRenderPass {
        render_pass: Handle,
        framebuffer: Handle,
        clear: ClearValues,
    },
    BindGraphicsPipeline(Handle),
    BindVertexBuffer {
        slot: u32,
        buffer: Handle,
        offset: u64,
    },
    BindFragmentSampler {
        slot: u32,
        texture: Handle,
        sampler: Handle,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    EndRenderPass,
    CopyTextureToBuffer {
        texture: Handle,
        buffer: Handle,
    },
    Present {
        texture: Handle,
        filter: wgpu::FilterMode,
    },
}

impl Command {
    /// Visit every handle the command refers to.
    pub fn for_each_handle(&self, mut f: impl FnMut(Handle)) {
        match *self {
            Command::BindComputePipeline(h) | Command::BindGraphicsPipeline(h) => f(h),
            Command::BindComputeBuffer { buffer, .. } => f(buffer),
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                ..
            } => {
                f(render_pass);
                f(framebuffer);
            }
            Command::BindVertexBuffer { buffer, .. } => f(buffer),
            Command::BindFragmentSampler {
                texture, sampler, ..
            } => {
                f(texture);
                f(sampler);
            }
            Command::CopyTextureToBuffer { texture, buffer } => {
                f(texture);
                f(buffer);
            }
            Command::Present { texture, .. } => f(texture),
            Command::DispatchCompute { .. } | Command::Draw { .. } | Command::EndRenderPass => {}
        }
    }
}

/// One frame's worth of recorded commands.
///
/// `clear` keeps the allocations, so a list reused every frame stops
/// allocating once it has seen its largest frame.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<Command>,
    params: Vec<u8>,
    in_render_pass: bool,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.params.clear();
        self.in_render_pass = false;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Transient parameter block, each copy at a [`PARAM_ALIGNMENT`] boundary
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: Handle) {
        self.commands.push(Command::BindComputePipeline(pipeline));
    }

    pub fn bind_compute_buffer(&mut self, slot: u32, buffer: Handle) {
        self.commands.push(Command::BindComputeBuffer { slot, buffer });
    }

    /// Copy `value` into the parameter block and return where it landed.
    pub fn push_compute_params<T: bytemuck::Pod>(&mut self, value: &T) -> ParamOffset {
        let offset = self.params.len().next_multiple_of(PARAM_ALIGNMENT);
        self.params.resize(offset, 0);
        self.params.extend_from_slice(bytemuck::bytes_of(value));
        ParamOffset(offset as u32)
    }

    pub fn dispatch_compute(&mut self, groups: [u32; 3], params: ParamOffset) {
        self.commands.push(Command::DispatchCompute { groups, params });
    }

    pub fn begin_render_pass(&mut self, render_pass: Handle, framebuffer: Handle, clear: ClearValues) {
        debug_assert!(!self.in_render_pass, "render passes do not nest");
        self.in_render_pass = true;
        self.commands.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            clear,
        });
    }

    pub fn bind_graphics_pipeline(&mut self, pipeline: Handle) {
        self.commands.push(Command::BindGraphicsPipeline(pipeline));
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: Handle, offset: u64) {
        self.commands.push(Command::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    pub fn bind_fragment_sampler(&mut self, slot: u32, texture: Handle, sampler: Handle) {
        self.commands.push(Command::BindFragmentSampler {
            slot,
            texture,
            sampler,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        debug_assert!(self.in_render_pass, "draw outside a render pass");
        self.commands.push(Command::Draw {
            vertex_count,
            first_vertex,
        });
    }

    pub fn end_render_pass(&mut self) {
        debug_assert!(self.in_render_pass, "end without begin");
        self.in_render_pass = false;
        self.commands.push(Command::EndRenderPass);
    }

    pub fn copy_texture_to_buffer(&mut self, texture: Handle, buffer: Handle) {
        self.commands.push(Command::CopyTextureToBuffer { texture, buffer });
    }

    pub fn present(&mut self, texture: Handle, filter: wgpu::FilterMode) {
        self.commands.push(Command::Present { texture, filter });
    }
}
