//! Resource handle with generational index
//!
//! Handles are lightweight (8 bytes) references to device objects owned by
//! the [`Registry`](crate::Registry). The generation counter is bumped when a
//! slot is disposed, so a handle kept past disposal never resolves to
//! whatever reuses the slot.

use std::fmt;

/// Resource handle (generation-indexed for safety)
///
/// Format: [32-bit index | 32-bit generation]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into a 64-bit integer (for logs and debug labels)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Kind of device object behind a handle
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ShaderModule,
    Texture,
    Sampler,
    Buffer,
    GraphicsPipeline,
    ComputePipeline,
    RenderPass,
    ColorTarget,
    DepthStencilTarget,
    Framebuffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::ShaderModule => "shader module",
            ResourceKind::Texture => "texture",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Buffer => "buffer",
            ResourceKind::GraphicsPipeline => "graphics pipeline",
            ResourceKind::ComputePipeline => "compute pipeline",
            ResourceKind::RenderPass => "render pass",
            ResourceKind::ColorTarget => "color target",
            ResourceKind::DepthStencilTarget => "depth/stencil target",
            ResourceKind::Framebuffer => "framebuffer",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let handle = Handle::new(17, 3);
        assert_eq!(Handle::from_bits(handle.to_bits()), handle);
        assert_eq!(handle.to_bits(), (3u64 << 32) | 17);
    }
}
