//! Resource descriptions
//!
//! Backend-neutral descriptions of every device object the registry can
//! create. Plain wgpu value types (formats, usages, blend state) are reused
//! where they already say exactly what is needed.

use crate::handle::{Handle, ResourceKind};

/// SPIR-V magic number (first word of every module)
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Shader artifact contents
#[derive(Debug, Clone)]
pub enum ShaderCode {
    /// Little-endian SPIR-V words
    SpirV(Vec<u8>),
    Wgsl(String),
}

impl ShaderCode {
    /// Cheap structural check run before handing code to a device.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ShaderCode::SpirV(bytes) => {
                if bytes.len() < 4 || bytes.len() % 4 != 0 {
                    return Err(format!(
                        "SPIR-V byte length {} is not a non-zero multiple of 4",
                        bytes.len()
                    ));
                }
                let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if magic != SPIRV_MAGIC {
                    return Err(format!("bad SPIR-V magic {magic:#010x}"));
                }
                Ok(())
            }
            ShaderCode::Wgsl(source) => {
                if source.trim().is_empty() {
                    Err("empty WGSL source".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShaderModuleDesc {
    pub label: String,
    pub stage: ShaderStage,
    pub code: ShaderCode,
}

/// A shader module plus the entry point used from it
#[derive(Debug, Clone)]
pub struct ShaderStageRef {
    pub module: Handle,
    pub entry_point: String,
}

impl ShaderStageRef {
    pub fn main(module: Handle) -> Self {
        Self {
            module,
            entry_point: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureDesc {
    /// RGBA8 texture filled by an upload and read through a sampler
    pub fn sampled(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        }
    }

    /// RGBA8 render target that can also be presented and copied out
    pub fn color_target(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

impl BufferDesc {
    pub fn new(label: &str, size: u64, usage: wgpu::BufferUsages) -> Self {
        Self {
            label: label.to_string(),
            size,
            usage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub label: String,
    pub filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
    pub compare: Option<wgpu::CompareFunction>,
}

impl SamplerDesc {
    pub fn linear_repeat(label: &str) -> Self {
        Self {
            label: label.to_string(),
            filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::Repeat,
            compare: None,
        }
    }
}

/// Attachment load behaviour at the start of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

/// Attachment store behaviour at the end of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone)]
pub struct ColorAttachmentDesc {
    pub format: wgpu::TextureFormat,
    pub load: LoadOp,
    pub store: StoreOp,
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachmentDesc {
    pub format: wgpu::TextureFormat,
    pub depth_load: LoadOp,
    pub depth_store: StoreOp,
    pub stencil_load: LoadOp,
    pub stencil_store: StoreOp,
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub label: String,
    pub color: Vec<ColorAttachmentDesc>,
    pub depth_stencil: Option<DepthStencilAttachmentDesc>,
}

impl RenderPassDesc {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            color: Vec::new(),
            depth_stencil: None,
        }
    }

    /// Color attachment cleared on load and stored
    pub fn with_cleared_color(mut self, format: wgpu::TextureFormat) -> Self {
        self.color.push(ColorAttachmentDesc {
            format,
            load: LoadOp::Clear,
            store: StoreOp::Store,
        });
        self
    }

    /// Depth cleared and discarded, stencil ignored
    pub fn with_scratch_depth(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_stencil = Some(DepthStencilAttachmentDesc {
            format,
            depth_load: LoadOp::Clear,
            depth_store: StoreOp::DontCare,
            stencil_load: LoadOp::DontCare,
            stencil_store: StoreOp::DontCare,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub vertex: ShaderStageRef,
    pub fragment: ShaderStageRef,
    pub render_pass: Handle,
    pub vertex_stride: u64,
    pub vertex_attributes: Vec<wgpu::VertexAttribute>,
    pub topology: wgpu::PrimitiveTopology,
    pub blend: Option<wgpu::BlendState>,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Texture/sampler pairs bound to the fragment stage
    pub fragment_sampler_count: u32,
}

impl GraphicsPipelineDesc {
    pub fn new(label: &str, vertex: ShaderStageRef, fragment: ShaderStageRef, render_pass: Handle) -> Self {
        Self {
            label: label.to_string(),
            vertex,
            fragment,
            render_pass,
            vertex_stride: 0,
            vertex_attributes: Vec::new(),
            topology: wgpu::PrimitiveTopology::TriangleList,
            blend: None,
            depth_test: false,
            depth_write: false,
            fragment_sampler_count: 0,
        }
    }

    pub fn vertex_layout(mut self, stride: u64, attributes: &[wgpu::VertexAttribute]) -> Self {
        self.vertex_stride = stride;
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn blend(mut self, blend: wgpu::BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn fragment_samplers(mut self, count: u32) -> Self {
        self.fragment_sampler_count = count;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub label: String,
    pub shader: ShaderStageRef,
    /// Read/write storage buffers at bindings `0..buffer_binding_count`
    pub buffer_binding_count: u32,
    /// Size of the transient parameter block bound after the buffers
    pub uniform_size: u64,
}

/// Color target view over a whole texture
#[derive(Debug, Clone)]
pub struct ColorTargetDesc {
    pub texture: Handle,
}

#[derive(Debug, Clone)]
pub struct DepthStencilTargetDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub label: String,
    pub render_pass: Handle,
    pub color_targets: Vec<Handle>,
    pub depth_stencil_target: Option<Handle>,
    pub width: u32,
    pub height: u32,
}

/// Any description the registry accepts
#[derive(Debug, Clone)]
pub enum ResourceDesc {
    ShaderModule(ShaderModuleDesc),
    Texture(TextureDesc),
    Sampler(SamplerDesc),
    Buffer(BufferDesc),
    GraphicsPipeline(GraphicsPipelineDesc),
    ComputePipeline(ComputePipelineDesc),
    RenderPass(RenderPassDesc),
    ColorTarget(ColorTargetDesc),
    DepthStencilTarget(DepthStencilTargetDesc),
    Framebuffer(FramebufferDesc),
}

impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDesc::ShaderModule(_) => ResourceKind::ShaderModule,
            ResourceDesc::Texture(_) => ResourceKind::Texture,
            ResourceDesc::Sampler(_) => ResourceKind::Sampler,
            ResourceDesc::Buffer(_) => ResourceKind::Buffer,
            ResourceDesc::GraphicsPipeline(_) => ResourceKind::GraphicsPipeline,
            ResourceDesc::ComputePipeline(_) => ResourceKind::ComputePipeline,
            ResourceDesc::RenderPass(_) => ResourceKind::RenderPass,
            ResourceDesc::ColorTarget(_) => ResourceKind::ColorTarget,
            ResourceDesc::DepthStencilTarget(_) => ResourceKind::DepthStencilTarget,
            ResourceDesc::Framebuffer(_) => ResourceKind::Framebuffer,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ResourceDesc::ShaderModule(d) => d.label.clone(),
            ResourceDesc::Texture(d) => d.label.clone(),
            ResourceDesc::Sampler(d) => d.label.clone(),
            ResourceDesc::Buffer(d) => d.label.clone(),
            ResourceDesc::GraphicsPipeline(d) => d.label.clone(),
            ResourceDesc::ComputePipeline(d) => d.label.clone(),
            ResourceDesc::RenderPass(d) => d.label.clone(),
            ResourceDesc::ColorTarget(d) => format!("color target over {:?}", d.texture),
            ResourceDesc::DepthStencilTarget(d) => d.label.clone(),
            ResourceDesc::Framebuffer(d) => d.label.clone(),
        }
    }

    /// Handles this resource keeps referring to, with the kind each must be.
    pub fn dependencies(&self) -> Vec<(Handle, ResourceKind)> {
        match self {
            ResourceDesc::GraphicsPipeline(d) => vec![
                (d.vertex.module, ResourceKind::ShaderModule),
                (d.fragment.module, ResourceKind::ShaderModule),
                (d.render_pass, ResourceKind::RenderPass),
            ],
            ResourceDesc::ComputePipeline(d) => vec![(d.shader.module, ResourceKind::ShaderModule)],
            ResourceDesc::ColorTarget(d) => vec![(d.texture, ResourceKind::Texture)],
            ResourceDesc::Framebuffer(d) => {
                let mut deps = vec![(d.render_pass, ResourceKind::RenderPass)];
                deps.extend(d.color_targets.iter().map(|&h| (h, ResourceKind::ColorTarget)));
                deps.extend(
                    d.depth_stencil_target
                        .iter()
                        .map(|&h| (h, ResourceKind::DepthStencilTarget)),
                );
                deps
            }
            _ => Vec::new(),
        }
    }
}

macro_rules! impl_from_desc {
    ($($desc:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$desc> for ResourceDesc {
                fn from(desc: $desc) -> Self {
                    ResourceDesc::$variant(desc)
                }
            }
        )*
    };
}

impl_from_desc! {
    ShaderModuleDesc => ShaderModule,
    TextureDesc => Texture,
    SamplerDesc => Sampler,
    BufferDesc => Buffer,
    GraphicsPipelineDesc => GraphicsPipeline,
    ComputePipelineDesc => ComputePipeline,
    RenderPassDesc => RenderPass,
    ColorTargetDesc => ColorTarget,
    DepthStencilTargetDesc => DepthStencilTarget,
    FramebufferDesc => Framebuffer,
}

/// Bytes per texel for the formats this crate creates
pub fn bytes_per_texel(format: wgpu::TextureFormat) -> Option<u32> {
    format.block_copy_size(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_validation() {
        let mut good = SPIRV_MAGIC.to_le_bytes().to_vec();
        good.extend_from_slice(&[0; 8]);
        assert!(ShaderCode::SpirV(good).validate().is_ok());
        assert!(ShaderCode::SpirV(vec![0; 8]).validate().is_err());
        assert!(ShaderCode::SpirV(vec![0x03, 0x02, 0x23]).validate().is_err());
        assert!(ShaderCode::Wgsl("  \n".into()).validate().is_err());
    }

    #[test]
    fn framebuffer_lists_its_dependencies() {
        let pass = Handle::new(0, 0);
        let color = Handle::new(1, 0);
        let depth = Handle::new(2, 0);
        let desc = ResourceDesc::from(FramebufferDesc {
            label: "fb".into(),
            render_pass: pass,
            color_targets: vec![color],
            depth_stencil_target: Some(depth),
            width: 4,
            height: 4,
        });
        assert_eq!(desc.kind(), ResourceKind::Framebuffer);
        assert_eq!(
            desc.dependencies(),
            vec![
                (pass, ResourceKind::RenderPass),
                (color, ResourceKind::ColorTarget),
                (depth, ResourceKind::DepthStencilTarget),
            ]
        );
    }

    #[test]
    fn leaf_resources_have_no_dependencies() {
        let desc = ResourceDesc::from(TextureDesc::sampled("sprite", 8, 8));
        assert!(desc.dependencies().is_empty());
        assert_eq!(bytes_per_texel(wgpu::TextureFormat::Rgba8Unorm), Some(4));
    }
}
