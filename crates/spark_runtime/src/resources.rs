//! Resource set construction
//!
//! Everything the frame loop touches is created here, in dependency order,
//! and the registry is sealed at the end.

use anyhow::{Context, Result};
use spark_asset::{AssetError, RgbaImage, ShaderArtifact, ShaderFormat};
use spark_core::particle::{particle_rng, spawn_particles, GRADIENT_OFFSET, PARTICLE_STRIDE};
use spark_core::simulation::SimulationUniforms;
use spark_render::desc::{
    BufferDesc, ColorTargetDesc, ComputePipelineDesc, DepthStencilTargetDesc, FramebufferDesc,
    GraphicsPipelineDesc, RenderPassDesc, SamplerDesc, ShaderCode, ShaderModuleDesc, ShaderStage,
    ShaderStageRef, TextureDesc,
};
use spark_render::wgpu;
use spark_render::{CaptureLayout, FrameResources, GpuBackend, Handle, Registry};
use spark_services::settings::{AssetSettings, Settings};

/// Format of the offscreen color target (and of captured images)
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Scratch depth/stencil format; cleared every frame, never tested
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Shader artifacts and decoded textures, loaded before any device work.
pub struct AssetBundle {
    pub vertex: ShaderCode,
    pub fragment: ShaderCode,
    pub compute: ShaderCode,
    pub sprite: RgbaImage,
    pub gradient: RgbaImage,
}

impl AssetBundle {
    pub fn load(assets: &AssetSettings) -> Result<Self, AssetError> {
        Ok(Self {
            vertex: shader_code(spark_asset::load_shader(&assets.vertex_shader)?),
            fragment: shader_code(spark_asset::load_shader(&assets.fragment_shader)?),
            compute: shader_code(spark_asset::load_shader(&assets.compute_shader)?),
            sprite: spark_asset::load_rgba8(&assets.particle_texture)?,
            gradient: spark_asset::load_rgba8(&assets.gradient_texture)?,
        })
    }
}

fn shader_code(artifact: ShaderArtifact) -> ShaderCode {
    match artifact.format {
        ShaderFormat::SpirV => ShaderCode::SpirV(artifact.bytes),
        // UTF-8 was checked by the loader
        ShaderFormat::Wgsl => ShaderCode::Wgsl(String::from_utf8_lossy(&artifact.bytes).into_owned()),
    }
}

/// Additive color, alpha weighted by the destination.
fn particle_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::SrcAlpha,
            dst_factor: wgpu::BlendFactor::DstAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

fn upload_texture<B: GpuBackend>(registry: &mut Registry<B>, label: &str, image: &RgbaImage) -> Result<Handle> {
    let texture = registry.create(TextureDesc::sampled(label, image.width(), image.height()))?;
    registry
        .write_texture(texture, image.as_raw())
        .with_context(|| format!("uploading {label}"))?;
    Ok(texture)
}

/// Create every resource the frame loop needs and seal the registry.
pub fn create_resources<B: GpuBackend>(
    registry: &mut Registry<B>,
    settings: &Settings,
    assets: &AssetBundle,
) -> Result<FrameResources> {
    let sim = &settings.simulation;
    let (width, height) = (settings.window.width, settings.window.height);

    let sprite_texture = upload_texture(registry, "particle sprite", &assets.sprite)?;
    let gradient_texture = upload_texture(registry, "particle gradient", &assets.gradient)?;
    let sampler = registry.create(SamplerDesc::linear_repeat("particle sampler"))?;

    let vertex = registry.create(ShaderModuleDesc {
        label: "particle.vert".into(),
        stage: ShaderStage::Vertex,
        code: assets.vertex.clone(),
    })?;
    let fragment = registry.create(ShaderModuleDesc {
        label: "particle.frag".into(),
        stage: ShaderStage::Fragment,
        code: assets.fragment.clone(),
    })?;
    let compute = registry.create(ShaderModuleDesc {
        label: "particle.comp".into(),
        stage: ShaderStage::Compute,
        code: assets.compute.clone(),
    })?;

    let mut rng = particle_rng(sim.seed);
    let particles = spawn_particles(sim.particle_count as usize, &mut rng);
    let particle_buffer = registry.create(BufferDesc::new(
        "particles",
        sim.particle_count as u64 * PARTICLE_STRIDE,
        wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
    ))?;
    registry
        .write_buffer(particle_buffer, 0, bytemuck::cast_slice(&particles))
        .context("uploading particles")?;

    let color_texture = registry.create(TextureDesc::color_target("color target", width, height))?;
    let render_pass = registry.create(
        RenderPassDesc::new("particles")
            .with_cleared_color(COLOR_FORMAT)
            .with_scratch_depth(DEPTH_FORMAT),
    )?;
    let color_target = registry.create(ColorTargetDesc { texture: color_texture })?;
    let depth_target = registry.create(DepthStencilTargetDesc {
        label: "scratch depth".into(),
        width,
        height,
        format: DEPTH_FORMAT,
    })?;
    let framebuffer = registry.create(FramebufferDesc {
        label: "particles".into(),
        render_pass,
        color_targets: vec![color_target],
        depth_stencil_target: Some(depth_target),
        width,
        height,
    })?;

    let graphics_pipeline = registry.create(
        GraphicsPipelineDesc::new(
            "particle draw",
            ShaderStageRef::main(vertex),
            ShaderStageRef::main(fragment),
            render_pass,
        )
        .vertex_layout(
            PARTICLE_STRIDE,
            &[
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: 0,
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: GRADIENT_OFFSET,
                    shader_location: 1,
                },
            ],
        )
        .topology(wgpu::PrimitiveTopology::PointList)
        .blend(particle_blend())
        .fragment_samplers(2),
    )?;
    let compute_pipeline = registry.create(ComputePipelineDesc {
        label: "particle simulate".into(),
        shader: ShaderStageRef::main(compute),
        buffer_binding_count: 1,
        uniform_size: std::mem::size_of::<SimulationUniforms>() as u64,
    })?;

    let transfer_buffer = registry.create(BufferDesc::new(
        "capture transfer",
        CaptureLayout::new(width, height).buffer_size(),
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    ))?;

    registry.seal();
    tracing::info!(
        "Created {} resources for {} particles",
        registry.live_count(),
        sim.particle_count
    );

    Ok(FrameResources {
        compute_pipeline,
        graphics_pipeline,
        particle_buffer,
        sprite_texture,
        gradient_texture,
        sampler,
        render_pass,
        framebuffer,
        color_texture,
        transfer_buffer,
        particle_count: sim.particle_count,
        workgroup_size: sim.workgroup_size,
    })
}
