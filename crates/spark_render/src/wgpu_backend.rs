//! wgpu device backend
//!
//! Maps the handle-based resource model onto wgpu objects and replays a
//! [`CommandList`] into one command encoder per submission.
//!
//! Render passes and framebuffers have no wgpu counterpart: a render pass is
//! kept as its attachment description and a framebuffer as the views it
//! binds, and both are turned into a `wgpu::RenderPassDescriptor` when a pass
//! begins. Bind groups are built on first use and cached by the handles they
//! bind; disposing any of those handles drops the cached group.
//!
//! Present blits the color target onto the swapchain image with a
//! fullscreen triangle.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU64;
use std::sync::{mpsc, Arc};

use winit::window::Window;

use crate::backend::{GpuBackend, SubmissionId};
use crate::commands::{ClearValues, Command, CommandList, PARAM_ALIGNMENT};
use crate::desc::{bytes_per_texel, LoadOp, RenderPassDesc, ResourceDesc, ShaderCode, StoreOp};
use crate::error::RenderError;
use crate::handle::Handle;

/// Bindable compute buffers / fragment samplers per pipeline
const MAX_BINDINGS: usize = 4;

const INITIAL_PARAM_CAPACITY: u64 = (PARAM_ALIGNMENT * 16) as u64;

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Submissions allowed to be in flight before `submit` blocks
    pub frames_in_flight: u32,
    pub present_mode: wgpu::PresentMode,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 1,
            present_mode: wgpu::PresentMode::Immediate,
        }
    }
}

enum Object {
    ShaderModule(wgpu::ShaderModule),
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
    Sampler(wgpu::Sampler),
    Buffer(wgpu::Buffer),
    GraphicsPipeline {
        pipeline: wgpu::RenderPipeline,
        sampler_layout: Option<wgpu::BindGroupLayout>,
        fragment_samplers: u32,
    },
    ComputePipeline {
        pipeline: wgpu::ComputePipeline,
        layout: wgpu::BindGroupLayout,
        buffer_bindings: u32,
        uniform_size: u64,
    },
    RenderPass(RenderPassDesc),
    ColorTarget(wgpu::TextureView),
    DepthStencilTarget {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
    Framebuffer {
        render_pass: Handle,
        color_targets: Vec<Handle>,
        depth_stencil_target: Option<Handle>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BindGroupKey {
    Compute {
        pipeline: Handle,
        buffers: [Option<Handle>; MAX_BINDINGS],
    },
    Samplers {
        pipeline: Handle,
        pairs: [Option<(Handle, Handle)>; MAX_BINDINGS],
    },
    Present {
        texture: Handle,
        filter: wgpu::FilterMode,
    },
}

impl BindGroupKey {
    fn references(&self, handle: Handle) -> bool {
        match self {
            BindGroupKey::Compute { pipeline, buffers } => {
                *pipeline == handle || buffers.contains(&Some(handle))
            }
            BindGroupKey::Samplers { pipeline, pairs } => {
                *pipeline == handle
                    || pairs
                        .iter()
                        .flatten()
                        .any(|&(texture, sampler)| texture == handle || sampler == handle)
            }
            BindGroupKey::Present { texture, .. } => *texture == handle,
        }
    }
}

struct PresentBlit {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,
}

pub struct WgpuBackend {
    _window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    frames_in_flight: usize,

    objects: HashMap<Handle, Object>,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    param_buffer: wgpu::Buffer,
    present: PresentBlit,

    next_submission: u64,
    in_flight: VecDeque<(SubmissionId, wgpu::SubmissionIndex)>,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &DeviceSettings) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::Initialization(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::Initialization("no compatible adapter".to_string()))?;

        let info = adapter.get_info();
        tracing::info!("Using {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("spark device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Initialization(format!("device: {e}")))?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            tracing::error!("Uncaptured wgpu error: {error}");
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::Initialization("surface reports no formats".to_string()))?;

        let present_mode = if caps.present_modes.contains(&settings.present_mode) {
            settings.present_mode
        } else {
            tracing::warn!(
                "Present mode {:?} unsupported, falling back to Fifo",
                settings.present_mode
            );
            wgpu::PresentMode::Fifo
        };

        let frames_in_flight = settings.frames_in_flight.max(1);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: frames_in_flight,
        };
        surface.configure(&device, &config);
        tracing::info!(
            "Surface {}x{} {:?} {:?}",
            config.width,
            config.height,
            format,
            present_mode
        );

        let param_buffer = create_param_buffer(&device, INITIAL_PARAM_CAPACITY);
        let present = PresentBlit::new(&device, format);

        Ok(Self {
            _window: window,
            surface,
            device,
            queue,
            config,
            frames_in_flight: frames_in_flight as usize,
            objects: HashMap::new(),
            bind_groups: HashMap::new(),
            param_buffer,
            present,
            next_submission: 0,
            in_flight: VecDeque::new(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn object(&self, handle: Handle) -> Result<&Object, RenderError> {
        self.objects.get(&handle).ok_or(RenderError::StaleHandle(handle))
    }

    fn shader_module(&self, handle: Handle) -> Result<&wgpu::ShaderModule, String> {
        match self.objects.get(&handle) {
            Some(Object::ShaderModule(module)) => Ok(module),
            _ => Err(format!("{handle:?} is not a shader module")),
        }
    }

    fn build(&self, desc: &ResourceDesc) -> Result<Object, String> {
        let device = &self.device;
        let object = match desc {
            ResourceDesc::ShaderModule(d) => {
                // make_spirv panics on malformed input
                d.code.validate()?;
                let source = match &d.code {
                    ShaderCode::SpirV(bytes) => wgpu::util::make_spirv(bytes),
                    ShaderCode::Wgsl(text) => wgpu::ShaderSource::Wgsl(text.as_str().into()),
                };
                Object::ShaderModule(device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(d.label.as_str()),
                    source,
                }))
            }
            ResourceDesc::Texture(d) => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(d.label.as_str()),
                    size: extent(d.width, d.height),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: d.format,
                    usage: d.usage,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Object::Texture { texture, view }
            }
            ResourceDesc::Sampler(d) => Object::Sampler(device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(d.label.as_str()),
                address_mode_u: d.address_mode,
                address_mode_v: d.address_mode,
                address_mode_w: d.address_mode,
                mag_filter: d.filter,
                min_filter: d.filter,
                mipmap_filter: d.mipmap_filter,
                compare: d.compare,
                ..Default::default()
            })),
            ResourceDesc::Buffer(d) => Object::Buffer(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(d.label.as_str()),
                size: d.size,
                usage: d.usage,
                mapped_at_creation: false,
            })),
            ResourceDesc::ComputePipeline(d) => {
                let module = self.shader_module(d.shader.module)?;
                let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..d.buffer_binding_count)
                    .map(|binding| wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    })
                    .collect();
                if d.uniform_size > 0 {
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: d.buffer_binding_count,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(d.uniform_size),
                        },
                        count: None,
                    });
                }
                let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(d.label.as_str()),
                    entries: &entries,
                });
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(d.label.as_str()),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(d.label.as_str()),
                    layout: Some(&pipeline_layout),
                    module,
                    entry_point: Some(d.shader.entry_point.as_str()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                Object::ComputePipeline {
                    pipeline,
                    layout,
                    buffer_bindings: d.buffer_binding_count,
                    uniform_size: d.uniform_size,
                }
            }
            ResourceDesc::GraphicsPipeline(d) => {
                let vertex = self.shader_module(d.vertex.module)?;
                let fragment = self.shader_module(d.fragment.module)?;
                let Some(Object::RenderPass(pass)) = self.objects.get(&d.render_pass) else {
                    return Err("render pass is missing".to_string());
                };

                let sampler_layout = (d.fragment_sampler_count > 0).then(|| {
                    let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..d.fragment_sampler_count)
                        .flat_map(|slot| {
                            [
                                wgpu::BindGroupLayoutEntry {
                                    binding: slot * 2,
                                    visibility: wgpu::ShaderStages::FRAGMENT,
                                    ty: wgpu::BindingType::Texture {
                                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                        view_dimension: wgpu::TextureViewDimension::D2,
                                        multisampled: false,
                                    },
                                    count: None,
                                },
                                wgpu::BindGroupLayoutEntry {
                                    binding: slot * 2 + 1,
                                    visibility: wgpu::ShaderStages::FRAGMENT,
                                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                                    count: None,
                                },
                            ]
                        })
                        .collect();
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(d.label.as_str()),
                        entries: &entries,
                    })
                });
                let layouts: Vec<&wgpu::BindGroupLayout> = sampler_layout.iter().collect();
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(d.label.as_str()),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });

                let targets: Vec<Option<wgpu::ColorTargetState>> = pass
                    .color
                    .iter()
                    .map(|color| {
                        Some(wgpu::ColorTargetState {
                            format: color.format,
                            blend: d.blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .collect();

                let depth_stencil = pass.depth_stencil.as_ref().map(|depth| wgpu::DepthStencilState {
                    format: depth.format,
                    depth_write_enabled: d.depth_write,
                    depth_compare: if d.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                });

                let vertex_layout = [wgpu::VertexBufferLayout {
                    array_stride: d.vertex_stride,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &d.vertex_attributes,
                }];
                let vertex_buffers: &[wgpu::VertexBufferLayout] = if d.vertex_attributes.is_empty() {
                    &[]
                } else {
                    &vertex_layout
                };

                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(d.label.as_str()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: vertex,
                        entry_point: Some(d.vertex.entry_point.as_str()),
                        buffers: vertex_buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: fragment,
                        entry_point: Some(d.fragment.entry_point.as_str()),
                        targets: &targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: d.topology,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
                Object::GraphicsPipeline {
                    pipeline,
                    sampler_layout,
                    fragment_samplers: d.fragment_sampler_count,
                }
            }
            ResourceDesc::RenderPass(d) => Object::RenderPass(d.clone()),
            ResourceDesc::ColorTarget(d) => match self.objects.get(&d.texture) {
                Some(Object::Texture { texture, .. }) => {
                    Object::ColorTarget(texture.create_view(&wgpu::TextureViewDescriptor::default()))
                }
                _ => return Err("color target texture is missing".to_string()),
            },
            ResourceDesc::DepthStencilTarget(d) => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(d.label.as_str()),
                    size: extent(d.width, d.height),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: d.format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Object::DepthStencilTarget { texture, view }
            }
            ResourceDesc::Framebuffer(d) => {
                let Some(Object::RenderPass(pass)) = self.objects.get(&d.render_pass) else {
                    return Err("render pass is missing".to_string());
                };
                if pass.color.len() != d.color_targets.len() {
                    return Err(format!(
                        "render pass has {} color attachments, framebuffer supplies {}",
                        pass.color.len(),
                        d.color_targets.len()
                    ));
                }
                if pass.depth_stencil.is_some() != d.depth_stencil_target.is_some() {
                    return Err("depth/stencil attachment does not match the render pass".to_string());
                }
                Object::Framebuffer {
                    render_pass: d.render_pass,
                    color_targets: d.color_targets.clone(),
                    depth_stencil_target: d.depth_stencil_target,
                }
            }
        };
        Ok(object)
    }

    /// Bind group needed by each command of `list`, indexed like the commands.
    fn bind_group_keys(&self, list: &CommandList) -> Result<Vec<Option<BindGroupKey>>, RenderError> {
        let mut keys = vec![None; list.commands().len()];
        let mut compute_pipeline = None;
        let mut compute_buffers = [None; MAX_BINDINGS];
        let mut graphics_pipeline = None;
        let mut pairs = [None; MAX_BINDINGS];

        for (i, command) in list.commands().iter().enumerate() {
            match *command {
                Command::BindComputePipeline(h) => {
                    compute_pipeline = Some(h);
                    compute_buffers = [None; MAX_BINDINGS];
                }
                Command::BindComputeBuffer { slot, buffer } => {
                    *compute_buffers
                        .get_mut(slot as usize)
                        .ok_or_else(|| RenderError::InvalidCommands(format!("compute slot {slot} out of range")))? =
                        Some(buffer);
                }
                Command::DispatchCompute { .. } => {
                    let pipeline = compute_pipeline
                        .ok_or_else(|| RenderError::InvalidCommands("dispatch without a compute pipeline".into()))?;
                    keys[i] = Some(BindGroupKey::Compute {
                        pipeline,
                        buffers: compute_buffers,
                    });
                }
                Command::BeginRenderPass { .. } => {
                    graphics_pipeline = None;
                    pairs = [None; MAX_BINDINGS];
                }
                Command::BindGraphicsPipeline(h) => graphics_pipeline = Some(h),
                Command::BindFragmentSampler { slot, texture, sampler } => {
                    *pairs
                        .get_mut(slot as usize)
                        .ok_or_else(|| RenderError::InvalidCommands(format!("fragment slot {slot} out of range")))? =
                        Some((texture, sampler));
                }
                Command::Draw { .. } => {
                    let pipeline = graphics_pipeline
                        .ok_or_else(|| RenderError::InvalidCommands("draw without a graphics pipeline".into()))?;
                    if let Object::GraphicsPipeline {
                        fragment_samplers, ..
                    } = self.object(pipeline)?
                    {
                        if *fragment_samplers > 0 {
                            keys[i] = Some(BindGroupKey::Samplers { pipeline, pairs });
                        }
                    }
                }
                Command::Present { texture, filter } => {
                    keys[i] = Some(BindGroupKey::Present { texture, filter });
                }
                Command::BindVertexBuffer { .. } | Command::EndRenderPass | Command::CopyTextureToBuffer { .. } => {}
            }
        }
        Ok(keys)
    }

    fn create_bind_group(&self, key: &BindGroupKey) -> Result<wgpu::BindGroup, RenderError> {
        let missing = |what: &str| RenderError::InvalidCommands(format!("{what} not bound"));
        match *key {
            BindGroupKey::Compute { pipeline, buffers } => {
                let Object::ComputePipeline {
                    layout,
                    buffer_bindings,
                    uniform_size,
                    ..
                } = self.object(pipeline)?
                else {
                    return Err(RenderError::InvalidCommands(format!("{pipeline:?} is not a compute pipeline")));
                };
                let mut entries = Vec::with_capacity(*buffer_bindings as usize + 1);
                for slot in 0..*buffer_bindings {
                    let handle = buffers
                        .get(slot as usize)
                        .copied()
                        .flatten()
                        .ok_or_else(|| missing("compute buffer"))?;
                    let Object::Buffer(buffer) = self.object(handle)? else {
                        return Err(RenderError::InvalidCommands(format!("{handle:?} is not a buffer")));
                    };
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot,
                        resource: buffer.as_entire_binding(),
                    });
                }
                if *uniform_size > 0 {
                    entries.push(wgpu::BindGroupEntry {
                        binding: *buffer_bindings,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.param_buffer,
                            offset: 0,
                            size: NonZeroU64::new(*uniform_size),
                        }),
                    });
                }
                Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("compute bindings"),
                    layout,
                    entries: &entries,
                }))
            }
            BindGroupKey::Samplers { pipeline, pairs } => {
                let Object::GraphicsPipeline {
                    sampler_layout: Some(layout),
                    fragment_samplers,
                    ..
                } = self.object(pipeline)?
                else {
                    return Err(RenderError::InvalidCommands(format!("{pipeline:?} samples no textures")));
                };
                let mut entries = Vec::with_capacity(*fragment_samplers as usize * 2);
                for slot in 0..*fragment_samplers {
                    let (texture, sampler) = pairs
                        .get(slot as usize)
                        .copied()
                        .flatten()
                        .ok_or_else(|| missing("fragment sampler"))?;
                    let (Object::Texture { view, .. }, Object::Sampler(sampler)) =
                        (self.object(texture)?, self.object(sampler)?)
                    else {
                        return Err(RenderError::InvalidCommands("bad texture/sampler pair".to_string()));
                    };
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot * 2,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
                Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("fragment samplers"),
                    layout,
                    entries: &entries,
                }))
            }
            BindGroupKey::Present { texture, filter } => {
                let Object::Texture { view, .. } = self.object(texture)? else {
                    return Err(RenderError::InvalidCommands(format!("{texture:?} is not a texture")));
                };
                let sampler = match filter {
                    wgpu::FilterMode::Nearest => &self.present.nearest,
                    wgpu::FilterMode::Linear => &self.present.linear,
                };
                Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("present"),
                    layout: &self.present.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                    ],
                }))
            }
        }
    }

    /// Make room for a parameter block of `len` bytes. Growing replaces the
    /// buffer, so compute bind groups built against the old one are dropped.
    fn reserve_params(&mut self, len: usize) -> Result<(), RenderError> {
        if len as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RenderError::InvalidCommands(format!(
                "parameter block of {len} bytes is not 4-byte aligned"
            )));
        }
        if len as u64 > self.param_buffer.size() {
            let capacity = (len as u64).next_power_of_two();
            tracing::debug!("Growing parameter buffer to {capacity} bytes");
            self.param_buffer.destroy();
            self.param_buffer = create_param_buffer(&self.device, capacity);
            self.bind_groups
                .retain(|key, _| !matches!(key, BindGroupKey::Compute { .. }));
        }
        Ok(())
    }

    /// Build every bind group in `keys` that is not cached yet.
    fn build_bind_groups(&mut self, keys: &[Option<BindGroupKey>]) -> Result<usize, RenderError> {
        let mut built = 0;
        for key in keys.iter().flatten() {
            if !self.bind_groups.contains_key(key) {
                let group = self.create_bind_group(key)?;
                self.bind_groups.insert(*key, group);
                built += 1;
            }
        }
        Ok(built)
    }

    fn acquire_frame(&mut self) -> Result<Option<wgpu::SurfaceTexture>, RenderError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::warn!("Surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                Ok(None)
            }
            Err(e @ wgpu::SurfaceError::OutOfMemory) => Err(e.into()),
            Err(e) => {
                tracing::warn!("Skipping present: {e}");
                Ok(None)
            }
        }
    }

    fn encode(
        &self,
        list: &CommandList,
        keys: &[Option<BindGroupKey>],
        surface_view: Option<&wgpu::TextureView>,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<(), RenderError> {
        let commands = list.commands();
        let mut compute_pipeline = None;
        let mut i = 0;

        while i < commands.len() {
            match commands[i] {
                Command::BindComputePipeline(h) => compute_pipeline = Some(h),
                Command::BindComputeBuffer { .. } => {}
                Command::DispatchCompute { groups, params } => {
                    let pipeline = compute_pipeline
                        .ok_or_else(|| RenderError::InvalidCommands("dispatch without a compute pipeline".into()))?;
                    let Object::ComputePipeline {
                        pipeline, uniform_size, ..
                    } = self.object(pipeline)?
                    else {
                        return Err(RenderError::InvalidCommands(format!("{pipeline:?} is not a compute pipeline")));
                    };
                    let bind_group = self.cached_bind_group(keys[i])?;
                    let offset = [params.get()];
                    let offsets: &[u32] = if *uniform_size > 0 { &offset } else { &[] };

                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("dispatch"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, bind_group, offsets);
                    pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                }
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    clear,
                } => {
                    let end = commands[i..]
                        .iter()
                        .position(|c| matches!(c, Command::EndRenderPass))
                        .map(|offset| i + offset)
                        .ok_or_else(|| RenderError::InvalidCommands("render pass left open".into()))?;
                    self.encode_render_pass(encoder, render_pass, framebuffer, &clear, &commands[i + 1..end], &keys[i + 1..end])?;
                    i = end;
                }
                Command::CopyTextureToBuffer { texture, buffer } => {
                    let (Object::Texture { texture, .. }, Object::Buffer(buffer)) =
                        (self.object(texture)?, self.object(buffer)?)
                    else {
                        return Err(RenderError::InvalidCommands("copy needs a texture and a buffer".into()));
                    };
                    let texel = bytes_per_texel(texture.format()).unwrap_or(4);
                    let padded = (texture.width() * texel).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
                    encoder.copy_texture_to_buffer(
                        wgpu::ImageCopyTexture {
                            texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::ImageCopyBuffer {
                            buffer,
                            layout: wgpu::ImageDataLayout {
                                offset: 0,
                                bytes_per_row: Some(padded),
                                rows_per_image: Some(texture.height()),
                            },
                        },
                        texture.size(),
                    );
                }
                Command::Present { .. } => {
                    let Some(target) = surface_view else {
                        i += 1;
                        continue;
                    };
                    let bind_group = self.cached_bind_group(keys[i])?;
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("present"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(&self.present.pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.draw(0..3, 0..1);
                }
                Command::BindGraphicsPipeline(_)
                | Command::BindVertexBuffer { .. }
                | Command::BindFragmentSampler { .. }
                | Command::Draw { .. }
                | Command::EndRenderPass => {
                    return Err(RenderError::InvalidCommands(format!(
                        "{:?} outside a render pass",
                        commands[i]
                    )));
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        render_pass: Handle,
        framebuffer: Handle,
        clear: &ClearValues,
        commands: &[Command],
        keys: &[Option<BindGroupKey>],
    ) -> Result<(), RenderError> {
        let Object::RenderPass(pass_desc) = self.object(render_pass)? else {
            return Err(RenderError::InvalidCommands(format!("{render_pass:?} is not a render pass")));
        };
        let Object::Framebuffer {
            render_pass: fb_pass,
            color_targets,
            depth_stencil_target,
        } = self.object(framebuffer)?
        else {
            return Err(RenderError::InvalidCommands(format!("{framebuffer:?} is not a framebuffer")));
        };
        if *fb_pass != render_pass {
            return Err(RenderError::InvalidCommands("framebuffer built for another render pass".into()));
        }

        let [r, g, b, a] = clear.color;
        let clear_color = wgpu::Color { r, g, b, a };
        let mut color_attachments = Vec::with_capacity(color_targets.len());
        for (target, attachment) in color_targets.iter().zip(&pass_desc.color) {
            let Object::ColorTarget(view) = self.object(*target)? else {
                return Err(RenderError::InvalidCommands(format!("{target:?} is not a color target")));
            };
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: load_op(attachment.load, clear_color),
                    store: store_op(attachment.store),
                },
            }));
        }

        let depth_stencil_attachment = match (depth_stencil_target, &pass_desc.depth_stencil) {
            (Some(target), Some(depth)) => {
                let Object::DepthStencilTarget { view, .. } = self.object(*target)? else {
                    return Err(RenderError::InvalidCommands(format!("{target:?} is not a depth target")));
                };
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: load_op(depth.depth_load, clear.depth),
                        store: store_op(depth.depth_store),
                    }),
                    stencil_ops: depth.format.has_stencil_aspect().then(|| wgpu::Operations {
                        load: load_op(depth.stencil_load, clear.stencil),
                        store: store_op(depth.stencil_store),
                    }),
                })
            }
            _ => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass_desc.label.as_str()),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for (command, key) in commands.iter().zip(keys) {
            match *command {
                Command::BindGraphicsPipeline(h) => {
                    let Object::GraphicsPipeline { pipeline, .. } = self.object(h)? else {
                        return Err(RenderError::InvalidCommands(format!("{h:?} is not a graphics pipeline")));
                    };
                    pass.set_pipeline(pipeline);
                }
                Command::BindVertexBuffer { slot, buffer, offset } => {
                    let Object::Buffer(buffer) = self.object(buffer)? else {
                        return Err(RenderError::InvalidCommands(format!("{buffer:?} is not a buffer")));
                    };
                    pass.set_vertex_buffer(slot, buffer.slice(offset..));
                }
                Command::BindFragmentSampler { .. } => {}
                Command::Draw {
                    vertex_count,
                    first_vertex,
                } => {
                    if key.is_some() {
                        pass.set_bind_group(0, self.cached_bind_group(*key)?, &[]);
                    }
                    pass.draw(first_vertex..first_vertex + vertex_count, 0..1);
                }
                ref other => {
                    return Err(RenderError::InvalidCommands(format!("{other:?} inside a render pass")));
                }
            }
        }
        Ok(())
    }

    fn cached_bind_group(&self, key: Option<BindGroupKey>) -> Result<&wgpu::BindGroup, RenderError> {
        key.and_then(|key| self.bind_groups.get(&key))
            .ok_or_else(|| RenderError::InvalidCommands("bind group was not prepared".into()))
    }

    fn throttle(&mut self) {
        while self.in_flight.len() > self.frames_in_flight {
            if let Some((_, index)) = self.in_flight.pop_front() {
                self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            }
        }
    }

    fn map_and_copy(&self, buffer: &wgpu::Buffer, out: &mut [u8]) -> Result<(), RenderError> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RenderError::Readback("map callback dropped".to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(&data[..out.len()]);
        }
        buffer.unmap();
        Ok(())
    }
}

impl PresentBlit {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/present.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("present"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("present"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let sampler = |filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("present"),
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        Self {
            pipeline,
            layout,
            nearest: sampler(wgpu::FilterMode::Nearest),
            linear: sampler(wgpu::FilterMode::Linear),
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn create(&mut self, handle: Handle, desc: &ResourceDesc) -> Result<(), RenderError> {
        let failed = |reason: String| RenderError::ResourceCreation {
            kind: desc.kind(),
            label: desc.label(),
            reason,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = self.build(desc);
        let scope_error = pollster::block_on(self.device.pop_error_scope());

        let object = built.map_err(failed)?;
        if let Some(error) = scope_error {
            return Err(failed(error.to_string()));
        }
        self.objects.insert(handle, object);
        Ok(())
    }

    fn dispose(&mut self, handle: Handle) {
        self.bind_groups.retain(|key, _| !key.references(handle));
        match self.objects.remove(&handle) {
            Some(Object::Buffer(buffer)) => buffer.destroy(),
            Some(Object::Texture { texture, .. }) | Some(Object::DepthStencilTarget { texture, .. }) => {
                texture.destroy()
            }
            _ => {}
        }
    }

    fn write_buffer(&mut self, buffer: Handle, offset: u64, data: &[u8]) -> Result<(), RenderError> {
        let Object::Buffer(buffer) = self.object(buffer)? else {
            return Err(RenderError::Upload(format!("{buffer:?} is not a buffer")));
        };
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RenderError::Upload("buffer writes must be 4-byte aligned".to_string()));
        }
        if offset + data.len() as u64 > buffer.size() {
            return Err(RenderError::Upload(format!(
                "write of {} bytes at {offset} overruns a {}-byte buffer",
                data.len(),
                buffer.size()
            )));
        }
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn write_texture(&mut self, texture: Handle, pixels: &[u8]) -> Result<(), RenderError> {
        let Object::Texture { texture, .. } = self.object(texture)? else {
            return Err(RenderError::Upload(format!("{texture:?} is not a texture")));
        };
        let texel = bytes_per_texel(texture.format())
            .ok_or_else(|| RenderError::Upload(format!("cannot upload {:?}", texture.format())))?;
        let expected = (texture.width() * texture.height() * texel) as usize;
        if pixels.len() != expected {
            return Err(RenderError::Upload(format!(
                "texture expects {expected} bytes, got {}",
                pixels.len()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.width() * texel),
                rows_per_image: Some(texture.height()),
            },
            texture.size(),
        );
        Ok(())
    }

    fn read_buffer(&mut self, buffer: Handle, out: &mut [u8]) -> Result<(), RenderError> {
        let Object::Buffer(source) = self.object(buffer)? else {
            return Err(RenderError::Readback(format!("{buffer:?} is not a buffer")));
        };
        if out.len() as u64 > source.size() {
            return Err(RenderError::Readback(format!(
                "asked for {} bytes from a {}-byte buffer",
                out.len(),
                source.size()
            )));
        }
        if source.usage().contains(wgpu::BufferUsages::MAP_READ) {
            return self.map_and_copy(source, out);
        }

        // Not mappable: route through a temporary staging buffer.
        let size = (out.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size.min(source.size()));
        self.queue.submit(Some(encoder.finish()));
        let result = self.map_and_copy(&staging, out);
        staging.destroy();
        result
    }

    fn prepare(&mut self, list: &CommandList) -> Result<(), RenderError> {
        let keys = self.bind_group_keys(list)?;
        self.reserve_params(list.params().len())?;
        let built = self.build_bind_groups(&keys)?;
        tracing::debug!("Prepared {built} bind groups");
        Ok(())
    }

    fn submit(&mut self, list: &CommandList) -> Result<SubmissionId, RenderError> {
        let keys = self.bind_group_keys(list)?;
        self.reserve_params(list.params().len())?;
        let built = self.build_bind_groups(&keys)?;
        if built > 0 {
            tracing::warn!("Built {built} bind groups during submit; the frame was not prepared");
        }
        if !list.params().is_empty() {
            self.queue.write_buffer(&self.param_buffer, 0, list.params());
        }

        let presents = list.count(|c| matches!(c, Command::Present { .. })) > 0;
        let frame = if presents { self.acquire_frame()? } else { None };
        let surface_view = frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });
        self.encode(list, &keys, surface_view.as_ref(), &mut encoder)?;
        let index = self.queue.submit(Some(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }

        self.next_submission += 1;
        let id = SubmissionId(self.next_submission);
        self.in_flight.push_back((id, index));
        self.throttle();
        Ok(id)
    }

    fn wait_for(&mut self, submission: SubmissionId) -> Result<(), RenderError> {
        if submission.0 == 0 || submission.0 > self.next_submission {
            return Err(RenderError::Readback(format!("{submission:?} was never submitted")));
        }
        // Anything no longer tracked was already waited on by the throttle.
        if let Some(pos) = self.in_flight.iter().position(|(id, _)| *id == submission) {
            let mut waited = self.in_flight.drain(..=pos);
            if let Some((_, index)) = waited.next_back() {
                self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            }
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.device.poll(wgpu::Maintain::Wait);
        self.in_flight.clear();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
        self.bind_groups.clear();
        if !self.objects.is_empty() {
            tracing::warn!("Destroying device with {} objects alive", self.objects.len());
            self.objects.clear();
        }
        self.param_buffer.destroy();
        self.device.destroy();
        tracing::info!("Device destroyed");
    }
}

fn create_param_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("transient params"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn load_op<V>(op: LoadOp, clear: V) -> wgpu::LoadOp<V> {
    match op {
        LoadOp::Clear => wgpu::LoadOp::Clear(clear),
        LoadOp::Load => wgpu::LoadOp::Load,
        // wgpu has no "don't care" load; clearing is the cheap equivalent
        LoadOp::DontCare => wgpu::LoadOp::Clear(clear),
    }
}

fn store_op(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dont_care_maps_to_clear_and_discard() {
        assert!(matches!(load_op(LoadOp::DontCare, 1.0f32), wgpu::LoadOp::Clear(v) if v == 1.0));
        assert!(matches!(load_op(LoadOp::Load, 0u32), wgpu::LoadOp::Load));
        assert_eq!(store_op(StoreOp::DontCare), wgpu::StoreOp::Discard);
    }

    #[test]
    fn disposing_a_handle_invalidates_its_bind_groups() {
        let texture = Handle::new(3, 0);
        let sampler = Handle::new(4, 0);
        let mut pairs = [None; MAX_BINDINGS];
        pairs[1] = Some((texture, sampler));
        let key = BindGroupKey::Samplers {
            pipeline: Handle::new(1, 0),
            pairs,
        };
        assert!(key.references(texture));
        assert!(key.references(sampler));
        assert!(!key.references(Handle::new(3, 1)));

        let present = BindGroupKey::Present {
            texture,
            filter: wgpu::FilterMode::Nearest,
        };
        assert!(present.references(texture));
    }
}
