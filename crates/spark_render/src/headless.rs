//! Host-memory backend
//!
//! Implements the device contract without a GPU. Buffers and textures are
//! plain byte vectors; submissions are checked for the same structural rules a
//! real device enforces (passes balanced, pipelines bound before use, usages
//! present) and their memory effects are applied: render passes clear their
//! color targets, texture copies land in buffers with padded rows. Shaders are
//! validated but not executed.
//!
//! Every device call is appended to an event log so tests can assert on
//! ordering (fence before readback, idle before disposal, disposal before
//! shutdown).

use std::collections::HashMap;

use crate::backend::{GpuBackend, SubmissionId};
use crate::capture::CaptureLayout;
use crate::commands::{ClearValues, Command, CommandList};
use crate::desc::{bytes_per_texel, ResourceDesc};
use crate::error::RenderError;
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessEvent {
    Created(Handle),
    Disposed(Handle),
    Prepared,
    Submitted(SubmissionId),
    WaitedFor(SubmissionId),
    WaitedIdle,
    Shutdown,
}

/// Totals over every accepted submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    pub submissions: u64,
    pub dispatches: u64,
    pub draws: u64,
    pub copies: u64,
    pub presents: u64,
}

enum Object {
    ShaderModule,
    Texture {
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        data: Vec<u8>,
    },
    Sampler,
    Buffer {
        usage: wgpu::BufferUsages,
        data: Vec<u8>,
    },
    GraphicsPipeline {
        render_pass: Handle,
        fragment_samplers: u32,
    },
    ComputePipeline {
        buffer_bindings: u32,
        uniform_size: u64,
    },
    RenderPass {
        color_formats: Vec<wgpu::TextureFormat>,
    },
    ColorTarget {
        texture: Handle,
    },
    DepthStencilTarget,
    Framebuffer {
        render_pass: Handle,
        color_targets: Vec<Handle>,
    },
}

#[derive(Default)]
pub struct HeadlessBackend {
    objects: HashMap<Handle, Object>,
    events: Vec<HeadlessEvent>,
    stats: SubmissionStats,
    last_submission: u64,
    last_commands: Option<CommandList>,
    shut_down: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[HeadlessEvent] {
        &self.events
    }

    pub fn disposal_order(&self) -> Vec<Handle> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HeadlessEvent::Disposed(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> SubmissionStats {
        self.stats
    }

    /// The most recent accepted command list
    pub fn last_commands(&self) -> Option<&CommandList> {
        self.last_commands.as_ref()
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn buffer_contents(&self, buffer: Handle) -> Option<&[u8]> {
        match self.objects.get(&buffer) {
            Some(Object::Buffer { data, .. }) => Some(data.as_slice()),
            _ => None,
        }
    }

    pub fn texture_contents(&self, texture: Handle) -> Option<&[u8]> {
        match self.objects.get(&texture) {
            Some(Object::Texture { data, .. }) => Some(data.as_slice()),
            _ => None,
        }
    }

    fn object(&self, handle: Handle) -> Result<&Object, RenderError> {
        self.objects.get(&handle).ok_or(RenderError::StaleHandle(handle))
    }

    fn build(&self, desc: &ResourceDesc) -> Result<Object, String> {
        let object = match desc {
            ResourceDesc::ShaderModule(d) => {
                d.code.validate()?;
                Object::ShaderModule
            }
            ResourceDesc::Texture(d) => {
                if d.width == 0 || d.height == 0 {
                    return Err(format!("zero-sized texture {}x{}", d.width, d.height));
                }
                let texel = bytes_per_texel(d.format)
                    .ok_or_else(|| format!("unsupported texture format {:?}", d.format))?;
                Object::Texture {
                    width: d.width,
                    height: d.height,
                    format: d.format,
                    usage: d.usage,
                    data: vec![0; (d.width * d.height * texel) as usize],
                }
            }
            ResourceDesc::Sampler(_) => Object::Sampler,
            ResourceDesc::Buffer(d) => {
                if d.size == 0 {
                    return Err("zero-sized buffer".to_string());
                }
                Object::Buffer {
                    usage: d.usage,
                    data: vec![0; d.size as usize],
                }
            }
            ResourceDesc::GraphicsPipeline(d) => Object::GraphicsPipeline {
                render_pass: d.render_pass,
                fragment_samplers: d.fragment_sampler_count,
            },
            ResourceDesc::ComputePipeline(d) => {
                if d.buffer_binding_count == 0 {
                    return Err("compute pipeline binds no buffers".to_string());
                }
                Object::ComputePipeline {
                    buffer_bindings: d.buffer_binding_count,
                    uniform_size: d.uniform_size,
                }
            }
            ResourceDesc::RenderPass(d) => {
                if d.color.is_empty() {
                    return Err("render pass has no color attachment".to_string());
                }
                if let Some(depth) = &d.depth_stencil {
                    if !depth.format.has_depth_aspect() {
                        return Err(format!("{:?} is not a depth format", depth.format));
                    }
                }
                Object::RenderPass {
                    color_formats: d.color.iter().map(|c| c.format).collect(),
                }
            }
            ResourceDesc::ColorTarget(d) => match self.objects.get(&d.texture) {
                Some(Object::Texture { usage, .. }) if usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) => {
                    Object::ColorTarget { texture: d.texture }
                }
                _ => return Err("texture is not a render attachment".to_string()),
            },
            ResourceDesc::DepthStencilTarget(d) => {
                if !d.format.has_depth_aspect() {
                    return Err(format!("{:?} is not a depth format", d.format));
                }
                Object::DepthStencilTarget
            }
            ResourceDesc::Framebuffer(d) => {
                let Some(Object::RenderPass { color_formats }) = self.objects.get(&d.render_pass) else {
                    return Err("framebuffer render pass is missing".to_string());
                };
                if color_formats.len() != d.color_targets.len() {
                    return Err(format!(
                        "render pass has {} color attachments, framebuffer supplies {}",
                        color_formats.len(),
                        d.color_targets.len()
                    ));
                }
                for (target, expected) in d.color_targets.iter().zip(color_formats) {
                    let (format, width, height) = self.color_target_info(*target)?;
                    if format != *expected {
                        return Err(format!("color target is {format:?}, render pass expects {expected:?}"));
                    }
                    if (width, height) != (d.width, d.height) {
                        return Err(format!(
                            "color target is {width}x{height}, framebuffer is {}x{}",
                            d.width, d.height
                        ));
                    }
                }
                Object::Framebuffer {
                    render_pass: d.render_pass,
                    color_targets: d.color_targets.clone(),
                }
            }
        };
        Ok(object)
    }

    fn color_target_info(&self, target: Handle) -> Result<(wgpu::TextureFormat, u32, u32), String> {
        let Some(Object::ColorTarget { texture }) = self.objects.get(&target) else {
            return Err(format!("{target:?} is not a color target"));
        };
        match self.objects.get(texture) {
            Some(Object::Texture {
                format, width, height, ..
            }) => Ok((*format, *width, *height)),
            _ => Err(format!("color target texture {texture:?} is missing")),
        }
    }

    /// Walk the stream the way a device would and reject it before any
    /// effect is applied.
    fn validate(&self, list: &CommandList) -> Result<(), RenderError> {
        let invalid = |msg: String| -> Result<(), RenderError> { Err(RenderError::InvalidCommands(msg)) };

        let mut pass: Option<Handle> = None;
        let mut compute: Option<(u32, u64)> = None;
        let mut compute_buffers = 0u32;
        let mut graphics: Option<u32> = None;
        let mut vertex_bound = false;

        for (i, command) in list.commands().iter().enumerate() {
            match *command {
                Command::BindComputePipeline(h) => match self.object(h)? {
                    Object::ComputePipeline {
                        buffer_bindings,
                        uniform_size,
                    } => {
                        compute = Some((*buffer_bindings, *uniform_size));
                        compute_buffers = 0;
                    }
                    _ => return invalid(format!("#{i}: {h:?} is not a compute pipeline")),
                },
                Command::BindComputeBuffer { slot, buffer } => {
                    let Some((bindings, _)) = compute else {
                        return invalid(format!("#{i}: compute buffer bound before a pipeline"));
                    };
                    if slot >= bindings {
                        return invalid(format!("#{i}: compute slot {slot} out of range"));
                    }
                    match self.object(buffer)? {
                        Object::Buffer { usage, .. } if usage.contains(wgpu::BufferUsages::STORAGE) => {}
                        _ => return invalid(format!("#{i}: {buffer:?} is not a storage buffer")),
                    }
                    compute_buffers |= 1 << slot;
                }
                Command::DispatchCompute { groups, params } => {
                    if pass.is_some() {
                        return invalid(format!("#{i}: dispatch inside a render pass"));
                    }
                    let Some((bindings, uniform_size)) = compute else {
                        return invalid(format!("#{i}: dispatch without a compute pipeline"));
                    };
                    if compute_buffers.count_ones() != bindings {
                        return invalid(format!("#{i}: dispatch with unbound compute buffers"));
                    }
                    if groups.contains(&0) {
                        return invalid(format!("#{i}: empty dispatch grid {groups:?}"));
                    }
                    if params.get() as u64 + uniform_size > list.params().len() as u64 {
                        return invalid(format!("#{i}: parameter offset {} out of range", params.get()));
                    }
                }
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    ..
                } => {
                    if pass.is_some() {
                        return invalid(format!("#{i}: render passes do not nest"));
                    }
                    match self.object(framebuffer)? {
                        Object::Framebuffer { render_pass: rp, .. } if *rp == render_pass => {}
                        _ => return invalid(format!("#{i}: framebuffer incompatible with render pass")),
                    }
                    pass = Some(render_pass);
                    graphics = None;
                    vertex_bound = false;
                }
                Command::BindGraphicsPipeline(h) => {
                    let Some(current) = pass else {
                        return invalid(format!("#{i}: graphics pipeline bound outside a render pass"));
                    };
                    match self.object(h)? {
                        Object::GraphicsPipeline {
                            render_pass,
                            fragment_samplers,
                        } if *render_pass == current => graphics = Some(*fragment_samplers),
                        _ => return invalid(format!("#{i}: {h:?} is not a pipeline for this pass")),
                    }
                }
                Command::BindVertexBuffer { buffer, .. } => match self.object(buffer)? {
                    Object::Buffer { usage, .. } if usage.contains(wgpu::BufferUsages::VERTEX) => {
                        vertex_bound = true;
                    }
                    _ => return invalid(format!("#{i}: {buffer:?} is not a vertex buffer")),
                },
                Command::BindFragmentSampler { slot, texture, sampler } => {
                    let Some(samplers) = graphics else {
                        return invalid(format!("#{i}: sampler bound before a graphics pipeline"));
                    };
                    if slot >= samplers {
                        return invalid(format!("#{i}: fragment slot {slot} out of range"));
                    }
                    let sampled = matches!(
                        self.object(texture)?,
                        Object::Texture { usage, .. } if usage.contains(wgpu::TextureUsages::TEXTURE_BINDING)
                    );
                    if !sampled || !matches!(self.object(sampler)?, Object::Sampler) {
                        return invalid(format!("#{i}: bad texture/sampler pair"));
                    }
                }
                Command::Draw { .. } => {
                    if pass.is_none() || graphics.is_none() || !vertex_bound {
                        return invalid(format!("#{i}: draw without pass, pipeline and vertex buffer"));
                    }
                }
                Command::EndRenderPass => {
                    if pass.take().is_none() {
                        return invalid(format!("#{i}: end without begin"));
                    }
                }
                Command::CopyTextureToBuffer { texture, buffer } => {
                    if pass.is_some() {
                        return invalid(format!("#{i}: copy inside a render pass"));
                    }
                    let Object::Texture {
                        width,
                        height,
                        usage,
                        ..
                    } = self.object(texture)?
                    else {
                        return invalid(format!("#{i}: {texture:?} is not a texture"));
                    };
                    if !usage.contains(wgpu::TextureUsages::COPY_SRC) {
                        return invalid(format!("#{i}: texture lacks COPY_SRC"));
                    }
                    let needed = CaptureLayout::new(*width, *height).buffer_size();
                    match self.object(buffer)? {
                        Object::Buffer { usage, data }
                            if usage.contains(wgpu::BufferUsages::COPY_DST) && data.len() as u64 >= needed => {}
                        _ => return invalid(format!("#{i}: copy destination too small or lacks COPY_DST")),
                    }
                }
                Command::Present { texture, .. } => {
                    if pass.is_some() {
                        return invalid(format!("#{i}: present inside a render pass"));
                    }
                    match self.object(texture)? {
                        Object::Texture { usage, .. } if usage.contains(wgpu::TextureUsages::TEXTURE_BINDING) => {}
                        _ => return invalid(format!("#{i}: {texture:?} cannot be presented")),
                    }
                }
            }
        }

        if pass.is_some() {
            return invalid("render pass left open".to_string());
        }
        Ok(())
    }

    fn clear_framebuffer(&mut self, framebuffer: Handle, clear: &ClearValues) {
        let targets = match self.objects.get(&framebuffer) {
            Some(Object::Framebuffer { color_targets, .. }) => color_targets.clone(),
            _ => return,
        };
        let rgba = clear.color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);

        for target in targets {
            let Some(&Object::ColorTarget { texture }) = self.objects.get(&target) else {
                continue;
            };
            if let Some(Object::Texture { format, data, .. }) = self.objects.get_mut(&texture) {
                let texel = match format {
                    wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                        [rgba[2], rgba[1], rgba[0], rgba[3]]
                    }
                    _ => rgba,
                };
                for chunk in data.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }

    fn copy_texture_to_buffer(&mut self, texture: Handle, buffer: Handle) {
        let (layout, pixels) = match self.objects.get(&texture) {
            Some(Object::Texture {
                width, height, data, ..
            }) => (CaptureLayout::new(*width, *height), data.clone()),
            _ => return,
        };
        if let Some(Object::Buffer { data, .. }) = self.objects.get_mut(&buffer) {
            let row = layout.unpadded_bytes_per_row() as usize;
            let padded = layout.padded_bytes_per_row as usize;
            for (y, src) in pixels.chunks_exact(row).enumerate() {
                data[y * padded..y * padded + row].copy_from_slice(src);
            }
        }
    }
}

impl GpuBackend for HeadlessBackend {
    fn create(&mut self, handle: Handle, desc: &ResourceDesc) -> Result<(), RenderError> {
        let object = self.build(desc).map_err(|reason| RenderError::ResourceCreation {
            kind: desc.kind(),
            label: desc.label(),
            reason,
        })?;
        self.objects.insert(handle, object);
        self.events.push(HeadlessEvent::Created(handle));
        Ok(())
    }

    fn dispose(&mut self, handle: Handle) {
        self.objects.remove(&handle);
        self.events.push(HeadlessEvent::Disposed(handle));
    }

    fn write_buffer(&mut self, buffer: Handle, offset: u64, bytes: &[u8]) -> Result<(), RenderError> {
        let Some(Object::Buffer { usage, data }) = self.objects.get_mut(&buffer) else {
            return Err(RenderError::StaleHandle(buffer));
        };
        if !usage.contains(wgpu::BufferUsages::COPY_DST) {
            return Err(RenderError::Upload("buffer lacks COPY_DST".to_string()));
        }
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            return Err(RenderError::Upload(format!(
                "write of {} bytes at {offset} overruns a {}-byte buffer",
                bytes.len(),
                data.len()
            )));
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn write_texture(&mut self, texture: Handle, pixels: &[u8]) -> Result<(), RenderError> {
        let Some(Object::Texture { usage, data, .. }) = self.objects.get_mut(&texture) else {
            return Err(RenderError::StaleHandle(texture));
        };
        if !usage.contains(wgpu::TextureUsages::COPY_DST) {
            return Err(RenderError::Upload("texture lacks COPY_DST".to_string()));
        }
        if pixels.len() != data.len() {
            return Err(RenderError::Upload(format!(
                "texture expects {} bytes, got {}",
                data.len(),
                pixels.len()
            )));
        }
        data.copy_from_slice(pixels);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: Handle, out: &mut [u8]) -> Result<(), RenderError> {
        let Some(Object::Buffer { data, .. }) = self.objects.get(&buffer) else {
            return Err(RenderError::StaleHandle(buffer));
        };
        if out.len() > data.len() {
            return Err(RenderError::Readback(format!(
                "asked for {} bytes from a {}-byte buffer",
                out.len(),
                data.len()
            )));
        }
        out.copy_from_slice(&data[..out.len()]);
        Ok(())
    }

    fn prepare(&mut self, list: &CommandList) -> Result<(), RenderError> {
        self.validate(list)?;
        self.events.push(HeadlessEvent::Prepared);
        Ok(())
    }

    fn submit(&mut self, list: &CommandList) -> Result<SubmissionId, RenderError> {
        self.validate(list)?;

        for command in list.commands() {
            match *command {
                Command::DispatchCompute { .. } => self.stats.dispatches += 1,
                Command::BeginRenderPass { framebuffer, clear, .. } => self.clear_framebuffer(framebuffer, &clear),
                Command::Draw { .. } => self.stats.draws += 1,
                Command::CopyTextureToBuffer { texture, buffer } => {
                    self.copy_texture_to_buffer(texture, buffer);
                    self.stats.copies += 1;
                }
                Command::Present { .. } => self.stats.presents += 1,
                _ => {}
            }
        }

        self.stats.submissions += 1;
        self.last_submission += 1;
        let id = SubmissionId(self.last_submission);
        self.last_commands = Some(list.clone());
        self.events.push(HeadlessEvent::Submitted(id));
        Ok(id)
    }

    fn wait_for(&mut self, submission: SubmissionId) -> Result<(), RenderError> {
        if submission.0 == 0 || submission.0 > self.last_submission {
            return Err(RenderError::Readback(format!("{submission:?} was never submitted")));
        }
        self.events.push(HeadlessEvent::WaitedFor(submission));
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.events.push(HeadlessEvent::WaitedIdle);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.objects.is_empty() {
            tracing::warn!("Headless device destroyed with {} objects alive", self.objects.len());
        }
        self.shut_down = true;
        self.events.push(HeadlessEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{BufferDesc, ColorTargetDesc, FramebufferDesc, RenderPassDesc, TextureDesc};
    use crate::handle::ResourceKind;

    fn h(i: u32) -> Handle {
        Handle::new(i, 0)
    }

    fn create(backend: &mut HeadlessBackend, i: u32, desc: impl Into<ResourceDesc>) {
        backend.create(h(i), &desc.into()).unwrap();
    }

    #[test]
    fn framebuffer_format_must_match_pass() {
        let mut backend = HeadlessBackend::new();
        create(
            &mut backend,
            0,
            RenderPassDesc::new("pass").with_cleared_color(wgpu::TextureFormat::Bgra8Unorm),
        );
        create(&mut backend, 1, TextureDesc::color_target("color", 4, 4));
        create(&mut backend, 2, ColorTargetDesc { texture: h(1) });

        let err = backend
            .create(
                h(3),
                &FramebufferDesc {
                    label: "fb".into(),
                    render_pass: h(0),
                    color_targets: vec![h(2)],
                    depth_stencil_target: None,
                    width: 4,
                    height: 4,
                }
                .into(),
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceCreation { kind: ResourceKind::Framebuffer, .. }));
    }

    #[test]
    fn render_pass_clears_and_copy_pads_rows() {
        let mut backend = HeadlessBackend::new();
        create(
            &mut backend,
            0,
            RenderPassDesc::new("pass").with_cleared_color(wgpu::TextureFormat::Rgba8Unorm),
        );
        create(&mut backend, 1, TextureDesc::color_target("color", 2, 2));
        create(&mut backend, 2, ColorTargetDesc { texture: h(1) });
        create(
            &mut backend,
            3,
            FramebufferDesc {
                label: "fb".into(),
                render_pass: h(0),
                color_targets: vec![h(2)],
                depth_stencil_target: None,
                width: 2,
                height: 2,
            },
        );
        create(
            &mut backend,
            4,
            BufferDesc::new(
                "transfer",
                512,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
        );

        let mut list = CommandList::new();
        list.begin_render_pass(
            h(0),
            h(3),
            ClearValues {
                color: [1.0, 0.0, 0.0, 1.0],
                depth: 1.0,
                stencil: 0,
            },
        );
        list.end_render_pass();
        list.copy_texture_to_buffer(h(1), h(4));
        let id = backend.submit(&list).unwrap();
        backend.wait_for(id).unwrap();

        let mut out = vec![0; 512];
        backend.read_buffer(h(4), &mut out).unwrap();
        assert_eq!(&out[..8], &[255, 0, 0, 255, 255, 0, 0, 255]);
        assert_eq!(&out[8..16], &[0; 8]);
        assert_eq!(&out[256..264], &[255, 0, 0, 255, 255, 0, 0, 255]);
        assert_eq!(backend.stats().copies, 1);
    }

    #[test]
    fn dispatch_without_pipeline_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let mut list = CommandList::new();
        let params = list.push_compute_params(&[0u32; 4]);
        list.dispatch_compute([1, 1, 1], params);
        assert!(matches!(backend.submit(&list), Err(RenderError::InvalidCommands(_))));
        assert_eq!(backend.stats().submissions, 0);
    }

    #[test]
    fn waiting_for_an_unknown_submission_fails() {
        let mut backend = HeadlessBackend::new();
        assert!(backend.wait_for(SubmissionId(1)).is_err());
    }

    #[test]
    fn texture_upload_size_is_checked() {
        let mut backend = HeadlessBackend::new();
        create(&mut backend, 0, TextureDesc::sampled("sprite", 2, 2));
        assert!(matches!(
            backend.write_texture(h(0), &[0; 15]),
            Err(RenderError::Upload(_))
        ));
        backend.write_texture(h(0), &[7; 16]).unwrap();
        assert_eq!(backend.texture_contents(h(0)), Some(&[7u8; 16][..]));
    }
}
