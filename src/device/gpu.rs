//! `wgpu` implementation of [`RenderingDevice`].
//!
//! Draw lists are recorded as [`DrawCommand`]s and replayed into a single
//! render pass when the list ends.

use std::num::NonZeroU32;

use wgpu::util::DeviceExt;

use super::pipeline_builder::PipelineBuilder;
use super::{
    BufferUsage, ClearValues, DataFormat, DrawCommand, DrawListId, FormatInterner,
    FramebufferFormatId, IndexFormat, PipelineDesc, RenderingDevice, ResourceRegistry, Rid,
    SamplerDesc, SamplerFilter, SamplerRepeat, ShaderDesc, TextureDesc, TextureUsage, Uniform,
    UniformKind, UniformResource, UniformSlot, VertexAttribute, VertexFormatId, VertexFrequency,
};
use crate::error::DeviceError;

/// Binding arrays are sized per shader; this caps the sum per stage.
const MAX_BINDING_ARRAY_ELEMENTS: u32 = 64;
const PUSH_CONSTANT_STAGES: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT;

enum GpuResource {
    Buffer {
        buffer: wgpu::Buffer,
        usage: BufferUsage,
    },
    Texture {
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
        desc: TextureDesc,
    },
    Sampler(wgpu::Sampler),
    VertexArray {
        buffers: Vec<(Rid, u64)>,
    },
    IndexArray {
        buffer: Rid,
        format: IndexFormat,
        first_index: u32,
        index_count: u32,
    },
    Framebuffer {
        attachments: Vec<Rid>,
        format: FramebufferFormatId,
        size: (u32, u32),
    },
    Shader {
        module: wgpu::ShaderModule,
        set_layouts: Vec<wgpu::BindGroupLayout>,
        pipeline_layout: wgpu::PipelineLayout,
        sets: Vec<Vec<UniformSlot>>,
    },
    UniformSet(wgpu::BindGroup),
    Pipeline(wgpu::RenderPipeline),
}

struct PendingDrawList {
    framebuffer: Rid,
    clear: Option<ClearValues>,
    commands: Vec<DrawCommand>,
}

pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: ResourceRegistry<GpuResource>,
    vertex_formats: FormatInterner<VertexAttribute>,
    framebuffer_formats: FormatInterner<DataFormat>,
    open_list: Option<(DrawListId, PendingDrawList)>,
    next_list: u32,
}

impl GpuDevice {
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS
            | wgpu::Features::TEXTURE_BINDING_ARRAY
            | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
    }

    pub fn required_limits() -> wgpu::Limits {
        wgpu::Limits {
            max_push_constant_size: 128,
            max_binding_array_elements_per_shader_stage: MAX_BINDING_ARRAY_ELEMENTS,
            max_sampled_textures_per_shader_stage: MAX_BINDING_ARRAY_ELEMENTS,
            ..wgpu::Limits::default()
        }
    }

    /// Wraps a device that was created with [`Self::required_features`] and
    /// [`Self::required_limits`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            resources: ResourceRegistry::new(),
            vertex_formats: FormatInterner::new(),
            framebuffer_formats: FormatInterner::new(),
            open_list: None,
            next_list: 0,
        }
    }

    /// Requests a suitable device from `adapter`.
    pub async fn request(adapter: &wgpu::Adapter) -> Result<Self, DeviceError> {
        let missing = Self::required_features() - adapter.features();
        if !missing.is_empty() {
            return Err(DeviceError::Backend(format!(
                "adapter lacks required features {:?}",
                missing
            )));
        }

        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("CanvasDevice"),
                required_features: Self::required_features(),
                required_limits: Self::required_limits(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| DeviceError::Backend(err.to_string()))?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture(&self, rid: Rid) -> Option<&wgpu::TextureView> {
        match self.resources.get(rid)? {
            GpuResource::Texture { view, .. } => Some(view),
            _ => None,
        }
    }

    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, wgpu::Error> {
        self.device.push_error_scope(filter);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    fn buffer(&self, rid: Rid) -> Result<&wgpu::Buffer, DeviceError> {
        match self.resources.get(rid) {
            Some(GpuResource::Buffer { buffer, .. }) => Ok(buffer),
            _ => Err(DeviceError::InvalidHandle(rid)),
        }
    }

    fn view(&self, rid: Rid) -> Result<&wgpu::TextureView, DeviceError> {
        self.texture(rid).ok_or(DeviceError::InvalidHandle(rid))
    }

    fn replay(&self, list: PendingDrawList) -> Result<(), DeviceError> {
        let (attachments, size) = match self.resources.get(list.framebuffer) {
            Some(GpuResource::Framebuffer {
                attachments, size, ..
            }) => (attachments, *size),
            _ => return Err(DeviceError::InvalidHandle(list.framebuffer)),
        };

        let mut color_attachments = Vec::new();
        let mut depth_attachment = None;
        for rid in attachments {
            let Some(GpuResource::Texture { view, desc, .. }) = self.resources.get(*rid) else {
                return Err(DeviceError::InvalidHandle(*rid));
            };
            if desc.format.is_depth() {
                depth_attachment = Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match list.clear {
                            Some(clear) => wgpu::LoadOp::Clear(clear.depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });
            } else {
                color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match list.clear {
                            Some(clear) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: clear.color[0] as f64,
                                g: clear.color[1] as f64,
                                b: clear.color[2] as f64,
                                a: clear.color[3] as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                }));
            }
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("CanvasDrawList"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("CanvasPass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let mut index_range = 0..0;

            for command in &list.commands {
                match command {
                    DrawCommand::BindPipeline(rid) => match self.resources.get(*rid) {
                        Some(GpuResource::Pipeline(pipeline)) => pass.set_pipeline(pipeline),
                        _ => log::warn!("Draw list references missing pipeline {:?}", rid),
                    },
                    DrawCommand::BindUniformSet { set, index } => match self.resources.get(*set) {
                        Some(GpuResource::UniformSet(group)) => {
                            pass.set_bind_group(*index, group, &[])
                        }
                        _ => log::warn!("Draw list references missing uniform set {:?}", set),
                    },
                    DrawCommand::BindVertexArray(rid) => match self.resources.get(*rid) {
                        Some(GpuResource::VertexArray { buffers }) => {
                            for (slot, (buffer, offset)) in buffers.iter().enumerate() {
                                let buffer = self.buffer(*buffer)?;
                                pass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
                            }
                        }
                        _ => log::warn!("Draw list references missing vertex array {:?}", rid),
                    },
                    DrawCommand::BindIndexArray(rid) => match self.resources.get(*rid) {
                        Some(GpuResource::IndexArray {
                            buffer,
                            format,
                            first_index,
                            index_count,
                        }) => {
                            let format = match format {
                                IndexFormat::U16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::U32 => wgpu::IndexFormat::Uint32,
                            };
                            pass.set_index_buffer(self.buffer(*buffer)?.slice(..), format);
                            index_range = *first_index..first_index + index_count;
                        }
                        _ => log::warn!("Draw list references missing index array {:?}", rid),
                    },
                    DrawCommand::SetPushConstant(data) => {
                        pass.set_push_constants(PUSH_CONSTANT_STAGES, 0, data)
                    }
                    DrawCommand::SetViewport(rect) => pass.set_viewport(
                        rect.position.x,
                        rect.position.y,
                        rect.size.x,
                        rect.size.y,
                        0.0,
                        1.0,
                    ),
                    DrawCommand::EnableScissor(rect) => {
                        let x = rect.position.x.clamp(0.0, size.0 as f32) as u32;
                        let y = rect.position.y.clamp(0.0, size.1 as f32) as u32;
                        let end_x = rect.end().x.clamp(0.0, size.0 as f32) as u32;
                        let end_y = rect.end().y.clamp(0.0, size.1 as f32) as u32;
                        pass.set_scissor_rect(x, y, end_x.saturating_sub(x), end_y.saturating_sub(y));
                    }
                    DrawCommand::DisableScissor => pass.set_scissor_rect(0, 0, size.0, size.1),
                    DrawCommand::Draw {
                        use_indices,
                        instances,
                        vertices,
                    } => {
                        if *use_indices {
                            pass.draw_indexed(index_range.clone(), 0, 0..*instances);
                        } else {
                            pass.draw(0..*vertices, 0..*instances);
                        }
                    }
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn texture_format(format: DataFormat) -> Result<wgpu::TextureFormat, DeviceError> {
    Ok(match format {
        DataFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        DataFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        DataFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        DataFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        DataFormat::R32Float => wgpu::TextureFormat::R32Float,
        DataFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        DataFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        DataFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
        DataFormat::D32Float => wgpu::TextureFormat::Depth32Float,
        DataFormat::Rgb32Float => {
            return Err(DeviceError::UnsupportedFormat(
                "Rgb32Float is not a texture format".into(),
            ))
        }
    })
}

fn vertex_format(format: DataFormat) -> Result<wgpu::VertexFormat, DeviceError> {
    Ok(match format {
        DataFormat::R32Float => wgpu::VertexFormat::Float32,
        DataFormat::Rg32Float => wgpu::VertexFormat::Float32x2,
        DataFormat::Rgb32Float => wgpu::VertexFormat::Float32x3,
        DataFormat::Rgba32Float => wgpu::VertexFormat::Float32x4,
        DataFormat::Rgba32Uint => wgpu::VertexFormat::Uint32x4,
        DataFormat::Rgba8Unorm => wgpu::VertexFormat::Unorm8x4,
        other => {
            return Err(DeviceError::UnsupportedFormat(format!(
                "{:?} is not a vertex format",
                other
            )))
        }
    })
}

fn address_mode(repeat: SamplerRepeat) -> wgpu::AddressMode {
    match repeat {
        SamplerRepeat::Clamp => wgpu::AddressMode::ClampToEdge,
        SamplerRepeat::Repeat => wgpu::AddressMode::Repeat,
        SamplerRepeat::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(filter: SamplerFilter) -> wgpu::FilterMode {
    match filter {
        SamplerFilter::Nearest => wgpu::FilterMode::Nearest,
        SamplerFilter::Linear => wgpu::FilterMode::Linear,
    }
}

fn layout_entry(slot: &UniformSlot) -> wgpu::BindGroupLayoutEntry {
    let (ty, count) = match slot.kind {
        UniformKind::UniformBuffer => (
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            None,
        ),
        UniformKind::StorageBuffer => (
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            None,
        ),
        UniformKind::Texture { filterable, count } => (
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            if count > 1 { NonZeroU32::new(count) } else { None },
        ),
        UniformKind::Sampler { filtering } => (
            wgpu::BindingType::Sampler(if filtering {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            None,
        ),
    };

    wgpu::BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty,
        count,
    }
}

impl RenderingDevice for GpuDevice {
    fn buffer_create(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Rid, DeviceError> {
        let usages = wgpu::BufferUsages::COPY_DST
            | match usage {
                BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
                BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
                BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
                BufferUsage::Index => wgpu::BufferUsages::INDEX,
            };
        let placeholder = [0u8; 4];
        let contents = if data.is_empty() { &placeholder[..] } else { data };

        let buffer = self
            .scoped(wgpu::ErrorFilter::OutOfMemory, |device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("CanvasBuffer"),
                    contents,
                    usage: usages,
                })
            })
            .map_err(|_| DeviceError::OutOfMemory { what: "buffer" })?;

        Ok(self
            .resources
            .insert(GpuResource::Buffer { buffer, usage }, &[]))
    }

    fn buffer_update(&mut self, buffer: Rid, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let target = self.buffer(buffer)?;
        if offset + data.len() as u64 > target.size() {
            return Err(DeviceError::InvalidDescriptor(format!(
                "update of {} bytes at offset {} overflows a {} byte buffer",
                data.len(),
                offset,
                target.size()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn texture_create(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<Rid, DeviceError> {
        let format = texture_format(desc.format)?;
        let mut usage = wgpu::TextureUsages::COPY_DST;
        if desc.usage.contains(TextureUsage::SAMPLING) {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if desc
            .usage
            .intersects(TextureUsage::COLOR_ATTACHMENT | TextureUsage::DEPTH_ATTACHMENT)
        {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };

        let texture = self
            .scoped(wgpu::ErrorFilter::OutOfMemory, |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("CanvasTexture"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
            })
            .map_err(|_| DeviceError::OutOfMemory { what: "texture" })?;

        if let Some(data) = data {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.format.size_in_bytes() * desc.width),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.resources.insert(
            GpuResource::Texture {
                _texture: texture,
                view,
                desc: *desc,
            },
            &[],
        ))
    }

    fn texture_size(&self, texture: Rid) -> Option<(u32, u32)> {
        match self.resources.get(texture)? {
            GpuResource::Texture { desc, .. } => Some((desc.width, desc.height)),
            _ => None,
        }
    }

    fn sampler_create(&mut self, desc: &SamplerDesc) -> Result<Rid, DeviceError> {
        let address = address_mode(desc.repeat);
        let filter = filter_mode(desc.filter);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("CanvasSampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: desc.mip_filter.map(filter_mode).unwrap_or(wgpu::FilterMode::Nearest),
            anisotropy_clamp: desc.anisotropy.max(1),
            ..Default::default()
        });
        Ok(self.resources.insert(GpuResource::Sampler(sampler), &[]))
    }

    fn vertex_format_create(&mut self, attributes: &[VertexAttribute]) -> VertexFormatId {
        VertexFormatId(self.vertex_formats.intern(attributes))
    }

    fn vertex_array_create(
        &mut self,
        _vertex_count: u32,
        format: VertexFormatId,
        buffers: &[Rid],
        offsets: &[u64],
    ) -> Result<Rid, DeviceError> {
        let attributes = self
            .vertex_formats
            .get(format.0)
            .ok_or_else(|| DeviceError::InvalidDescriptor(format!("{:?}", format)))?;
        if attributes.len() != buffers.len() || buffers.len() != offsets.len() {
            return Err(DeviceError::InvalidDescriptor(
                "vertex array needs one buffer and offset per attribute".into(),
            ));
        }
        for buffer in buffers {
            match self.resources.get(*buffer) {
                Some(GpuResource::Buffer {
                    usage: BufferUsage::Vertex,
                    ..
                }) => {}
                _ => return Err(DeviceError::InvalidHandle(*buffer)),
            }
        }
        let bound = buffers.iter().copied().zip(offsets.iter().copied()).collect();
        Ok(self.resources.insert(
            GpuResource::VertexArray { buffers: bound },
            buffers,
        ))
    }

    fn index_array_create(
        &mut self,
        buffer: Rid,
        format: IndexFormat,
        first_index: u32,
        index_count: u32,
    ) -> Result<Rid, DeviceError> {
        match self.resources.get(buffer) {
            Some(GpuResource::Buffer {
                buffer: raw,
                usage: BufferUsage::Index,
            }) => {
                let capacity = raw.size() / format.size_in_bytes() as u64;
                if (first_index + index_count) as u64 > capacity {
                    return Err(DeviceError::InvalidDescriptor(
                        "index range exceeds buffer".into(),
                    ));
                }
            }
            _ => return Err(DeviceError::InvalidHandle(buffer)),
        }
        Ok(self.resources.insert(
            GpuResource::IndexArray {
                buffer,
                format,
                first_index,
                index_count,
            },
            &[buffer],
        ))
    }

    fn framebuffer_format_create(&mut self, attachments: &[DataFormat]) -> FramebufferFormatId {
        FramebufferFormatId(self.framebuffer_formats.intern(attachments))
    }

    fn framebuffer_create(&mut self, attachments: &[Rid]) -> Result<Rid, DeviceError> {
        let mut formats = Vec::with_capacity(attachments.len());
        let mut size = None;
        for rid in attachments {
            let Some(GpuResource::Texture { desc, .. }) = self.resources.get(*rid) else {
                return Err(DeviceError::InvalidHandle(*rid));
            };
            if *size.get_or_insert((desc.width, desc.height)) != (desc.width, desc.height) {
                return Err(DeviceError::InvalidDescriptor(
                    "framebuffer attachments differ in size".into(),
                ));
            }
            formats.push(desc.format);
        }
        let size = size.ok_or_else(|| {
            DeviceError::InvalidDescriptor("framebuffer needs at least one attachment".into())
        })?;
        let format = self.framebuffer_format_create(&formats);
        Ok(self.resources.insert(
            GpuResource::Framebuffer {
                attachments: attachments.to_vec(),
                format,
                size,
            },
            attachments,
        ))
    }

    fn framebuffer_format(&self, framebuffer: Rid) -> Option<FramebufferFormatId> {
        match self.resources.get(framebuffer)? {
            GpuResource::Framebuffer { format, .. } => Some(*format),
            _ => None,
        }
    }

    fn shader_create(&mut self, desc: &ShaderDesc<'_>) -> Result<Rid, DeviceError> {
        let (module, set_layouts, pipeline_layout) = self
            .scoped(wgpu::ErrorFilter::Validation, |device| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Wgsl(desc.source.into()),
                });

                let set_layouts: Vec<wgpu::BindGroupLayout> = desc
                    .sets
                    .iter()
                    .enumerate()
                    .map(|(index, slots)| {
                        let entries: Vec<_> = slots.iter().map(layout_entry).collect();
                        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some(&format!("{}Set{}", desc.label, index)),
                            entries: &entries,
                        })
                    })
                    .collect();

                let layout_refs: Vec<&wgpu::BindGroupLayout> = set_layouts.iter().collect();
                let push_constant_ranges = if desc.push_constant_size > 0 {
                    vec![wgpu::PushConstantRange {
                        stages: PUSH_CONSTANT_STAGES,
                        range: 0..desc.push_constant_size,
                    }]
                } else {
                    Vec::new()
                };
                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some(desc.label),
                        bind_group_layouts: &layout_refs,
                        push_constant_ranges: &push_constant_ranges,
                    });

                (module, set_layouts, pipeline_layout)
            })
            .map_err(|err| DeviceError::Backend(err.to_string()))?;

        log::info!("Created shader '{}'", desc.label);
        Ok(self.resources.insert(
            GpuResource::Shader {
                module,
                set_layouts,
                pipeline_layout,
                sets: desc.sets.iter().map(|s| s.to_vec()).collect(),
            },
            &[],
        ))
    }

    fn uniform_set_create(
        &mut self,
        uniforms: &[Uniform],
        shader: Rid,
        set: u32,
    ) -> Result<Rid, DeviceError> {
        let group = {
            let (layout, slots) = match self.resources.get(shader) {
                Some(GpuResource::Shader {
                    set_layouts, sets, ..
                }) => (
                    set_layouts
                        .get(set as usize)
                        .ok_or_else(|| DeviceError::InvalidDescriptor(format!("no set {}", set)))?,
                    &sets[set as usize],
                ),
                _ => return Err(DeviceError::InvalidHandle(shader)),
            };

            let mut view_arrays: Vec<Vec<&wgpu::TextureView>> = Vec::new();
            for uniform in uniforms {
                if let UniformResource::Textures(rids) = &uniform.resource {
                    let views = rids
                        .iter()
                        .map(|rid| self.view(*rid))
                        .collect::<Result<Vec<_>, _>>()?;
                    view_arrays.push(views);
                }
            }

            let mut arrays = view_arrays.iter();
            let mut entries = Vec::with_capacity(uniforms.len());
            for uniform in uniforms {
                if !slots.iter().any(|s| s.binding == uniform.binding) {
                    return Err(DeviceError::InvalidDescriptor(format!(
                        "set {} has no binding {}",
                        set, uniform.binding
                    )));
                }
                let resource = match &uniform.resource {
                    UniformResource::Buffer(rid) => self.buffer(*rid)?.as_entire_binding(),
                    UniformResource::Texture(rid) => {
                        wgpu::BindingResource::TextureView(self.view(*rid)?)
                    }
                    UniformResource::Textures(_) => match arrays.next() {
                        Some(views) => wgpu::BindingResource::TextureViewArray(views),
                        None => {
                            return Err(DeviceError::InvalidDescriptor(
                                "texture array uniform without views".into(),
                            ))
                        }
                    },
                    UniformResource::Sampler(rid) => match self.resources.get(*rid) {
                        Some(GpuResource::Sampler(sampler)) => wgpu::BindingResource::Sampler(sampler),
                        _ => return Err(DeviceError::InvalidHandle(*rid)),
                    },
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: uniform.binding,
                    resource,
                });
            }

            self.scoped(wgpu::ErrorFilter::Validation, |device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("CanvasUniformSet"),
                    layout,
                    entries: &entries,
                })
            })
            .map_err(|err| DeviceError::InvalidDescriptor(err.to_string()))?
        };

        let mut dependencies: Vec<Rid> = uniforms
            .iter()
            .flat_map(|u| u.resources().iter().copied())
            .collect();
        dependencies.push(shader);
        Ok(self
            .resources
            .insert(GpuResource::UniformSet(group), &dependencies))
    }

    fn uniform_set_is_valid(&self, set: Rid) -> bool {
        matches!(self.resources.get(set), Some(GpuResource::UniformSet(_)))
    }

    fn render_pipeline_create(&mut self, desc: &PipelineDesc<'_>) -> Result<Rid, DeviceError> {
        let Some(GpuResource::Shader {
            module,
            pipeline_layout,
            ..
        }) = self.resources.get(desc.shader)
        else {
            return Err(DeviceError::InvalidHandle(desc.shader));
        };

        let attachments = self
            .framebuffer_formats
            .get(desc.framebuffer_format.0)
            .ok_or_else(|| DeviceError::InvalidDescriptor(format!("{:?}", desc.framebuffer_format)))?;

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = match desc.vertex_format {
            Some(id) => self
                .vertex_formats
                .get(id.0)
                .ok_or_else(|| DeviceError::InvalidDescriptor(format!("{:?}", id)))?
                .iter()
                .map(|a| {
                    Ok([wgpu::VertexAttribute {
                        format: vertex_format(a.format)?,
                        offset: 0,
                        shader_location: a.location,
                    }])
                })
                .collect::<Result<_, DeviceError>>()?,
            None => Vec::new(),
        };
        let layouts: Vec<wgpu::VertexBufferLayout<'_>> = match desc.vertex_format {
            Some(id) => self
                .vertex_formats
                .get(id.0)
                .unwrap_or_default()
                .iter()
                .zip(attributes.iter())
                .map(|(a, attribute)| wgpu::VertexBufferLayout {
                    array_stride: a.stride as u64,
                    step_mode: match a.frequency {
                        VertexFrequency::Vertex => wgpu::VertexStepMode::Vertex,
                        VertexFrequency::Instance => wgpu::VertexStepMode::Instance,
                    },
                    attributes: attribute,
                })
                .collect(),
            None => Vec::new(),
        };

        let mut builder = PipelineBuilder::new(&self.device, pipeline_layout, module)
            .with_label(desc.label)
            .with_entries(desc.vertex_entry, desc.fragment_entry)
            .with_vertex_buffers(layouts)
            .with_topology(desc.topology)
            .with_cull(desc.cull);
        for format in attachments {
            let raw = texture_format(*format)?;
            builder = if format.is_depth() {
                builder.with_depth(raw, desc.depth_test)
            } else {
                builder.with_color_target(raw, desc.blend)
            };
        }

        let pipeline = self
            .scoped(wgpu::ErrorFilter::Validation, |_| builder.build())
            .map_err(|err| DeviceError::UnsupportedFormat(err.to_string()))?;

        Ok(self
            .resources
            .insert(GpuResource::Pipeline(pipeline), &[desc.shader]))
    }

    fn is_valid(&self, rid: Rid) -> bool {
        self.resources.contains(rid)
    }

    fn free(&mut self, rid: Rid) {
        for (_, resource) in self.resources.remove(rid) {
            if let GpuResource::Buffer { buffer, .. } = resource {
                buffer.destroy();
            }
        }
    }

    fn draw_list_begin(
        &mut self,
        framebuffer: Rid,
        clear: Option<ClearValues>,
    ) -> Result<DrawListId, DeviceError> {
        if self.open_list.is_some() {
            return Err(DeviceError::InvalidDescriptor(
                "a draw list is already open".into(),
            ));
        }
        if self.framebuffer_format(framebuffer).is_none() {
            return Err(DeviceError::InvalidHandle(framebuffer));
        }
        let id = DrawListId(self.next_list);
        self.next_list = self.next_list.wrapping_add(1);
        self.open_list = Some((
            id,
            PendingDrawList {
                framebuffer,
                clear,
                commands: Vec::new(),
            },
        ));
        Ok(id)
    }

    fn draw_list_command(&mut self, list: DrawListId, command: DrawCommand) {
        match self.open_list.as_mut() {
            Some((id, pending)) if *id == list => pending.commands.push(command),
            _ => log::warn!("Ignoring command recorded into closed draw list {:?}", list),
        }
    }

    fn draw_list_end(&mut self, list: DrawListId) -> Result<(), DeviceError> {
        match self.open_list.take() {
            Some((id, pending)) if id == list => self.replay(pending),
            other => {
                self.open_list = other;
                Err(DeviceError::NoDrawList)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_formats_cover_color_and_depth_targets() {
        assert_eq!(
            texture_format(DataFormat::R32Float).unwrap(),
            wgpu::TextureFormat::R32Float
        );
        assert_eq!(
            texture_format(DataFormat::D32Float).unwrap(),
            wgpu::TextureFormat::Depth32Float
        );
        assert!(texture_format(DataFormat::Rgb32Float).is_err());
    }

    #[test]
    fn texture_arrays_become_binding_arrays() {
        let entry = layout_entry(&UniformSlot {
            binding: 3,
            kind: UniformKind::Texture {
                filterable: false,
                count: 16,
            },
        });
        assert_eq!(entry.count, NonZeroU32::new(16));
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
    }

    #[test]
    #[ignore] // Requires a GPU adapter with push constant support.
    fn gpu_device_renders_into_a_framebuffer() {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .expect("adapter");
        let mut device = pollster::block_on(GpuDevice::request(&adapter)).expect("device");

        let target = device
            .texture_create(
                &TextureDesc {
                    width: 8,
                    height: 8,
                    format: DataFormat::Rgba8Unorm,
                    usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLING,
                },
                None,
            )
            .unwrap();
        let framebuffer = device.framebuffer_create(&[target]).unwrap();
        let list = device
            .draw_list_begin(
                framebuffer,
                Some(ClearValues {
                    color: [1.0, 0.0, 0.0, 1.0],
                    depth: 1.0,
                }),
            )
            .unwrap();
        device.draw_list_end(list).unwrap();

        device.free(target);
        assert!(!device.is_valid(framebuffer));
    }
}
