//! In-memory [`RenderingDevice`] that validates and records everything it is
//! asked to do. Used for tests, tools and machines without a GPU.

use std::collections::HashMap;

use super::{
    BufferUsage, ClearValues, DataFormat, DrawCommand, DrawListId, FormatInterner,
    FramebufferFormatId, IndexFormat, PipelineDesc, PrimitiveTopology, RenderingDevice,
    ResourceRegistry, Rid, SamplerDesc, ShaderDesc, TextureDesc, TextureUsage, Uniform,
    UniformKind, UniformResource, UniformSlot, VertexAttribute, VertexFormatId,
};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessResource {
    Buffer {
        usage: BufferUsage,
        data: Vec<u8>,
    },
    Texture(TextureDesc),
    Sampler(SamplerDesc),
    VertexArray {
        vertex_count: u32,
        format: VertexFormatId,
    },
    IndexArray {
        format: IndexFormat,
        index_count: u32,
    },
    Framebuffer {
        format: FramebufferFormatId,
        size: (u32, u32),
    },
    Shader {
        label: String,
        push_constant_size: u32,
        sets: Vec<Vec<UniformSlot>>,
    },
    UniformSet {
        shader: Rid,
        set: u32,
    },
    Pipeline {
        label: String,
        vertex_format: Option<VertexFormatId>,
        topology: PrimitiveTopology,
    },
}

impl HeadlessResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            HeadlessResource::Buffer { .. } => ResourceKind::Buffer,
            HeadlessResource::Texture(_) => ResourceKind::Texture,
            HeadlessResource::Sampler(_) => ResourceKind::Sampler,
            HeadlessResource::VertexArray { .. } => ResourceKind::VertexArray,
            HeadlessResource::IndexArray { .. } => ResourceKind::IndexArray,
            HeadlessResource::Framebuffer { .. } => ResourceKind::Framebuffer,
            HeadlessResource::Shader { .. } => ResourceKind::Shader,
            HeadlessResource::UniformSet { .. } => ResourceKind::UniformSet,
            HeadlessResource::Pipeline { .. } => ResourceKind::Pipeline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    VertexArray,
    IndexArray,
    Framebuffer,
    Shader,
    UniformSet,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDrawList {
    pub framebuffer: Rid,
    pub clear: Option<ClearValues>,
    pub commands: Vec<DrawCommand>,
}

impl RecordedDrawList {
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Draw { .. }))
            .count()
    }

    /// Push constant payloads that were active at each draw, in draw order.
    pub fn draw_push_constants(&self) -> Vec<Vec<u8>> {
        let mut current = Vec::new();
        let mut out = Vec::new();
        for command in &self.commands {
            match command {
                DrawCommand::SetPushConstant(data) => current = data.clone(),
                DrawCommand::Draw { .. } => out.push(current.clone()),
                _ => {}
            }
        }
        out
    }

    pub fn count(&self, predicate: impl Fn(&DrawCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }
}

/// Counters of everything created since the device was made.
#[derive(Debug, Clone, Default)]
pub struct HeadlessStats {
    pub created: HashMap<ResourceKind, usize>,
    pub freed: HashMap<ResourceKind, usize>,
    /// Uniform sets created, keyed by set index.
    pub uniform_sets_by_index: HashMap<u32, usize>,
    pub draw_lists: usize,
}

impl HeadlessStats {
    pub fn created(&self, kind: ResourceKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn freed(&self, kind: ResourceKind) -> usize {
        self.freed.get(&kind).copied().unwrap_or(0)
    }

    pub fn uniform_sets_created(&self, set: u32) -> usize {
        self.uniform_sets_by_index.get(&set).copied().unwrap_or(0)
    }
}

pub struct HeadlessDevice {
    resources: ResourceRegistry<HeadlessResource>,
    vertex_formats: FormatInterner<VertexAttribute>,
    framebuffer_formats: FormatInterner<DataFormat>,
    unsupported_formats: Vec<DataFormat>,
    allocation_budget: Option<usize>,
    open_list: Option<(DrawListId, RecordedDrawList)>,
    next_list: u32,
    finished: Vec<RecordedDrawList>,
    stats: HeadlessStats,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            resources: ResourceRegistry::new(),
            vertex_formats: FormatInterner::new(),
            framebuffer_formats: FormatInterner::new(),
            unsupported_formats: Vec::new(),
            allocation_budget: None,
            open_list: None,
            next_list: 0,
            finished: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    /// Pipelines targeting and textures using `format` fail to create.
    pub fn with_unsupported_format(mut self, format: DataFormat) -> Self {
        self.unsupported_formats.push(format);
        self
    }

    /// Limits how many more buffers, textures and uniform sets may be created.
    /// `None` removes the limit.
    pub fn set_allocation_budget(&mut self, budget: Option<usize>) {
        self.allocation_budget = budget;
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    pub fn resource(&self, rid: Rid) -> Option<&HeadlessResource> {
        self.resources.get(rid)
    }

    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind() == kind).count()
    }

    pub fn buffer_data(&self, rid: Rid) -> Option<&[u8]> {
        match self.resources.get(rid)? {
            HeadlessResource::Buffer { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn vertex_format(&self, id: VertexFormatId) -> Option<&[VertexAttribute]> {
        self.vertex_formats.get(id.0)
    }

    pub fn draw_lists(&self) -> &[RecordedDrawList] {
        &self.finished
    }

    pub fn take_draw_lists(&mut self) -> Vec<RecordedDrawList> {
        std::mem::take(&mut self.finished)
    }

    fn allocate(&mut self, what: &'static str) -> Result<(), DeviceError> {
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                log::warn!("Headless device allocation budget exhausted creating {}", what);
                return Err(DeviceError::OutOfMemory { what });
            }
            *budget -= 1;
        }
        Ok(())
    }

    fn insert(&mut self, resource: HeadlessResource, dependencies: &[Rid]) -> Rid {
        *self.stats.created.entry(resource.kind()).or_default() += 1;
        self.resources.insert(resource, dependencies)
    }

    fn require(&self, rid: Rid) -> Result<&HeadlessResource, DeviceError> {
        self.resources.get(rid).ok_or(DeviceError::InvalidHandle(rid))
    }

    fn check_format(&self, format: DataFormat) -> Result<(), DeviceError> {
        if self.unsupported_formats.contains(&format) {
            return Err(DeviceError::UnsupportedFormat(format!("{:?}", format)));
        }
        Ok(())
    }

    fn check_uniform(&self, slot: &UniformSlot, uniform: &Uniform) -> Result<(), DeviceError> {
        for rid in uniform.resources() {
            self.require(*rid)?;
        }

        let compatible = match (&slot.kind, &uniform.resource) {
            (UniformKind::UniformBuffer, UniformResource::Buffer(rid)) => matches!(
                self.require(*rid)?,
                HeadlessResource::Buffer {
                    usage: BufferUsage::Uniform,
                    ..
                }
            ),
            (UniformKind::StorageBuffer, UniformResource::Buffer(rid)) => matches!(
                self.require(*rid)?,
                HeadlessResource::Buffer {
                    usage: BufferUsage::Storage,
                    ..
                }
            ),
            (UniformKind::Texture { count: 1, .. }, UniformResource::Texture(rid)) => {
                matches!(self.require(*rid)?, HeadlessResource::Texture(_))
            }
            (UniformKind::Texture { count, .. }, UniformResource::Textures(rids)) => {
                rids.len() == *count as usize
                    && rids.iter().all(|rid| {
                        matches!(self.resources.get(*rid), Some(HeadlessResource::Texture(_)))
                    })
            }
            (UniformKind::Sampler { .. }, UniformResource::Sampler(rid)) => {
                matches!(self.require(*rid)?, HeadlessResource::Sampler(_))
            }
            _ => false,
        };

        if compatible {
            Ok(())
        } else {
            Err(DeviceError::InvalidDescriptor(format!(
                "binding {} expects {:?}, got {:?}",
                slot.binding, slot.kind, uniform.resource
            )))
        }
    }
}

impl RenderingDevice for HeadlessDevice {
    fn buffer_create(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Rid, DeviceError> {
        self.allocate("buffer")?;
        Ok(self.insert(
            HeadlessResource::Buffer {
                usage,
                data: data.to_vec(),
            },
            &[],
        ))
    }

    fn buffer_update(&mut self, buffer: Rid, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        match self.resources.get_mut(buffer) {
            Some(HeadlessResource::Buffer { data: contents, .. }) => {
                let start = offset as usize;
                let end = start + data.len();
                if end > contents.len() {
                    return Err(DeviceError::InvalidDescriptor(format!(
                        "update of {} bytes at offset {} overflows a {} byte buffer",
                        data.len(),
                        offset,
                        contents.len()
                    )));
                }
                contents[start..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(DeviceError::InvalidHandle(buffer)),
        }
    }

    fn texture_create(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<Rid, DeviceError> {
        self.check_format(desc.format)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidDescriptor(
                "texture dimensions must be non-zero".into(),
            ));
        }
        if let Some(data) = data {
            let expected = (desc.width * desc.height * desc.format.size_in_bytes()) as usize;
            if data.len() != expected {
                return Err(DeviceError::InvalidDescriptor(format!(
                    "texture data is {} bytes, expected {}",
                    data.len(),
                    expected
                )));
            }
        }
        self.allocate("texture")?;
        Ok(self.insert(HeadlessResource::Texture(*desc), &[]))
    }

    fn texture_size(&self, texture: Rid) -> Option<(u32, u32)> {
        match self.resources.get(texture)? {
            HeadlessResource::Texture(desc) => Some((desc.width, desc.height)),
            _ => None,
        }
    }

    fn sampler_create(&mut self, desc: &SamplerDesc) -> Result<Rid, DeviceError> {
        Ok(self.insert(HeadlessResource::Sampler(*desc), &[]))
    }

    fn vertex_format_create(&mut self, attributes: &[VertexAttribute]) -> VertexFormatId {
        VertexFormatId(self.vertex_formats.intern(attributes))
    }

    fn vertex_array_create(
        &mut self,
        vertex_count: u32,
        format: VertexFormatId,
        buffers: &[Rid],
        offsets: &[u64],
    ) -> Result<Rid, DeviceError> {
        let attributes = self
            .vertex_formats
            .get(format.0)
            .ok_or_else(|| DeviceError::InvalidDescriptor(format!("{:?}", format)))?;
        if attributes.len() != buffers.len() || buffers.len() != offsets.len() {
            return Err(DeviceError::InvalidDescriptor(format!(
                "vertex format has {} attributes but {} buffers and {} offsets were given",
                attributes.len(),
                buffers.len(),
                offsets.len()
            )));
        }
        for buffer in buffers {
            match self.require(*buffer)? {
                HeadlessResource::Buffer {
                    usage: BufferUsage::Vertex,
                    ..
                } => {}
                _ => return Err(DeviceError::InvalidHandle(*buffer)),
            }
        }
        Ok(self.insert(
            HeadlessResource::VertexArray {
                vertex_count,
                format,
            },
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
        let capacity = match self.require(buffer)? {
            HeadlessResource::Buffer {
                usage: BufferUsage::Index,
                data,
            } => data.len() as u32 / format.size_in_bytes(),
            _ => return Err(DeviceError::InvalidHandle(buffer)),
        };
        if first_index + index_count > capacity {
            return Err(DeviceError::InvalidDescriptor(format!(
                "index range {}..{} exceeds buffer of {} indices",
                first_index,
                first_index + index_count,
                capacity
            )));
        }
        Ok(self.insert(
            HeadlessResource::IndexArray {
                format,
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
            let desc = match self.require(*rid)? {
                HeadlessResource::Texture(desc) => *desc,
                _ => return Err(DeviceError::InvalidHandle(*rid)),
            };
            if !desc
                .usage
                .intersects(TextureUsage::COLOR_ATTACHMENT | TextureUsage::DEPTH_ATTACHMENT)
            {
                return Err(DeviceError::InvalidDescriptor(
                    "framebuffer attachment lacks attachment usage".into(),
                ));
            }
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
        Ok(self.insert(HeadlessResource::Framebuffer { format, size }, attachments))
    }

    fn framebuffer_format(&self, framebuffer: Rid) -> Option<FramebufferFormatId> {
        match self.resources.get(framebuffer)? {
            HeadlessResource::Framebuffer { format, .. } => Some(*format),
            _ => None,
        }
    }

    fn shader_create(&mut self, desc: &ShaderDesc<'_>) -> Result<Rid, DeviceError> {
        if desc.source.trim().is_empty() {
            return Err(DeviceError::InvalidDescriptor(format!(
                "shader '{}' has no source",
                desc.label
            )));
        }
        Ok(self.insert(
            HeadlessResource::Shader {
                label: desc.label.to_string(),
                push_constant_size: desc.push_constant_size,
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
        let layout = match self.require(shader)? {
            HeadlessResource::Shader { sets, .. } => sets
                .get(set as usize)
                .cloned()
                .ok_or_else(|| DeviceError::InvalidDescriptor(format!("shader has no set {}", set)))?,
            _ => return Err(DeviceError::InvalidHandle(shader)),
        };

        for slot in &layout {
            let uniform = uniforms
                .iter()
                .find(|u| u.binding == slot.binding)
                .ok_or_else(|| {
                    DeviceError::InvalidDescriptor(format!(
                        "set {} is missing binding {}",
                        set, slot.binding
                    ))
                })?;
            self.check_uniform(slot, uniform)?;
        }

        self.allocate("uniform set")?;
        let mut dependencies: Vec<Rid> = uniforms
            .iter()
            .flat_map(|u| u.resources().iter().copied())
            .collect();
        dependencies.push(shader);
        *self.stats.uniform_sets_by_index.entry(set).or_default() += 1;
        Ok(self.insert(HeadlessResource::UniformSet { shader, set }, &dependencies))
    }

    fn uniform_set_is_valid(&self, set: Rid) -> bool {
        matches!(self.resources.get(set), Some(HeadlessResource::UniformSet { .. }))
    }

    fn render_pipeline_create(&mut self, desc: &PipelineDesc<'_>) -> Result<Rid, DeviceError> {
        match self.require(desc.shader)? {
            HeadlessResource::Shader { .. } => {}
            _ => return Err(DeviceError::InvalidHandle(desc.shader)),
        }
        let attachments = self
            .framebuffer_formats
            .get(desc.framebuffer_format.0)
            .ok_or_else(|| DeviceError::InvalidDescriptor(format!("{:?}", desc.framebuffer_format)))?
            .to_vec();
        for format in attachments {
            self.check_format(format)?;
        }
        if let Some(format) = desc.vertex_format {
            if self.vertex_formats.get(format.0).is_none() {
                return Err(DeviceError::InvalidDescriptor(format!("{:?}", format)));
            }
        }
        Ok(self.insert(
            HeadlessResource::Pipeline {
                label: desc.label.to_string(),
                vertex_format: desc.vertex_format,
                topology: desc.topology,
            },
            &[desc.shader],
        ))
    }

    fn is_valid(&self, rid: Rid) -> bool {
        self.resources.contains(rid)
    }

    fn free(&mut self, rid: Rid) {
        for (_, resource) in self.resources.remove(rid) {
            *self.stats.freed.entry(resource.kind()).or_default() += 1;
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
        match self.require(framebuffer)? {
            HeadlessResource::Framebuffer { .. } => {}
            _ => return Err(DeviceError::InvalidHandle(framebuffer)),
        }
        let id = DrawListId(self.next_list);
        self.next_list += 1;
        self.open_list = Some((
            id,
            RecordedDrawList {
                framebuffer,
                clear,
                commands: Vec::new(),
            },
        ));
        Ok(id)
    }

    fn draw_list_command(&mut self, list: DrawListId, command: DrawCommand) {
        match self.open_list.as_mut() {
            Some((id, recorded)) if *id == list => recorded.commands.push(command),
            _ => log::warn!("Ignoring {:?} recorded into closed draw list {:?}", command, list),
        }
    }

    fn draw_list_end(&mut self, list: DrawListId) -> Result<(), DeviceError> {
        match self.open_list.take() {
            Some((id, recorded)) if id == list => {
                self.stats.draw_lists += 1;
                self.finished.push(recorded);
                Ok(())
            }
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
    use crate::device::{SamplerDesc, VertexFrequency};

    fn color_target(device: &mut HeadlessDevice) -> Rid {
        let texture = device
            .texture_create(
                &TextureDesc {
                    width: 4,
                    height: 4,
                    format: DataFormat::Rgba8Unorm,
                    usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLING,
                },
                None,
            )
            .unwrap();
        device.framebuffer_create(&[texture]).unwrap()
    }

    fn sampled_shader(device: &mut HeadlessDevice) -> Rid {
        const SET: &[UniformSlot] = &[
            UniformSlot {
                binding: 0,
                kind: UniformKind::Texture {
                    filterable: true,
                    count: 1,
                },
            },
            UniformSlot {
                binding: 1,
                kind: UniformKind::Sampler { filtering: true },
            },
        ];
        device
            .shader_create(&ShaderDesc {
                label: "test",
                source: "fn main() {}",
                push_constant_size: 0,
                sets: &[SET],
            })
            .unwrap()
    }

    #[test]
    fn freeing_a_texture_invalidates_uniform_sets_using_it() {
        let mut device = HeadlessDevice::new();
        let shader = sampled_shader(&mut device);
        let texture = device
            .texture_create(
                &TextureDesc {
                    width: 1,
                    height: 1,
                    format: DataFormat::Rgba8Unorm,
                    usage: TextureUsage::SAMPLING,
                },
                Some(&[255; 4]),
            )
            .unwrap();
        let sampler = device.sampler_create(&SamplerDesc::default()).unwrap();
        let set = device
            .uniform_set_create(
                &[Uniform::texture(0, texture), Uniform::sampler(1, sampler)],
                shader,
                0,
            )
            .unwrap();

        assert!(device.uniform_set_is_valid(set));
        device.free(texture);
        assert!(!device.uniform_set_is_valid(set));
        assert!(device.is_valid(sampler));
        assert_eq!(device.stats().freed(ResourceKind::UniformSet), 1);
    }

    #[test]
    fn uniform_sets_are_checked_against_the_shader_layout() {
        let mut device = HeadlessDevice::new();
        let shader = sampled_shader(&mut device);
        let sampler = device.sampler_create(&SamplerDesc::default()).unwrap();

        let err = device
            .uniform_set_create(&[Uniform::sampler(1, sampler)], shader, 0)
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidDescriptor(_)));

        let err = device
            .uniform_set_create(
                &[Uniform::texture(0, sampler), Uniform::sampler(1, sampler)],
                shader,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidDescriptor(_)));
    }

    #[test]
    fn allocation_budget_refuses_further_buffers() {
        let mut device = HeadlessDevice::new();
        device.set_allocation_budget(Some(1));
        assert!(device.buffer_create(BufferUsage::Vertex, &[0; 16]).is_ok());
        assert_eq!(
            device.buffer_create(BufferUsage::Vertex, &[0; 16]),
            Err(DeviceError::OutOfMemory { what: "buffer" })
        );
    }

    #[test]
    fn vertex_arrays_need_one_buffer_per_attribute() {
        let mut device = HeadlessDevice::new();
        let format = device.vertex_format_create(&[
            VertexAttribute {
                location: 0,
                offset: 0,
                format: DataFormat::Rg32Float,
                stride: 8,
                frequency: VertexFrequency::Vertex,
            },
            VertexAttribute {
                location: 1,
                offset: 0,
                format: DataFormat::Rgba32Float,
                stride: 0,
                frequency: VertexFrequency::Vertex,
            },
        ]);
        let buffer = device.buffer_create(BufferUsage::Vertex, &[0; 32]).unwrap();
        assert!(device.vertex_array_create(4, format, &[buffer], &[0]).is_err());
        let array = device
            .vertex_array_create(4, format, &[buffer, buffer], &[0, 0])
            .unwrap();

        device.free(buffer);
        assert!(!device.is_valid(array));
    }

    #[test]
    fn draw_lists_are_recorded_in_order() {
        let mut device = HeadlessDevice::new();
        let framebuffer = color_target(&mut device);

        let list = device.draw_list_begin(framebuffer, None).unwrap();
        assert!(device.draw_list_begin(framebuffer, None).is_err());
        device.draw_list_set_push_constant(list, &[1, 2, 3, 4]);
        device.draw_list_draw(list, true, 1, 0);
        device.draw_list_set_push_constant(list, &[5, 6, 7, 8]);
        device.draw_list_draw(list, true, 1, 0);
        device.draw_list_end(list).unwrap();

        let lists = device.take_draw_lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].draw_count(), 2);
        assert_eq!(
            lists[0].draw_push_constants(),
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]
        );
        assert!(device.draw_list_end(list).is_err());
    }

    #[test]
    fn unsupported_formats_fail_pipeline_creation() {
        let mut device = HeadlessDevice::new().with_unsupported_format(DataFormat::Bgra8Unorm);
        let shader = sampled_shader(&mut device);
        let format = device.framebuffer_format_create(&[DataFormat::Bgra8Unorm]);
        let result = device.render_pipeline_create(&PipelineDesc {
            label: "test",
            shader,
            vertex_entry: "vs",
            fragment_entry: "fs",
            framebuffer_format: format,
            vertex_format: None,
            topology: PrimitiveTopology::Triangles,
            cull: crate::device::CullMode::Disabled,
            blend: crate::device::BlendMode::Mix,
            depth_test: false,
        });
        assert!(matches!(result, Err(DeviceError::UnsupportedFormat(_))));
    }
}
