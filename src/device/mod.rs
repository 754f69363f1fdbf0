//! Explicit graphics-device abstraction consumed by the canvas renderer.
//!
//! Every resource lives behind an opaque [`Rid`]. Uniform sets, vertex arrays,
//! index arrays and framebuffers record the resources they were built from;
//! freeing a resource frees everything that depends on it, which is how a
//! stale uniform set becomes observable through
//! [`RenderingDevice::uniform_set_is_valid`].

pub mod gpu;
pub mod headless;
mod pipeline_builder;
mod registry;

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::math::Rect2;

pub use gpu::GpuDevice;
pub use headless::HeadlessDevice;
pub(crate) use registry::ResourceRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(NonZeroU64);

impl Rid {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Rid)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    Rgba32Uint,
    D32Float,
}

impl DataFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, DataFormat::D32Float)
    }

    /// Formats usable as a render target color attachment.
    pub fn is_color(self) -> bool {
        !self.is_depth() && !matches!(self, DataFormat::Rgb32Float)
    }

    pub fn size_in_bytes(self) -> u32 {
        match self {
            DataFormat::Rgba8Unorm
            | DataFormat::Rgba8UnormSrgb
            | DataFormat::Bgra8Unorm
            | DataFormat::Bgra8UnormSrgb
            | DataFormat::R32Float
            | DataFormat::D32Float => 4,
            DataFormat::Rg32Float => 8,
            DataFormat::Rgb32Float => 12,
            DataFormat::Rgba32Float | DataFormat::Rgba32Uint => 16,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLING = 1 << 0;
        const COLOR_ATTACHMENT = 1 << 1;
        const DEPTH_ATTACHMENT = 1 << 2;
        const CAN_UPDATE = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: DataFormat,
    pub usage: TextureUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Uniform,
    Storage,
    Vertex,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerRepeat {
    Clamp,
    Repeat,
    Mirror,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: SamplerFilter,
    pub mip_filter: Option<SamplerFilter>,
    pub anisotropy: u16,
    pub repeat: SamplerRepeat,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: SamplerFilter::Linear,
            mip_filter: None,
            anisotropy: 1,
            repeat: SamplerRepeat::Clamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFrequency {
    Vertex,
    Instance,
}

/// One attribute read from its own buffer slot. A zero stride repeats the
/// first element for every vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: DataFormat,
    pub stride: u32,
    pub frequency: VertexFrequency,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexFormatId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferFormatId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    UniformBuffer,
    StorageBuffer,
    /// `count > 1` declares a binding array.
    Texture { filterable: bool, count: u32 },
    Sampler { filtering: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformSlot {
    pub binding: u32,
    pub kind: UniformKind,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub push_constant_size: u32,
    /// Descriptor set layouts, indexed by set number.
    pub sets: &'a [&'a [UniformSlot]],
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniformResource {
    Buffer(Rid),
    Texture(Rid),
    Textures(Vec<Rid>),
    Sampler(Rid),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uniform {
    pub binding: u32,
    pub resource: UniformResource,
}

impl Uniform {
    pub fn buffer(binding: u32, buffer: Rid) -> Self {
        Self {
            binding,
            resource: UniformResource::Buffer(buffer),
        }
    }

    pub fn texture(binding: u32, texture: Rid) -> Self {
        Self {
            binding,
            resource: UniformResource::Texture(texture),
        }
    }

    pub fn textures(binding: u32, textures: Vec<Rid>) -> Self {
        Self {
            binding,
            resource: UniformResource::Textures(textures),
        }
    }

    pub fn sampler(binding: u32, sampler: Rid) -> Self {
        Self {
            binding,
            resource: UniformResource::Sampler(sampler),
        }
    }

    pub fn resources(&self) -> &[Rid] {
        match &self.resource {
            UniformResource::Buffer(rid)
            | UniformResource::Texture(rid)
            | UniformResource::Sampler(rid) => std::slice::from_ref(rid),
            UniformResource::Textures(rids) => rids,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    Disabled,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Disabled,
    /// Straight alpha "mix" blending.
    Mix,
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub shader: Rid,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub framebuffer_format: FramebufferFormatId,
    /// `None` for pipelines that generate their vertices from push constants.
    pub vertex_format: Option<VertexFormatId>,
    pub topology: PrimitiveTopology,
    pub cull: CullMode,
    pub blend: BlendMode,
    pub depth_test: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawListId(pub(crate) u32);

/// Commands recorded into an open draw list.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    BindPipeline(Rid),
    BindUniformSet { set: Rid, index: u32 },
    BindVertexArray(Rid),
    BindIndexArray(Rid),
    SetPushConstant(Vec<u8>),
    SetViewport(Rect2),
    EnableScissor(Rect2),
    DisableScissor,
    Draw {
        use_indices: bool,
        instances: u32,
        /// Vertices drawn when `use_indices` is false.
        vertices: u32,
    },
}

pub trait RenderingDevice {
    fn buffer_create(&mut self, usage: BufferUsage, data: &[u8]) -> Result<Rid, DeviceError>;
    fn buffer_update(&mut self, buffer: Rid, offset: u64, data: &[u8]) -> Result<(), DeviceError>;

    fn texture_create(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<Rid, DeviceError>;
    fn texture_size(&self, texture: Rid) -> Option<(u32, u32)>;

    fn sampler_create(&mut self, desc: &SamplerDesc) -> Result<Rid, DeviceError>;

    /// Identical attribute lists return the same id.
    fn vertex_format_create(&mut self, attributes: &[VertexAttribute]) -> VertexFormatId;
    fn vertex_array_create(
        &mut self,
        vertex_count: u32,
        format: VertexFormatId,
        buffers: &[Rid],
        offsets: &[u64],
    ) -> Result<Rid, DeviceError>;
    fn index_array_create(
        &mut self,
        buffer: Rid,
        format: IndexFormat,
        first_index: u32,
        index_count: u32,
    ) -> Result<Rid, DeviceError>;

    /// Identical attachment lists return the same id.
    fn framebuffer_format_create(&mut self, attachments: &[DataFormat]) -> FramebufferFormatId;
    fn framebuffer_create(&mut self, attachments: &[Rid]) -> Result<Rid, DeviceError>;
    fn framebuffer_format(&self, framebuffer: Rid) -> Option<FramebufferFormatId>;

    fn shader_create(&mut self, desc: &ShaderDesc<'_>) -> Result<Rid, DeviceError>;
    fn uniform_set_create(
        &mut self,
        uniforms: &[Uniform],
        shader: Rid,
        set: u32,
    ) -> Result<Rid, DeviceError>;
    fn uniform_set_is_valid(&self, set: Rid) -> bool;

    fn render_pipeline_create(&mut self, desc: &PipelineDesc<'_>) -> Result<Rid, DeviceError>;

    fn is_valid(&self, rid: Rid) -> bool;
    /// Frees `rid` and every resource built on top of it. Unknown ids are ignored.
    fn free(&mut self, rid: Rid);

    fn draw_list_begin(
        &mut self,
        framebuffer: Rid,
        clear: Option<ClearValues>,
    ) -> Result<DrawListId, DeviceError>;
    fn draw_list_command(&mut self, list: DrawListId, command: DrawCommand);
    fn draw_list_end(&mut self, list: DrawListId) -> Result<(), DeviceError>;

    fn draw_list_bind_render_pipeline(&mut self, list: DrawListId, pipeline: Rid) {
        self.draw_list_command(list, DrawCommand::BindPipeline(pipeline));
    }

    fn draw_list_bind_uniform_set(&mut self, list: DrawListId, set: Rid, index: u32) {
        self.draw_list_command(list, DrawCommand::BindUniformSet { set, index });
    }

    fn draw_list_bind_vertex_array(&mut self, list: DrawListId, array: Rid) {
        self.draw_list_command(list, DrawCommand::BindVertexArray(array));
    }

    fn draw_list_bind_index_array(&mut self, list: DrawListId, array: Rid) {
        self.draw_list_command(list, DrawCommand::BindIndexArray(array));
    }

    fn draw_list_set_push_constant(&mut self, list: DrawListId, data: &[u8]) {
        self.draw_list_command(list, DrawCommand::SetPushConstant(data.to_vec()));
    }

    fn draw_list_set_viewport(&mut self, list: DrawListId, rect: Rect2) {
        self.draw_list_command(list, DrawCommand::SetViewport(rect));
    }

    fn draw_list_enable_scissor(&mut self, list: DrawListId, rect: Rect2) {
        self.draw_list_command(list, DrawCommand::EnableScissor(rect));
    }

    fn draw_list_disable_scissor(&mut self, list: DrawListId) {
        self.draw_list_command(list, DrawCommand::DisableScissor);
    }

    fn draw_list_draw(
        &mut self,
        list: DrawListId,
        use_indices: bool,
        instances: u32,
        vertices: u32,
    ) {
        self.draw_list_command(
            list,
            DrawCommand::Draw {
                use_indices,
                instances,
                vertices,
            },
        );
    }
}

/// Interns descriptor lists so equal inputs share one id.
#[derive(Debug)]
pub(crate) struct FormatInterner<T> {
    formats: Vec<Vec<T>>,
}

impl<T: PartialEq + Clone> FormatInterner<T> {
    pub(crate) fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    pub(crate) fn intern(&mut self, format: &[T]) -> u32 {
        if let Some(index) = self.formats.iter().position(|f| f.as_slice() == format) {
            return index as u32;
        }
        self.formats.push(format.to_vec());
        (self.formats.len() - 1) as u32
    }

    pub(crate) fn get(&self, id: u32) -> Option<&[T]> {
        self.formats.get(id as usize).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_zero_is_not_representable() {
        assert!(Rid::from_raw(0).is_none());
        assert_eq!(Rid::from_raw(7).map(Rid::raw), Some(7));
    }

    #[test]
    fn interner_reuses_equal_formats() {
        let mut interner = FormatInterner::new();
        let a = interner.intern(&[DataFormat::Rgba8Unorm, DataFormat::D32Float]);
        let b = interner.intern(&[DataFormat::R32Float]);
        let c = interner.intern(&[DataFormat::Rgba8Unorm, DataFormat::D32Float]);
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.get(b), Some(&[DataFormat::R32Float][..]));
    }

    #[test]
    fn uniform_lists_every_referenced_resource() {
        let a = Rid::from_raw(1).unwrap();
        let b = Rid::from_raw(2).unwrap();
        assert_eq!(Uniform::textures(0, vec![a, b]).resources(), &[a, b]);
        assert_eq!(Uniform::sampler(1, b).resources(), &[b]);
    }
}
