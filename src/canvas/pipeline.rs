use std::collections::HashMap;

use crate::device::{
    BlendMode, CullMode, DataFormat, FramebufferFormatId, PipelineDesc, PrimitiveTopology,
    RenderingDevice, Rid, ShaderDesc, UniformKind, UniformSlot, VertexFormatId,
};
use crate::error::CanvasError;

use super::push_constant::PUSH_CONSTANT_SIZE;

pub(crate) const TEXTURE_SET: u32 = 0;
pub(crate) const ITEM_SET: u32 = 1;
pub(crate) const LIGHT_SET: u32 = 2;

/// Texture array length in the light set; one entry per light affecting an item.
pub(crate) const LIGHT_TEXTURE_SLOTS: u32 = 16;

const TEXTURE_SET_LAYOUT: &[UniformSlot] = &[
    UniformSlot {
        binding: 0,
        kind: UniformKind::Texture {
            filterable: true,
            count: 1,
        },
    },
    UniformSlot {
        binding: 1,
        kind: UniformKind::Texture {
            filterable: true,
            count: 1,
        },
    },
    UniformSlot {
        binding: 2,
        kind: UniformKind::Texture {
            filterable: true,
            count: 1,
        },
    },
    UniformSlot {
        binding: 3,
        kind: UniformKind::Sampler { filtering: true },
    },
    UniformSlot {
        binding: 4,
        kind: UniformKind::StorageBuffer,
    },
];

const ITEM_SET_LAYOUT: &[UniformSlot] = &[
    UniformSlot {
        binding: 0,
        kind: UniformKind::UniformBuffer,
    },
    UniformSlot {
        binding: 1,
        kind: UniformKind::UniformBuffer,
    },
];

const LIGHT_SET_LAYOUT: &[UniformSlot] = &[
    UniformSlot {
        binding: 0,
        kind: UniformKind::UniformBuffer,
    },
    UniformSlot {
        binding: 1,
        kind: UniformKind::Texture {
            filterable: true,
            count: LIGHT_TEXTURE_SLOTS,
        },
    },
    UniformSlot {
        binding: 2,
        kind: UniformKind::Texture {
            filterable: false,
            count: LIGHT_TEXTURE_SLOTS,
        },
    },
    UniformSlot {
        binding: 3,
        kind: UniformKind::Sampler { filtering: false },
    },
    UniformSlot {
        binding: 4,
        kind: UniformKind::Sampler { filtering: true },
    },
];

/// Geometry kind and topology of a canvas draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineVariant {
    Quad,
    NinePatch,
    PrimitiveTriangles,
    PrimitiveLines,
    PrimitivePoints,
    AttributeTriangles,
    AttributeTriangleStrip,
    AttributeLines,
    AttributeLineStrip,
    AttributePoints,
}

impl PipelineVariant {
    pub const ALL: [PipelineVariant; 10] = [
        PipelineVariant::Quad,
        PipelineVariant::NinePatch,
        PipelineVariant::PrimitiveTriangles,
        PipelineVariant::PrimitiveLines,
        PipelineVariant::PrimitivePoints,
        PipelineVariant::AttributeTriangles,
        PipelineVariant::AttributeTriangleStrip,
        PipelineVariant::AttributeLines,
        PipelineVariant::AttributeLineStrip,
        PipelineVariant::AttributePoints,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PipelineVariant::Quad => "quad",
            PipelineVariant::NinePatch => "ninepatch",
            PipelineVariant::PrimitiveTriangles => "primitive_triangles",
            PipelineVariant::PrimitiveLines => "primitive_lines",
            PipelineVariant::PrimitivePoints => "primitive_points",
            PipelineVariant::AttributeTriangles => "attribute_triangles",
            PipelineVariant::AttributeTriangleStrip => "attribute_triangle_strip",
            PipelineVariant::AttributeLines => "attribute_lines",
            PipelineVariant::AttributeLineStrip => "attribute_line_strip",
            PipelineVariant::AttributePoints => "attribute_points",
        }
    }

    /// Attribute variants read a vertex array; the rest build vertices from
    /// the push constant.
    pub fn uses_vertex_array(self) -> bool {
        matches!(
            self,
            PipelineVariant::AttributeTriangles
                | PipelineVariant::AttributeTriangleStrip
                | PipelineVariant::AttributeLines
                | PipelineVariant::AttributeLineStrip
                | PipelineVariant::AttributePoints
        )
    }

    fn vertex_entry(self) -> &'static str {
        match self {
            PipelineVariant::Quad => "vs_quad",
            PipelineVariant::NinePatch => "vs_ninepatch",
            PipelineVariant::PrimitiveTriangles
            | PipelineVariant::PrimitiveLines
            | PipelineVariant::PrimitivePoints => "vs_primitive",
            _ => "vs_attributes",
        }
    }

    fn topology(self) -> PrimitiveTopology {
        match self {
            PipelineVariant::Quad
            | PipelineVariant::NinePatch
            | PipelineVariant::PrimitiveTriangles
            | PipelineVariant::AttributeTriangles => PrimitiveTopology::Triangles,
            PipelineVariant::AttributeTriangleStrip => PrimitiveTopology::TriangleStrip,
            PipelineVariant::PrimitiveLines | PipelineVariant::AttributeLines => {
                PrimitiveTopology::Lines
            }
            PipelineVariant::AttributeLineStrip => PrimitiveTopology::LineStrip,
            PipelineVariant::PrimitivePoints | PipelineVariant::AttributePoints => {
                PrimitiveTopology::Points
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightMode {
    Unlit,
    Lit,
}

impl LightMode {
    fn fragment_entry(self) -> &'static str {
        match self {
            LightMode::Unlit => "fs_main",
            LightMode::Lit => "fs_light",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub variant: PipelineVariant,
    pub light_mode: LightMode,
    pub vertex_format: Option<VertexFormatId>,
    pub framebuffer_format: FramebufferFormatId,
}

/// The canvas shader and every pipeline built from it. Pipelines are created
/// on first use; a failed creation is remembered so it is not retried every
/// frame.
pub(crate) struct CanvasPipelines {
    shader: Rid,
    pipelines: HashMap<PipelineKey, Option<Rid>>,
}

impl CanvasPipelines {
    pub(crate) fn new<D: RenderingDevice>(device: &mut D) -> Result<Self, CanvasError> {
        let source = format!(
            "{}\n{}",
            include_str!("shader/canvas_constants.wgsl"),
            include_str!("shader/canvas.wgsl")
        );
        let shader = device.shader_create(&ShaderDesc {
            label: "CanvasShader",
            source: &source,
            push_constant_size: PUSH_CONSTANT_SIZE as u32,
            sets: &[TEXTURE_SET_LAYOUT, ITEM_SET_LAYOUT, LIGHT_SET_LAYOUT],
        })?;
        Ok(Self {
            shader,
            pipelines: HashMap::new(),
        })
    }

    pub(crate) fn shader(&self) -> Rid {
        self.shader
    }

    pub(crate) fn len(&self) -> usize {
        self.pipelines.values().filter(|p| p.is_some()).count()
    }

    /// Builds every variant for `framebuffer_format`. Any failure here means
    /// the target format cannot be rendered to at all.
    pub(crate) fn prewarm<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        framebuffer_format: DataFormat,
        attribute_format: VertexFormatId,
    ) -> Result<(), CanvasError> {
        let framebuffer = device.framebuffer_format_create(&[framebuffer_format]);
        for variant in PipelineVariant::ALL {
            for light_mode in [LightMode::Unlit, LightMode::Lit] {
                let key = PipelineKey {
                    variant,
                    light_mode,
                    vertex_format: variant.uses_vertex_array().then_some(attribute_format),
                    framebuffer_format: framebuffer,
                };
                let pipeline = self.create(device, &key).map_err(|err| {
                    CanvasError::PipelineUnsupported {
                        variant: variant.name(),
                        reason: err.to_string(),
                    }
                })?;
                self.pipelines.insert(key, Some(pipeline));
            }
        }
        log::info!(
            "Prepared {} canvas pipelines for {:?}",
            self.pipelines.len(),
            framebuffer_format
        );
        Ok(())
    }

    pub(crate) fn get<D: RenderingDevice>(&mut self, device: &mut D, key: PipelineKey) -> Option<Rid> {
        if let Some(cached) = self.pipelines.get(&key) {
            return *cached;
        }
        let pipeline = match self.create(device, &key) {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                log::error!(
                    "Failed to create canvas pipeline {} ({:?}): {}",
                    key.variant.name(),
                    key.light_mode,
                    err
                );
                None
            }
        };
        self.pipelines.insert(key, pipeline);
        pipeline
    }

    fn create<D: RenderingDevice>(
        &self,
        device: &mut D,
        key: &PipelineKey,
    ) -> Result<Rid, crate::error::DeviceError> {
        device.render_pipeline_create(&PipelineDesc {
            label: key.variant.name(),
            shader: self.shader,
            vertex_entry: key.variant.vertex_entry(),
            fragment_entry: key.light_mode.fragment_entry(),
            framebuffer_format: key.framebuffer_format,
            vertex_format: key.vertex_format,
            topology: key.variant.topology(),
            cull: CullMode::Disabled,
            blend: BlendMode::Mix,
            depth_test: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn only_attribute_variants_read_vertex_arrays() {
        let attribute: Vec<_> = PipelineVariant::ALL
            .iter()
            .filter(|v| v.uses_vertex_array())
            .collect();
        assert_eq!(attribute.len(), 5);
        assert!(attribute.iter().all(|v| v.vertex_entry() == "vs_attributes"));
    }

    #[test]
    fn failed_pipelines_are_not_retried() {
        let mut device = HeadlessDevice::new().with_unsupported_format(DataFormat::Bgra8Unorm);
        let mut pipelines = CanvasPipelines::new(&mut device).unwrap();
        let key = PipelineKey {
            variant: PipelineVariant::Quad,
            light_mode: LightMode::Unlit,
            vertex_format: None,
            framebuffer_format: device.framebuffer_format_create(&[DataFormat::Bgra8Unorm]),
        };
        assert!(pipelines.get(&mut device, key).is_none());
        assert!(pipelines.get(&mut device, key).is_none());
        assert_eq!(pipelines.len(), 0);
        assert_eq!(
            device
                .stats()
                .created(crate::device::headless::ResourceKind::Pipeline),
            0
        );
    }

    #[test]
    fn prewarm_reports_the_failing_variant() {
        let mut device = HeadlessDevice::new().with_unsupported_format(DataFormat::Bgra8Unorm);
        let mut pipelines = CanvasPipelines::new(&mut device).unwrap();
        let format = device.vertex_format_create(&[]);
        let err = pipelines
            .prewarm(&mut device, DataFormat::Bgra8Unorm, format)
            .unwrap_err();
        assert!(matches!(
            err,
            CanvasError::PipelineUnsupported { variant: "quad", .. }
        ));
    }
}
