//! Shadow maps and occluder geometry.
//!
//! A light's shadow map is a single row of `R32Float` distances. It is filled
//! in four passes, one per facing direction, each rendering into a quarter of
//! the row.

use bytemuck::{Pod, Zeroable};
use glam::{Affine2, Vec2};

use crate::device::{
    BlendMode, ClearValues, CullMode, DataFormat, IndexFormat, PipelineDesc, PrimitiveTopology,
    RenderingDevice, Rid, ShaderDesc, TextureDesc, TextureUsage, VertexAttribute, VertexFormatId,
    VertexFrequency, BufferUsage,
};
use crate::error::{CanvasError, DeviceError};
use crate::handle::{Handle, HandleOwner};
use crate::math::{affine_to_mat2x4, shadow_quadrant_projection, Rect2, SHADOW_DIRECTIONS};

use super::retire::RetireQueue;

/// Depth each occluder segment is extruded to on both sides.
const EXTRUDE_DEPTH: f32 = 16384.0;
const VERTEX_STRIDE: u32 = 12;
const MAX_SEGMENTS: usize = u16::MAX as usize / 4 + 1;

pub(crate) struct ShadowMap {
    resolution: u32,
    texture: Rid,
    depth: Rid,
    framebuffer: Rid,
}

impl ShadowMap {
    pub(crate) fn allocate<D: RenderingDevice>(
        device: &mut D,
        resolution: u32,
    ) -> Result<Self, DeviceError> {
        let texture = device.texture_create(
            &TextureDesc {
                width: resolution,
                height: 1,
                format: DataFormat::R32Float,
                usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLING,
            },
            None,
        )?;
        let depth = match device.texture_create(
            &TextureDesc {
                width: resolution,
                height: 1,
                format: DataFormat::D32Float,
                usage: TextureUsage::DEPTH_ATTACHMENT,
            },
            None,
        ) {
            Ok(depth) => depth,
            Err(err) => {
                device.free(texture);
                return Err(err);
            }
        };
        match device.framebuffer_create(&[texture, depth]) {
            Ok(framebuffer) => Ok(Self {
                resolution,
                texture,
                depth,
                framebuffer,
            }),
            Err(err) => {
                device.free(texture);
                device.free(depth);
                Err(err)
            }
        }
    }

    pub(crate) fn resolution(&self) -> u32 {
        self.resolution
    }

    pub(crate) fn texture(&self) -> Rid {
        self.texture
    }

    /// Frees both attachments; the framebuffer goes with them.
    pub(crate) fn free<D: RenderingDevice>(self, device: &mut D) {
        device.free(self.texture);
        device.free(self.depth);
        debug_assert!(!device.is_valid(self.framebuffer));
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OccluderCullMode {
    #[default]
    Disabled,
    Clockwise,
    CounterClockwise,
}

impl OccluderCullMode {
    fn pipeline_index(self) -> usize {
        match self {
            OccluderCullMode::Disabled => 0,
            OccluderCullMode::Clockwise => 1,
            OccluderCullMode::CounterClockwise => 2,
        }
    }
}

struct OccluderGeometry {
    point_count: usize,
    vertex_buffer: Rid,
    vertex_array: Rid,
    index_buffer: Rid,
    index_array: Rid,
}

pub struct OccluderPolygon {
    cull: OccluderCullMode,
    geometry: Option<OccluderGeometry>,
}

impl OccluderPolygon {
    pub fn cull_mode(&self) -> OccluderCullMode {
        self.cull
    }

    pub fn point_count(&self) -> usize {
        self.geometry.as_ref().map_or(0, |g| g.point_count)
    }
}

pub type OccluderId = Handle<OccluderPolygon>;

/// An occluder placed in the canvas for one shadow update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightOccluder {
    pub id: OccluderId,
    /// Occluder space to canvas space.
    pub xform: Affine2,
    pub light_mask: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OcclusionPushConstant {
    pub projection: [f32; 16],
    pub modelview: [f32; 8],
    pub direction: [f32; 2],
    pub _padding: [f32; 2],
}

/// Each segment becomes a wall quad spanning `±EXTRUDE_DEPTH`.
fn extrude_segments(points: &[Vec2]) -> (Vec<[f32; 3]>, Vec<u16>) {
    let segments = points.len() / 2;
    let mut vertices = Vec::with_capacity(segments * 4);
    let mut indices = Vec::with_capacity(segments * 6);
    for (i, segment) in points.chunks_exact(2).enumerate() {
        let (a, b) = (segment[0], segment[1]);
        vertices.push([a.x, a.y, EXTRUDE_DEPTH]);
        vertices.push([a.x, a.y, -EXTRUDE_DEPTH]);
        vertices.push([b.x, b.y, EXTRUDE_DEPTH]);
        vertices.push([b.x, b.y, -EXTRUDE_DEPTH]);
        let base = (i * 4) as u16;
        indices.extend_from_slice(&[base, base + 2, base + 1, base + 1, base + 2, base + 3]);
    }
    (vertices, indices)
}

pub(crate) struct ShadowRenderer {
    /// Indexed by [`OccluderCullMode::pipeline_index`].
    pipelines: [Rid; 3],
    vertex_format: VertexFormatId,
    occluders: HandleOwner<OccluderPolygon>,
    retire: RetireQueue,
}

impl ShadowRenderer {
    pub(crate) fn new<D: RenderingDevice>(
        device: &mut D,
        retire: &RetireQueue,
    ) -> Result<Self, CanvasError> {
        let shader = device.shader_create(&ShaderDesc {
            label: "CanvasOcclusionShader",
            source: include_str!("shader/canvas_occlusion.wgsl"),
            push_constant_size: std::mem::size_of::<OcclusionPushConstant>() as u32,
            sets: &[],
        })?;
        let vertex_format = device.vertex_format_create(&[VertexAttribute {
            location: 0,
            offset: 0,
            format: DataFormat::Rgb32Float,
            stride: VERTEX_STRIDE,
            frequency: VertexFrequency::Vertex,
        }]);
        let framebuffer_format =
            device.framebuffer_format_create(&[DataFormat::R32Float, DataFormat::D32Float]);

        let mut pipelines = Vec::with_capacity(3);
        for (label, cull) in [
            ("occlusion_cull_disabled", CullMode::Disabled),
            ("occlusion_cull_clockwise", CullMode::Back),
            ("occlusion_cull_counter_clockwise", CullMode::Front),
        ] {
            let pipeline = device
                .render_pipeline_create(&PipelineDesc {
                    label,
                    shader,
                    vertex_entry: "vs_main",
                    fragment_entry: "fs_main",
                    framebuffer_format,
                    vertex_format: Some(vertex_format),
                    topology: PrimitiveTopology::Triangles,
                    cull,
                    blend: BlendMode::Disabled,
                    depth_test: true,
                })
                .map_err(|err| CanvasError::PipelineUnsupported {
                    variant: label,
                    reason: err.to_string(),
                })?;
            pipelines.push(pipeline);
        }

        Ok(Self {
            pipelines: [pipelines[0], pipelines[1], pipelines[2]],
            vertex_format,
            occluders: HandleOwner::new(),
            retire: retire.clone(),
        })
    }

    pub(crate) fn occluder_create(&mut self) -> OccluderId {
        self.occluders.insert(OccluderPolygon {
            cull: OccluderCullMode::Disabled,
            geometry: None,
        })
    }

    pub(crate) fn occluder(&self, id: OccluderId) -> Option<&OccluderPolygon> {
        self.occluders.get(id)
    }

    pub(crate) fn occluder_count(&self) -> usize {
        self.occluders.len()
    }

    pub(crate) fn occluder_set_cull_mode(&mut self, id: OccluderId, mode: OccluderCullMode) -> bool {
        match self.occluders.get_mut(id) {
            Some(occluder) => {
                occluder.cull = mode;
                true
            }
            None => {
                log::warn!("occluder_polygon_set_cull_mode on unknown occluder {:?}", id);
                false
            }
        }
    }

    /// `points` holds segment end points in pairs. A shape with the same
    /// point count as before is updated in place.
    pub(crate) fn occluder_set_shape_as_lines<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        id: OccluderId,
        points: &[Vec2],
    ) -> Result<bool, CanvasError> {
        let Some(occluder) = self.occluders.get_mut(id) else {
            log::warn!("occluder_polygon_set_shape_as_lines on unknown occluder {:?}", id);
            return Ok(false);
        };
        let segments = points.len() / 2;
        if segments > MAX_SEGMENTS {
            return Err(CanvasError::OccluderTooLarge { segments });
        }
        let point_count = segments * 2;

        if let Some(geometry) = &occluder.geometry {
            if geometry.point_count == point_count {
                let (vertices, _) = extrude_segments(points);
                device.buffer_update(geometry.vertex_buffer, 0, bytemuck::cast_slice(&vertices))?;
                return Ok(true);
            }
        }

        if let Some(old) = occluder.geometry.take() {
            self.retire.retire(old.vertex_buffer);
            self.retire.retire(old.index_buffer);
        }
        if segments == 0 {
            return Ok(true);
        }

        let (vertices, indices) = extrude_segments(points);
        let vertex_buffer = device.buffer_create(BufferUsage::Vertex, bytemuck::cast_slice(&vertices))?;
        let created = device
            .vertex_array_create(vertices.len() as u32, self.vertex_format, &[vertex_buffer], &[0])
            .and_then(|vertex_array| {
                let index_buffer =
                    device.buffer_create(BufferUsage::Index, bytemuck::cast_slice(&indices))?;
                device
                    .index_array_create(index_buffer, IndexFormat::U16, 0, indices.len() as u32)
                    .map(|index_array| (vertex_array, index_buffer, index_array))
                    .inspect_err(|_| device.free(index_buffer))
            });
        let (vertex_array, index_buffer, index_array) = match created {
            Ok(parts) => parts,
            Err(err) => {
                device.free(vertex_buffer);
                return Err(err.into());
            }
        };

        occluder.geometry = Some(OccluderGeometry {
            point_count,
            vertex_buffer,
            vertex_array,
            index_buffer,
            index_array,
        });
        Ok(true)
    }

    pub(crate) fn occluder_free(&mut self, id: OccluderId) -> bool {
        match self.occluders.remove(id) {
            Some(occluder) => {
                if let Some(geometry) = occluder.geometry {
                    self.retire.retire(geometry.vertex_buffer);
                    self.retire.retire(geometry.index_buffer);
                }
                true
            }
            None => false,
        }
    }

    /// Renders `occluders` into `shadow`. Returns the number of draws.
    pub(crate) fn render<D: RenderingDevice>(
        &self,
        device: &mut D,
        shadow: &ShadowMap,
        light_xform: &Affine2,
        light_mask: u32,
        near: f32,
        far: f32,
        occluders: &[LightOccluder],
    ) -> Result<usize, DeviceError> {
        let list = device.draw_list_begin(
            shadow.framebuffer,
            Some(ClearValues {
                color: [far, far, far, 1.0],
                depth: 1.0,
            }),
        )?;

        let to_light = light_xform.inverse();
        let quarter = shadow.resolution as f32 / 4.0;
        let mut draws = 0;
        let mut bound_pipeline = None;

        for quadrant in 0..4u32 {
            device.draw_list_set_viewport(
                list,
                Rect2::new(quadrant as f32 * quarter, 0.0, quarter, 1.0),
            );
            let projection = shadow_quadrant_projection(quadrant, near, far).to_cols_array();

            for instance in occluders {
                if instance.light_mask & light_mask == 0 {
                    continue;
                }
                let Some(occluder) = self.occluders.get(instance.id) else {
                    log::warn!("Shadow update skips unknown occluder {:?}", instance.id);
                    continue;
                };
                let Some(geometry) = &occluder.geometry else {
                    continue;
                };

                let pipeline = self.pipelines[occluder.cull.pipeline_index()];
                if bound_pipeline != Some(pipeline) {
                    device.draw_list_bind_render_pipeline(list, pipeline);
                    bound_pipeline = Some(pipeline);
                }
                let push = OcclusionPushConstant {
                    projection,
                    modelview: affine_to_mat2x4(&(to_light * instance.xform)),
                    direction: SHADOW_DIRECTIONS[quadrant as usize],
                    _padding: [0.0; 2],
                };
                device.draw_list_bind_vertex_array(list, geometry.vertex_array);
                device.draw_list_bind_index_array(list, geometry.index_array);
                device.draw_list_set_push_constant(list, bytemuck::bytes_of(&push));
                device.draw_list_draw(list, true, 1, 0);
                draws += 1;
            }
        }

        device.draw_list_end(list)?;
        Ok(draws)
    }
}
