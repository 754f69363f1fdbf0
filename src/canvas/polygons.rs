use std::collections::HashMap;
use std::num::NonZeroU64;

use glam::Vec2;

use crate::device::{
    BufferUsage, DataFormat, IndexFormat, RenderingDevice, Rid, VertexAttribute, VertexFormatId,
    VertexFrequency,
};
use crate::error::{CanvasError, DeviceError};
use crate::math::Color;

use super::retire::RetireQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolygonId(NonZeroU64);

impl PolygonId {
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Geometry for [`PolygonPool::request`]. Optional arrays are used only when
/// their length matches the point count; `colors` may also hold a single
/// color applied to every vertex.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolygonDesc<'a> {
    pub indices: &'a [u32],
    pub points: &'a [Vec2],
    pub colors: &'a [Color],
    pub uvs: &'a [Vec2],
    pub bones: &'a [[u32; 4]],
    pub weights: &'a [[f32; 4]],
}

impl PolygonDesc<'_> {
    fn validate(&self) -> Result<(), CanvasError> {
        if self.points.is_empty() {
            return Err(CanvasError::EmptyPolygon);
        }
        let point_count = self.points.len();
        match self
            .indices
            .iter()
            .enumerate()
            .find(|(_, value)| **value as usize >= point_count)
        {
            Some((index, value)) => Err(CanvasError::IndexOutOfRange {
                index,
                value: *value,
                point_count,
            }),
            None => Ok(()),
        }
    }
}

pub(crate) struct PolygonBuffers {
    pub vertex_format: VertexFormatId,
    pub vertex_buffer: Rid,
    pub vertex_array: Rid,
    pub vertex_count: u32,
    pub index_buffer: Option<Rid>,
    pub index_array: Option<Rid>,
}

/// Which optional attributes a vertex buffer interleaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    color: bool,
    uv: bool,
    bones: bool,
    weights: bool,
}

impl Layout {
    const POSITION: u32 = 8;
    const COLOR: u32 = 16;
    const UV: u32 = 8;
    const BONES: u32 = 16;
    const WEIGHTS: u32 = 16;

    fn stride(&self) -> u32 {
        Self::POSITION
            + if self.color { Self::COLOR } else { 0 }
            + if self.uv { Self::UV } else { 0 }
            + if self.bones { Self::BONES } else { 0 }
            + if self.weights { Self::WEIGHTS } else { 0 }
    }
}

/// Owns vertex and index buffers of custom polygon geometry.
pub(crate) struct PolygonPool {
    polygons: HashMap<PolygonId, PolygonBuffers>,
    issued: u64,
    default_color: Rid,
    default_zero: Rid,
    default_format: VertexFormatId,
    retire: RetireQueue,
}

impl PolygonPool {
    pub(crate) fn new<D: RenderingDevice>(
        device: &mut D,
        retire: &RetireQueue,
    ) -> Result<Self, DeviceError> {
        let default_color =
            device.buffer_create(BufferUsage::Vertex, bytemuck::cast_slice(&[1.0f32; 4]))?;
        let default_zero = device.buffer_create(BufferUsage::Vertex, &[0u8; 16])?;
        let default_format = device.vertex_format_create(&Self::attributes(&Layout {
            color: false,
            uv: false,
            bones: false,
            weights: false,
        }));
        Ok(Self {
            polygons: HashMap::new(),
            issued: 0,
            default_color,
            default_zero,
            default_format,
            retire: retire.clone(),
        })
    }

    /// Format of a polygon carrying positions only.
    pub(crate) fn default_format(&self) -> VertexFormatId {
        self.default_format
    }

    pub(crate) fn get(&self, id: PolygonId) -> Option<&PolygonBuffers> {
        self.polygons.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.polygons.len()
    }

    pub(crate) fn request<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        desc: &PolygonDesc<'_>,
    ) -> Result<PolygonId, CanvasError> {
        desc.validate()?;

        let count = desc.points.len();
        let layout = Layout {
            color: desc.colors.len() == count || desc.colors.len() == 1,
            uv: desc.uvs.len() == count,
            bones: desc.bones.len() == count,
            weights: desc.weights.len() == count,
        };

        let mut data = Vec::with_capacity(count * layout.stride() as usize);
        for (i, point) in desc.points.iter().enumerate() {
            data.extend_from_slice(bytemuck::bytes_of(&point.to_array()));
            if layout.color {
                let color = desc.colors.get(i).unwrap_or(&desc.colors[0]);
                data.extend_from_slice(bytemuck::bytes_of(&color.to_array()));
            }
            if layout.uv {
                data.extend_from_slice(bytemuck::bytes_of(&desc.uvs[i].to_array()));
            }
            if layout.bones {
                data.extend_from_slice(bytemuck::bytes_of(&desc.bones[i]));
            }
            if layout.weights {
                data.extend_from_slice(bytemuck::bytes_of(&desc.weights[i]));
            }
        }

        let vertex_format = device.vertex_format_create(&Self::attributes(&layout));
        let vertex_buffer = device.buffer_create(BufferUsage::Vertex, &data)?;

        let (buffers, offsets) = self.bind_attributes(vertex_buffer, &layout);
        let vertex_array =
            match device.vertex_array_create(count as u32, vertex_format, &buffers, &offsets) {
                Ok(array) => array,
                Err(err) => {
                    device.free(vertex_buffer);
                    return Err(err.into());
                }
            };

        let (index_buffer, index_array) = if desc.indices.is_empty() {
            (None, None)
        } else {
            let created = device
                .buffer_create(BufferUsage::Index, bytemuck::cast_slice(desc.indices))
                .and_then(|buffer| {
                    device
                        .index_array_create(buffer, IndexFormat::U32, 0, desc.indices.len() as u32)
                        .map(|array| (buffer, array))
                        .inspect_err(|_| device.free(buffer))
                });
            match created {
                Ok((buffer, array)) => (Some(buffer), Some(array)),
                Err(err) => {
                    device.free(vertex_buffer);
                    return Err(err.into());
                }
            }
        };

        let id = PolygonId(NonZeroU64::MIN.saturating_add(self.issued));
        self.issued += 1;
        self.polygons.insert(
            id,
            PolygonBuffers {
                vertex_format,
                vertex_buffer,
                vertex_array,
                vertex_count: count as u32,
                index_buffer,
                index_array,
            },
        );
        log::debug!(
            "Created polygon {:?}: {} points, {} indices",
            id,
            count,
            desc.indices.len()
        );
        Ok(id)
    }

    /// Forgets `id` at once; its buffers are destroyed at the next flush of
    /// the retire queue.
    pub(crate) fn free(&mut self, id: PolygonId) -> bool {
        match self.polygons.remove(&id) {
            Some(buffers) => {
                self.retire.retire(buffers.vertex_buffer);
                if let Some(index_buffer) = buffers.index_buffer {
                    self.retire.retire(index_buffer);
                }
                true
            }
            None => {
                log::warn!("Attempted to free unknown polygon {:?}", id);
                false
            }
        }
    }

    /// Every attribute gets its own buffer slot; absent ones read a shared
    /// default with zero stride.
    fn attributes(layout: &Layout) -> [VertexAttribute; 5] {
        let stride = layout.stride();
        let attribute = |location, format, present: bool| VertexAttribute {
            location,
            offset: 0,
            format,
            stride: if present { stride } else { 0 },
            frequency: VertexFrequency::Vertex,
        };
        [
            attribute(0, DataFormat::Rg32Float, true),
            attribute(1, DataFormat::Rgba32Float, layout.color),
            attribute(2, DataFormat::Rg32Float, layout.uv),
            attribute(3, DataFormat::Rgba32Uint, layout.bones),
            attribute(4, DataFormat::Rgba32Float, layout.weights),
        ]
    }

    fn bind_attributes(&self, vertex_buffer: Rid, layout: &Layout) -> ([Rid; 5], [u64; 5]) {
        let mut offset = Layout::POSITION as u64;
        let mut slot = |present: bool, size: u32, default: Rid| {
            if present {
                let bound = (vertex_buffer, offset);
                offset += size as u64;
                bound
            } else {
                (default, 0)
            }
        };
        let color = slot(layout.color, Layout::COLOR, self.default_color);
        let uv = slot(layout.uv, Layout::UV, self.default_zero);
        let bones = slot(layout.bones, Layout::BONES, self.default_zero);
        let weights = slot(layout.weights, Layout::WEIGHTS, self.default_zero);
        (
            [vertex_buffer, color.0, uv.0, bones.0, weights.0],
            [0, color.1, uv.1, bones.1, weights.1],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::ResourceKind;
    use crate::device::HeadlessDevice;

    fn pool(device: &mut HeadlessDevice) -> (PolygonPool, RetireQueue) {
        let retire = RetireQueue::new();
        (PolygonPool::new(device, &retire).unwrap(), retire)
    }

    const TRIANGLE: [Vec2; 3] = [Vec2::ZERO, Vec2::X, Vec2::Y];

    #[test]
    fn out_of_range_indices_allocate_nothing() {
        let mut device = HeadlessDevice::new();
        let (mut pool, _) = pool(&mut device);
        let buffers_before = device.stats().created(ResourceKind::Buffer);

        let err = pool
            .request(
                &mut device,
                &PolygonDesc {
                    indices: &[0, 1, 3],
                    points: &TRIANGLE,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            CanvasError::IndexOutOfRange {
                index: 2,
                value: 3,
                point_count: 3
            }
        );
        assert_eq!(device.stats().created(ResourceKind::Buffer), buffers_before);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn interleaves_present_attributes() {
        let mut device = HeadlessDevice::new();
        let (mut pool, _) = pool(&mut device);
        let id = pool
            .request(
                &mut device,
                &PolygonDesc {
                    indices: &[0, 1, 2],
                    points: &TRIANGLE,
                    colors: &[Color::BLACK],
                    uvs: &TRIANGLE,
                    ..Default::default()
                },
            )
            .unwrap();

        let buffers = pool.get(id).unwrap();
        let data: &[f32] = bytemuck::cast_slice(device.buffer_data(buffers.vertex_buffer).unwrap());
        // position(2) + color(4) + uv(2) per vertex, color broadcast.
        assert_eq!(data.len(), 3 * 8);
        assert_eq!(&data[8..16], &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);

        let format = device.vertex_format(buffers.vertex_format).unwrap();
        assert_eq!(format[0].stride, 32);
        assert_eq!(format[2].stride, 32);
        assert_eq!(format[3].stride, 0);
        assert!(buffers.index_array.is_some());
    }

    #[test]
    fn ids_increase_and_freed_buffers_wait_for_flush() {
        let mut device = HeadlessDevice::new();
        let (mut pool, retire) = pool(&mut device);
        let desc = PolygonDesc {
            points: &TRIANGLE,
            ..Default::default()
        };
        let a = pool.request(&mut device, &desc).unwrap();
        let b = pool.request(&mut device, &desc).unwrap();
        assert!(b > a);

        let array = pool.get(a).unwrap().vertex_array;
        assert!(pool.free(a));
        assert!(!pool.free(a));
        assert!(pool.get(a).is_none());
        assert!(device.is_valid(array));

        retire.flush(&mut device);
        assert!(!device.is_valid(array));
        assert_eq!(pool.get(b).map(|p| p.vertex_format), Some(pool.default_format()));
    }

    #[test]
    fn empty_polygons_are_rejected() {
        let mut device = HeadlessDevice::new();
        let (mut pool, _) = pool(&mut device);
        assert_eq!(
            pool.request(&mut device, &PolygonDesc::default()),
            Err(CanvasError::EmptyPolygon)
        );
    }
}
