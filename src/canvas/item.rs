//! Canvas items and the draw commands they carry.

use std::rc::Rc;

use glam::{Affine2, Vec2};

use crate::device::Rid;
use crate::math::{Color, Rect2};

use super::lights::{LightSet, LightSetKey};
use super::pipeline::PipelineVariant;
use super::polygons::PolygonId;
use super::push_constant::NinePatchMode;
use super::retire::Retained;
use super::texture_bindings::TextureBindingId;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RectFlags: u32 {
        const FLIP_H = 1 << 0;
        const FLIP_V = 1 << 1;
        const TRANSPOSE = 1 << 2;
        /// Clip the source region in UV space instead of scaling it.
        const CLIP_UV = 1 << 3;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RectCommand {
    pub rect: Rect2,
    /// Region of the texture in pixels; `None` draws the whole texture.
    pub source: Option<Rect2>,
    pub modulate: Color,
    pub flags: RectFlags,
    pub texture: TextureBindingId,
}

impl RectCommand {
    pub fn new(rect: Rect2, texture: TextureBindingId) -> Self {
        Self {
            rect,
            source: None,
            modulate: Color::WHITE,
            flags: RectFlags::empty(),
            texture,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NinePatchCommand {
    pub rect: Rect2,
    pub source: Option<Rect2>,
    /// Left, top, right, bottom in pixels.
    pub margins: [f32; 4],
    pub draw_center: bool,
    pub axis_x: NinePatchMode,
    pub axis_y: NinePatchMode,
    pub modulate: Color,
    pub texture: TextureBindingId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonPrimitive {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

impl PolygonPrimitive {
    pub(crate) fn variant(self) -> PipelineVariant {
        match self {
            PolygonPrimitive::Points => PipelineVariant::AttributePoints,
            PolygonPrimitive::Lines => PipelineVariant::AttributeLines,
            PolygonPrimitive::LineStrip => PipelineVariant::AttributeLineStrip,
            PolygonPrimitive::Triangles => PipelineVariant::AttributeTriangles,
            PolygonPrimitive::TriangleStrip => PipelineVariant::AttributeTriangleStrip,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolygonCommand {
    pub polygon: PolygonId,
    pub primitive: PolygonPrimitive,
    pub modulate: Color,
    pub texture: TextureBindingId,
}

/// One to four points. Four points draw as two triangles.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveCommand {
    pub points: Vec<Vec2>,
    /// Missing uvs read as zero.
    pub uvs: Vec<Vec2>,
    /// A single color applies to every point; missing colors are white.
    pub colors: Vec<Color>,
    pub texture: TextureBindingId,
}

impl PrimitiveCommand {
    pub(crate) fn variant(&self) -> Option<PipelineVariant> {
        match self.points.len() {
            1 => Some(PipelineVariant::PrimitivePoints),
            2 => Some(PipelineVariant::PrimitiveLines),
            3 | 4 => Some(PipelineVariant::PrimitiveTriangles),
            _ => None,
        }
    }

    pub(crate) fn uv(&self, index: usize) -> Vec2 {
        self.uvs.get(index).copied().unwrap_or(Vec2::ZERO)
    }

    pub(crate) fn color(&self, index: usize) -> Color {
        match self.colors.len() {
            0 => Color::WHITE,
            1 => self.colors[0],
            _ => self.colors.get(index).copied().unwrap_or(Color::WHITE),
        }
    }
}

/// Geometry each multimesh instance draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MultiMeshSource {
    Quad(Rect2),
    Polygon(PolygonId, PolygonPrimitive),
}

/// Instanced draw. Instance data is read from the skin buffer of the texture
/// binding: two transform rows, then an optional color and optional custom
/// data, each one vec4.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiMeshCommand {
    pub source: MultiMeshSource,
    pub instance_count: u32,
    pub has_colors: bool,
    pub has_custom_data: bool,
    pub from_particles: bool,
    pub modulate: Color,
    pub texture: TextureBindingId,
}

impl MultiMeshCommand {
    /// Per-instance stride in vec4 units.
    pub(crate) fn stride(&self) -> u32 {
        2 + u32::from(self.has_colors) + u32::from(self.has_custom_data)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ItemCommand {
    Rect(RectCommand),
    NinePatch(NinePatchCommand),
    Polygon(PolygonCommand),
    Primitive(PrimitiveCommand),
    MultiMesh(MultiMeshCommand),
    /// Replaces the command transform, relative to the item transform.
    Transform(Affine2),
    /// `true` suspends the item's clip rect for the following commands.
    ClipIgnore(bool),
}

/// Per-item renderer state carried between frames.
#[derive(Default)]
pub(crate) struct ItemStateData {
    /// `u32::MAX` until the light association is first built.
    pub light_count: u32,
    pub lights: LightSetKey,
    pub light_set: Option<Rc<LightSet>>,
    pub state_set: Option<Retained>,
    pub skeleton: Option<Rid>,
}

impl ItemStateData {
    pub(crate) fn new() -> Self {
        Self {
            light_count: u32::MAX,
            ..Default::default()
        }
    }
}

/// A drawable unit: an ordered command list with shared transform, bounds,
/// clip and lighting state.
pub struct CanvasItem {
    pub commands: Vec<ItemCommand>,
    /// Item space to canvas space.
    pub xform: Affine2,
    /// Bounds in item space, used to find affecting lights.
    pub rect: Rect2,
    pub modulate: Color,
    pub z_index: i32,
    pub light_mask: u32,
    /// Clip rect in canvas space.
    pub clip: Option<Rect2>,
    /// Uniform buffer holding a [`SkeletonUniform`](super::state::SkeletonUniform).
    pub skeleton: Option<Rid>,
    pub pixel_snap: bool,
    pub specular: Color,
    pub shininess: f32,
    pub(crate) state: ItemStateData,
}

impl CanvasItem {
    pub fn new(rect: Rect2) -> Self {
        Self {
            commands: Vec::new(),
            xform: Affine2::IDENTITY,
            rect,
            modulate: Color::WHITE,
            z_index: 0,
            light_mask: 1,
            clip: None,
            skeleton: None,
            pixel_snap: false,
            specular: Color::WHITE,
            shininess: 1.0,
            state: ItemStateData::new(),
        }
    }

    pub fn with_command(mut self, command: ItemCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Bounds in canvas space.
    pub fn global_rect(&self) -> Rect2 {
        let corners = self.rect.abs().corners().map(|c| self.xform.transform_point2(c));
        let (min, max) = corners
            .iter()
            .fold((Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)), |(lo, hi), p| {
                (lo.min(*p), hi.max(*p))
            });
        Rect2 {
            position: min,
            size: max - min,
        }
    }

    /// Whether the renderer currently holds a light set for this item.
    pub fn has_light_cache(&self) -> bool {
        self.state.light_set.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_variant_follows_point_count() {
        let mut primitive = PrimitiveCommand {
            points: vec![Vec2::ZERO],
            uvs: Vec::new(),
            colors: vec![Color::BLACK],
            texture: TextureBindingId::DEFAULT,
        };
        assert_eq!(primitive.variant(), Some(PipelineVariant::PrimitivePoints));
        primitive.points = vec![Vec2::ZERO; 4];
        assert_eq!(primitive.variant(), Some(PipelineVariant::PrimitiveTriangles));
        assert_eq!(primitive.color(3), Color::BLACK);
        primitive.points = vec![Vec2::ZERO; 5];
        assert_eq!(primitive.variant(), None);
    }

    #[test]
    fn global_rect_covers_rotated_bounds() {
        let mut item = CanvasItem::new(Rect2::new(0.0, 0.0, 10.0, 20.0));
        item.xform = Affine2::from_angle_translation(std::f32::consts::FRAC_PI_2, Vec2::new(100.0, 0.0));
        let rect = item.global_rect();
        assert!((rect.position.x - 80.0).abs() < 1e-4);
        assert!((rect.size.x - 20.0).abs() < 1e-4);
        assert!((rect.size.y - 10.0).abs() < 1e-4);
    }

    #[test]
    fn multimesh_stride_counts_optional_channels() {
        let command = MultiMeshCommand {
            source: MultiMeshSource::Quad(Rect2::new(0.0, 0.0, 1.0, 1.0)),
            instance_count: 4,
            has_colors: true,
            has_custom_data: false,
            from_particles: false,
            modulate: Color::WHITE,
            texture: TextureBindingId::DEFAULT,
        };
        assert_eq!(command.stride(), 3);
    }
}
