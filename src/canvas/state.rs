use bytemuck::{Pod, Zeroable};
use glam::{Affine2, Mat4, Vec2};

use crate::math::{affine_to_mat2x4, affine_to_mat4, normalized_basis, screen_transform, Color};

/// Canvas-wide values read by every draw of one `canvas_render_items` call.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderStateUniform {
    pub canvas_transform: [f32; 16],
    pub screen_transform: [f32; 16],
    pub canvas_normal_transform: [f32; 16],
    pub canvas_modulation: [f32; 4],
}

impl RenderStateUniform {
    pub fn new(canvas_transform: &Affine2, target_size: (u32, u32), modulate: Color) -> Self {
        Self {
            canvas_transform: affine_to_mat4(canvas_transform),
            screen_transform: affine_to_mat4(&screen_transform(target_size.0, target_size.1)),
            canvas_normal_transform: affine_to_mat4(&normalized_basis(canvas_transform)),
            canvas_modulation: modulate.to_array(),
        }
    }
}

pub const LIGHT_FLAGS_BLEND_SHIFT: u32 = 16;
pub const LIGHT_FLAGS_HAS_SHADOW: u32 = 1 << 20;
/// The light texture bound at the item-local light index is sampled.
pub const LIGHT_FLAGS_HAS_TEXTURE: u32 = 1 << 21;
pub const LIGHT_FLAGS_FILTER_SHIFT: u32 = 22;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub texture_matrix: [f32; 8],
    pub shadow_matrix: [f32; 8],
    /// Alpha holds the light energy.
    pub color: [f32; 4],
    pub shadow_color: [f32; 4],
    pub position: [f32; 2],
    pub flags: u32,
    pub height: f32,
    pub shadow_pixel_size: f32,
    pub _padding: [f32; 3],
}

/// Canvas-space inputs for one light uniform.
pub(crate) struct LightParams {
    pub xform: Affine2,
    pub rect_position: Vec2,
    pub rect_size: Vec2,
    pub color: Color,
    pub energy: f32,
    pub shadow_color: Color,
    pub height: f32,
    pub textured: bool,
    pub blend_mode: u32,
    pub shadow_filter: Option<u32>,
    pub shadow_resolution: u32,
}

impl LightUniform {
    pub(crate) fn new(params: &LightParams) -> Self {
        let canvas_to_light = params.xform.inverse();
        let size = Vec2::new(
            if params.rect_size.x == 0.0 { 1.0 } else { params.rect_size.x },
            if params.rect_size.y == 0.0 { 1.0 } else { params.rect_size.y },
        );
        let light_to_texture =
            Affine2::from_scale(size.recip()) * Affine2::from_translation(-params.rect_position);

        let mut flags = (params.blend_mode & 0x3) << LIGHT_FLAGS_BLEND_SHIFT;
        if params.textured {
            flags |= LIGHT_FLAGS_HAS_TEXTURE;
        }
        let mut shadow_pixel_size = 0.0;
        if let Some(filter) = params.shadow_filter {
            flags |= LIGHT_FLAGS_HAS_SHADOW;
            flags |= filter << LIGHT_FLAGS_FILTER_SHIFT;
            shadow_pixel_size = 1.0 / params.shadow_resolution.max(1) as f32;
        }

        let mut color = params.color.to_array();
        color[3] = params.energy;

        Self {
            texture_matrix: affine_to_mat2x4(&(light_to_texture * canvas_to_light)),
            shadow_matrix: affine_to_mat2x4(&canvas_to_light),
            color,
            shadow_color: params.shadow_color.to_array(),
            position: params.xform.translation.to_array(),
            flags,
            height: params.height,
            shadow_pixel_size,
            _padding: [0.0; 3],
        }
    }
}

/// Skeleton transform and its inverse, bound for skinned items.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SkeletonUniform {
    pub skeleton_transform: [f32; 16],
    pub skeleton_inverse: [f32; 16],
}

impl SkeletonUniform {
    pub fn new(skeleton_transform: &Affine2) -> Self {
        Self {
            skeleton_transform: affine_to_mat4(skeleton_transform),
            skeleton_inverse: affine_to_mat4(&skeleton_transform.inverse()),
        }
    }
}

impl Default for SkeletonUniform {
    fn default() -> Self {
        Self {
            skeleton_transform: Mat4::IDENTITY.to_cols_array(),
            skeleton_inverse: Mat4::IDENTITY.to_cols_array(),
        }
    }
}
