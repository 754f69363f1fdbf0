//! Per-draw push constant block and the flags word it carries.
//!
//! The layout is a binary protocol shared with `shader/canvas.wgsl`:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 24 | world transform, 2x3 column major |
//! | 24 | 4 | flags |
//! | 28 | 4 | specular color and shininess, RGBA8 |
//! | 32 | 72 | rect data or primitive data |
//! | 104 | 8 | color texture pixel size |
//! | 112 | 16 | light render indices, 8 bits each |

use bytemuck::{Pod, Zeroable};
use glam::{Affine2, Vec2};
use half::f16;

use crate::math::{affine_to_mat2x3, Color, Rect2};

pub const PUSH_CONSTANT_SIZE: usize = 128;

pub const INSTANCING_STRIDE_MASK: u32 = 0xF;
pub const NINEPATCH_H_MODE_SHIFT: u32 = 16;
pub const NINEPATCH_V_MODE_SHIFT: u32 = 18;
pub const NINEPATCH_MODE_MASK: u32 = 0x3;
pub const LIGHT_COUNT_SHIFT: u32 = 20;
pub const LIGHT_COUNT_MASK: u32 = 0x3F;

bitflags::bitflags! {
    /// Single-bit entries of the flags word. Multi-bit fields are written
    /// through the `with_*` helpers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u32 {
        const INSTANCING = 1 << 4;
        const INSTANCING_HAS_COLORS = 1 << 5;
        const INSTANCING_COLOR_8BIT = 1 << 6;
        const INSTANCING_HAS_CUSTOM_DATA = 1 << 7;
        const INSTANCING_CUSTOM_DATA_8BIT = 1 << 8;
        const CLIP_RECT_UV = 1 << 9;
        const TRANSPOSE_RECT = 1 << 10;
        const USING_LIGHT_MASK = 1 << 11;
        const NINEPATCH_DRAW_CENTER = 1 << 12;
        const USING_PARTICLES = 1 << 13;
        const PIXEL_SNAP = 1 << 14;
        const SKELETON = 1 << 15;
        const DEFAULT_NORMAL_MAP_USED = 1 << 26;
        const DEFAULT_SPECULAR_MAP_USED = 1 << 27;
    }
}

/// How a nine-patch axis fills the space between its margins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NinePatchMode {
    #[default]
    Stretch = 0,
    Tile = 1,
    TileFit = 2,
}

impl ItemFlags {
    /// Instance stride in vec4 units.
    pub fn with_instancing_stride(self, stride: u32) -> Self {
        let bits = self.bits() & !INSTANCING_STRIDE_MASK;
        Self::from_bits_retain(bits | (stride & INSTANCING_STRIDE_MASK))
    }

    pub fn instancing_stride(self) -> u32 {
        self.bits() & INSTANCING_STRIDE_MASK
    }

    pub fn with_ninepatch_modes(self, horizontal: NinePatchMode, vertical: NinePatchMode) -> Self {
        let mask = (NINEPATCH_MODE_MASK << NINEPATCH_H_MODE_SHIFT)
            | (NINEPATCH_MODE_MASK << NINEPATCH_V_MODE_SHIFT);
        let bits = (self.bits() & !mask)
            | ((horizontal as u32) << NINEPATCH_H_MODE_SHIFT)
            | ((vertical as u32) << NINEPATCH_V_MODE_SHIFT);
        Self::from_bits_retain(bits)
    }

    pub fn with_light_count(self, count: u32) -> Self {
        let bits = self.bits() & !(LIGHT_COUNT_MASK << LIGHT_COUNT_SHIFT);
        Self::from_bits_retain(bits | ((count & LIGHT_COUNT_MASK) << LIGHT_COUNT_SHIFT))
    }

    pub fn light_count(self) -> u32 {
        (self.bits() >> LIGHT_COUNT_SHIFT) & LIGHT_COUNT_MASK
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstant {
    pub world: [f32; 6],
    pub flags: u32,
    pub specular_shininess: u32,
    /// Rect layout: modulation, nine-patch margins, destination rect, source
    /// rect, two padding floats. Primitive layout: three points, three uvs,
    /// three colors as half floats.
    pub data: [f32; 18],
    pub color_texture_pixel_size: [f32; 2],
    pub lights: [u32; 4],
}

impl PushConstant {
    pub fn new(world: &Affine2, flags: ItemFlags) -> Self {
        Self {
            world: affine_to_mat2x3(world),
            flags: flags.bits(),
            ..Zeroable::zeroed()
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn item_flags(&self) -> ItemFlags {
        ItemFlags::from_bits_retain(self.flags)
    }

    pub fn set_rect(&mut self, modulation: Color, margins: [f32; 4], dst: Rect2, src: Rect2) {
        self.data[0..4].copy_from_slice(&modulation.to_array());
        self.data[4..8].copy_from_slice(&margins);
        self.data[8..12].copy_from_slice(&rect_to_array(dst));
        self.data[12..16].copy_from_slice(&rect_to_array(src));
        self.data[16] = 0.0;
        self.data[17] = 0.0;
    }

    pub fn set_primitive(&mut self, points: [Vec2; 3], uvs: [Vec2; 3], colors: [Color; 3]) {
        for (i, point) in points.iter().enumerate() {
            self.data[i * 2] = point.x;
            self.data[i * 2 + 1] = point.y;
        }
        for (i, uv) in uvs.iter().enumerate() {
            self.data[6 + i * 2] = uv.x;
            self.data[6 + i * 2 + 1] = uv.y;
        }
        for (i, color) in colors.iter().enumerate() {
            let [rg, ba] = pack_half_color(*color);
            self.data[12 + i * 2] = f32::from_bits(rg);
            self.data[12 + i * 2 + 1] = f32::from_bits(ba);
        }
    }

    pub fn set_specular(&mut self, specular: Color, shininess: f32) {
        self.specular_shininess = pack_rgba8([specular.r, specular.g, specular.b, shininess]);
    }

    /// Packs up to 16 light render indices, 8 bits each.
    pub fn set_lights(&mut self, indices: &[u8]) {
        self.lights = [0; 4];
        for (i, index) in indices.iter().take(16).enumerate() {
            self.lights[i / 4] |= (*index as u32) << ((i % 4) * 8);
        }
    }
}

fn rect_to_array(rect: Rect2) -> [f32; 4] {
    [rect.position.x, rect.position.y, rect.size.x, rect.size.y]
}

/// Two words: `r | g << 16` and `b | a << 16`, each channel an IEEE half.
pub fn pack_half_color(color: Color) -> [u32; 2] {
    let half = |v: f32| f16::from_f32(v).to_bits() as u32;
    [
        half(color.r) | (half(color.g) << 16),
        half(color.b) | (half(color.a) << 16),
    ]
}

fn pack_rgba8(channels: [f32; 4]) -> u32 {
    channels
        .iter()
        .enumerate()
        .fold(0, |word, (i, v)| {
            word | (((v.clamp(0.0, 1.0) * 255.0).round() as u32) << (i * 8))
        })
}
