//! The storage layer the canvas renderer resolves textures, samplers and
//! render targets through.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{
    BufferUsage, DataFormat, RenderingDevice, Rid, SamplerDesc, SamplerFilter, SamplerRepeat,
    TextureDesc, TextureUsage,
};
use crate::error::DeviceError;
use crate::handle::{Handle, HandleOwner};
use crate::math::Color;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFilter {
    /// Use the renderer's configured default.
    #[default]
    Default,
    Nearest,
    Linear,
    NearestWithMipmaps,
    LinearWithMipmaps,
    NearestWithMipmapsAnisotropic,
    LinearWithMipmapsAnisotropic,
}

impl TextureFilter {
    pub const RESOLVED: [TextureFilter; 6] = [
        TextureFilter::Nearest,
        TextureFilter::Linear,
        TextureFilter::NearestWithMipmaps,
        TextureFilter::LinearWithMipmaps,
        TextureFilter::NearestWithMipmapsAnisotropic,
        TextureFilter::LinearWithMipmapsAnisotropic,
    ];

    pub fn resolve(self, default: TextureFilter) -> TextureFilter {
        match self {
            TextureFilter::Default => default,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureRepeat {
    /// Use the renderer's configured default.
    #[default]
    Default,
    Disabled,
    Enabled,
    Mirror,
}

impl TextureRepeat {
    pub const RESOLVED: [TextureRepeat; 3] = [
        TextureRepeat::Disabled,
        TextureRepeat::Enabled,
        TextureRepeat::Mirror,
    ];

    pub fn resolve(self, default: TextureRepeat) -> TextureRepeat {
        match self {
            TextureRepeat::Default => default,
            other => other,
        }
    }
}

fn sampler_desc(filter: TextureFilter, repeat: TextureRepeat) -> SamplerDesc {
    let (filter, mip_filter, anisotropy) = match filter {
        TextureFilter::Nearest | TextureFilter::Default => (SamplerFilter::Nearest, None, 1),
        TextureFilter::Linear => (SamplerFilter::Linear, None, 1),
        TextureFilter::NearestWithMipmaps => {
            (SamplerFilter::Nearest, Some(SamplerFilter::Linear), 1)
        }
        TextureFilter::LinearWithMipmaps => (SamplerFilter::Linear, Some(SamplerFilter::Linear), 1),
        // Anisotropy requires linear filtering on every axis.
        TextureFilter::NearestWithMipmapsAnisotropic => {
            (SamplerFilter::Nearest, Some(SamplerFilter::Linear), 1)
        }
        TextureFilter::LinearWithMipmapsAnisotropic => {
            (SamplerFilter::Linear, Some(SamplerFilter::Linear), 16)
        }
    };
    let repeat = match repeat {
        TextureRepeat::Disabled | TextureRepeat::Default => SamplerRepeat::Clamp,
        TextureRepeat::Enabled => SamplerRepeat::Repeat,
        TextureRepeat::Mirror => SamplerRepeat::Mirror,
    };
    SamplerDesc {
        filter,
        mip_filter,
        anisotropy,
        repeat,
    }
}

/// Placeholder textures substituted for unset slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DefaultTexture {
    White,
    Black,
    Normal,
    Anisotropy,
}

pub struct StoredTexture {
    rid: Rid,
    size: (u32, u32),
}

pub struct InstanceBuffer {
    rid: Rid,
}

pub struct RenderTarget {
    texture: Rid,
    framebuffer: Rid,
    size: (u32, u32),
    clear_request: Option<Color>,
}

pub type TextureId = Handle<StoredTexture>;
pub type InstanceBufferId = Handle<InstanceBuffer>;
pub type RenderTargetId = Handle<RenderTarget>;

pub trait TextureStorage {
    fn texture_rd(&self, texture: TextureId) -> Option<Rid>;
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;
    fn default_texture(&self, kind: DefaultTexture) -> Rid;

    fn instance_buffer_rd(&self, buffer: InstanceBufferId) -> Option<Rid>;
    /// Bound in place of an absent skin or instance buffer.
    fn default_instance_buffer(&self) -> Rid;

    /// `None` when either mode is still `Default`.
    fn sampler(&self, filter: TextureFilter, repeat: TextureRepeat) -> Option<Rid>;

    fn render_target_framebuffer(&self, target: RenderTargetId) -> Option<Rid>;
    fn render_target_size(&self, target: RenderTargetId) -> Option<(u32, u32)>;
    fn render_target_take_clear_request(&mut self, target: RenderTargetId) -> Option<Color>;
}

/// Minimal [`TextureStorage`] owning RGBA8 textures, instance buffers and
/// single-attachment render targets.
pub struct SimpleStorage {
    textures: HandleOwner<StoredTexture>,
    instance_buffers: HandleOwner<InstanceBuffer>,
    render_targets: HandleOwner<RenderTarget>,
    defaults: HashMap<DefaultTexture, Rid>,
    default_instance_buffer: Rid,
    samplers: HashMap<(TextureFilter, TextureRepeat), Rid>,
}

impl SimpleStorage {
    pub fn new<D: RenderingDevice>(device: &mut D) -> Result<Self, DeviceError> {
        let mut defaults = HashMap::new();
        for (kind, pixel) in [
            (DefaultTexture::White, [255, 255, 255, 255]),
            (DefaultTexture::Black, [0, 0, 0, 255]),
            (DefaultTexture::Normal, [128, 128, 255, 255]),
            (DefaultTexture::Anisotropy, [255, 128, 255, 255]),
        ] {
            let rid = device.texture_create(
                &TextureDesc {
                    width: 1,
                    height: 1,
                    format: DataFormat::Rgba8Unorm,
                    usage: TextureUsage::SAMPLING,
                },
                Some(&pixel),
            )?;
            defaults.insert(kind, rid);
        }

        // One identity instance: two transform rows, white color, zero custom data.
        let identity: [f32; 16] = [
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let default_instance_buffer =
            device.buffer_create(BufferUsage::Storage, bytemuck::cast_slice(&identity))?;

        let mut samplers = HashMap::new();
        for filter in TextureFilter::RESOLVED {
            for repeat in TextureRepeat::RESOLVED {
                let rid = device.sampler_create(&sampler_desc(filter, repeat))?;
                samplers.insert((filter, repeat), rid);
            }
        }

        log::info!(
            "Storage initialised with {} default textures and {} samplers",
            defaults.len(),
            samplers.len()
        );

        Ok(Self {
            textures: HandleOwner::new(),
            instance_buffers: HandleOwner::new(),
            render_targets: HandleOwner::new(),
            defaults,
            default_instance_buffer,
            samplers,
        })
    }

    pub fn texture_create<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        rgba8: &[u8],
    ) -> Result<TextureId, DeviceError> {
        let rid = device.texture_create(
            &TextureDesc {
                width,
                height,
                format: DataFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLING | TextureUsage::CAN_UPDATE,
            },
            Some(rgba8),
        )?;
        Ok(self.textures.insert(StoredTexture {
            rid,
            size: (width, height),
        }))
    }

    /// Destroys the device texture. Uniform sets built from it become invalid.
    pub fn texture_free<D: RenderingDevice>(&mut self, device: &mut D, texture: TextureId) -> bool {
        match self.textures.remove(texture) {
            Some(stored) => {
                device.free(stored.rid);
                true
            }
            None => false,
        }
    }

    pub fn instance_buffer_create<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        data: &[u8],
    ) -> Result<InstanceBufferId, DeviceError> {
        let rid = device.buffer_create(BufferUsage::Storage, data)?;
        Ok(self.instance_buffers.insert(InstanceBuffer { rid }))
    }

    pub fn instance_buffer_free<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        buffer: InstanceBufferId,
    ) -> bool {
        match self.instance_buffers.remove(buffer) {
            Some(stored) => {
                device.free(stored.rid);
                true
            }
            None => false,
        }
    }

    pub fn render_target_create<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: DataFormat,
    ) -> Result<RenderTargetId, DeviceError> {
        let texture = device.texture_create(
            &TextureDesc {
                width,
                height,
                format,
                usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLING,
            },
            None,
        )?;
        let framebuffer = match device.framebuffer_create(&[texture]) {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                device.free(texture);
                return Err(err);
            }
        };
        Ok(self.render_targets.insert(RenderTarget {
            texture,
            framebuffer,
            size: (width, height),
            clear_request: None,
        }))
    }

    pub fn render_target_free<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        target: RenderTargetId,
    ) -> bool {
        match self.render_targets.remove(target) {
            Some(stored) => {
                device.free(stored.texture);
                true
            }
            None => false,
        }
    }

    /// The next render into `target` clears it to `color` first.
    pub fn render_target_request_clear(&mut self, target: RenderTargetId, color: Color) {
        match self.render_targets.get_mut(target) {
            Some(stored) => stored.clear_request = Some(color),
            None => log::warn!("Clear requested for unknown render target {:?}", target),
        }
    }

    pub fn render_target_texture(&self, target: RenderTargetId) -> Option<Rid> {
        self.render_targets.get(target).map(|t| t.texture)
    }
}

impl TextureStorage for SimpleStorage {
    fn texture_rd(&self, texture: TextureId) -> Option<Rid> {
        self.textures.get(texture).map(|t| t.rid)
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(texture).map(|t| t.size)
    }

    fn default_texture(&self, kind: DefaultTexture) -> Rid {
        self.defaults[&kind]
    }

    fn instance_buffer_rd(&self, buffer: InstanceBufferId) -> Option<Rid> {
        self.instance_buffers.get(buffer).map(|b| b.rid)
    }

    fn default_instance_buffer(&self) -> Rid {
        self.default_instance_buffer
    }

    fn sampler(&self, filter: TextureFilter, repeat: TextureRepeat) -> Option<Rid> {
        self.samplers.get(&(filter, repeat)).copied()
    }

    fn render_target_framebuffer(&self, target: RenderTargetId) -> Option<Rid> {
        self.render_targets.get(target).map(|t| t.framebuffer)
    }

    fn render_target_size(&self, target: RenderTargetId) -> Option<(u32, u32)> {
        self.render_targets.get(target).map(|t| t.size)
    }

    fn render_target_take_clear_request(&mut self, target: RenderTargetId) -> Option<Color> {
        self.render_targets
            .get_mut(target)
            .and_then(|t| t.clear_request.take())
    }
}
