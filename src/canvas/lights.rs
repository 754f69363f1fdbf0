//! Light records and the light uniform sets shared by every item lit by the
//! same lights.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use glam::Affine2;

use crate::device::{RenderingDevice, Rid, Uniform};
use crate::error::{CanvasError, DeviceError};
use crate::handle::{Handle, HandleOwner};
use crate::math::{Color, Rect2};
use crate::storage::{DefaultTexture, TextureFilter, TextureId, TextureRepeat, TextureStorage};

use super::pipeline::{LIGHT_SET, LIGHT_TEXTURE_SLOTS};
use super::retire::{RetireQueue, Retained};
use super::shadows::ShadowMap;

pub const MIN_SHADOW_RESOLUTION: u32 = 64;

pub type LightId = Handle<CanvasLight>;

pub struct CanvasLight {
    texture: Option<TextureId>,
    version: u64,
    shadow: Option<ShadowMap>,
}

impl CanvasLight {
    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// Bumped whenever the light's texture or shadow map changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn shadow_resolution(&self) -> Option<u32> {
        self.shadow.as_ref().map(ShadowMap::resolution)
    }

    pub(crate) fn shadow(&self) -> Option<&ShadowMap> {
        self.shadow.as_ref()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LightBlendMode {
    #[default]
    Add = 0,
    Sub = 1,
    Mix = 2,
    /// Only lit areas are drawn; sets the item's light-mask flag.
    Mask = 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShadowFilter {
    #[default]
    None = 0,
    Pcf5 = 1,
    Pcf13 = 2,
}

/// Per-frame parameters of a light passed to `canvas_render_items`.
#[derive(Clone, Debug, PartialEq)]
pub struct Light2D {
    pub id: LightId,
    /// Light space to canvas space.
    pub xform: Affine2,
    /// Lit area in light space.
    pub rect: Rect2,
    pub color: Color,
    pub energy: f32,
    pub height: f32,
    /// Inclusive z range of the items this light affects.
    pub z_range: (i32, i32),
    pub item_mask: u32,
    pub mode: LightBlendMode,
    pub shadow_enabled: bool,
    pub shadow_color: Color,
    pub shadow_filter: ShadowFilter,
}

impl Light2D {
    pub fn new(id: LightId, xform: Affine2, rect: Rect2) -> Self {
        Self {
            id,
            xform,
            rect,
            color: Color::WHITE,
            energy: 1.0,
            height: 0.0,
            z_range: (i32::MIN, i32::MAX),
            item_mask: 1,
            mode: LightBlendMode::Add,
            shadow_enabled: false,
            shadow_color: Color::BLACK,
            shadow_filter: ShadowFilter::None,
        }
    }
}

/// A uniform set binding the lights buffer together with the textures and
/// shadow maps of one ordered list of lights. Freed through the retire queue
/// once the last item using it lets go.
pub(crate) struct LightSet {
    set: Retained,
}

impl LightSet {
    pub(crate) fn rid(&self) -> Rid {
        self.set.rid()
    }
}

/// `(light, version)` pairs in item-local order.
pub(crate) type LightSetKey = Vec<(LightId, u64)>;

pub(crate) struct LightRegistry {
    lights: HandleOwner<CanvasLight>,
    sets: HashMap<LightSetKey, Weak<LightSet>>,
    retire: RetireQueue,
    constructed: usize,
}

impl LightRegistry {
    pub(crate) fn new(retire: &RetireQueue) -> Self {
        Self {
            lights: HandleOwner::new(),
            sets: HashMap::new(),
            retire: retire.clone(),
            constructed: 0,
        }
    }

    pub(crate) fn create(&mut self) -> LightId {
        self.lights.insert(CanvasLight {
            texture: None,
            version: 0,
            shadow: None,
        })
    }

    pub(crate) fn get(&self, id: LightId) -> Option<&CanvasLight> {
        self.lights.get(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lights.len()
    }

    pub(crate) fn shadowed(&self) -> usize {
        self.lights.iter().filter(|(_, l)| l.shadow.is_some()).count()
    }

    pub(crate) fn set_texture(&mut self, id: LightId, texture: Option<TextureId>) -> bool {
        let Some(light) = self.lights.get_mut(id) else {
            log::warn!("light_set_texture on unknown light {:?}", id);
            return false;
        };
        if light.texture == texture {
            return true;
        }
        light.texture = texture;
        light.version += 1;
        true
    }

    /// Allocates, resizes or releases the light's shadow map.
    pub(crate) fn set_use_shadow<D: RenderingDevice>(
        &mut self,
        device: &mut D,
        id: LightId,
        enable: bool,
        resolution: u32,
    ) -> Result<bool, CanvasError> {
        let Some(light) = self.lights.get_mut(id) else {
            log::warn!("light_set_use_shadow on unknown light {:?}", id);
            return Ok(false);
        };
        if enable && resolution < MIN_SHADOW_RESOLUTION {
            return Err(CanvasError::ShadowResolution(resolution));
        }

        let current = light.shadow.as_ref().map(ShadowMap::resolution);
        let wanted = enable.then_some(resolution);
        if current == wanted {
            return Ok(true);
        }

        if let Some(old) = light.shadow.take() {
            old.free(device);
        }
        light.version += 1;
        if let Some(resolution) = wanted {
            light.shadow = Some(ShadowMap::allocate(device, resolution)?);
            log::debug!("Light {:?} shadow map allocated at {}", id, resolution);
        }
        Ok(true)
    }

    pub(crate) fn free<D: RenderingDevice>(&mut self, device: &mut D, id: LightId) -> bool {
        match self.lights.remove(id) {
            Some(light) => {
                if let Some(shadow) = light.shadow {
                    shadow.free(device);
                }
                true
            }
            None => false,
        }
    }

    /// Returns the shared set for `key`, building it on first use or when
    /// the device invalidated the previous one.
    pub(crate) fn light_set<D: RenderingDevice, S: TextureStorage>(
        &mut self,
        device: &mut D,
        storage: &S,
        shader: Rid,
        lights_buffer: Rid,
        key: &[(LightId, u64)],
    ) -> Result<Rc<LightSet>, DeviceError> {
        if let Some(shared) = self.sets.get(key).and_then(Weak::upgrade) {
            if device.uniform_set_is_valid(shared.rid()) {
                return Ok(shared);
            }
        }

        let white = storage.default_texture(DefaultTexture::White);
        let black = storage.default_texture(DefaultTexture::Black);
        let mut textures = vec![white; LIGHT_TEXTURE_SLOTS as usize];
        let mut shadows = vec![black; LIGHT_TEXTURE_SLOTS as usize];
        for (i, (id, _)) in key.iter().take(LIGHT_TEXTURE_SLOTS as usize).enumerate() {
            let Some(light) = self.lights.get(*id) else {
                continue;
            };
            if let Some(rid) = light
                .texture
                .and_then(|t| storage.texture_rd(t))
                .filter(|rid| device.is_valid(*rid))
            {
                textures[i] = rid;
            }
            if let Some(shadow) = &light.shadow {
                shadows[i] = shadow.texture();
            }
        }

        let sampler = |filter: TextureFilter, repeat: TextureRepeat| {
            storage.sampler(filter, repeat).ok_or_else(|| {
                DeviceError::InvalidDescriptor(format!("no sampler for {:?}/{:?}", filter, repeat))
            })
        };
        let shadow_sampler = sampler(TextureFilter::Nearest, TextureRepeat::Disabled)?;
        let light_sampler = sampler(TextureFilter::Linear, TextureRepeat::Disabled)?;

        let rid = device.uniform_set_create(
            &[
                Uniform::buffer(0, lights_buffer),
                Uniform::textures(1, textures),
                Uniform::textures(2, shadows),
                Uniform::sampler(3, shadow_sampler),
                Uniform::sampler(4, light_sampler),
            ],
            shader,
            LIGHT_SET,
        )?;
        self.constructed += 1;

        let shared = Rc::new(LightSet {
            set: Retained::new(rid, &self.retire),
        });
        self.sets.insert(key.to_vec(), Rc::downgrade(&shared));
        log::debug!("Built light set for {} lights", key.len());
        Ok(shared)
    }

    /// Drops map entries whose set was released by every item.
    pub(crate) fn prune_sets(&mut self) {
        self.sets.retain(|_, set| set.strong_count() > 0);
    }

    pub(crate) fn live_sets(&self) -> usize {
        self.sets.values().filter(|s| s.strong_count() > 0).count()
    }

    pub(crate) fn sets_constructed(&self) -> usize {
        self.constructed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::pipeline::CanvasPipelines;
    use crate::device::headless::ResourceKind;
    use crate::device::{BufferUsage, HeadlessDevice};
    use crate::storage::SimpleStorage;

    #[test]
    fn texture_changes_bump_the_version() {
        let retire = RetireQueue::new();
        let mut device = HeadlessDevice::new();
        let mut storage = SimpleStorage::new(&mut device).unwrap();
        let texture = storage.texture_create(&mut device, 1, 1, &[255; 4]).unwrap();
        let mut lights = LightRegistry::new(&retire);

        let light = lights.create();
        assert!(lights.set_texture(light, Some(texture)));
        assert_eq!(lights.get(light).unwrap().texture(), Some(texture));
        assert_eq!(lights.get(light).unwrap().version(), 1);

        // Same texture again is a no-op.
        assert!(lights.set_texture(light, Some(texture)));
        assert_eq!(lights.get(light).unwrap().version(), 1);

        assert!(lights.set_texture(light, None));
        assert_eq!(lights.get(light).unwrap().texture(), None);
        assert_eq!(lights.get(light).unwrap().version(), 2);
    }

    #[test]
    fn every_light_keeps_its_texture() {
        let retire = RetireQueue::new();
        let mut device = HeadlessDevice::new();
        let mut storage = SimpleStorage::new(&mut device).unwrap();
        let texture = storage.texture_create(&mut device, 1, 1, &[255; 4]).unwrap();
        let mut lights = LightRegistry::new(&retire);

        let ids: Vec<_> = (0..1100).map(|_| lights.create()).collect();
        for id in &ids {
            assert!(lights.set_texture(*id, Some(texture)));
        }
        assert!(ids
            .iter()
            .all(|id| lights.get(*id).unwrap().texture() == Some(texture)));
    }

    #[test]
    fn shadow_resize_frees_the_old_map() {
        let retire = RetireQueue::new();
        let mut device = HeadlessDevice::new();
        let mut lights = LightRegistry::new(&retire);
        let light = lights.create();
        let textures = device.live_count(ResourceKind::Texture);

        assert!(matches!(
            lights.set_use_shadow(&mut device, light, true, 32),
            Err(CanvasError::ShadowResolution(32))
        ));

        lights.set_use_shadow(&mut device, light, true, 256).unwrap();
        lights.set_use_shadow(&mut device, light, true, 512).unwrap();
        assert_eq!(lights.get(light).unwrap().shadow_resolution(), Some(512));
        assert_eq!(device.live_count(ResourceKind::Texture), textures + 2);
        assert_eq!(device.live_count(ResourceKind::Framebuffer), 1);

        let version = lights.get(light).unwrap().version();
        lights.set_use_shadow(&mut device, light, true, 512).unwrap();
        assert_eq!(lights.get(light).unwrap().version(), version);

        lights.set_use_shadow(&mut device, light, false, 0).unwrap();
        assert_eq!(device.live_count(ResourceKind::Texture), textures);
        assert_eq!(device.live_count(ResourceKind::Framebuffer), 0);
    }

    #[test]
    fn identical_light_lists_share_a_set() {
        let retire = RetireQueue::new();
        let mut device = HeadlessDevice::new();
        let storage = SimpleStorage::new(&mut device).unwrap();
        let pipelines = CanvasPipelines::new(&mut device).unwrap();
        let buffer = device.buffer_create(BufferUsage::Uniform, &[0; 256]).unwrap();
        let mut lights = LightRegistry::new(&retire);
        let light = lights.create();
        let key = vec![(light, 0)];

        let a = lights
            .light_set(&mut device, &storage, pipelines.shader(), buffer, &key)
            .unwrap();
        let b = lights
            .light_set(&mut device, &storage, pipelines.shader(), buffer, &key)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(lights.sets_constructed(), 1);

        let rid = a.rid();
        drop(a);
        drop(b);
        lights.prune_sets();
        assert_eq!(lights.live_sets(), 0);
        assert!(device.uniform_set_is_valid(rid));
        retire.flush(&mut device);
        assert!(!device.uniform_set_is_valid(rid));
    }

    #[test]
    fn freeing_a_light_releases_its_shadow() {
        let retire = RetireQueue::new();
        let mut device = HeadlessDevice::new();
        let mut lights = LightRegistry::new(&retire);
        let light = lights.create();
        lights.set_use_shadow(&mut device, light, true, 128).unwrap();
        assert!(lights.free(&mut device, light));
        assert!(!lights.free(&mut device, light));
        assert_eq!(device.live_count(ResourceKind::Framebuffer), 0);
        assert!(!lights.set_use_shadow(&mut device, light, true, 128).unwrap());
    }
}
