//! Deduplicated texture descriptor sets.
//!
//! Each distinct combination of color texture, normal map, specular map,
//! skin or instance buffer and sampler state maps to one uniform set. Bindings
//! are reference counted; a binding whose count drops to zero is queued and
//! only destroyed by [`TextureBindingCache::dispose`], because draw lists that
//! were already submitted may still reference its set.

use std::collections::HashMap;

use glam::Vec2;

use crate::device::{RenderingDevice, Rid, Uniform};
use crate::error::DeviceError;
use crate::storage::{
    DefaultTexture, InstanceBufferId, TextureFilter, TextureId, TextureRepeat, TextureStorage,
};

use super::pipeline::TEXTURE_SET;
use super::push_constant::ItemFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureBindingId(u64);

impl TextureBindingId {
    /// Binding with every slot empty. Always present.
    pub const DEFAULT: TextureBindingId = TextureBindingId(1);

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for TextureBindingId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureBindingKey {
    pub texture: Option<TextureId>,
    pub normal_map: Option<TextureId>,
    pub specular: Option<TextureId>,
    /// Skinning or multimesh instance data.
    pub skin_buffer: Option<InstanceBufferId>,
    pub filter: TextureFilter,
    pub repeat: TextureRepeat,
}

/// Shader, sampler defaults and set layout the cache builds against.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BindingContext {
    pub shader: Rid,
    pub default_filter: TextureFilter,
    pub default_repeat: TextureRepeat,
}

/// What a draw needs from a binding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ResolvedBinding {
    pub uniform_set: Rid,
    pub texture_pixel_size: Vec2,
    pub flags: ItemFlags,
}

struct TextureBinding {
    key: TextureBindingKey,
    refcount: u32,
    resolved: ResolvedBinding,
}

pub(crate) struct TextureBindingCache {
    bindings: HashMap<TextureBindingId, TextureBinding>,
    by_key: HashMap<TextureBindingKey, TextureBindingId>,
    to_dispose: Vec<TextureBindingId>,
    next_id: u64,
    constructed: usize,
}

impl TextureBindingCache {
    pub(crate) fn new<D: RenderingDevice, S: TextureStorage>(
        device: &mut D,
        storage: &S,
        context: BindingContext,
    ) -> Result<Self, DeviceError> {
        let mut cache = Self {
            bindings: HashMap::new(),
            by_key: HashMap::new(),
            to_dispose: Vec::new(),
            next_id: TextureBindingId::DEFAULT.0,
            constructed: 0,
        };
        let id = cache.request(device, storage, context, TextureBindingKey::default())?;
        debug_assert_eq!(id, TextureBindingId::DEFAULT);
        Ok(cache)
    }

    pub(crate) fn request<D: RenderingDevice, S: TextureStorage>(
        &mut self,
        device: &mut D,
        storage: &S,
        context: BindingContext,
        key: TextureBindingKey,
    ) -> Result<TextureBindingId, DeviceError> {
        if let Some(id) = self.by_key.get(&key).copied() {
            if let Some(binding) = self.bindings.get_mut(&id) {
                if binding.refcount == 0 {
                    self.to_dispose.retain(|queued| *queued != id);
                    log::debug!("Revived texture binding {:?} before disposal", id);
                }
                binding.refcount += 1;
                return Ok(id);
            }
        }

        let resolved = self.build(device, storage, context, &key)?;
        let id = TextureBindingId(self.next_id);
        self.next_id += 1;
        self.bindings.insert(
            id,
            TextureBinding {
                key,
                refcount: 1,
                resolved,
            },
        );
        self.by_key.insert(key, id);
        log::debug!("Created texture binding {:?} for {:?}", id, key);
        Ok(id)
    }

    pub(crate) fn free(&mut self, id: TextureBindingId) -> bool {
        let Some(binding) = self.bindings.get_mut(&id) else {
            log::warn!("Attempted to free unknown texture binding {:?}", id);
            return false;
        };
        if binding.refcount == 0 {
            log::warn!("Texture binding {:?} is already queued for disposal", id);
            return false;
        }
        // The cache holds one reference to the default binding itself.
        if id == TextureBindingId::DEFAULT && binding.refcount == 1 {
            log::warn!("Attempted to free the default texture binding");
            return false;
        }
        binding.refcount -= 1;
        if binding.refcount == 0 {
            self.to_dispose.push(id);
        }
        true
    }

    /// Destroys every binding whose count reached zero. Returns how many.
    pub(crate) fn dispose<D: RenderingDevice>(&mut self, device: &mut D) -> usize {
        let disposed = self.to_dispose.len();
        for id in self.to_dispose.drain(..) {
            if let Some(binding) = self.bindings.remove(&id) {
                self.by_key.remove(&binding.key);
                device.free(binding.resolved.uniform_set);
                log::debug!("Disposed texture binding {:?}", id);
            }
        }
        disposed
    }

    /// Returns the binding's set, rebuilding it with default substitutes when
    /// the device has invalidated it.
    pub(crate) fn resolve<D: RenderingDevice, S: TextureStorage>(
        &mut self,
        device: &mut D,
        storage: &S,
        context: BindingContext,
        id: TextureBindingId,
    ) -> Option<ResolvedBinding> {
        let (key, resolved) = {
            let binding = self.bindings.get(&id)?;
            (binding.key, binding.resolved)
        };
        if device.uniform_set_is_valid(resolved.uniform_set) {
            return Some(resolved);
        }

        log::debug!("Texture binding {:?} lost its uniform set, rebuilding", id);
        match self.build(device, storage, context, &key) {
            Ok(rebuilt) => {
                if let Some(binding) = self.bindings.get_mut(&id) {
                    binding.resolved = rebuilt;
                }
                Some(rebuilt)
            }
            Err(err) => {
                log::error!("Failed to rebuild texture binding {:?}: {}", id, err);
                None
            }
        }
    }

    pub(crate) fn refcount(&self, id: TextureBindingId) -> Option<u32> {
        self.bindings.get(&id).map(|b| b.refcount)
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn pending_disposal(&self) -> usize {
        self.to_dispose.len()
    }

    /// Uniform sets built so far, including rebuilds.
    pub(crate) fn constructed(&self) -> usize {
        self.constructed
    }

    fn build<D: RenderingDevice, S: TextureStorage>(
        &mut self,
        device: &mut D,
        storage: &S,
        context: BindingContext,
        key: &TextureBindingKey,
    ) -> Result<ResolvedBinding, DeviceError> {
        let live = |texture: Option<TextureId>| {
            texture
                .and_then(|t| storage.texture_rd(t))
                .filter(|rid| device.is_valid(*rid))
        };

        let color = live(key.texture).unwrap_or_else(|| storage.default_texture(DefaultTexture::White));
        let mut flags = ItemFlags::empty();
        let normal = live(key.normal_map).unwrap_or_else(|| {
            flags |= ItemFlags::DEFAULT_NORMAL_MAP_USED;
            storage.default_texture(DefaultTexture::Normal)
        });
        let specular = live(key.specular).unwrap_or_else(|| {
            flags |= ItemFlags::DEFAULT_SPECULAR_MAP_USED;
            storage.default_texture(DefaultTexture::White)
        });
        let skin_buffer = key
            .skin_buffer
            .and_then(|b| storage.instance_buffer_rd(b))
            .filter(|rid| device.is_valid(*rid))
            .unwrap_or_else(|| storage.default_instance_buffer());

        let filter = key.filter.resolve(context.default_filter);
        let repeat = key.repeat.resolve(context.default_repeat);
        let sampler = storage.sampler(filter, repeat).ok_or_else(|| {
            DeviceError::InvalidDescriptor(format!("no sampler for {:?}/{:?}", filter, repeat))
        })?;

        let texture_pixel_size = device
            .texture_size(color)
            .map(|(w, h)| Vec2::new(1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32))
            .unwrap_or(Vec2::ONE);

        let uniform_set = device.uniform_set_create(
            &[
                Uniform::texture(0, color),
                Uniform::texture(1, normal),
                Uniform::texture(2, specular),
                Uniform::sampler(3, sampler),
                Uniform::buffer(4, skin_buffer),
            ],
            context.shader,
            TEXTURE_SET,
        )?;
        self.constructed += 1;

        Ok(ResolvedBinding {
            uniform_set,
            texture_pixel_size,
            flags,
        })
    }
}
