use std::rc::Rc;

use glam::{Affine2, Vec2};

use crate::device::{
    BufferUsage, ClearValues, DrawListId, FramebufferFormatId, RenderingDevice, Rid, Uniform,
    VertexFormatId,
};
use crate::error::CanvasError;
use crate::math::{Color, Rect2};
use crate::settings::{CanvasSettings, MAX_LIGHTS_PER_RENDER};
use crate::storage::{RenderTargetId, TextureId, TextureStorage};

use super::item::{
    CanvasItem, ItemCommand, ItemStateData, MultiMeshCommand, MultiMeshSource, NinePatchCommand,
    PolygonPrimitive, PrimitiveCommand, RectCommand, RectFlags,
};
use super::lights::{Light2D, LightBlendMode, LightId, LightRegistry, LightSet, LightSetKey};
use super::pipeline::{
    CanvasPipelines, LightMode, PipelineKey, PipelineVariant, ITEM_SET, LIGHT_SET, TEXTURE_SET,
};
use super::polygons::{PolygonDesc, PolygonId, PolygonPool};
use super::push_constant::{ItemFlags, PushConstant};
use super::retire::{Retained, RetireQueue};
use super::shadows::{
    LightOccluder, OccluderCullMode, OccluderId, OccluderPolygon, ShadowRenderer,
};
use super::state::{LightParams, LightUniform, RenderStateUniform, SkeletonUniform};
use super::texture_bindings::{
    BindingContext, ResolvedBinding, TextureBindingCache, TextureBindingId, TextureBindingKey,
};

/// Any handle owned by the canvas renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanvasHandle {
    Light(LightId),
    Occluder(OccluderId),
    Polygon(PolygonId),
    TextureBinding(TextureBindingId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CanvasStats {
    pub texture_bindings: u32,
    pub texture_bindings_constructed: u32,
    pub texture_bindings_pending_disposal: u32,
    pub polygons: u32,
    pub lights: u32,
    pub shadowed_lights: u32,
    pub occluders: u32,
    pub light_sets: u32,
    pub light_sets_constructed: u32,
    pub pipelines: u32,
    pub pending_retire: u32,
    pub items_drawn: u32,
    pub draw_calls: u32,
    pub skipped_commands: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct FrameStats {
    items_drawn: u32,
    draw_calls: u32,
    skipped_commands: u32,
}

/// A light that received a render index this frame.
struct ActiveLight<'a> {
    light: &'a Light2D,
    render_index: u8,
    version: u64,
}

/// Bound state of the draw list being recorded.
struct DrawState {
    list: DrawListId,
    framebuffer_format: FramebufferFormatId,
    pipeline: Option<Rid>,
    texture_set: Option<Rid>,
    item_set: Option<Rid>,
    light_set: Option<Rid>,
    scissor: Option<Rect2>,
    canvas_transform: Affine2,
}

/// Per-item values shared by every command of the item.
struct ItemContext {
    flags: ItemFlags,
    light_mode: LightMode,
    light_indices: Vec<u8>,
    specular: Color,
    shininess: f32,
    modulate: Color,
}

pub struct CanvasRenderer<D: RenderingDevice, S: TextureStorage> {
    device: D,
    storage: S,
    settings: CanvasSettings,
    pipelines: CanvasPipelines,
    bindings: TextureBindingCache,
    polygons: PolygonPool,
    lights: LightRegistry,
    shadows: ShadowRenderer,
    retire: RetireQueue,
    state_buffer: Rid,
    lights_buffer: Rid,
    /// Render state plus an identity skeleton, shared by unskinned items.
    default_item_set: Rid,
    empty_light_set: Rc<LightSet>,
    warned_item_cap: bool,
    warned_light_cap: bool,
    frame: FrameStats,
}

impl<D: RenderingDevice, S: TextureStorage> CanvasRenderer<D, S> {
    /// Builds every pipeline for `settings.framebuffer_format` up front; a
    /// format the pipelines cannot target fails here rather than per draw.
    pub fn new(mut device: D, storage: S, settings: CanvasSettings) -> Result<Self, CanvasError> {
        let settings = settings.validate();
        let retire = RetireQueue::new();

        let mut pipelines = CanvasPipelines::new(&mut device)?;
        let polygons = PolygonPool::new(&mut device, &retire)?;
        pipelines.prewarm(&mut device, settings.framebuffer_format, polygons.default_format())?;

        let context = BindingContext {
            shader: pipelines.shader(),
            default_filter: settings.default_texture_filter,
            default_repeat: settings.default_texture_repeat,
        };
        let bindings = TextureBindingCache::new(&mut device, &storage, context)?;

        let state_buffer = device.buffer_create(
            BufferUsage::Uniform,
            &[0; std::mem::size_of::<RenderStateUniform>()],
        )?;
        let lights_buffer = device.buffer_create(
            BufferUsage::Uniform,
            &vec![0; MAX_LIGHTS_PER_RENDER as usize * std::mem::size_of::<LightUniform>()],
        )?;
        let default_skeleton = device.buffer_create(
            BufferUsage::Uniform,
            bytemuck::bytes_of(&SkeletonUniform::default()),
        )?;
        let default_item_set = device.uniform_set_create(
            &[
                Uniform::buffer(0, state_buffer),
                Uniform::buffer(1, default_skeleton),
            ],
            pipelines.shader(),
            ITEM_SET,
        )?;

        let mut lights = LightRegistry::new(&retire);
        let empty_light_set =
            lights.light_set(&mut device, &storage, pipelines.shader(), lights_buffer, &[])?;
        let shadows = ShadowRenderer::new(&mut device, &retire)?;

        log::info!(
            "Canvas renderer ready: {} pipelines, {} lights per item, {} lights per render",
            pipelines.len(),
            settings.max_lights_per_item,
            settings.max_lights_per_render
        );

        Ok(Self {
            device,
            storage,
            settings,
            pipelines,
            bindings,
            polygons,
            lights,
            shadows,
            retire,
            state_buffer,
            lights_buffer,
            default_item_set,
            empty_light_set,
            warned_item_cap: false,
            warned_light_cap: false,
            frame: FrameStats::default(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Device and storage together, for storage calls that allocate.
    pub fn parts_mut(&mut self) -> (&mut D, &mut S) {
        (&mut self.device, &mut self.storage)
    }

    /// Uniform buffer holding the lights of the last `canvas_render_items`.
    pub fn lights_buffer(&self) -> Rid {
        self.lights_buffer
    }

    pub fn settings(&self) -> &CanvasSettings {
        &self.settings
    }

    fn binding_context(&self) -> BindingContext {
        BindingContext {
            shader: self.pipelines.shader(),
            default_filter: self.settings.default_texture_filter,
            default_repeat: self.settings.default_texture_repeat,
        }
    }

    pub fn request_texture_binding(
        &mut self,
        key: TextureBindingKey,
    ) -> Result<TextureBindingId, CanvasError> {
        let context = self.binding_context();
        Ok(self
            .bindings
            .request(&mut self.device, &self.storage, context, key)?)
    }

    pub fn free_texture_binding(&mut self, id: TextureBindingId) -> bool {
        self.bindings.free(id)
    }

    pub fn texture_binding_refcount(&self, id: TextureBindingId) -> Option<u32> {
        self.bindings.refcount(id)
    }

    pub fn request_polygon(&mut self, desc: &PolygonDesc<'_>) -> Result<PolygonId, CanvasError> {
        self.polygons.request(&mut self.device, desc)
    }

    pub fn free_polygon(&mut self, id: PolygonId) -> bool {
        self.polygons.free(id)
    }

    pub fn light_create(&mut self) -> LightId {
        self.lights.create()
    }

    pub fn light_set_texture(
        &mut self,
        light: LightId,
        texture: Option<TextureId>,
    ) -> bool {
        self.lights.set_texture(light, texture)
    }

    pub fn light_set_use_shadow(
        &mut self,
        light: LightId,
        enable: bool,
        resolution: u32,
    ) -> Result<bool, CanvasError> {
        self.lights
            .set_use_shadow(&mut self.device, light, enable, resolution)
    }

    pub fn light_shadow_resolution(&self, light: LightId) -> Option<u32> {
        self.lights.get(light).and_then(|l| l.shadow_resolution())
    }

    /// Renders `occluders` into the light's shadow map. Returns the number of
    /// occluder draws, or `None` when the light is unknown or has no shadow.
    pub fn light_update_shadow(
        &mut self,
        light: LightId,
        light_xform: &Affine2,
        light_mask: u32,
        near: f32,
        far: f32,
        occluders: &[LightOccluder],
    ) -> Result<Option<usize>, CanvasError> {
        let Some(canvas_light) = self.lights.get(light) else {
            log::warn!("light_update_shadow on unknown light {:?}", light);
            return Ok(None);
        };
        let Some(shadow) = canvas_light.shadow() else {
            log::warn!("light_update_shadow on light {:?} without a shadow map", light);
            return Ok(None);
        };
        let draws = self.shadows.render(
            &mut self.device,
            shadow,
            light_xform,
            light_mask,
            near,
            far,
            occluders,
        )?;
        Ok(Some(draws))
    }

    pub fn occluder_polygon_create(&mut self) -> OccluderId {
        self.shadows.occluder_create()
    }

    pub fn occluder_polygon_set_shape_as_lines(
        &mut self,
        occluder: OccluderId,
        points: &[Vec2],
    ) -> Result<bool, CanvasError> {
        self.shadows
            .occluder_set_shape_as_lines(&mut self.device, occluder, points)
    }

    pub fn occluder_polygon(&self, occluder: OccluderId) -> Option<&OccluderPolygon> {
        self.shadows.occluder(occluder)
    }

    pub fn occluder_polygon_set_cull_mode(
        &mut self,
        occluder: OccluderId,
        mode: OccluderCullMode,
    ) -> bool {
        self.shadows.occluder_set_cull_mode(occluder, mode)
    }

    /// Destroys whatever `handle` names. Device resources still referenced
    /// by recorded draw lists survive until [`update`](Self::update).
    pub fn free(&mut self, handle: CanvasHandle) -> bool {
        match handle {
            CanvasHandle::Light(id) => self.lights.free(&mut self.device, id),
            CanvasHandle::Occluder(id) => self.shadows.occluder_free(id),
            CanvasHandle::Polygon(id) => self.polygons.free(id),
            CanvasHandle::TextureBinding(id) => self.bindings.free(id),
        }
    }

    /// Drops the renderer state cached on `item`. Its uniform sets are
    /// destroyed at the next [`update`](Self::update).
    pub fn release_item(&mut self, item: &mut CanvasItem) {
        item.state = ItemStateData::new();
        self.lights.prune_sets();
    }

    /// Frame boundary: destroys everything freed since the last call. Only
    /// call once the device has finished every previously recorded draw list.
    pub fn update(&mut self) {
        let disposed = self.bindings.dispose(&mut self.device);
        self.lights.prune_sets();
        let retired = self.retire.flush(&mut self.device);
        if disposed > 0 || retired > 0 {
            log::debug!(
                "Canvas update disposed {} texture bindings and {} retired resources",
                disposed,
                retired
            );
        }
    }

    pub fn stats(&self) -> CanvasStats {
        CanvasStats {
            texture_bindings: self.bindings.len() as u32,
            texture_bindings_constructed: self.bindings.constructed() as u32,
            texture_bindings_pending_disposal: self.bindings.pending_disposal() as u32,
            polygons: self.polygons.len() as u32,
            lights: self.lights.len() as u32,
            shadowed_lights: self.lights.shadowed() as u32,
            occluders: self.shadows.occluder_count() as u32,
            light_sets: self.lights.live_sets() as u32,
            light_sets_constructed: self.lights.sets_constructed() as u32,
            pipelines: self.pipelines.len() as u32,
            pending_retire: self.retire.len() as u32,
            items_drawn: self.frame.items_drawn,
            draw_calls: self.frame.draw_calls,
            skipped_commands: self.frame.skipped_commands,
        }
    }

    /// Records `items` back to front into `target`.
    ///
    /// Commands whose resources are gone are skipped; the rest of the list
    /// still renders. Only a missing target or a device failure around the
    /// draw list itself is reported as an error.
    pub fn canvas_render_items(
        &mut self,
        target: RenderTargetId,
        items: &mut [CanvasItem],
        modulate: Color,
        lights: &[Light2D],
        canvas_transform: &Affine2,
    ) -> Result<(), CanvasError> {
        let framebuffer = self
            .storage
            .render_target_framebuffer(target)
            .filter(|fb| self.device.is_valid(*fb))
            .ok_or(CanvasError::InvalidRenderTarget)?;
        let size = self
            .storage
            .render_target_size(target)
            .ok_or(CanvasError::InvalidRenderTarget)?;
        let framebuffer_format = self
            .device
            .framebuffer_format(framebuffer)
            .ok_or(CanvasError::InvalidRenderTarget)?;

        let state = RenderStateUniform::new(canvas_transform, size, modulate);
        self.device
            .buffer_update(self.state_buffer, 0, bytemuck::bytes_of(&state))?;

        let active = self.upload_lights(lights)?;

        let clear = self
            .storage
            .render_target_take_clear_request(target)
            .map(|color| ClearValues {
                color: color.to_array(),
                depth: 1.0,
            });
        let list = self.device.draw_list_begin(framebuffer, clear)?;
        let mut draw = DrawState {
            list,
            framebuffer_format,
            pipeline: None,
            texture_set: None,
            item_set: None,
            light_set: None,
            scissor: None,
            canvas_transform: *canvas_transform,
        };

        let max_items = self.settings.max_render_items;
        if items.len() > max_items && !self.warned_item_cap {
            log::warn!(
                "canvas_render_items got {} items; only the first {} are drawn",
                items.len(),
                max_items
            );
            self.warned_item_cap = true;
        }

        self.frame = FrameStats::default();
        for item in items.iter_mut().take(max_items) {
            self.render_item(&mut draw, item, &active);
        }

        self.device.draw_list_end(list)?;
        Ok(())
    }

    fn upload_lights<'a>(&mut self, lights: &'a [Light2D]) -> Result<Vec<ActiveLight<'a>>, CanvasError> {
        let cap = self.settings.max_lights_per_render as usize;
        let mut active = Vec::with_capacity(lights.len().min(cap));
        let mut uniforms = Vec::with_capacity(lights.len().min(cap));

        for light in lights {
            if uniforms.len() >= cap {
                if !self.warned_light_cap {
                    log::warn!(
                        "More than {} lights in one canvas render; the rest are ignored",
                        cap
                    );
                    self.warned_light_cap = true;
                }
                break;
            }
            let Some(canvas_light) = self.lights.get(light.id) else {
                log::warn!("Skipping unknown light {:?}", light.id);
                continue;
            };
            let shadow = canvas_light.shadow().filter(|_| light.shadow_enabled);
            uniforms.push(LightUniform::new(&LightParams {
                xform: light.xform,
                rect_position: light.rect.position,
                rect_size: light.rect.size,
                color: light.color,
                energy: light.energy,
                shadow_color: light.shadow_color,
                height: light.height,
                textured: canvas_light.texture().is_some(),
                blend_mode: light.mode as u32,
                shadow_filter: shadow.map(|_| light.shadow_filter as u32),
                shadow_resolution: shadow.map_or(0, |s| s.resolution()),
            }));
            active.push(ActiveLight {
                light,
                render_index: (uniforms.len() - 1) as u8,
                version: canvas_light.version(),
            });
        }

        if !uniforms.is_empty() {
            self.device
                .buffer_update(self.lights_buffer, 0, bytemuck::cast_slice(&uniforms))?;
        }
        Ok(active)
    }

    fn render_item(&mut self, draw: &mut DrawState, item: &mut CanvasItem, active: &[ActiveLight<'_>]) {
        let global_rect = item.global_rect();
        let mut key: LightSetKey = Vec::new();
        let mut light_indices = Vec::new();
        let mut uses_mask = false;
        for entry in active {
            if key.len() >= self.settings.max_lights_per_item as usize {
                break;
            }
            let light = entry.light;
            if item.light_mask & light.item_mask == 0
                || item.z_index < light.z_range.0
                || item.z_index > light.z_range.1
                || !global_rect.intersects_transformed(&light.xform, &light.rect)
            {
                continue;
            }
            key.push((light.id, entry.version));
            light_indices.push(entry.render_index);
            uses_mask |= light.mode == LightBlendMode::Mask;
        }

        let Some(light_set) = self.item_light_set(&mut item.state, key) else {
            return;
        };
        let Some(item_set) = self.item_state_set(&mut item.state, item.skeleton) else {
            return;
        };
        if draw.item_set != Some(item_set) {
            self.device
                .draw_list_bind_uniform_set(draw.list, item_set, ITEM_SET);
            draw.item_set = Some(item_set);
        }
        if draw.light_set != Some(light_set) {
            self.device
                .draw_list_bind_uniform_set(draw.list, light_set, LIGHT_SET);
            draw.light_set = Some(light_set);
        }

        let mut flags = ItemFlags::empty().with_light_count(light_indices.len() as u32);
        flags.set(ItemFlags::PIXEL_SNAP, item.pixel_snap);
        flags.set(ItemFlags::SKELETON, item.skeleton.is_some());
        flags.set(ItemFlags::USING_LIGHT_MASK, uses_mask);
        let context = ItemContext {
            flags,
            light_mode: if light_indices.is_empty() {
                LightMode::Unlit
            } else {
                LightMode::Lit
            },
            light_indices,
            specular: item.specular,
            shininess: item.shininess,
            modulate: item.modulate,
        };

        let item_clip = item.clip.map(|clip| transformed_bounds(&draw.canvas_transform, &clip));
        self.set_scissor(draw, item_clip);

        let mut world = item.xform;
        for command in &item.commands {
            let drawn = match command {
                ItemCommand::Transform(xform) => {
                    world = item.xform * *xform;
                    continue;
                }
                ItemCommand::ClipIgnore(ignore) => {
                    self.set_scissor(draw, if *ignore { None } else { item_clip });
                    continue;
                }
                ItemCommand::Rect(rect) => self.draw_rect(draw, &context, &world, rect),
                ItemCommand::NinePatch(patch) => self.draw_ninepatch(draw, &context, &world, patch),
                ItemCommand::Polygon(polygon) => self.draw_polygon(
                    draw,
                    &context,
                    &world,
                    polygon.polygon,
                    polygon.primitive,
                    polygon.modulate,
                    polygon.texture,
                    1,
                    ItemFlags::empty(),
                ),
                ItemCommand::Primitive(primitive) => {
                    self.draw_primitive(draw, &context, &world, primitive)
                }
                ItemCommand::MultiMesh(multimesh) => {
                    self.draw_multimesh(draw, &context, &world, multimesh)
                }
            };
            if !drawn {
                self.frame.skipped_commands += 1;
            }
        }
        self.frame.items_drawn += 1;
    }

    /// Rebuilds the item's light association only when its light list or a
    /// light version changed, or the device dropped the shared set.
    fn item_light_set(&mut self, state: &mut ItemStateData, key: LightSetKey) -> Option<Rid> {
        let valid = state
            .light_set
            .as_ref()
            .is_some_and(|set| self.device.uniform_set_is_valid(set.rid()));
        if valid && state.light_count != u32::MAX && state.lights == key {
            return state.light_set.as_ref().map(|set| set.rid());
        }

        let set = if key.is_empty() && self.device.uniform_set_is_valid(self.empty_light_set.rid()) {
            Rc::clone(&self.empty_light_set)
        } else {
            match self.lights.light_set(
                &mut self.device,
                &self.storage,
                self.pipelines.shader(),
                self.lights_buffer,
                &key,
            ) {
                Ok(set) => set,
                Err(err) => {
                    log::error!("Failed to build light set, skipping item: {}", err);
                    return None;
                }
            }
        };
        let rid = set.rid();
        state.light_count = key.len() as u32;
        state.lights = key;
        state.light_set = Some(set);
        Some(rid)
    }

    fn item_state_set(&mut self, state: &mut ItemStateData, skeleton: Option<Rid>) -> Option<Rid> {
        let Some(skeleton) = skeleton else {
            state.state_set = None;
            state.skeleton = None;
            return Some(self.default_item_set);
        };

        if state.skeleton == Some(skeleton) {
            if let Some(set) = &state.state_set {
                if self.device.uniform_set_is_valid(set.rid()) {
                    return Some(set.rid());
                }
            }
        }

        state.state_set = None;
        match self.device.uniform_set_create(
            &[
                Uniform::buffer(0, self.state_buffer),
                Uniform::buffer(1, skeleton),
            ],
            self.pipelines.shader(),
            ITEM_SET,
        ) {
            Ok(rid) => {
                state.state_set = Some(Retained::new(rid, &self.retire));
                state.skeleton = Some(skeleton);
                Some(rid)
            }
            Err(err) => {
                log::error!("Failed to build skeleton set, skipping item: {}", err);
                None
            }
        }
    }

    fn set_scissor(&mut self, draw: &mut DrawState, clip: Option<Rect2>) {
        if draw.scissor == clip {
            return;
        }
        match clip {
            Some(rect) => self.device.draw_list_enable_scissor(draw.list, rect),
            None => self.device.draw_list_disable_scissor(draw.list),
        }
        draw.scissor = clip;
    }

    fn bind_texture(&mut self, draw: &mut DrawState, id: TextureBindingId) -> Option<ResolvedBinding> {
        let context = self.binding_context();
        let Some(resolved) = self
            .bindings
            .resolve(&mut self.device, &self.storage, context, id)
        else {
            log::warn!("Skipping command with unknown texture binding {:?}", id);
            return None;
        };
        if draw.texture_set != Some(resolved.uniform_set) {
            self.device
                .draw_list_bind_uniform_set(draw.list, resolved.uniform_set, TEXTURE_SET);
            draw.texture_set = Some(resolved.uniform_set);
        }
        Some(resolved)
    }

    fn bind_pipeline(
        &mut self,
        draw: &mut DrawState,
        variant: PipelineVariant,
        light_mode: LightMode,
        vertex_format: Option<VertexFormatId>,
    ) -> bool {
        let key = PipelineKey {
            variant,
            light_mode,
            vertex_format,
            framebuffer_format: draw.framebuffer_format,
        };
        let Some(pipeline) = self.pipelines.get(&mut self.device, key) else {
            return false;
        };
        if draw.pipeline != Some(pipeline) {
            self.device.draw_list_bind_render_pipeline(draw.list, pipeline);
            draw.pipeline = Some(pipeline);
        }
        true
    }

    fn push_constant(context: &ItemContext, world: &Affine2, binding: &ResolvedBinding, flags: ItemFlags) -> PushConstant {
        let mut push = PushConstant::new(world, context.flags | binding.flags | flags);
        push.set_specular(context.specular, context.shininess);
        push.set_lights(&context.light_indices);
        push.color_texture_pixel_size = binding.texture_pixel_size.to_array();
        push
    }

    fn submit(&mut self, draw: &DrawState, push: &PushConstant, use_indices: bool, instances: u32, vertices: u32) {
        self.device.draw_list_set_push_constant(draw.list, push.as_bytes());
        self.device
            .draw_list_draw(draw.list, use_indices, instances, vertices);
        self.frame.draw_calls += 1;
    }

    fn draw_rect(&mut self, draw: &mut DrawState, context: &ItemContext, world: &Affine2, rect: &RectCommand) -> bool {
        let Some(binding) = self.bind_texture(draw, rect.texture) else {
            return false;
        };
        if !self.bind_pipeline(draw, PipelineVariant::Quad, context.light_mode, None) {
            return false;
        }

        let mut src = source_uv(rect.source, binding.texture_pixel_size);
        let mut flags = ItemFlags::empty();
        if rect.flags.contains(RectFlags::FLIP_H) {
            src.position.x += src.size.x;
            src.size.x = -src.size.x;
        }
        if rect.flags.contains(RectFlags::FLIP_V) {
            src.position.y += src.size.y;
            src.size.y = -src.size.y;
        }
        flags.set(ItemFlags::TRANSPOSE_RECT, rect.flags.contains(RectFlags::TRANSPOSE));
        flags.set(ItemFlags::CLIP_RECT_UV, rect.flags.contains(RectFlags::CLIP_UV));

        let mut push = Self::push_constant(context, world, &binding, flags);
        push.set_rect(context.modulate * rect.modulate, [0.0; 4], rect.rect.abs(), src);
        self.submit(draw, &push, false, 1, 6);
        true
    }

    fn draw_ninepatch(
        &mut self,
        draw: &mut DrawState,
        context: &ItemContext,
        world: &Affine2,
        patch: &NinePatchCommand,
    ) -> bool {
        let Some(binding) = self.bind_texture(draw, patch.texture) else {
            return false;
        };
        if !self.bind_pipeline(draw, PipelineVariant::NinePatch, context.light_mode, None) {
            return false;
        }

        let mut flags = ItemFlags::empty().with_ninepatch_modes(patch.axis_x, patch.axis_y);
        flags.set(ItemFlags::NINEPATCH_DRAW_CENTER, patch.draw_center);
        let src = source_uv(patch.source, binding.texture_pixel_size);

        let mut push = Self::push_constant(context, world, &binding, flags);
        push.set_rect(context.modulate * patch.modulate, patch.margins, patch.rect.abs(), src);
        self.submit(draw, &push, false, 1, 6);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_polygon(
        &mut self,
        draw: &mut DrawState,
        context: &ItemContext,
        world: &Affine2,
        polygon: PolygonId,
        primitive: PolygonPrimitive,
        modulate: Color,
        texture: TextureBindingId,
        instances: u32,
        flags: ItemFlags,
    ) -> bool {
        let Some((vertex_format, vertex_array, vertex_count, index_array)) = self
            .polygons
            .get(polygon)
            .map(|p| (p.vertex_format, p.vertex_array, p.vertex_count, p.index_array))
        else {
            log::warn!("Skipping command with freed polygon {:?}", polygon);
            return false;
        };
        let Some(binding) = self.bind_texture(draw, texture) else {
            return false;
        };
        if !self.bind_pipeline(draw, primitive.variant(), context.light_mode, Some(vertex_format)) {
            return false;
        }

        self.device.draw_list_bind_vertex_array(draw.list, vertex_array);
        if let Some(index_array) = index_array {
            self.device.draw_list_bind_index_array(draw.list, index_array);
        }
        let mut push = Self::push_constant(context, world, &binding, flags);
        push.set_rect(context.modulate * modulate, [0.0; 4], Rect2::default(), Rect2::default());
        let vertices = if index_array.is_some() { 0 } else { vertex_count };
        self.submit(draw, &push, index_array.is_some(), instances, vertices);
        true
    }

    fn draw_primitive(
        &mut self,
        draw: &mut DrawState,
        context: &ItemContext,
        world: &Affine2,
        primitive: &PrimitiveCommand,
    ) -> bool {
        let Some(variant) = primitive.variant() else {
            log::warn!(
                "Skipping primitive with {} points; 1 to 4 are supported",
                primitive.points.len()
            );
            return false;
        };
        let Some(binding) = self.bind_texture(draw, primitive.texture) else {
            return false;
        };
        if !self.bind_pipeline(draw, variant, context.light_mode, None) {
            return false;
        }

        let count = primitive.points.len();
        let triangles: &[[usize; 3]] = match count {
            1 => &[[0, 0, 0]],
            2 => &[[0, 1, 1]],
            3 => &[[0, 1, 2]],
            _ => &[[0, 1, 2], [0, 2, 3]],
        };
        for triangle in triangles {
            let mut push = Self::push_constant(context, world, &binding, ItemFlags::empty());
            push.set_primitive(
                triangle.map(|i| primitive.points[i]),
                triangle.map(|i| primitive.uv(i)),
                triangle.map(|i| context.modulate * primitive.color(i)),
            );
            self.submit(draw, &push, false, 1, count.min(3) as u32);
        }
        true
    }

    fn draw_multimesh(
        &mut self,
        draw: &mut DrawState,
        context: &ItemContext,
        world: &Affine2,
        multimesh: &MultiMeshCommand,
    ) -> bool {
        if multimesh.instance_count == 0 {
            return true;
        }
        let mut flags = (ItemFlags::INSTANCING).with_instancing_stride(multimesh.stride());
        flags.set(ItemFlags::INSTANCING_HAS_COLORS, multimesh.has_colors);
        flags.set(ItemFlags::INSTANCING_HAS_CUSTOM_DATA, multimesh.has_custom_data);
        flags.set(ItemFlags::USING_PARTICLES, multimesh.from_particles);

        match multimesh.source {
            MultiMeshSource::Polygon(polygon, primitive) => self.draw_polygon(
                draw,
                context,
                world,
                polygon,
                primitive,
                multimesh.modulate,
                multimesh.texture,
                multimesh.instance_count,
                flags,
            ),
            MultiMeshSource::Quad(rect) => {
                let Some(binding) = self.bind_texture(draw, multimesh.texture) else {
                    return false;
                };
                if !self.bind_pipeline(draw, PipelineVariant::Quad, context.light_mode, None) {
                    return false;
                }
                let mut push = Self::push_constant(context, world, &binding, flags);
                push.set_rect(
                    context.modulate * multimesh.modulate,
                    [0.0; 4],
                    rect.abs(),
                    Rect2::new(0.0, 0.0, 1.0, 1.0),
                );
                self.submit(draw, &push, false, multimesh.instance_count, 6);
                true
            }
        }
    }
}

/// Source region in UV space; the whole texture when unset.
fn source_uv(source: Option<Rect2>, texture_pixel_size: Vec2) -> Rect2 {
    match source {
        Some(region) => Rect2 {
            position: region.position * texture_pixel_size,
            size: region.size * texture_pixel_size,
        },
        None => Rect2::new(0.0, 0.0, 1.0, 1.0),
    }
}

fn transformed_bounds(xform: &Affine2, rect: &Rect2) -> Rect2 {
    let corners = rect.abs().corners().map(|c| xform.transform_point2(c));
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
