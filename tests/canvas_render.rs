use glam::{Affine2, Vec2};
use wgpu_canvas::canvas::{
    CanvasHandle, CanvasItem, ItemCommand, ItemFlags, Light2D, LightOccluder, MultiMeshCommand,
    MultiMeshSource, OccluderCullMode, PolygonCommand, PolygonDesc, PolygonPrimitive,
    PrimitiveCommand, PushConstant, RectCommand, TextureBindingId, TextureBindingKey,
};
use wgpu_canvas::device::headless::{RecordedDrawList, ResourceKind};
use wgpu_canvas::canvas::state::{LightUniform, SkeletonUniform, LIGHT_FLAGS_HAS_TEXTURE};
use wgpu_canvas::device::{BufferUsage, DataFormat, DrawCommand, HeadlessDevice, RenderingDevice};
use wgpu_canvas::storage::{RenderTargetId, TextureId};
use wgpu_canvas::{CanvasError, CanvasRenderer, CanvasSettings, Color, Rect2, SimpleStorage};

type Renderer = CanvasRenderer<HeadlessDevice, SimpleStorage>;

fn renderer_with(settings: CanvasSettings) -> Renderer {
    let mut device = HeadlessDevice::new();
    let storage = SimpleStorage::new(&mut device).expect("storage");
    CanvasRenderer::new(device, storage, settings).expect("renderer")
}

fn renderer() -> Renderer {
    renderer_with(CanvasSettings::default())
}

fn target(renderer: &mut Renderer) -> RenderTargetId {
    let (device, storage) = renderer.parts_mut();
    storage
        .render_target_create(device, 128, 128, DataFormat::Rgba8Unorm)
        .expect("render target")
}

fn texture(renderer: &mut Renderer) -> TextureId {
    let (device, storage) = renderer.parts_mut();
    storage
        .texture_create(device, 4, 4, &[255; 64])
        .expect("texture")
}

fn quad(rect: Rect2, texture: TextureBindingId) -> CanvasItem {
    CanvasItem::new(rect).with_command(ItemCommand::Rect(RectCommand::new(rect, texture)))
}

fn render(
    renderer: &mut Renderer,
    target: RenderTargetId,
    items: &mut [CanvasItem],
    lights: &[Light2D],
) -> RecordedDrawList {
    renderer
        .canvas_render_items(target, items, Color::WHITE, lights, &Affine2::IDENTITY)
        .expect("render");
    renderer
        .device_mut()
        .take_draw_lists()
        .pop()
        .expect("draw list")
}

fn push_constants(list: &RecordedDrawList) -> Vec<PushConstant> {
    list.draw_push_constants()
        .iter()
        .map(|bytes| bytemuck::pod_read_unaligned::<PushConstant>(bytes))
        .collect()
}

#[test]
fn identical_keys_share_one_binding() {
    let mut renderer = renderer();
    let texture = texture(&mut renderer);
    let key = TextureBindingKey {
        texture: Some(texture),
        ..Default::default()
    };
    let sets_before = renderer.device().stats().uniform_sets_created(0);

    let first = renderer.request_texture_binding(key).unwrap();
    let second = renderer.request_texture_binding(key).unwrap();

    assert_eq!(first, second);
    assert_eq!(renderer.texture_binding_refcount(first), Some(2));
    assert_eq!(renderer.device().stats().uniform_sets_created(0) - sets_before, 1);
}

#[test]
fn freed_binding_lives_until_update() {
    let mut renderer = renderer();
    let texture = texture(&mut renderer);
    let key = TextureBindingKey {
        texture: Some(texture),
        ..Default::default()
    };
    let id = renderer.request_texture_binding(key).unwrap();

    assert!(renderer.free_texture_binding(id));
    assert_eq!(renderer.texture_binding_refcount(id), Some(0));
    assert_eq!(renderer.stats().texture_bindings_pending_disposal, 1);

    // Re-requested before the frame boundary: same binding comes back.
    assert_eq!(renderer.request_texture_binding(key).unwrap(), id);
    assert!(renderer.free_texture_binding(id));

    let freed_before = renderer.device().stats().freed(ResourceKind::UniformSet);
    renderer.update();
    assert_eq!(renderer.texture_binding_refcount(id), None);
    assert_eq!(
        renderer.device().stats().freed(ResourceKind::UniformSet) - freed_before,
        1
    );

    let revived = renderer.request_texture_binding(key).unwrap();
    assert_ne!(revived, id);
}

#[test]
fn default_binding_cannot_be_freed() {
    let mut renderer = renderer();
    assert!(!renderer.free(CanvasHandle::TextureBinding(TextureBindingId::DEFAULT)));
    assert_eq!(
        renderer.texture_binding_refcount(TextureBindingId::DEFAULT),
        Some(1)
    );
}

#[test]
fn out_of_range_indices_allocate_nothing() {
    let mut renderer = renderer();
    let buffers_before = renderer.device().stats().created(ResourceKind::Buffer);
    let points = [Vec2::ZERO, Vec2::X, Vec2::Y];

    let result = renderer.request_polygon(&PolygonDesc {
        points: &points,
        indices: &[0, 1, 5],
        ..Default::default()
    });

    assert!(matches!(
        result,
        Err(CanvasError::IndexOutOfRange { value: 5, point_count: 3, .. })
    ));
    assert_eq!(
        renderer.device().stats().created(ResourceKind::Buffer),
        buffers_before
    );
    assert!(matches!(
        renderer.request_polygon(&PolygonDesc::default()),
        Err(CanvasError::EmptyPolygon)
    ));
}

#[test]
fn shadow_resize_keeps_a_single_map() {
    let mut renderer = renderer();
    let light = renderer.light_create();
    let textures = renderer.device().live_count(ResourceKind::Texture);

    assert!(renderer.light_set_use_shadow(light, true, 256).unwrap());
    assert!(renderer.light_set_use_shadow(light, true, 512).unwrap());
    assert_eq!(renderer.light_shadow_resolution(light), Some(512));
    // Distance texture plus depth attachment.
    assert_eq!(renderer.device().live_count(ResourceKind::Texture), textures + 2);

    assert!(renderer.light_set_use_shadow(light, false, 0).unwrap());
    assert_eq!(renderer.light_shadow_resolution(light), None);
    assert_eq!(renderer.device().live_count(ResourceKind::Texture), textures);

    assert!(matches!(
        renderer.light_set_use_shadow(light, true, 16),
        Err(CanvasError::ShadowResolution(16))
    ));
}

#[test]
fn two_quads_share_binding_and_light_set() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let texture = texture(&mut renderer);
    let texture_sets = renderer.device().stats().uniform_sets_created(0);
    let light_sets = renderer.device().stats().uniform_sets_created(2);

    let binding = renderer
        .request_texture_binding(TextureBindingKey {
            texture: Some(texture),
            ..Default::default()
        })
        .unwrap();
    let light_id = renderer.light_create();
    let light = Light2D::new(
        light_id,
        Affine2::from_translation(Vec2::new(32.0, 32.0)),
        Rect2::new(-100.0, -100.0, 200.0, 200.0),
    );

    let mut items = vec![
        quad(Rect2::new(0.0, 0.0, 16.0, 16.0), binding),
        quad(Rect2::new(20.0, 0.0, 16.0, 16.0), binding),
    ];
    let list = render(&mut renderer, target, &mut items, &[light]);

    let stats = renderer.device().stats();
    assert_eq!(stats.uniform_sets_created(0) - texture_sets, 1);
    assert_eq!(stats.uniform_sets_created(2) - light_sets, 1);
    assert_eq!(list.draw_count(), 2);
    assert_eq!(
        list.count(|c| matches!(c, DrawCommand::BindUniformSet { index: 0, .. })),
        1
    );

    let pushes = push_constants(&list);
    assert_eq!(pushes[0].data[8], 0.0);
    assert_eq!(pushes[1].data[8], 20.0);
    for push in &pushes {
        assert_eq!(push.item_flags().light_count(), 1);
        assert_eq!(push.lights[0] & 0xFF, 0);
    }
    assert!(items.iter().all(CanvasItem::has_light_cache));
}

#[test]
fn unchanged_lights_reuse_the_item_cache() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let light_id = renderer.light_create();
    let light = Light2D::new(light_id, Affine2::IDENTITY, Rect2::new(0.0, 0.0, 64.0, 64.0));
    let mut items = vec![quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT)];

    render(&mut renderer, target, &mut items, std::slice::from_ref(&light));
    let constructed = renderer.stats().light_sets_constructed;
    render(&mut renderer, target, &mut items, std::slice::from_ref(&light));
    assert_eq!(renderer.stats().light_sets_constructed, constructed);

    let texture = texture(&mut renderer);
    renderer.light_set_texture(light_id, Some(texture));
    render(&mut renderer, target, &mut items, std::slice::from_ref(&light));
    assert_eq!(renderer.stats().light_sets_constructed, constructed + 1);
}

#[test]
fn flags_word_carries_item_state() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let mut item = quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT);
    item.pixel_snap = true;
    item.light_mask = 0;
    let light_id = renderer.light_create();
    let light = Light2D::new(light_id, Affine2::IDENTITY, Rect2::new(0.0, 0.0, 64.0, 64.0));

    let list = render(&mut renderer, target, &mut [item], &[light]);
    let push = push_constants(&list)[0];
    let flags = push.item_flags();

    assert!(flags.contains(ItemFlags::PIXEL_SNAP));
    assert!(!flags.contains(ItemFlags::SKELETON));
    assert!(flags.contains(ItemFlags::DEFAULT_NORMAL_MAP_USED));
    assert_eq!(flags.light_count(), 0);
}

#[test]
fn pixel_snapped_item_under_three_lights() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let mut item = quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT);
    item.pixel_snap = true;
    let lights: Vec<_> = (0..3)
        .map(|_| {
            let id = renderer.light_create();
            Light2D::new(id, Affine2::IDENTITY, Rect2::new(0.0, 0.0, 64.0, 64.0))
        })
        .collect();

    let list = render(&mut renderer, target, &mut [item], &lights);
    let push = push_constants(&list)[0];
    let flags = push.item_flags();

    assert!(flags.contains(ItemFlags::PIXEL_SNAP));
    assert_ne!(push.flags & (1 << 14), 0);
    assert_eq!(flags.light_count(), 3);
    assert_eq!(push.lights[0] & 0xFF_FFFF, 0x02_0100);
}

#[test]
fn multimesh_sets_instancing_stride() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let item = CanvasItem::new(Rect2::new(0.0, 0.0, 8.0, 8.0)).with_command(ItemCommand::MultiMesh(
        MultiMeshCommand {
            source: MultiMeshSource::Quad(Rect2::new(0.0, 0.0, 4.0, 4.0)),
            instance_count: 10,
            has_colors: true,
            has_custom_data: false,
            from_particles: false,
            modulate: Color::WHITE,
            texture: TextureBindingId::DEFAULT,
        },
    ));

    let list = render(&mut renderer, target, &mut [item], &[]);
    let flags = push_constants(&list)[0].item_flags();

    assert!(flags.contains(ItemFlags::INSTANCING | ItemFlags::INSTANCING_HAS_COLORS));
    assert_eq!(flags.instancing_stride(), 3);
    assert_eq!(
        list.count(|c| matches!(c, DrawCommand::Draw { instances: 10, vertices: 6, .. })),
        1
    );
}

#[test]
fn primitive_quad_draws_two_triangles() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let points = vec![Vec2::ZERO, Vec2::new(8.0, 0.0), Vec2::new(8.0, 8.0), Vec2::new(0.0, 8.0)];
    let item = CanvasItem::new(Rect2::new(0.0, 0.0, 8.0, 8.0)).with_command(ItemCommand::Primitive(
        PrimitiveCommand {
            points,
            uvs: Vec::new(),
            colors: vec![Color::WHITE],
            texture: TextureBindingId::DEFAULT,
        },
    ));

    let list = render(&mut renderer, target, &mut [item], &[]);
    let pushes = push_constants(&list);

    assert_eq!(list.draw_count(), 2);
    // Second triangle is 0, 2, 3.
    assert_eq!(&pushes[1].data[2..6], &[8.0, 8.0, 0.0, 8.0]);
}

#[test]
fn freed_polygon_is_skipped() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let points = [Vec2::ZERO, Vec2::X, Vec2::Y];
    let polygon = renderer
        .request_polygon(&PolygonDesc {
            points: &points,
            ..Default::default()
        })
        .unwrap();
    assert!(renderer.free_polygon(polygon));

    let item = quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT).with_command(
        ItemCommand::Polygon(PolygonCommand {
            polygon,
            primitive: PolygonPrimitive::Triangles,
            modulate: Color::WHITE,
            texture: TextureBindingId::DEFAULT,
        }),
    );

    let list = render(&mut renderer, target, &mut [item], &[]);

    assert_eq!(list.draw_count(), 1);
    assert_eq!(renderer.stats().skipped_commands, 1);
    assert_eq!(renderer.stats().items_drawn, 1);
}

#[test]
fn polygon_draws_through_its_vertex_array() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let points = [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE];
    let polygon = renderer
        .request_polygon(&PolygonDesc {
            points: &points,
            indices: &[0, 1, 2, 1, 3, 2],
            ..Default::default()
        })
        .unwrap();
    let item = CanvasItem::new(Rect2::new(0.0, 0.0, 1.0, 1.0)).with_command(ItemCommand::Polygon(
        PolygonCommand {
            polygon,
            primitive: PolygonPrimitive::Triangles,
            modulate: Color::WHITE,
            texture: TextureBindingId::DEFAULT,
        },
    ));

    let list = render(&mut renderer, target, &mut [item], &[]);

    assert_eq!(list.count(|c| matches!(c, DrawCommand::BindVertexArray(_))), 1);
    assert_eq!(list.count(|c| matches!(c, DrawCommand::BindIndexArray(_))), 1);
    assert_eq!(
        list.count(|c| matches!(c, DrawCommand::Draw { use_indices: true, .. })),
        1
    );
}

#[test]
fn unindexed_polygon_draws_every_point() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let points = [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE, Vec2::new(2.0, 0.0)];
    let polygon = renderer
        .request_polygon(&PolygonDesc {
            points: &points,
            ..Default::default()
        })
        .unwrap();
    let item = CanvasItem::new(Rect2::new(0.0, 0.0, 2.0, 1.0)).with_command(ItemCommand::Polygon(
        PolygonCommand {
            polygon,
            primitive: PolygonPrimitive::Triangles,
            modulate: Color::WHITE,
            texture: TextureBindingId::DEFAULT,
        },
    ));

    let list = render(&mut renderer, target, &mut [item], &[]);

    assert_eq!(list.count(|c| matches!(c, DrawCommand::BindIndexArray(_))), 0);
    assert_eq!(
        list.count(|c| matches!(c, DrawCommand::Draw { use_indices: false, vertices: 5, .. })),
        1
    );
}

#[test]
fn stale_binding_is_rebuilt_with_defaults() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let texture = texture(&mut renderer);
    let binding = renderer
        .request_texture_binding(TextureBindingKey {
            texture: Some(texture),
            ..Default::default()
        })
        .unwrap();
    {
        let (device, storage) = renderer.parts_mut();
        assert!(storage.texture_free(device, texture));
    }
    let sets = renderer.device().stats().uniform_sets_created(0);

    let list = render(
        &mut renderer,
        target,
        &mut [quad(Rect2::new(0.0, 0.0, 8.0, 8.0), binding)],
        &[],
    );

    assert_eq!(list.draw_count(), 1);
    assert_eq!(renderer.device().stats().uniform_sets_created(0) - sets, 1);
}

#[test]
fn clip_rect_becomes_a_scissor() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let mut item = quad(Rect2::new(0.0, 0.0, 32.0, 32.0), TextureBindingId::DEFAULT)
        .with_command(ItemCommand::ClipIgnore(true))
        .with_command(ItemCommand::Rect(RectCommand::new(
            Rect2::new(0.0, 0.0, 64.0, 64.0),
            TextureBindingId::DEFAULT,
        )));
    item.clip = Some(Rect2::new(4.0, 4.0, 16.0, 16.0));

    renderer
        .canvas_render_items(
            target,
            &mut [item],
            Color::WHITE,
            &[],
            &Affine2::from_scale(Vec2::splat(2.0)),
        )
        .unwrap();
    let list = renderer.device_mut().take_draw_lists().pop().unwrap();

    let scissors: Vec<_> = list
        .commands
        .iter()
        .filter(|c| matches!(c, DrawCommand::EnableScissor(_) | DrawCommand::DisableScissor))
        .cloned()
        .collect();
    assert_eq!(
        scissors,
        vec![
            DrawCommand::EnableScissor(Rect2::new(8.0, 8.0, 32.0, 32.0)),
            DrawCommand::DisableScissor,
        ]
    );
    assert_eq!(list.draw_count(), 2);
}

#[test]
fn clear_request_is_consumed_once() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    renderer
        .storage_mut()
        .render_target_request_clear(target, Color::BLACK);

    let first = render(&mut renderer, target, &mut [], &[]);
    let second = render(&mut renderer, target, &mut [], &[]);

    assert_eq!(first.clear.map(|c| c.color), Some([0.0, 0.0, 0.0, 1.0]));
    assert_eq!(second.clear, None);
}

#[test]
fn unknown_target_is_an_error() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    {
        let (device, storage) = renderer.parts_mut();
        assert!(storage.render_target_free(device, target));
    }

    let result =
        renderer.canvas_render_items(target, &mut [], Color::WHITE, &[], &Affine2::IDENTITY);

    assert!(matches!(result, Err(CanvasError::InvalidRenderTarget)));
    assert!(renderer.device().draw_lists().is_empty());
}

#[test]
fn items_past_the_cap_are_dropped() {
    let mut renderer = renderer_with(CanvasSettings {
        max_render_items: 2,
        ..Default::default()
    });
    let target = target(&mut renderer);
    let mut items: Vec<_> = (0..3)
        .map(|i| quad(Rect2::new(i as f32, 0.0, 1.0, 1.0), TextureBindingId::DEFAULT))
        .collect();

    let list = render(&mut renderer, target, &mut items, &[]);

    assert_eq!(list.draw_count(), 2);
    assert_eq!(renderer.stats().items_drawn, 2);
}

#[test]
fn occluders_render_into_four_quadrants() {
    let mut renderer = renderer();
    let light = renderer.light_create();
    renderer.light_set_use_shadow(light, true, 256).unwrap();
    let occluder = renderer.occluder_polygon_create();
    let square = [
        Vec2::new(10.0, -5.0),
        Vec2::new(20.0, -5.0),
        Vec2::new(20.0, 5.0),
        Vec2::new(10.0, 5.0),
    ];
    assert!(renderer
        .occluder_polygon_set_shape_as_lines(occluder, &square)
        .unwrap());

    let occluders = [
        LightOccluder {
            id: occluder,
            xform: Affine2::IDENTITY,
            light_mask: 1,
        },
        LightOccluder {
            id: occluder,
            xform: Affine2::IDENTITY,
            light_mask: 2,
        },
    ];
    let draws = renderer
        .light_update_shadow(light, &Affine2::IDENTITY, 1, 0.1, 1000.0, &occluders)
        .unwrap();

    assert_eq!(draws, Some(4));
    let list = renderer.device_mut().take_draw_lists().pop().unwrap();
    assert_eq!(list.draw_count(), 4);
    assert_eq!(list.clear.map(|c| c.color[0]), Some(1000.0));

    let unshadowed = renderer.light_create();
    assert_eq!(
        renderer
            .light_update_shadow(unshadowed, &Affine2::IDENTITY, 1, 0.1, 1000.0, &occluders)
            .unwrap(),
        None
    );
}

#[test]
fn occluder_shape_and_cull_mode_are_kept() {
    let mut renderer = renderer();
    let occluder = renderer.occluder_polygon_create();
    assert_eq!(renderer.occluder_polygon(occluder).map(|o| o.point_count()), Some(0));

    renderer
        .occluder_polygon_set_shape_as_lines(occluder, &[Vec2::ZERO, Vec2::X, Vec2::ONE])
        .unwrap();
    assert!(renderer.occluder_polygon_set_cull_mode(occluder, OccluderCullMode::Clockwise));

    let polygon = renderer.occluder_polygon(occluder).unwrap();
    assert_eq!(polygon.point_count(), 3);
    assert_eq!(polygon.cull_mode(), OccluderCullMode::Clockwise);

    assert!(renderer.free(CanvasHandle::Occluder(occluder)));
    assert!(renderer.occluder_polygon(occluder).is_none());
    assert!(!renderer.occluder_polygon_set_cull_mode(occluder, OccluderCullMode::Disabled));
}

#[test]
fn released_item_sets_wait_for_update() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let skeleton = renderer
        .device_mut()
        .buffer_create(
            BufferUsage::Uniform,
            bytemuck::bytes_of(&SkeletonUniform::default()),
        )
        .unwrap();
    let mut item = quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT);
    item.skeleton = Some(skeleton);

    let item_sets = renderer.device().stats().uniform_sets_created(1);
    let list = render(&mut renderer, target, std::slice::from_mut(&mut item), &[]);
    assert!(push_constants(&list)[0].item_flags().contains(ItemFlags::SKELETON));
    render(&mut renderer, target, std::slice::from_mut(&mut item), &[]);
    assert_eq!(renderer.device().stats().uniform_sets_created(1) - item_sets, 1);

    let pending = renderer.stats().pending_retire;
    renderer.release_item(&mut item);
    assert_eq!(renderer.stats().pending_retire, pending + 1);

    let freed = renderer.device().stats().freed(ResourceKind::UniformSet);
    renderer.update();
    assert_eq!(renderer.stats().pending_retire, 0);
    assert!(renderer.device().stats().freed(ResourceKind::UniformSet) > freed);
}

#[test]
fn freeing_a_light_releases_its_shadow_map() {
    let mut renderer = renderer();
    let textures = renderer.device().live_count(ResourceKind::Texture);
    let light = renderer.light_create();
    renderer.light_set_use_shadow(light, true, 128).unwrap();

    assert!(renderer.free(CanvasHandle::Light(light)));
    assert!(!renderer.free(CanvasHandle::Light(light)));
    assert_eq!(renderer.device().live_count(ResourceKind::Texture), textures);
    assert_eq!(renderer.stats().lights, 0);
}

#[test]
fn textured_lights_are_not_limited_by_count() {
    let mut renderer = renderer();
    let target = target(&mut renderer);
    let texture = texture(&mut renderer);
    let ids: Vec<_> = (0..1100).map(|_| renderer.light_create()).collect();
    for id in &ids {
        assert!(renderer.light_set_texture(*id, Some(texture)));
    }
    let last = Light2D::new(ids[1099], Affine2::IDENTITY, Rect2::new(0.0, 0.0, 64.0, 64.0));
    let mut items = vec![quad(Rect2::new(0.0, 0.0, 8.0, 8.0), TextureBindingId::DEFAULT)];

    render(&mut renderer, target, &mut items, &[last]);

    let data = renderer
        .device()
        .buffer_data(renderer.lights_buffer())
        .expect("lights buffer");
    let uniform = bytemuck::pod_read_unaligned::<LightUniform>(&data[..std::mem::size_of::<LightUniform>()]);
    assert_ne!(uniform.flags & LIGHT_FLAGS_HAS_TEXTURE, 0);
}
