//! Records a few frames of lit canvas items on the headless device and logs
//! what was recorded. Pass a settings JSON path to override the defaults.

use glam::{Affine2, Vec2};
use wgpu_canvas::canvas::{
    CanvasItem, ItemCommand, Light2D, LightOccluder, NinePatchCommand, NinePatchMode,
    RectCommand, ShadowFilter, TextureBindingKey,
};
use wgpu_canvas::device::DataFormat;
use wgpu_canvas::{CanvasRenderer, CanvasSettings, Color, HeadlessDevice, Rect2, SimpleStorage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    wgpu_canvas::init_logging();

    let settings = match std::env::args().nth(1) {
        Some(path) => CanvasSettings::load_from_path(path),
        None => CanvasSettings::default(),
    };

    let mut device = HeadlessDevice::new();
    let storage = SimpleStorage::new(&mut device)?;
    let mut renderer = CanvasRenderer::new(device, storage, settings)?;

    let (target, checker) = {
        let (device, storage) = renderer.parts_mut();
        let target = storage.render_target_create(device, 320, 240, DataFormat::Rgba8Unorm)?;
        let pixels: Vec<u8> = (0..16)
            .flat_map(|i| if (i + i / 4) % 2 == 0 { [255; 4] } else { [40, 40, 40, 255] })
            .collect();
        (target, storage.texture_create(device, 4, 4, &pixels)?)
    };
    let binding = renderer.request_texture_binding(TextureBindingKey {
        texture: Some(checker),
        ..Default::default()
    })?;

    let light_id = renderer.light_create();
    renderer.light_set_use_shadow(light_id, true, 512)?;
    let mut light = Light2D::new(
        light_id,
        Affine2::from_translation(Vec2::new(160.0, 120.0)),
        Rect2::new(-200.0, -200.0, 400.0, 400.0),
    );
    light.color = Color::new(1.0, 0.9, 0.7, 1.0);
    light.shadow_enabled = true;
    light.shadow_filter = ShadowFilter::Pcf5;

    let occluder = renderer.occluder_polygon_create();
    renderer.occluder_polygon_set_shape_as_lines(
        occluder,
        &[
            Vec2::new(-10.0, -10.0),
            Vec2::new(10.0, -10.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(-10.0, 10.0),
        ],
    )?;

    let panel = Rect2::new(20.0, 20.0, 120.0, 80.0);
    let mut items: Vec<CanvasItem> = (0..4)
        .map(|i| {
            let rect = Rect2::new(40.0 + i as f32 * 60.0, 140.0, 48.0, 48.0);
            CanvasItem::new(rect).with_command(ItemCommand::Rect(RectCommand::new(rect, binding)))
        })
        .collect();
    items.push(CanvasItem::new(panel).with_command(ItemCommand::NinePatch(NinePatchCommand {
        rect: panel,
        source: None,
        margins: [1.0; 4],
        draw_center: true,
        axis_x: NinePatchMode::Tile,
        axis_y: NinePatchMode::Stretch,
        modulate: Color::WHITE,
        texture: binding,
    })));

    renderer
        .storage_mut()
        .render_target_request_clear(target, Color::new(0.1, 0.1, 0.15, 1.0));

    for frame in 0..3 {
        let occluders = [LightOccluder {
            id: occluder,
            xform: Affine2::from_translation(Vec2::new(200.0 + frame as f32 * 10.0, 120.0)),
            light_mask: 1,
        }];
        let shadow_draws = renderer
            .light_update_shadow(light_id, &light.xform, 1, 1.0, 1000.0, &occluders)?
            .unwrap_or(0);
        renderer.canvas_render_items(
            target,
            &mut items,
            Color::WHITE,
            std::slice::from_ref(&light),
            &Affine2::IDENTITY,
        )?;
        renderer.update();

        let stats = renderer.stats();
        log::info!(
            "frame {}: {} items, {} draws, {} shadow draws, {} light sets built",
            frame,
            stats.items_drawn,
            stats.draw_calls,
            shadow_draws,
            stats.light_sets_constructed
        );
    }

    let lists = renderer.device_mut().take_draw_lists();
    log::info!(
        "Recorded {} draw lists, {} commands in total",
        lists.len(),
        lists.iter().map(|l| l.commands.len()).sum::<usize>()
    );
    Ok(())
}
