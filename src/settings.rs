use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::device::DataFormat;
use crate::storage::{TextureFilter, TextureRepeat};

/// Hard ceiling on lights per item: the push constant packs 16 light indices.
pub const MAX_LIGHTS_PER_ITEM: u32 = 16;
/// Hard ceiling on lights per render: light indices are packed in 8 bits.
pub const MAX_LIGHTS_PER_RENDER: u32 = 256;
pub const MAX_RENDER_ITEMS: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSettings {
    #[serde(default = "CanvasSettings::default_max_lights_per_item")]
    pub max_lights_per_item: u32,
    #[serde(default = "CanvasSettings::default_max_lights_per_render")]
    pub max_lights_per_render: u32,
    #[serde(default = "CanvasSettings::default_max_render_items")]
    pub max_render_items: usize,
    #[serde(default = "CanvasSettings::default_texture_filter")]
    pub default_texture_filter: TextureFilter,
    #[serde(default = "CanvasSettings::default_texture_repeat")]
    pub default_texture_repeat: TextureRepeat,
    /// Color format of the render targets the canvas pipelines are built for.
    #[serde(default = "CanvasSettings::default_framebuffer_format")]
    pub framebuffer_format: DataFormat,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            max_lights_per_item: Self::default_max_lights_per_item(),
            max_lights_per_render: Self::default_max_lights_per_render(),
            max_render_items: Self::default_max_render_items(),
            default_texture_filter: Self::default_texture_filter(),
            default_texture_repeat: Self::default_texture_repeat(),
            framebuffer_format: Self::default_framebuffer_format(),
        }
    }
}

impl CanvasSettings {
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<CanvasSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded canvas settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default canvas settings.",
                        path, err
                    );
                    CanvasSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Canvas settings file {:?} not found. Using default settings.",
                    path
                );
                CanvasSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default canvas settings.",
                    path, err
                );
                CanvasSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.max_lights_per_item == 0 || self.max_lights_per_item > MAX_LIGHTS_PER_ITEM {
            warn!(
                "max_lights_per_item must be within 1..={}. Using {} instead.",
                MAX_LIGHTS_PER_ITEM,
                self.max_lights_per_item.clamp(1, MAX_LIGHTS_PER_ITEM)
            );
            self.max_lights_per_item = self.max_lights_per_item.clamp(1, MAX_LIGHTS_PER_ITEM);
        }

        if self.max_lights_per_render == 0 || self.max_lights_per_render > MAX_LIGHTS_PER_RENDER {
            warn!(
                "max_lights_per_render must be within 1..={}. Using {} instead.",
                MAX_LIGHTS_PER_RENDER,
                self.max_lights_per_render.clamp(1, MAX_LIGHTS_PER_RENDER)
            );
            self.max_lights_per_render =
                self.max_lights_per_render.clamp(1, MAX_LIGHTS_PER_RENDER);
        }

        if self.max_render_items == 0 {
            warn!("max_render_items must be greater than zero. Using default value.");
            self.max_render_items = Self::default_max_render_items();
        }

        if self.default_texture_filter == TextureFilter::Default {
            warn!("default_texture_filter cannot itself be 'default'. Using linear.");
            self.default_texture_filter = Self::default_texture_filter();
        }

        if self.default_texture_repeat == TextureRepeat::Default {
            warn!("default_texture_repeat cannot itself be 'default'. Using disabled.");
            self.default_texture_repeat = Self::default_texture_repeat();
        }

        if !self.framebuffer_format.is_color() {
            warn!(
                "Framebuffer format {:?} is not a color format. Using {:?}.",
                self.framebuffer_format,
                Self::default_framebuffer_format()
            );
            self.framebuffer_format = Self::default_framebuffer_format();
        }

        self
    }

    const fn default_max_lights_per_item() -> u32 {
        MAX_LIGHTS_PER_ITEM
    }

    const fn default_max_lights_per_render() -> u32 {
        MAX_LIGHTS_PER_RENDER
    }

    const fn default_max_render_items() -> usize {
        MAX_RENDER_ITEMS
    }

    const fn default_texture_filter() -> TextureFilter {
        TextureFilter::Linear
    }

    const fn default_texture_repeat() -> TextureRepeat {
        TextureRepeat::Disabled
    }

    const fn default_framebuffer_format() -> DataFormat {
        DataFormat::Rgba8Unorm
    }
}
