//! The canvas item renderer and the caches it draws through.

pub mod item;
pub mod lights;
pub mod pipeline;
pub mod polygons;
pub mod push_constant;
mod renderer;
mod retire;
pub mod shadows;
pub mod state;
pub mod texture_bindings;

pub use item::{
    CanvasItem, ItemCommand, MultiMeshCommand, MultiMeshSource, NinePatchCommand, PolygonCommand,
    PolygonPrimitive, PrimitiveCommand, RectCommand, RectFlags,
};
pub use lights::{Light2D, LightBlendMode, LightId, ShadowFilter};
pub use pipeline::{LightMode, PipelineVariant};
pub use polygons::{PolygonDesc, PolygonId};
pub use push_constant::{ItemFlags, NinePatchMode, PushConstant};
pub use renderer::{CanvasHandle, CanvasRenderer, CanvasStats};
pub use shadows::{LightOccluder, OccluderCullMode, OccluderId};
pub use texture_bindings::{TextureBindingId, TextureBindingKey};
