pub mod canvas;
pub mod device;
pub mod error;
pub mod handle;
pub mod math;
pub mod settings;
pub mod storage;

pub use canvas::{CanvasHandle, CanvasItem, CanvasRenderer, CanvasStats, ItemCommand, Light2D};
pub use device::{GpuDevice, HeadlessDevice, RenderingDevice, Rid};
pub use error::{CanvasError, DeviceError, Result};
pub use math::{Color, Rect2};
pub use settings::CanvasSettings;
pub use storage::{SimpleStorage, TextureStorage};

/// Installs `env_logger` at `info`, unless `RUST_LOG` says otherwise.
/// Calling it twice is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
