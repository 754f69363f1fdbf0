use thiserror::Error;

use crate::device::Rid;

/// Failures reported by a [`RenderingDevice`](crate::device::RenderingDevice).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device refused to allocate {what}")]
    OutOfMemory { what: &'static str },

    #[error("invalid device handle {0:?}")]
    InvalidHandle(Rid),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("no draw list is open")]
    NoDrawList,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors returned by the canvas renderer's public operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CanvasError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("polygon index {index} references point {value}, but only {point_count} points were given")]
    IndexOutOfRange {
        index: usize,
        value: u32,
        point_count: usize,
    },

    #[error("polygon has no points")]
    EmptyPolygon,

    #[error("pipeline variant {variant} is unsupported for the configured framebuffer: {reason}")]
    PipelineUnsupported {
        variant: &'static str,
        reason: String,
    },

    #[error("shadow resolution {0} is below the minimum of 64")]
    ShadowResolution(u32),

    #[error("unknown render target")]
    InvalidRenderTarget,

    #[error("occluder with {segments} segments exceeds the 16-bit index range")]
    OccluderTooLarge { segments: usize },
}

pub type Result<T, E = CanvasError> = std::result::Result<T, E>;
