//! Error types for the hider core
//!
//! Configuration and resource failures are fatal and abort the frame.
//! Per-primitive failures are not errors at this level: they are logged and
//! the primitive is dropped.

use std::collections::TryReserveError;

/// Invalid option values, detected before any region is prepared.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("resolution must be non-zero, got {width}x{height}")]
    ZeroResolution { width: u32, height: u32 },

    #[error("region size must be non-zero, got {width}x{height}")]
    InvalidRegionSize { width: u32, height: u32 },

    #[error("pixel samples must be in 1..=64 per axis, got {x}x{y}")]
    InvalidSampleCount { x: u32, y: u32 },

    #[error("filter width must be finite and positive, got {x}x{y}")]
    InvalidFilterWidth { x: f32, y: f32 },

    #[error("unknown filter type '{0}'")]
    UnknownFilter(String),

    #[error("unknown depth filter '{0}'")]
    UnknownDepthFilter(String),

    #[error("unknown region scan order '{0}'")]
    UnknownScanOrder(String),

    #[error("output channel '{0}' has zero components")]
    ZeroChannels(String),

    #[error("output channel name '{0}' is empty or declared twice")]
    DuplicateChannel(String),

    #[error("crop window [{0}, {1}] x [{2}, {3}] covers no pixels")]
    EmptyCropWindow(f32, f32, f32, f32),

    #[error("shutter close {close} precedes open {open}")]
    InvalidShutter { open: f32, close: f32 },

    #[error("clipping planes must satisfy 0 < near < far, got near {near} far {far}")]
    InvalidClipping { near: f32, far: f32 },

    #[error("exposure gain and gamma must be positive, got gain {gain} gamma {gamma}")]
    InvalidExposure { gain: f32, gamma: f32 },

    #[error("depth of field requires a positive focal distance, got {0}")]
    InvalidFocalDistance(f32),
}

/// Fatal failures of a frame render.
#[derive(thiserror::Error, Debug)]
pub enum HiderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HiderError {
    pub fn resource<T: ToString>(msg: T) -> Self {
        HiderError::Resource(msg.to_string())
    }

    pub fn display<T: ToString>(msg: T) -> Self {
        HiderError::Display(msg.to_string())
    }

    /// Wrap a failed pool reservation with the number of elements requested.
    pub fn allocation(what: &str, count: usize, err: TryReserveError) -> Self {
        HiderError::Resource(format!("failed to allocate {count} {what}: {err}"))
    }
}

pub type HiderResult<T> = Result<T, HiderError>;
