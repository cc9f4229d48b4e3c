//! Error types for Blobfield.
//!
//! Tree mutations, state import, configuration loading and rendering each get
//! their own error enum so callers can match on exactly what they can handle.
//! Tree errors are all-or-nothing: when one is returned, nothing was changed.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::SourceId;

/// Errors returned by [`SourceTree`](crate::SourceTree) mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A referenced source id does not exist.
    #[error("source {0} not found")]
    NotFound(SourceId),
    /// The merge/reparent would remove the root, merge a source into itself,
    /// or create a cycle.
    #[error("invalid merge of {from} into {to}: {reason}")]
    InvalidMerge {
        from: SourceId,
        to: SourceId,
        reason: &'static str,
    },
    /// The tree already holds the maximum number of live sources.
    #[error("source capacity of {limit} exceeded")]
    CapacityExceeded { limit: usize },
}

/// Errors raised while importing or validating a serialized tree.
#[derive(Debug, Error)]
pub enum StateError {
    /// The JSON could not be parsed into the expected shape.
    #[error("invalid state format: {0}")]
    Parse(#[from] serde_json::Error),
    /// The JSON parsed but describes an invalid tree.
    #[error("invalid state format: {0}")]
    InvalidFormat(String),
}

impl StateError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StateError::InvalidFormat(msg.into())
    }
}

/// Errors returned by [`Engine::apply`](crate::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A command carried a NaN or infinite position.
    #[error("position for {id} is not finite")]
    NonFinitePosition { id: SourceId },

    /// A weight was NaN or infinite.
    #[error("weight for {id} is not finite")]
    NonFiniteWeight { id: SourceId },
}

/// Errors raised by GPU initialization.
#[derive(Debug, Error)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    #[error("failed to create GPU surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; a WebGPU/Vulkan/Metal/DX12 capable GPU is required")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
}

/// Errors raised while drawing a frame.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The drawing surface could not be acquired this frame (zero-sized,
    /// lost, outdated or timed out). The frame loop retries on the next tick.
    #[error("render surface unavailable: {0}")]
    SurfaceUnavailable(String),
    /// The GPU ran out of memory; not recoverable by retrying.
    #[error("GPU out of memory")]
    OutOfMemory,
}

/// Errors raised while loading or saving configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that can occur when running the interactive viewer.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// Failed to create or run the event loop.
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    /// The OS refused to create a window.
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    /// GPU initialization failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    /// A frame could not be drawn.
    #[error("render error: {0}")]
    Render(#[from] RenderError),
    /// Writing a snapshot image failed.
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
    /// Reading or writing a state/config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_error_messages_name_the_ids() {
        let err = TreeError::InvalidMerge {
            from: SourceId(3),
            to: SourceId(5),
            reason: "target is a descendant of the source",
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("#5"));
        assert!(msg.contains("descendant"));

        let err = TreeError::CapacityExceeded { limit: 64 };
        assert_eq!(err.to_string(), "source capacity of 64 exceeded");
    }

    #[test]
    fn test_parse_errors_read_as_invalid_format() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = StateError::from(parse);
        assert!(err.to_string().starts_with("invalid state format"));
    }
}
