//! # Blobfield
//!
//! Interactive metaball fields driven by a tree of sources.
//!
//! Every blob on screen is a [`Source`] in a rooted [`SourceTree`]. Forking a
//! source spawns a smaller child next to it; merging folds one source into
//! another. After each edit the [`LayoutEngine`] lays the tree out radially
//! and relaxes overlaps, and the renderer draws the iso-surface of the summed
//! (or smoothly unioned) field.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blobfield::prelude::*;
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let root = engine.tree().root();
//! for _ in 0..5 {
//!     engine.fork(root)?;
//! }
//!
//! let mut backend = ScreenSpaceBackend::new(RenderConfig::default(), FieldConfig::default());
//! engine.resize(&mut backend, 640, 480);
//! engine.tick(&mut backend)?;
//! backend.frame().save_png("blobs.png")?;
//! ```
//!
//! ## Core Concepts
//!
//! ### Sources and the tree
//!
//! Sources are stored by id with parent/child links as ids. Ids are never
//! reused. All mutation goes through [`SourceTree`] methods, each of which
//! either succeeds completely or leaves the tree as it was. Radii follow
//! depth: `base_radius * decay^depth`.
//!
//! ### Commands
//!
//! The viewer never touches the tree directly. It sends [`Command`]s to the
//! [`Engine`], which applies them between frames and publishes a new
//! [`SourceSnapshot`] for the renderer.
//!
//! ### Field models
//!
//! | Model | Inside when | Knobs |
//! |-------|-------------|-------|
//! | [`FieldModel::KernelSum`] | `Σ wᵢ·K(|p−cᵢ|/(rᵢσ)) ≥ iso` | `kernel`, `sigma`, `iso` |
//! | [`FieldModel::SmoothUnion`] | `smin(|p−cᵢ|−rᵢ, k) ≤ 0` | `blend` |
//!
//! ### Backends
//!
//! | Backend | Where | Output |
//! |---------|-------|--------|
//! | [`ScreenSpaceBackend`] | CPU | flat 2D pass with antialiased edge |
//! | [`SphereTraceBackend`] | CPU | lit 3D surface or Beer-Lambert volume |
//! | [`GpuBackend`] | wgpu | the screen-space pass in WGSL |

pub mod config;
pub mod engine;
pub mod error;
pub mod field;
pub mod gpu;
pub mod interaction;
pub mod layout;
pub mod noise;
pub mod render;
pub mod shader_utils;
pub mod source;
pub mod state;
pub mod time;
pub mod tree;
pub mod visuals;
pub mod window;

pub use config::EngineConfig;
pub use engine::{Engine, FrameStatus};
pub use error::{ConfigError, EngineError, GpuError, RenderError, StateError, TreeError, ViewerError};
pub use field::{Aabb, FieldConfig, FieldEvaluator, FieldModel, FieldSource, Kernel};
pub use glam::{Vec2, Vec3};
pub use gpu::GpuBackend;
pub use interaction::{Command, CommandOutcome, InteractionConfig};
pub use layout::{Layout, LayoutConfig, LayoutEngine};
pub use render::{
    Camera, Frame, FrameContext, RenderBackend, RenderConfig, ScreenSpaceBackend, SnapshotSource, SourceSnapshot,
    SphereTraceBackend, TraceMode,
};
pub use source::{Source, SourceId};
pub use state::{EngineState, SourceRecord, STATE_VERSION};
pub use time::FrameClock;
pub use tree::{SourceTree, TreeConfig};
pub use visuals::Palette;
pub use window::Viewer;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use blobfield::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, FrameStatus};
    pub use crate::error::{ConfigError, EngineError, RenderError, StateError, TreeError, ViewerError};
    pub use crate::field::{FieldConfig, FieldEvaluator, FieldModel, Kernel};
    pub use crate::interaction::{Command, CommandOutcome, InteractionConfig};
    pub use crate::layout::{LayoutConfig, LayoutEngine};
    pub use crate::render::{
        Camera, FrameContext, RenderBackend, RenderConfig, ScreenSpaceBackend, SourceSnapshot, SphereTraceBackend,
        TraceMode,
    };
    pub use crate::source::SourceId;
    pub use crate::time::FrameClock;
    pub use crate::tree::{SourceTree, TreeConfig};
    pub use crate::visuals::Palette;
    pub use crate::window::Viewer;
    pub use crate::{Vec2, Vec3};
}
