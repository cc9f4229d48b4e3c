//! Commands the viewer sends to the engine, and the geometry behind them.
//!
//! The engine consumes one [`Command`] at a time between frames. Nothing in
//! here touches the tree; these helpers only compute where things should go.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::source::{Source, SourceId, STREAM_MERGE};

/// A single user-level edit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Spawn a new leaf under `parent`.
    Fork { parent: SourceId },
    /// Fold `from` into `to`.
    Merge { from: SourceId, to: SourceId },
    /// Move `id` under the cursor. `screen` is in window pixels.
    Drag { id: SourceId, screen: Vec2 },
    /// End a drag on `id`.
    Release { id: SourceId },
    /// Move `from` and its subtree under `to`, placed next to it.
    Combine { from: SourceId, to: SourceId },
    /// Give `from` copies of `to`'s children, placed next to `to`.
    ForkFromContext { from: SourceId, to: SourceId },
    /// Pin `id` at a scene position.
    SetAnchor { id: SourceId, pos: Vec2 },
    /// Unpin `id`.
    ClearAnchor { id: SourceId },
    /// Fork twice from `id`.
    Split { id: SourceId },
    /// Scale `id`'s contribution to the field.
    SetWeight { id: SourceId, weight: f32 },
}

impl Command {
    /// The source the command primarily acts on.
    pub fn target(&self) -> SourceId {
        match *self {
            Command::Fork { parent } => parent,
            Command::Merge { from, .. }
            | Command::Combine { from, .. }
            | Command::ForkFromContext { from, .. } => from,
            Command::Drag { id, .. }
            | Command::Release { id }
            | Command::SetAnchor { id, .. }
            | Command::ClearAnchor { id }
            | Command::Split { id }
            | Command::SetWeight { id, .. } => id,
        }
    }
}

/// What a successful command did.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    Forked(SourceId),
    Merged { survivor: SourceId },
    Moved(SourceId),
    Released { id: SourceId, anchored: bool },
    Combined { from: SourceId, to: SourceId },
    ContextInherited { from: SourceId, copies: Vec<SourceId> },
    Anchored(SourceId),
    Unanchored(SourceId),
    Split(SourceId, SourceId),
    Reweighted(SourceId),
}

/// Interaction tuning.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteractionConfig {
    /// Pin the merge survivor at the blend of both positions.
    pub anchor_on_merge: bool,
    /// Keep a dragged source pinned where it was dropped.
    pub sticky_anchors: bool,
    /// Largest seed-driven offset added to a merge blend point.
    pub merge_offset: f32,
    /// Centre distance of combined sources as a fraction of their radius sum.
    pub contact_ratio: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            anchor_on_merge: true,
            sticky_anchors: true,
            merge_offset: 0.02,
            contact_ratio: 0.85,
        }
    }
}

impl InteractionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_anchor_on_merge(mut self, enabled: bool) -> Self {
        self.anchor_on_merge = enabled;
        self
    }

    pub fn with_sticky_anchors(mut self, enabled: bool) -> Self {
        self.sticky_anchors = enabled;
        self
    }

    pub fn with_merge_offset(mut self, offset: f32) -> Self {
        self.merge_offset = offset.clamp(0.0, 0.1);
        self
    }

    pub fn with_contact_ratio(mut self, ratio: f32) -> Self {
        self.contact_ratio = ratio.clamp(0.25, 2.0);
        self
    }

    pub fn clamped(&self) -> Self {
        Self::new()
            .with_anchor_on_merge(self.anchor_on_merge)
            .with_sticky_anchors(self.sticky_anchors)
            .with_merge_offset(self.merge_offset)
            .with_contact_ratio(self.contact_ratio)
    }
}

/// Window pixel to scene coordinates, inverse of the renderers' mapping.
/// The short side spans `[-1, 1]` and y points up.
pub fn screen_to_scene(screen: Vec2, width: u32, height: u32) -> Vec2 {
    let short = width.min(height).max(1) as f32;
    Vec2::new(
        (2.0 * screen.x - width as f32) / short,
        (height as f32 - 2.0 * screen.y) / short,
    )
}

/// Area-weighted blend of `from` and `to`, nudged by the survivor's seed.
pub fn merge_point(from: &Source, to: &Source, max_offset: f32) -> Vec2 {
    let wa = from.radius * from.radius;
    let wb = to.radius * to.radius;
    let total = wa + wb;
    let blend = if total > 0.0 {
        (from.position * wa + to.position * wb) / total
    } else {
        to.position
    };
    blend + to.offset_within(STREAM_MERGE, max_offset)
}

/// Where to put `moving` so it just touches `target`.
///
/// Keeps the current bearing from `target` to `moving`, or a seed-driven one
/// when the two coincide.
pub fn contact_point(moving: &Source, target: &Source, ratio: f32) -> Vec2 {
    let dir = (moving.position - target.position)
        .try_normalize()
        .unwrap_or_else(|| moving.unit_direction(STREAM_MERGE));
    target.position + dir * (moving.radius + target.radius) * ratio
}
