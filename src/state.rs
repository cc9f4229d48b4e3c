//! JSON export and import of the whole source tree.
//!
//! The exported document looks like:
//!
//! ```json
//! {
//!   "version": 1,
//!   "root": 0,
//!   "next_id": 3,
//!   "sources": [
//!     { "id": 0, "seed": 12345, "pos": [0.0, 0.0], "radius": 0.35, "weight": 1.0, "parent": null },
//!     { "id": 1, "seed": 917, "pos": [0.2, 0.0], "radius": 0.245, "weight": 1.0, "parent": 0, "anchor": [0.2, 0.0] }
//!   ],
//!   "tree": { ... },
//!   "layout": { ... }
//! }
//! ```
//!
//! Sources are written in pre-order so sibling order survives a round trip.
//! Import rebuilds a candidate tree and validates it before anything is
//! swapped in.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::layout::LayoutConfig;
use crate::source::{Source, SourceId};
use crate::tree::{SourceTree, TreeConfig};

/// Format version written by [`EngineState::capture`].
pub const STATE_VERSION: u32 = 1;

/// One serialized source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub seed: u32,
    pub pos: Vec2,
    pub radius: f32,
    #[serde(default = "default_weight")]
    pub weight: f32,
    pub parent: Option<SourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_weight() -> f32 {
    1.0
}

/// Serializable snapshot of an engine's tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub version: u32,
    pub root: SourceId,
    pub next_id: u32,
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl EngineState {
    /// Capture `tree` in pre-order.
    pub fn capture(tree: &SourceTree, layout: &LayoutConfig) -> Self {
        let sources = tree
            .subtree(tree.root())
            .into_iter()
            .filter_map(|id| tree.get(id))
            .map(|s| SourceRecord {
                id: s.id,
                seed: s.seed,
                pos: s.position,
                radius: s.radius,
                weight: s.weight,
                parent: s.parent,
                anchor: s.anchor,
                label: s.label.clone(),
            })
            .collect();
        Self {
            version: STATE_VERSION,
            root: tree.root(),
            next_id: tree.next_id(),
            sources,
            tree: tree.config().clone(),
            layout: layout.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, rejecting unknown versions.
    pub fn from_json(json: &str) -> Result<Self, StateError> {
        let state: EngineState = serde_json::from_str(json)?;
        if state.version != STATE_VERSION {
            return Err(StateError::invalid(format!(
                "unsupported state version {} (expected {STATE_VERSION})",
                state.version
            )));
        }
        Ok(state)
    }

    /// Rebuild and validate the tree this state describes.
    ///
    /// Positions are taken as stored; radii must match the stored tree
    /// config's depth formula.
    pub fn to_tree(&self) -> Result<SourceTree, StateError> {
        let sources = self
            .sources
            .iter()
            .map(|r| {
                let mut source = Source::new(r.id, r.seed, r.parent, r.pos, r.radius);
                source.weight = r.weight;
                source.anchor = r.anchor;
                source.label = r.label.clone();
                source
            })
            .collect();
        SourceTree::from_parts(self.tree.clone(), self.root, self.next_id, sources)
    }
}
