//! The engine: sole owner and writer of the source tree.
//!
//! Commands are applied between frames. Each one runs against a scratch copy
//! of the tree, and only a fully successful command is committed: the copy
//! replaces the tree, layout output becomes the committed positions, and a
//! new [`SourceSnapshot`] with a higher revision is published. Backends only
//! ever see committed snapshots.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = Engine::new(EngineConfig::default());
//! let child = engine.fork(engine.tree().root())?;
//! engine.apply(Command::Drag { id: child, screen: Vec2::new(120.0, 80.0) })?;
//!
//! let mut backend = ScreenSpaceBackend::new(engine.config().render.clone(), engine.config().field.clone());
//! engine.resize(&mut backend, 640, 480);
//! engine.tick(&mut backend)?;
//! ```

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, RenderError, StateError, TreeError};
use crate::interaction::{contact_point, merge_point, screen_to_scene, Command, CommandOutcome};
use crate::layout::{Layout, LayoutEngine};
use crate::render::{FrameContext, RenderBackend, SourceSnapshot};
use crate::source::SourceId;
use crate::state::EngineState;
use crate::time::FrameClock;
use crate::tree::SourceTree;

/// Result of one [`Engine::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Drawn,
    /// The surface was unavailable; the frame is retried next tick.
    Skipped,
}

/// How positions are recomputed after a tree edit.
enum Relayout {
    Full,
    Around(SourceId),
    /// Full relayout, then pin `moving` against `target`'s new position.
    Contact { moving: SourceId, target: SourceId },
    Keep,
}

pub struct Engine {
    config: EngineConfig,
    tree: SourceTree,
    layout: LayoutEngine,
    snapshot: SourceSnapshot,
    clock: FrameClock,
    viewport: (u32, u32),
    dragging: Option<SourceId>,
}

impl Engine {
    /// Engine holding a single root source.
    pub fn new(config: EngineConfig) -> Self {
        let config = config.clamped();
        let mut tree = SourceTree::new(config.tree.clone());
        let layout = LayoutEngine::new(config.layout.clone());
        let positions = layout.relayout(&tree);
        tree.commit_positions(&positions.positions);
        let snapshot = SourceSnapshot::from_tree(&tree, 1);
        Self {
            config,
            tree,
            layout,
            snapshot,
            clock: FrameClock::new(),
            viewport: (0, 0),
            dragging: None,
        }
    }

    /// Replace the frame clock, e.g. with [`FrameClock::fixed`] for
    /// reproducible output.
    pub fn with_clock(mut self, clock: FrameClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &SourceTree {
        &self.tree
    }

    /// The committed snapshot backends draw from.
    pub fn snapshot(&self) -> &SourceSnapshot {
        &self.snapshot
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Source currently being dragged, if any.
    pub fn dragging(&self) -> Option<SourceId> {
        self.dragging
    }

    /// Record the window size used to map drag coordinates. Backends are
    /// resized separately through [`Engine::resize`].
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    /// Resize the viewport and the backend together.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) {
        self.set_viewport(width, height);
        backend.resize(width, height);
        debug!(width, height, backend = backend.name(), "resized");
    }

    /// Window pixel to scene coordinates for the current viewport.
    pub fn screen_to_scene(&self, screen: Vec2) -> Vec2 {
        screen_to_scene(screen, self.viewport.0, self.viewport.1)
    }

    /// Source under a window pixel.
    pub fn pick(&self, screen: Vec2) -> Option<SourceId> {
        self.snapshot.pick(self.screen_to_scene(screen))
    }

    /// Apply one command. On error nothing changes.
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome, EngineError> {
        let result = match command {
            Command::Fork { parent } => self.fork(parent).map(CommandOutcome::Forked),
            Command::Merge { from, to } => self.merge(from, to).map(|()| CommandOutcome::Merged { survivor: to }),
            Command::Drag { id, screen } => self.drag(id, screen).map(|()| CommandOutcome::Moved(id)),
            Command::Release { id } => self.release(id),
            Command::Combine { from, to } => self.combine(from, to).map(|()| CommandOutcome::Combined { from, to }),
            Command::ForkFromContext { from, to } => self
                .fork_from_context(from, to)
                .map(|copies| CommandOutcome::ContextInherited { from, copies }),
            Command::SetAnchor { id, pos } => self.set_anchor(id, pos).map(|()| CommandOutcome::Anchored(id)),
            Command::ClearAnchor { id } => self.clear_anchor(id).map(|()| CommandOutcome::Unanchored(id)),
            Command::Split { id } => self.split(id).map(|(a, b)| CommandOutcome::Split(a, b)),
            Command::SetWeight { id, weight } => self.set_weight(id, weight).map(|()| CommandOutcome::Reweighted(id)),
        };
        if let Err(err) = &result {
            debug!(source = %command.target(), %err, "command rejected");
        }
        result
    }

    /// Spawn a child of `parent`.
    pub fn fork(&mut self, parent: SourceId) -> Result<SourceId, EngineError> {
        self.transact(|tree, _| Ok((tree.fork(parent)?, Relayout::Full)))
    }

    /// Fold `from` into `to`, optionally pinning `to` at the blend point.
    pub fn merge(&mut self, from: SourceId, to: SourceId) -> Result<(), EngineError> {
        self.transact(|tree, engine| {
            let interaction = &engine.config.interaction;
            let blend = match (tree.get(from), tree.get(to)) {
                (Some(a), Some(b)) if interaction.anchor_on_merge => Some(merge_point(a, b, interaction.merge_offset)),
                _ => None,
            };
            tree.merge(from, to)?;
            if let Some(pos) = blend {
                tree.set_anchor(to, pos)?;
            }
            Ok(((), Relayout::Full))
        })
    }

    /// Pin `id` at a scene position.
    pub fn set_anchor(&mut self, id: SourceId, pos: Vec2) -> Result<(), EngineError> {
        if !pos.is_finite() {
            return Err(EngineError::NonFinitePosition { id });
        }
        self.transact(|tree, engine| {
            tree.set_anchor(id, engine.layout.clamp(pos))?;
            Ok(((), Relayout::Full))
        })
    }

    pub fn clear_anchor(&mut self, id: SourceId) -> Result<(), EngineError> {
        self.transact(|tree, _| {
            tree.clear_anchor(id)?;
            Ok(((), Relayout::Full))
        })
    }

    /// Change how strongly `id` contributes to the field. Positions are kept.
    pub fn set_weight(&mut self, id: SourceId, weight: f32) -> Result<(), EngineError> {
        if !weight.is_finite() {
            return Err(EngineError::NonFiniteWeight { id });
        }
        self.transact(|tree, _| {
            tree.set_weight(id, weight)?;
            Ok(((), Relayout::Keep))
        })
    }

    pub fn split(&mut self, id: SourceId) -> Result<(SourceId, SourceId), EngineError> {
        self.transact(|tree, _| Ok((tree.split(id)?, Relayout::Full)))
    }

    /// Move `id` under the cursor and push neighbours out of the way.
    pub fn drag(&mut self, id: SourceId, screen: Vec2) -> Result<(), EngineError> {
        let pos = self.screen_to_scene(screen);
        if !pos.is_finite() {
            return Err(EngineError::NonFinitePosition { id });
        }
        self.transact(|tree, engine| {
            tree.set_anchor(id, engine.layout.clamp(pos))?;
            Ok(((), Relayout::Around(id)))
        })?;
        self.dragging = Some(id);
        Ok(())
    }

    /// End a drag. Non-sticky anchors are dropped and the tree relaid.
    pub fn release(&mut self, id: SourceId) -> Result<CommandOutcome, EngineError> {
        let sticky = self.config.interaction.sticky_anchors;
        self.transact(|tree, _| {
            if sticky {
                tree.get(id).ok_or(TreeError::NotFound(id))?;
                return Ok(((), Relayout::Keep));
            }
            tree.clear_anchor(id)?;
            Ok(((), Relayout::Full))
        })?;
        if self.dragging == Some(id) {
            self.dragging = None;
        }
        Ok(CommandOutcome::Released { id, anchored: sticky })
    }

    /// Move `from` and its subtree under `to`, placed against `to`.
    pub fn combine(&mut self, from: SourceId, to: SourceId) -> Result<(), EngineError> {
        self.transact(|tree, _| {
            tree.reparent(from, to)?;
            Ok(((), Relayout::Contact { moving: from, target: to }))
        })
    }

    /// Copy `to`'s children under `from` and place `from` against `to`.
    pub fn fork_from_context(&mut self, from: SourceId, to: SourceId) -> Result<Vec<SourceId>, EngineError> {
        self.transact(|tree, _| {
            let copies = tree.inherit_context(from, to)?;
            Ok((copies, Relayout::Contact { moving: from, target: to }))
        })
    }

    /// Serializable copy of the current tree.
    pub fn export_state(&self) -> EngineState {
        EngineState::capture(&self.tree, self.layout.config())
    }

    pub fn export_json(&self) -> Result<String, StateError> {
        self.export_state().to_json()
    }

    /// Replace the tree with a serialized one.
    ///
    /// The candidate is fully validated first; on any error the current tree
    /// is kept.
    pub fn import_state(&mut self, json: &str) -> Result<(), StateError> {
        let state = EngineState::from_json(json)?;
        self.import(&state)
    }

    /// Replace the tree with an already-parsed state. Stored positions are
    /// kept as they are.
    pub fn import(&mut self, state: &EngineState) -> Result<(), StateError> {
        let tree = state.to_tree()?;
        self.config.tree = tree.config().clone();
        self.config.layout = state.layout.clamped();
        self.layout = LayoutEngine::new(self.config.layout.clone());
        self.dragging = None;
        self.tree = tree;
        self.publish();
        info!(sources = self.tree.len(), revision = self.revision(), "imported state");
        Ok(())
    }

    /// Draw one frame, uploading the snapshot first if the backend is behind.
    ///
    /// An unavailable surface is logged and reported as
    /// [`FrameStatus::Skipped`]; the next tick tries again.
    pub fn tick(&mut self, backend: &mut dyn RenderBackend) -> Result<FrameStatus, RenderError> {
        let (time, _) = self.clock.tick();
        if backend.uploaded_revision().map_or(true, |r| r < self.snapshot.revision) {
            backend.upload_sources(&self.snapshot);
            debug!(revision = self.snapshot.revision, sources = self.snapshot.len(), "uploaded sources");
        }

        let ctx = FrameContext::new(&self.snapshot, self.config.render.camera, time, self.clock.frame());
        match backend.draw_frame(&ctx) {
            Ok(()) => Ok(FrameStatus::Drawn),
            Err(RenderError::SurfaceUnavailable(reason)) => {
                warn!(backend = backend.name(), %reason, "surface unavailable, retrying next frame");
                Ok(FrameStatus::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Release the backend. The engine itself stays usable.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        backend.dispose();
        self.dragging = None;
        info!(backend = backend.name(), frames = self.clock.frame(), "engine shut down");
    }

    /// Run `edit` against a scratch tree and commit it if it succeeds.
    fn transact<T>(
        &mut self,
        edit: impl FnOnce(&mut SourceTree, &Self) -> Result<(T, Relayout), EngineError>,
    ) -> Result<T, EngineError> {
        let mut tree = self.tree.clone();
        let (value, relayout) = edit(&mut tree, self)?;
        let layout: Option<Layout> = match relayout {
            Relayout::Full => Some(self.layout.relayout(&tree)),
            Relayout::Around(id) => Some(self.layout.relax_around(&tree, id)),
            Relayout::Contact { moving, target } => {
                let full = self.layout.relayout(&tree);
                tree.commit_positions(&full.positions);
                let pos = place_against(&tree, moving, target, self.config.interaction.contact_ratio)?;
                tree.set_anchor(moving, self.layout.clamp(pos))?;
                Some(self.layout.relax_around(&tree, moving))
            }
            Relayout::Keep => None,
        };
        if let Some(layout) = layout {
            tree.commit_positions(&layout.positions);
        }
        self.tree = tree;
        self.publish();
        Ok(value)
    }

    fn publish(&mut self) {
        let revision = self.snapshot.revision + 1;
        self.snapshot = SourceSnapshot::from_tree(&self.tree, revision);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Contact position for `moving` next to `target`, using committed positions
/// and the radii the tree holds after the edit.
fn place_against(tree: &SourceTree, moving: SourceId, target: SourceId, ratio: f32) -> Result<Vec2, TreeError> {
    let m = tree.get(moving).ok_or(TreeError::NotFound(moving))?;
    let t = tree.get(target).ok_or(TreeError::NotFound(target))?;
    Ok(contact_point(m, t, ratio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractionConfig;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).with_clock(FrameClock::fixed(1.0 / 60.0))
    }

    #[test]
    fn test_new_engine_publishes_root() {
        let e = engine();
        assert_eq!(e.snapshot().len(), 1);
        assert_eq!(e.revision(), 1);
    }

    #[test]
    fn test_each_commit_bumps_revision() {
        let mut e = engine();
        let root = e.tree().root();
        let before = e.revision();
        e.fork(root).unwrap();
        assert_eq!(e.revision(), before + 1);
        assert_eq!(e.snapshot().len(), 2);
    }

    #[test]
    fn test_set_weight_scales_field_without_moving_sources() {
        use crate::field::{FieldConfig, FieldEvaluator};

        let mut e = engine();
        let root = e.tree().root();
        let child = e.fork(root).unwrap();
        let positions: Vec<Vec2> = e.tree().iter().map(|s| s.position).collect();
        let at = e.tree().get(child).unwrap().position.extend(0.0);
        let sample = |e: &Engine| FieldEvaluator::new(FieldConfig::default(), e.snapshot().field_sources(0.0)).field(at);

        let before = sample(&e);
        let outcome = e.apply(Command::SetWeight { id: child, weight: 3.0 }).unwrap();
        assert_eq!(outcome, CommandOutcome::Reweighted(child));
        assert!(sample(&e) > before + 1.0);
        assert_eq!(e.tree().iter().map(|s| s.position).collect::<Vec<_>>(), positions);

        e.set_weight(child, -2.0).unwrap();
        assert_eq!(e.tree().get(child).unwrap().weight, 0.0);
        assert!(sample(&e) < before);
    }

    #[test]
    fn test_non_finite_weight_is_rejected() {
        let mut e = engine();
        let root = e.tree().root();
        let revision = e.revision();
        let err = e.apply(Command::SetWeight { id: root, weight: f32::NAN }).unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteWeight { id } if id == root), "{err}");
        assert_eq!(e.revision(), revision);
        assert_eq!(e.tree().get(root).unwrap().weight, 1.0);
    }

    #[test]
    fn test_failed_command_changes_nothing() {
        let mut e = engine();
        let root = e.tree().root();
        let child = e.fork(root).unwrap();
        let revision = e.revision();
        let snapshot = e.snapshot().clone();

        assert!(e.apply(Command::Merge { from: root, to: child }).is_err());
        assert!(e.apply(Command::Fork { parent: SourceId(99) }).is_err());
        assert!(e.apply(Command::SetAnchor { id: child, pos: Vec2::NAN }).is_err());

        assert_eq!(e.revision(), revision);
        assert_eq!(e.snapshot(), &snapshot);
    }

    #[test]
    fn test_merge_anchors_survivor_between_both() {
        let mut e = engine();
        let root = e.tree().root();
        let a = e.fork(root).unwrap();
        let b = e.fork(root).unwrap();
        let pa = e.tree().get(a).unwrap().position;
        let pb = e.tree().get(b).unwrap().position;

        e.merge(a, b).unwrap();
        let anchor = e.tree().get(b).unwrap().anchor.unwrap();
        // equal radii: midpoint plus a small seeded nudge
        assert!(anchor.distance((pa + pb) * 0.5) <= 0.02 + 1e-5);
        assert!(!e.tree().contains(a));
    }

    #[test]
    fn test_merge_without_anchoring() {
        let config = EngineConfig::new().with_interaction(InteractionConfig::new().with_anchor_on_merge(false));
        let mut e = Engine::new(config);
        let root = e.tree().root();
        let a = e.fork(root).unwrap();
        let b = e.fork(root).unwrap();
        e.merge(a, b).unwrap();
        assert!(e.tree().get(b).unwrap().anchor.is_none());
    }

    #[test]
    fn test_drag_follows_cursor() {
        let mut e = engine();
        e.set_viewport(200, 200);
        let root = e.tree().root();
        let child = e.fork(root).unwrap();

        e.apply(Command::Drag { id: child, screen: Vec2::new(150.0, 50.0) }).unwrap();
        assert_eq!(e.dragging(), Some(child));
        let pos = e.tree().get(child).unwrap().position;
        assert!(pos.distance(Vec2::new(0.5, 0.5)) < 1e-5);
    }

    #[test]
    fn test_drag_outside_scene_is_clamped() {
        let mut e = engine();
        let root = e.tree().root();
        let child = e.fork(root).unwrap();
        let bounds = e.config().layout.bounds;

        // No viewport yet: every pixel maps far outside the scene.
        e.drag(child, Vec2::new(150.0, 50.0)).unwrap();
        assert_eq!(e.tree().get(child).unwrap().anchor, Some(Vec2::new(bounds, -bounds)));

        e.set_viewport(200, 200);
        e.drag(child, Vec2::new(-400.0, 900.0)).unwrap();
        let source = e.tree().get(child).unwrap();
        assert_eq!(source.anchor, Some(Vec2::new(-bounds, -bounds)));
        assert_eq!(source.position, Vec2::new(-bounds, -bounds));

        e.set_anchor(child, Vec2::new(3.0, 0.25)).unwrap();
        assert_eq!(e.tree().get(child).unwrap().anchor, Some(Vec2::new(bounds, 0.25)));
    }

    #[test]
    fn test_release_respects_sticky_setting() {
        let mut e = engine();
        e.set_viewport(200, 200);
        let root = e.tree().root();
        let child = e.fork(root).unwrap();
        e.drag(child, Vec2::new(150.0, 50.0)).unwrap();
        let outcome = e.apply(Command::Release { id: child }).unwrap();
        assert_eq!(outcome, CommandOutcome::Released { id: child, anchored: true });
        assert!(e.tree().get(child).unwrap().is_anchored());
        assert_eq!(e.dragging(), None);

        let config = EngineConfig::new().with_interaction(InteractionConfig::new().with_sticky_anchors(false));
        let mut e = Engine::new(config);
        e.set_viewport(200, 200);
        let child = e.fork(e.tree().root()).unwrap();
        e.drag(child, Vec2::new(150.0, 50.0)).unwrap();
        e.release(child).unwrap();
        assert!(!e.tree().get(child).unwrap().is_anchored());
    }

    #[test]
    fn test_combine_places_source_against_target() {
        let mut e = engine();
        let root = e.tree().root();
        let a = e.fork(root).unwrap();
        let b = e.fork(root).unwrap();

        e.apply(Command::Combine { from: a, to: b }).unwrap();
        assert_eq!(e.tree().parent(a).unwrap(), Some(b));

        let sa = e.tree().get(a).unwrap();
        let sb = e.tree().get(b).unwrap();
        let gap = sa.anchor.unwrap().distance(sb.position);
        let expected = (sa.radius + sb.radius) * InteractionConfig::default().contact_ratio;
        assert!((gap - expected).abs() < 1e-3, "gap {gap} expected {expected}");
    }

    #[test]
    fn test_fork_from_context_copies_children() {
        let mut e = engine();
        let root = e.tree().root();
        let a = e.fork(root).unwrap();
        let b = e.fork(root).unwrap();
        e.fork(b).unwrap();
        e.fork(b).unwrap();

        let outcome = e.apply(Command::ForkFromContext { from: a, to: b }).unwrap();
        match outcome {
            CommandOutcome::ContextInherited { from, copies } => {
                assert_eq!(from, a);
                assert_eq!(copies.len(), 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(e.tree().children(a).unwrap().len(), 2);
        assert_eq!(e.tree().children(b).unwrap().len(), 2);
        assert!(e.tree().get(a).unwrap().is_anchored());
    }

    #[test]
    fn test_import_keeps_previous_tree_on_error() {
        let mut e = engine();
        let root = e.tree().root();
        e.fork(root).unwrap();
        let before = e.export_state();
        let revision = e.revision();

        assert!(e.import_state("{ not json").is_err());
        assert_eq!(e.export_state(), before);
        assert_eq!(e.revision(), revision);
    }

    #[test]
    fn test_import_adopts_stored_positions() {
        let mut a = engine();
        let root = a.tree().root();
        let c = a.fork(root).unwrap();
        a.set_anchor(c, Vec2::new(0.3, -0.2)).unwrap();
        let json = a.export_json().unwrap();

        let mut b = engine();
        b.import_state(&json).unwrap();
        assert_eq!(b.export_state(), a.export_state());
        assert_eq!(b.snapshot().sources, a.snapshot().sources);
    }
}
