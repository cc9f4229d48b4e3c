//! Tree-aware 2D layout for field sources.
//!
//! Layout runs in three steps every time topology changes:
//!
//! 1. **Radial partition**: each node gets an angular span on its parent's
//!    span proportional to its leaf count, and sits at `radius_step * depth`
//!    from the origin, with a small seed-driven angular jitter.
//! 2. **Anchor override**: anchored nodes start from their anchor.
//! 3. **Relaxation**: a fixed number of passes over all pairs pushes
//!    overlapping nodes apart. Anchored nodes never move.
//!
//! During a drag only step 3 runs, restricted to the dragged source and the
//! sources it pushes ([`LayoutEngine::relax_around`]).

use std::collections::BTreeMap;
use std::f32::consts::TAU;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::{SourceId, STREAM_SEPARATE};
use crate::tree::SourceTree;

/// Layout tuning parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Minimum distance between source centres after relaxation.
    pub min_dist: f32,
    /// Relaxation passes per full relayout.
    pub iterations: u32,
    /// Relaxation passes during a drag.
    pub drag_iterations: u32,
    /// Fraction of each push actually applied.
    pub damping: f32,
    /// Scene half-extent; positions are clamped to `±bounds`.
    pub bounds: f32,
    /// Maximum angular jitter in radians.
    pub max_jitter: f32,
    /// Angle at which the root's span begins.
    pub start_angle: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_dist: 0.12,
            iterations: 24,
            drag_iterations: 8,
            damping: 0.5,
            bounds: 0.98,
            max_jitter: 0.03,
            start_angle: 0.0,
        }
    }
}

impl LayoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_dist(mut self, min_dist: f32) -> Self {
        self.min_dist = min_dist.clamp(0.0, 1.0);
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.min(1024);
        self
    }

    pub fn with_drag_iterations(mut self, iterations: u32) -> Self {
        self.drag_iterations = iterations.min(1024);
        self
    }

    /// Set damping (clamped to 0.05-1.0).
    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping.clamp(0.05, 1.0);
        self
    }

    pub fn with_bounds(mut self, bounds: f32) -> Self {
        self.bounds = bounds.clamp(0.1, 1.0);
        self
    }

    /// Set the maximum angular jitter (clamped to 0-0.03 rad).
    pub fn with_max_jitter(mut self, jitter: f32) -> Self {
        self.max_jitter = jitter.clamp(0.0, 0.03);
        self
    }

    pub fn with_start_angle(mut self, angle: f32) -> Self {
        self.start_angle = angle;
        self
    }

    /// Copy with every field forced into its documented range.
    pub fn clamped(&self) -> Self {
        Self::new()
            .with_min_dist(self.min_dist)
            .with_iterations(self.iterations)
            .with_drag_iterations(self.drag_iterations)
            .with_damping(self.damping)
            .with_bounds(self.bounds)
            .with_max_jitter(self.max_jitter)
            .with_start_angle(self.start_angle)
    }

    /// Ring spacing for a tree of `count` sources.
    ///
    /// Shrinks as the tree grows so deep trees stay on screen.
    pub fn radius_step(count: usize) -> f32 {
        (0.16 + 0.04 * (1.0 + count as f32 / 4.0).ln()).min(0.38)
    }
}

/// Output of a layout pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    pub positions: BTreeMap<SourceId, Vec2>,
    /// Ring spacing used for this pass.
    pub radius_step: f32,
}

impl Layout {
    pub fn get(&self, id: SourceId) -> Option<Vec2> {
        self.positions.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Smallest pairwise distance among sources matching `filter`.
    pub fn min_pair_distance(&self, filter: impl Fn(SourceId) -> bool) -> Option<f32> {
        let pts: Vec<Vec2> = self
            .positions
            .iter()
            .filter(|(id, _)| filter(**id))
            .map(|(_, p)| *p)
            .collect();
        let mut best: Option<f32> = None;
        for i in 0..pts.len() {
            for j in i + 1..pts.len() {
                let d = pts[i].distance(pts[j]);
                best = Some(best.map_or(d, |b| b.min(d)));
            }
        }
        best
    }
}

/// A source as seen by the relaxation step.
struct Body {
    id: SourceId,
    pos: Vec2,
    anchored: bool,
    /// Direction used when this body coincides with another.
    escape: Vec2,
}

/// Computes positions from a [`SourceTree`].
#[derive(Clone, Debug, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Full relayout: radial partition, anchor override, relaxation.
    pub fn relayout(&self, tree: &SourceTree) -> Layout {
        let mut layout = self.radial_partition(tree);
        for source in tree.iter() {
            if let Some(anchor) = source.anchor {
                layout.positions.insert(source.id, anchor);
            }
        }
        let mut bodies = self.bodies(tree, &layout.positions);
        let passes = self.relax(&mut bodies);
        layout.positions = bodies.into_iter().map(|b| (b.id, b.pos)).collect();
        debug!(sources = tree.len(), passes, radius_step = layout.radius_step, "relayout");
        layout
    }

    /// Step 1 only: angular spans proportional to leaf counts.
    pub fn radial_partition(&self, tree: &SourceTree) -> Layout {
        let radius_step = LayoutConfig::radius_step(tree.len());
        let leaves = leaf_sizes(tree);
        let mut positions = BTreeMap::new();
        positions.insert(tree.root(), Vec2::ZERO);

        // (node, span start, span width, depth)
        let mut stack = vec![(tree.root(), self.config.start_angle, TAU, 0usize)];
        while let Some((id, start, span, depth)) = stack.pop() {
            let Some(node) = tree.get(id) else { continue };
            let total: usize = node.children.iter().map(|c| leaves.get(c).copied().unwrap_or(1)).sum();
            if total == 0 {
                continue;
            }
            let mut cursor = start;
            for child_id in &node.children {
                let Some(child) = tree.get(*child_id) else { continue };
                let share = leaves.get(child_id).copied().unwrap_or(1) as f32 / total as f32;
                let child_span = span * share;
                let angle = cursor + child_span * 0.5 + child.jitter_angle(self.config.max_jitter);
                let dist = radius_step * (depth + 1) as f32;
                positions.insert(*child_id, self.clamp(Vec2::from_angle(angle) * dist));
                stack.push((*child_id, cursor, child_span, depth + 1));
                cursor += child_span;
            }
        }
        Layout { positions, radius_step }
    }

    /// Incremental relaxation after `id` was dragged.
    ///
    /// Starts from the committed positions and only resolves overlaps that
    /// involve `id` or a source pushed while resolving them.
    pub fn relax_around(&self, tree: &SourceTree, id: SourceId) -> Layout {
        let committed: BTreeMap<SourceId, Vec2> = tree
            .iter()
            .map(|s| (s.id, s.anchor.unwrap_or(s.position)))
            .collect();
        let mut bodies = self.bodies(tree, &committed);
        let Some(start) = bodies.iter().position(|b| b.id == id) else {
            return Layout {
                positions: committed,
                radius_step: LayoutConfig::radius_step(tree.len()),
            };
        };

        let mut touched = vec![start];
        for _ in 0..self.config.drag_iterations {
            let mut moved = false;
            let mut k = 0;
            while k < touched.len() {
                let a = touched[k];
                for b in 0..bodies.len() {
                    if b != a && self.separate(&mut bodies, a, b) {
                        moved = true;
                        if !touched.contains(&b) {
                            touched.push(b);
                        }
                    }
                }
                k += 1;
            }
            if !moved {
                break;
            }
        }
        debug!(%id, touched = touched.len(), "incremental relax");
        Layout {
            positions: bodies.into_iter().map(|b| (b.id, b.pos)).collect(),
            radius_step: LayoutConfig::radius_step(tree.len()),
        }
    }

    fn bodies(&self, tree: &SourceTree, positions: &BTreeMap<SourceId, Vec2>) -> Vec<Body> {
        tree.iter()
            .map(|s| Body {
                id: s.id,
                pos: self.clamp(positions.get(&s.id).copied().unwrap_or(s.position)),
                anchored: s.is_anchored(),
                escape: s.unit_direction(STREAM_SEPARATE),
            })
            .collect()
    }

    /// Pairwise passes until nothing overlaps or the pass budget runs out.
    /// Returns the number of passes run.
    fn relax(&self, bodies: &mut [Body]) -> u32 {
        for pass in 0..self.config.iterations {
            let mut moved = false;
            for i in 0..bodies.len() {
                for j in i + 1..bodies.len() {
                    moved |= self.separate(bodies, i, j);
                }
            }
            if !moved {
                return pass;
            }
        }
        self.config.iterations
    }

    /// Push bodies `i` and `j` apart if they overlap. Returns whether
    /// anything moved.
    fn separate(&self, bodies: &mut [Body], i: usize, j: usize) -> bool {
        let (a, b) = (&bodies[i], &bodies[j]);
        if a.anchored && b.anchored {
            return false;
        }
        let delta = b.pos - a.pos;
        let dist = delta.length();
        if dist >= self.config.min_dist {
            return false;
        }
        let dir = if dist > 1e-6 {
            delta / dist
        } else if a.id < b.id {
            b.escape
        } else {
            -a.escape
        };
        let push = (self.config.min_dist - dist) * self.config.damping;
        // Each free end takes half; an anchored end takes none of it.
        let share = |anchored: bool| if anchored { 0.0 } else { 0.5 };
        let (share_a, share_b) = (share(a.anchored), share(b.anchored));
        let new_a = self.clamp(a.pos - dir * push * share_a);
        let new_b = self.clamp(b.pos + dir * push * share_b);
        let moved = new_a != bodies[i].pos || new_b != bodies[j].pos;
        bodies[i].pos = new_a;
        bodies[j].pos = new_b;
        moved
    }

    /// Clamp a scene position into the `±bounds` square.
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        p.clamp(Vec2::splat(-self.config.bounds), Vec2::splat(self.config.bounds))
    }
}

/// Leaf count below every reachable node.
fn leaf_sizes(tree: &SourceTree) -> BTreeMap<SourceId, usize> {
    let mut sizes = BTreeMap::new();
    for id in tree.subtree(tree.root()).into_iter().rev() {
        let Some(node) = tree.get(id) else { continue };
        let size = if node.is_leaf() {
            1
        } else {
            node.children.iter().map(|c| sizes.get(c).copied().unwrap_or(1)).sum()
        };
        sizes.insert(id, size);
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeConfig;
    use std::f32::consts::PI;

    fn fan(children: usize) -> (SourceTree, Vec<SourceId>) {
        let mut tree = SourceTree::new(TreeConfig::default());
        let root = tree.root();
        let ids = (0..children).map(|_| tree.fork(root).unwrap()).collect();
        (tree, ids)
    }

    fn angle_diff(a: f32, b: f32) -> f32 {
        let mut d = (b - a) % TAU;
        if d < 0.0 {
            d += TAU;
        }
        d
    }

    #[test]
    fn test_radius_step_shrinks_growth_and_caps() {
        let small = LayoutConfig::radius_step(1);
        let large = LayoutConfig::radius_step(200);
        assert!(small > 0.16 && small < 0.2);
        assert!(large > small);
        assert!(LayoutConfig::radius_step(1_000_000) <= 0.38);
    }

    #[test]
    fn test_seven_children_are_evenly_spaced() {
        let (tree, ids) = fan(7);
        let layout = LayoutEngine::default().relayout(&tree);

        assert_eq!(layout.len(), 8);
        assert_eq!(layout.get(tree.root()), Some(Vec2::ZERO));
        let angles: Vec<f32> = ids.iter().map(|id| layout.get(*id).unwrap().to_angle()).collect();
        for pair in angles.windows(2) {
            let spacing = angle_diff(pair[0], pair[1]);
            assert!((spacing - 2.0 * PI / 7.0).abs() <= 0.06 + 1e-4, "spacing {spacing}");
        }
        for id in &ids {
            let r = layout.get(*id).unwrap().length();
            assert!((r - layout.radius_step).abs() < 1e-4);
        }
    }

    #[test]
    fn test_deeper_nodes_sit_further_out() {
        let mut tree = SourceTree::default();
        let root = tree.root();
        let a = tree.fork(root).unwrap();
        let b = tree.fork(a).unwrap();
        let c = tree.fork(b).unwrap();
        let layout = LayoutEngine::default().radial_partition(&tree);

        let ra = layout.get(a).unwrap().length();
        let rb = layout.get(b).unwrap().length();
        let rc = layout.get(c).unwrap().length();
        assert!(ra < rb && rb < rc);
    }

    #[test]
    fn test_spans_follow_leaf_counts() {
        let mut tree = SourceTree::default();
        let root = tree.root();
        let big = tree.fork(root).unwrap();
        let small = tree.fork(root).unwrap();
        for _ in 0..3 {
            tree.fork(big).unwrap();
        }
        let engine = LayoutEngine::new(LayoutConfig::default().with_max_jitter(0.0));
        let layout = engine.radial_partition(&tree);

        // big owns 3/4 of the circle, centred at 3π/4; small centred at 7π/4.
        let a_big = layout.get(big).unwrap().to_angle();
        let a_small = layout.get(small).unwrap().to_angle();
        assert!((a_big - 0.75 * PI).abs() < 1e-4);
        assert!((angle_diff(0.0, a_small) - 1.75 * PI).abs() < 1e-4);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let (tree, _) = fan(5);
        let engine = LayoutEngine::default();
        assert_eq!(engine.relayout(&tree), engine.relayout(&tree));
    }

    #[test]
    fn test_anchors_override_and_never_move() {
        let (mut tree, ids) = fan(3);
        let pin = Vec2::new(0.5, -0.25);
        tree.set_anchor(ids[1], pin).unwrap();
        // Pile another source on top of the anchor.
        tree.set_anchor(ids[2], pin + Vec2::new(0.01, 0.0)).unwrap();
        tree.clear_anchor(ids[2]).unwrap();

        let layout = LayoutEngine::default().relayout(&tree);
        assert_eq!(layout.get(ids[1]), Some(pin));
    }

    #[test]
    fn test_coincident_pair_is_separated() {
        let (mut tree, ids) = fan(2);
        let engine = LayoutEngine::default();
        let mut bodies = engine.bodies(&tree, &BTreeMap::from([(ids[0], Vec2::ZERO), (ids[1], Vec2::ZERO)]));
        bodies.retain(|b| b.id != tree.root());
        engine.relax(&mut bodies);
        let d = bodies[0].pos.distance(bodies[1].pos);
        assert!(d >= 0.12 - 1e-4, "distance {d}");

        // Anchored partner stays put while the free one moves away.
        tree.set_anchor(ids[0], Vec2::new(0.2, 0.2)).unwrap();
        let mut bodies = engine.bodies(&tree, &BTreeMap::from([(ids[1], Vec2::new(0.2, 0.2))]));
        bodies.retain(|b| b.id != tree.root());
        engine.relax(&mut bodies);
        assert_eq!(bodies[0].pos, Vec2::new(0.2, 0.2));
        assert!(bodies[0].pos.distance(bodies[1].pos) >= 0.12 - 1e-3);
    }

    #[test]
    fn test_free_end_takes_half_the_push_against_an_anchor() {
        let (mut tree, ids) = fan(2);
        tree.set_anchor(ids[0], Vec2::ZERO).unwrap();
        let engine = LayoutEngine::default();
        let mut bodies = engine.bodies(&tree, &BTreeMap::from([(ids[1], Vec2::new(0.04, 0.0))]));
        bodies.retain(|b| b.id != tree.root());

        assert!(engine.separate(&mut bodies, 0, 1));
        let expected = 0.04 + (0.12 - 0.04) * 0.5 * 0.5;
        assert_eq!(bodies[0].pos, Vec2::ZERO);
        assert!((bodies[1].pos.x - expected).abs() < 1e-6, "{}", bodies[1].pos.x);
    }

    #[test]
    fn test_two_anchored_sources_may_overlap() {
        let (mut tree, ids) = fan(2);
        tree.set_anchor(ids[0], Vec2::new(0.3, 0.3)).unwrap();
        tree.set_anchor(ids[1], Vec2::new(0.31, 0.3)).unwrap();
        let layout = LayoutEngine::default().relayout(&tree);
        assert_eq!(layout.get(ids[0]), Some(Vec2::new(0.3, 0.3)));
        assert_eq!(layout.get(ids[1]), Some(Vec2::new(0.31, 0.3)));
    }

    #[test]
    fn test_tight_cluster_relaxes_apart() {
        let (tree, ids) = fan(4);
        let engine = LayoutEngine::new(LayoutConfig::default().with_iterations(500));
        let start: BTreeMap<SourceId, Vec2> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, Vec2::new(0.4 + i as f32 * 0.005, 0.4)))
            .collect();
        let mut bodies = engine.bodies(&tree, &start);
        bodies.retain(|b| b.id != tree.root());
        engine.relax(&mut bodies);

        for i in 0..bodies.len() {
            for j in i + 1..bodies.len() {
                let d = bodies[i].pos.distance(bodies[j].pos);
                assert!(d >= 0.12 - 1e-3, "pair ({i}, {j}) at {d}");
            }
        }
    }

    #[test]
    fn test_relaxed_layout_has_no_unanchored_overlap() {
        let mut tree = SourceTree::default();
        let root = tree.root();
        for _ in 0..4 {
            let c = tree.fork(root).unwrap();
            tree.fork(c).unwrap();
            tree.fork(c).unwrap();
        }
        let layout = LayoutEngine::default().relayout(&tree);
        let min = layout.min_pair_distance(|_| true).unwrap();
        assert!(min >= 0.12 - 1e-3, "min distance {min}");
    }

    #[test]
    fn test_positions_stay_in_bounds() {
        let mut tree = SourceTree::default();
        let mut cur = tree.root();
        for _ in 0..10 {
            cur = tree.fork(cur).unwrap();
        }
        let layout = LayoutEngine::default().relayout(&tree);
        for p in layout.positions.values() {
            assert!(p.x.abs() <= 0.98 + 1e-6 && p.y.abs() <= 0.98 + 1e-6);
        }
    }

    #[test]
    fn test_relax_around_pushes_the_overlapped_source() {
        let (mut tree, ids) = fan(6);
        let engine = LayoutEngine::new(LayoutConfig::default().with_drag_iterations(32));
        let layout = engine.relayout(&tree);
        tree.commit_positions(layout.positions.iter());

        let target = layout.get(ids[0]).unwrap();
        tree.set_anchor(ids[3], target).unwrap();
        let after = engine.relax_around(&tree, ids[3]);

        assert_eq!(after.get(ids[3]), Some(target));
        assert!(after.get(ids[0]).unwrap().distance(target) >= 0.12 - 1e-3);
    }

    #[test]
    fn test_relax_around_without_overlap_changes_nothing() {
        let (mut tree, ids) = fan(6);
        let engine = LayoutEngine::default();
        let layout = engine.relayout(&tree);
        tree.commit_positions(layout.positions.iter());

        let here = layout.get(ids[2]).unwrap();
        tree.set_anchor(ids[2], here).unwrap();
        assert_eq!(engine.relax_around(&tree, ids[2]).positions, layout.positions);
    }
}
