//! The source tree: ground truth for blob topology.
//!
//! Sources live in an id-ordered map and refer to each other by [`SourceId`].
//! Every mutation goes through a `SourceTree` method, and every method either
//! applies completely or returns an error without touching the tree.
//!
//! # Example
//!
//! ```ignore
//! let mut tree = SourceTree::new(TreeConfig::default());
//! let a = tree.fork(tree.root())?;
//! let b = tree.fork(tree.root())?;
//! tree.merge(a, b)?;
//! assert_eq!(tree.len(), 2);
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StateError, TreeError};
use crate::source::{derive_seed, Source, SourceId, STREAM_SPAWN};

/// Hard ceiling for [`TreeConfig::max_sources`].
pub const MAX_SOURCES_LIMIT: usize = 256;

/// Radius and capacity policy of a tree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreeConfig {
    /// Radius of the root (depth 0).
    pub base_radius: f32,
    /// Geometric decay per depth level (α).
    pub radius_decay: f32,
    pub min_radius: f32,
    pub max_radius: f32,
    /// Maximum number of live sources, root included.
    pub max_sources: usize,
    /// Seed of the root source; every other seed derives from it.
    pub root_seed: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            base_radius: 0.35,
            radius_decay: 0.7,
            min_radius: 0.04,
            max_radius: 0.5,
            max_sources: 128,
            root_seed: 12345,
        }
    }
}

impl TreeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root radius.
    pub fn with_base_radius(mut self, radius: f32) -> Self {
        self.base_radius = radius.max(1e-3);
        self
    }

    /// Set the per-level radius decay (clamped to 0.62-0.88).
    pub fn with_radius_decay(mut self, decay: f32) -> Self {
        self.radius_decay = decay.clamp(0.62, 0.88);
        self
    }

    /// Set the radius clamp range.
    pub fn with_radius_range(mut self, min: f32, max: f32) -> Self {
        self.min_radius = min.max(1e-3);
        self.max_radius = max.max(self.min_radius);
        self
    }

    /// Set the live source cap (clamped to 1-256).
    pub fn with_max_sources(mut self, max: usize) -> Self {
        self.max_sources = max.clamp(1, MAX_SOURCES_LIMIT);
        self
    }

    pub fn with_root_seed(mut self, seed: u32) -> Self {
        self.root_seed = seed;
        self
    }

    /// Copy with every field forced into its documented range.
    pub fn clamped(&self) -> Self {
        Self::new()
            .with_base_radius(self.base_radius)
            .with_radius_decay(self.radius_decay)
            .with_radius_range(self.min_radius, self.max_radius)
            .with_max_sources(self.max_sources)
            .with_root_seed(self.root_seed)
    }

    /// `base_radius * decay^depth`, clamped to the radius range.
    pub fn radius_at_depth(&self, depth: usize) -> f32 {
        let r = self.base_radius * self.radius_decay.powi(depth as i32);
        r.clamp(self.min_radius, self.max_radius)
    }
}

/// Arena of sources with parent/child links.
#[derive(Clone, Debug)]
pub struct SourceTree {
    sources: BTreeMap<SourceId, Source>,
    root: SourceId,
    next_id: u32,
    config: TreeConfig,
}

impl SourceTree {
    /// Create a tree holding only the root.
    pub fn new(config: TreeConfig) -> Self {
        let config = config.clamped();
        let root = SourceId(0);
        let mut sources = BTreeMap::new();
        sources.insert(
            root,
            Source::new(root, config.root_seed, None, Vec2::ZERO, config.radius_at_depth(0)),
        );
        Self {
            sources,
            root,
            next_id: 1,
            config,
        }
    }

    /// Rebuild a tree from raw parts, checking every invariant.
    ///
    /// Children lists are rebuilt from parent links, in the order the sources
    /// appear in `sources`.
    pub fn from_parts(
        config: TreeConfig,
        root: SourceId,
        next_id: u32,
        sources: Vec<Source>,
    ) -> Result<Self, StateError> {
        let config = config.clamped();
        let mut map = BTreeMap::new();
        let mut order = Vec::with_capacity(sources.len());
        for mut source in sources {
            let id = source.id;
            source.children.clear();
            order.push((id, source.parent));
            if map.insert(id, source).is_some() {
                return Err(StateError::invalid(format!("duplicate source id {id}")));
            }
        }
        for (id, parent) in order {
            if let Some(parent) = parent {
                match map.get_mut(&parent) {
                    Some(p) => p.children.push(id),
                    None => {
                        return Err(StateError::invalid(format!(
                            "source {id} references missing parent {parent}"
                        )))
                    }
                }
            }
        }
        let tree = Self {
            sources: map,
            root,
            next_id,
            config,
        };
        tree.validate()?;
        Ok(tree)
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn root(&self) -> SourceId {
        self.root
    }

    /// Id the next created source will receive.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Number of live sources, root included.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false: the root cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }

    fn require(&self, id: SourceId) -> Result<&Source, TreeError> {
        self.sources.get(&id).ok_or(TreeError::NotFound(id))
    }

    fn node_mut(&mut self, id: SourceId) -> Result<&mut Source, TreeError> {
        self.sources.get_mut(&id).ok_or(TreeError::NotFound(id))
    }

    /// Sources in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.keys().copied()
    }

    pub fn children(&self, id: SourceId) -> Result<&[SourceId], TreeError> {
        Ok(&self.require(id)?.children)
    }

    pub fn parent(&self, id: SourceId) -> Result<Option<SourceId>, TreeError> {
        Ok(self.require(id)?.parent)
    }

    /// Distance from the root in edges.
    pub fn depth(&self, id: SourceId) -> Option<usize> {
        let mut depth = 0;
        let mut cur = self.sources.get(&id)?;
        while let Some(parent) = cur.parent {
            depth += 1;
            if depth > self.sources.len() {
                return None;
            }
            cur = self.sources.get(&parent)?;
        }
        Some(depth)
    }

    /// Depth of every source reachable from the root.
    pub fn depths(&self) -> BTreeMap<SourceId, usize> {
        let mut depths = BTreeMap::new();
        let mut queue = VecDeque::from([(self.root, 0usize)]);
        while let Some((id, depth)) = queue.pop_front() {
            if depths.insert(id, depth).is_some() {
                continue;
            }
            if let Some(source) = self.sources.get(&id) {
                queue.extend(source.children.iter().map(|&c| (c, depth + 1)));
            }
        }
        depths
    }

    /// Number of leaves below `id` (1 for a leaf).
    pub fn leaf_size(&self, id: SourceId) -> usize {
        self.subtree(id)
            .into_iter()
            .filter(|c| self.sources.get(c).is_some_and(Source::is_leaf))
            .count()
            .max(1)
    }

    /// `id` followed by all its descendants, depth-first pre-order.
    pub fn subtree(&self, id: SourceId) -> Vec<SourceId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        let mut seen = HashSet::new();
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            let Some(source) = self.sources.get(&cur) else { continue };
            out.push(cur);
            stack.extend(source.children.iter().rev().copied());
        }
        out
    }

    /// Whether `node` lies strictly below `ancestor`.
    pub fn is_descendant(&self, ancestor: SourceId, node: SourceId) -> bool {
        let mut cur = self.sources.get(&node).and_then(|s| s.parent);
        let mut steps = 0;
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.sources.len() {
                return false;
            }
            cur = self.sources.get(&id).and_then(|s| s.parent);
        }
        false
    }

    /// Room for `additional` sources, counting both live slots and unused ids.
    fn ensure_capacity(&self, additional: usize) -> Result<(), TreeError> {
        let ids_left = u64::from((u32::MAX - 1).saturating_sub(self.next_id));
        if self.sources.len() + additional > self.config.max_sources || additional as u64 > ids_left {
            return Err(TreeError::CapacityExceeded {
                limit: self.config.max_sources,
            });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<SourceId, TreeError> {
        // `next_id` never reaches `u32::MAX`; `validate` rejects it.
        let next = self.next_id.checked_add(1).filter(|&n| n < u32::MAX).ok_or(TreeError::CapacityExceeded {
            limit: self.config.max_sources,
        })?;
        let id = SourceId(self.next_id);
        self.next_id = next;
        Ok(id)
    }

    /// Create a new leaf under `parent`.
    pub fn fork(&mut self, parent: SourceId) -> Result<SourceId, TreeError> {
        let (parent_seed, parent_pos) = {
            let p = self.require(parent)?;
            (p.seed, p.position)
        };
        self.ensure_capacity(1)?;
        let depth = self.depth(parent).unwrap_or(0) + 1;
        let id = self.allocate_id()?;
        let mut source = Source::new(
            id,
            derive_seed(parent_seed, id),
            Some(parent),
            parent_pos,
            self.config.radius_at_depth(depth),
        );
        source.position = parent_pos + source.offset_within(STREAM_SPAWN, 0.05);
        self.sources.insert(id, source);
        self.node_mut(parent)?.children.push(id);
        info!(%parent, child = %id, live = self.sources.len(), "forked source");
        Ok(id)
    }

    /// Fork two children at once. Fails without changes if both do not fit.
    pub fn split(&mut self, id: SourceId) -> Result<(SourceId, SourceId), TreeError> {
        self.require(id)?;
        self.ensure_capacity(2)?;
        let a = self.fork(id)?;
        let b = self.fork(id)?;
        let center = self.require(id)?.position;
        self.node_mut(a)?.position = center + Vec2::new(0.1, 0.0);
        self.node_mut(b)?.position = center - Vec2::new(0.1, 0.0);
        Ok((a, b))
    }

    /// Fold `from` into `to`.
    ///
    /// `from`'s children move to `to`, `from`'s parent lists `to` in its
    /// place (unless `to` is an ancestor of `from`, which would close a
    /// cycle), and `from` is removed.
    pub fn merge(&mut self, from: SourceId, to: SourceId) -> Result<(), TreeError> {
        self.require(from)?;
        self.require(to)?;
        if from == to {
            return Err(TreeError::InvalidMerge {
                from,
                to,
                reason: "a source cannot merge into itself",
            });
        }
        if from == self.root {
            return Err(TreeError::InvalidMerge {
                from,
                to,
                reason: "the root cannot be merged away",
            });
        }
        if self.is_descendant(from, to) {
            return Err(TreeError::InvalidMerge {
                from,
                to,
                reason: "target is a descendant of the source",
            });
        }

        let parent = self.require(from)?.parent.ok_or(TreeError::InvalidMerge {
            from,
            to,
            reason: "the root cannot be merged away",
        })?;
        // `to` above `from` would close a cycle if it took `from`'s slot.
        let to_is_ancestor = parent == to || self.is_descendant(to, parent);
        let removed = self.sources.remove(&from).ok_or(TreeError::NotFound(from))?;

        if to_is_ancestor {
            self.node_mut(parent)?.children.retain(|&c| c != from);
        } else {
            let old_parent = self.require(to)?.parent;
            if let Some(old) = old_parent.filter(|&p| p != parent) {
                self.node_mut(old)?.children.retain(|&c| c != to);
            }
            let siblings = &mut self.node_mut(parent)?.children;
            let already_listed = siblings.contains(&to);
            match siblings.iter().position(|&c| c == from) {
                Some(slot) if !already_listed => siblings[slot] = to,
                _ => siblings.retain(|&c| c != from),
            }
            self.node_mut(to)?.parent = Some(parent);
        }

        for child in &removed.children {
            self.node_mut(*child)?.parent = Some(to);
        }
        let survivor = self.node_mut(to)?;
        for child in removed.children {
            if !survivor.children.contains(&child) {
                survivor.children.push(child);
            }
        }
        self.refresh_radii();
        info!(%from, %to, live = self.sources.len(), "merged source");
        Ok(())
    }

    /// Move `id` and its subtree under `new_parent`.
    pub fn reparent(&mut self, id: SourceId, new_parent: SourceId) -> Result<(), TreeError> {
        let old_parent = self.require(id)?.parent;
        self.require(new_parent)?;
        if id == new_parent || id == self.root || self.is_descendant(id, new_parent) {
            return Err(TreeError::InvalidMerge {
                from: id,
                to: new_parent,
                reason: "reparenting would remove the root or create a cycle",
            });
        }
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        if let Some(old) = old_parent {
            self.node_mut(old)?.children.retain(|&c| c != id);
        }
        self.node_mut(new_parent)?.children.push(id);
        self.node_mut(id)?.parent = Some(new_parent);
        self.refresh_radii();
        debug!(%id, %new_parent, "reparented subtree");
        Ok(())
    }

    /// Duplicate `to`'s descendants under `from`, leaving `to` untouched.
    ///
    /// Returns the ids of the copies in pre-order.
    pub fn inherit_context(&mut self, from: SourceId, to: SourceId) -> Result<Vec<SourceId>, TreeError> {
        self.require(from)?;
        self.require(to)?;
        if from == to {
            return Err(TreeError::InvalidMerge {
                from,
                to,
                reason: "a source cannot inherit its own context",
            });
        }
        let template: Vec<Source> = self
            .subtree(to)
            .into_iter()
            .skip(1)
            .filter_map(|id| self.sources.get(&id).cloned())
            .collect();
        self.ensure_capacity(template.len())?;

        let mut mapping = BTreeMap::from([(to, from)]);
        let mut created = Vec::with_capacity(template.len());
        for original in template {
            let Some(new_parent) = original.parent.and_then(|p| mapping.get(&p).copied()) else {
                continue;
            };
            let parent_seed = self.require(new_parent)?.seed;
            let id = self.allocate_id()?;
            let mut copy = Source::new(id, derive_seed(parent_seed, id), Some(new_parent), original.position, original.radius);
            copy.weight = original.weight;
            copy.label = original.label.clone();
            self.sources.insert(id, copy);
            self.node_mut(new_parent)?.children.push(id);
            mapping.insert(original.id, id);
            created.push(id);
        }
        self.refresh_radii();
        info!(%from, %to, copied = created.len(), "inherited context");
        Ok(created)
    }

    /// Pin a source at `pos`.
    pub fn set_anchor(&mut self, id: SourceId, pos: Vec2) -> Result<(), TreeError> {
        let source = self.node_mut(id)?;
        source.anchor = Some(pos);
        source.position = pos;
        Ok(())
    }

    /// Unpin a source, returning its previous anchor.
    pub fn clear_anchor(&mut self, id: SourceId) -> Result<Option<Vec2>, TreeError> {
        Ok(self.node_mut(id)?.anchor.take())
    }

    pub fn set_label(&mut self, id: SourceId, label: impl Into<String>) -> Result<(), TreeError> {
        self.node_mut(id)?.label = Some(label.into());
        Ok(())
    }

    /// Set the field weight (negative values clamp to zero).
    pub fn set_weight(&mut self, id: SourceId, weight: f32) -> Result<(), TreeError> {
        self.node_mut(id)?.weight = weight.max(0.0);
        Ok(())
    }

    /// Write layout output into the committed positions.
    pub(crate) fn commit_positions<'a>(&mut self, positions: impl IntoIterator<Item = (&'a SourceId, &'a Vec2)>) {
        for (id, pos) in positions {
            if let Some(source) = self.sources.get_mut(id) {
                source.position = *pos;
            }
        }
    }

    fn refresh_radii(&mut self) {
        let config = self.config.clone();
        for (id, depth) in self.depths() {
            if let Some(source) = self.sources.get_mut(&id) {
                source.radius = config.radius_at_depth(depth);
            }
        }
    }

    /// Check every tree invariant.
    pub fn validate(&self) -> Result<(), StateError> {
        let root = self
            .sources
            .get(&self.root)
            .ok_or_else(|| StateError::invalid(format!("root {} is missing", self.root)))?;
        if root.parent.is_some() {
            return Err(StateError::invalid("root has a parent"));
        }
        if self.sources.len() > self.config.max_sources {
            return Err(StateError::invalid(format!(
                "{} sources exceed the capacity of {}",
                self.sources.len(),
                self.config.max_sources
            )));
        }

        if self.next_id == u32::MAX {
            return Err(StateError::invalid("next id leaves no room for new sources"));
        }

        for (id, source) in &self.sources {
            if source.id != *id {
                return Err(StateError::invalid(format!("source stored under {id} claims id {}", source.id)));
            }
            if id.0 >= self.next_id {
                return Err(StateError::invalid(format!("source {id} is not below next id {}", self.next_id)));
            }
            match source.parent {
                None if *id != self.root => {
                    return Err(StateError::invalid(format!("source {id} has no parent but is not the root")))
                }
                Some(parent) => {
                    let p = self
                        .sources
                        .get(&parent)
                        .ok_or_else(|| StateError::invalid(format!("source {id} references missing parent {parent}")))?;
                    if p.children.iter().filter(|&&c| c == *id).count() != 1 {
                        return Err(StateError::invalid(format!("parent {parent} does not list {id} exactly once")));
                    }
                }
                None => {}
            }
            for child in &source.children {
                let c = self
                    .sources
                    .get(child)
                    .ok_or_else(|| StateError::invalid(format!("source {id} lists missing child {child}")))?;
                if c.parent != Some(*id) {
                    return Err(StateError::invalid(format!("child {child} does not point back to {id}")));
                }
            }
            if !(source.radius.is_finite() && source.radius > 0.0) {
                return Err(StateError::invalid(format!("source {id} has non-positive radius")));
            }
            if !(source.weight.is_finite() && source.weight >= 0.0) {
                return Err(StateError::invalid(format!("source {id} has invalid weight")));
            }
            if !source.position.is_finite() || source.anchor.is_some_and(|a| !a.is_finite()) {
                return Err(StateError::invalid(format!("source {id} has a non-finite position")));
            }
            if self.depth(*id).is_none() {
                return Err(StateError::invalid(format!("source {id} is part of a cycle")));
            }
        }

        let depths = self.depths();
        if depths.len() != self.sources.len() {
            return Err(StateError::invalid("tree contains sources unreachable from the root"));
        }
        for (id, depth) in depths {
            let expected = self.config.radius_at_depth(depth);
            let actual = self.sources[&id].radius;
            if (expected - actual).abs() > 1e-4 * expected.max(1.0) {
                return Err(StateError::invalid(format!(
                    "source {id} radius {actual} does not match depth {depth} (expected {expected})"
                )));
            }
        }
        Ok(())
    }
}

impl Default for SourceTree {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}
