//! SpatialIndexManager - Quadtree wrapper with layer/type membership and periodic rebuilds
//!
//! The manager keeps per-layer and per-type id sets in lock-step with the tree so that
//! layer and type queries cost O(|members|) instead of a full scan, and rebuilds the tree
//! after enough insert/remove churn to bound fragmentation.
//!
//! Mutations are serialized by a manager-wide write lock, so the tree, the membership sets
//! and the generation counter always change together. Queries never take that lock.

use crate::quadtree::{DEFAULT_MAX_LEVELS, DEFAULT_MAX_OBJECTS};
use crate::{
    ElementRef, IndexStats, Point, Result, SpatialBounds, SpatialElement, SpatialIndex,
};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the spatial index
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexConfig {
    /// Document region covered by the quadtree root.
    /// Elements outside it are still indexed (at the root) but not subdivided.
    pub bounds: SpatialBounds,
    /// Elements a node holds before splitting. Default: 10
    pub max_objects: usize,
    /// Maximum tree depth. Default: 6
    pub max_levels: u32,
    /// Mutating operations (insert + remove) tolerated before a full rebuild. Default: 1000
    pub auto_rebuild_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bounds: SpatialBounds::new(0.0, 0.0, 10_000.0, 10_000.0),
            max_objects: DEFAULT_MAX_OBJECTS,
            max_levels: DEFAULT_MAX_LEVELS,
            auto_rebuild_threshold: 1000,
        }
    }
}

/// Spatial index with layer/type membership tracking
#[derive(Debug)]
pub struct SpatialIndexManager {
    index: SpatialIndex,
    /// Layer name → element ids
    layers: DashMap<String, HashSet<String>>,
    /// Element type → element ids
    types: DashMap<String, HashSet<String>>,
    /// Held for the whole of every mutation
    write_lock: Mutex<()>,
    /// Mutations since the last rebuild
    operation_count: AtomicUsize,
    /// Monotonic mutation counter, never reset
    generation: AtomicU64,
    auto_rebuild_threshold: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndexManager {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            index: SpatialIndex::with_limits(config.bounds, config.max_objects, config.max_levels),
            layers: DashMap::new(),
            types: DashMap::new(),
            write_lock: Mutex::new(()),
            operation_count: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            auto_rebuild_threshold: config.auto_rebuild_threshold,
        }
    }

    /// Index an element, replacing any previous element with the same id
    ///
    /// Returns `false` if the element could not be indexed (e.g. non-finite bounds).
    pub fn add_element(&self, element: ElementRef) -> bool {
        let mut spatial = SpatialElement::new(element);
        let element_id = spatial.element_id.clone();
        let layer = spatial.layer_name.clone();
        let element_type = spatial.element_type.clone();

        let _guard = self.write_guard();
        // The generation this insert will publish
        spatial.revision = self.generation() + 1;
        let previous = self.index.get(&element_id);

        if !self.index.insert(spatial) {
            return false;
        }

        if let Some(previous) = previous {
            self.forget_membership(&previous);
        }
        self.layers
            .entry(layer)
            .or_default()
            .insert(element_id.clone());
        self.types.entry(element_type).or_default().insert(element_id);

        self.record_mutation();
        true
    }

    /// Remove an element; true iff it was indexed
    pub fn remove_element(&self, element_id: &str) -> bool {
        let _guard = self.write_guard();
        let previous = self.index.get(element_id);
        if !self.index.remove(element_id) {
            return false;
        }
        if let Some(previous) = previous {
            self.forget_membership(&previous);
        }
        self.record_mutation();
        true
    }

    pub fn query_region(&self, area: &SpatialBounds) -> Vec<Arc<SpatialElement>> {
        self.index.query(area)
    }

    pub fn query_point(&self, point: Point) -> Vec<Arc<SpatialElement>> {
        self.index.query_point(point)
    }

    pub fn query_nearest(
        &self,
        point: Point,
        max_distance: f64,
        max_results: usize,
    ) -> Vec<(Arc<SpatialElement>, f64)> {
        self.index.query_nearest(point, max_distance, max_results)
    }

    /// Elements on a layer, in no particular order
    pub fn query_by_layer(&self, layer_name: &str) -> Vec<Arc<SpatialElement>> {
        self.resolve_members(&self.layers, layer_name, |e| e.layer_name.as_str())
    }

    /// Elements of a type, in no particular order
    pub fn query_by_type(&self, element_type: &str) -> Vec<Arc<SpatialElement>> {
        self.resolve_members(&self.types, element_type, |e| e.element_type.as_str())
    }

    pub fn get(&self, element_id: &str) -> Option<Arc<SpatialElement>> {
        self.index.get(element_id)
    }

    pub fn get_element_count(&self) -> usize {
        self.index.len()
    }

    /// Known layer names, sorted
    pub fn layers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Known element types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn layer_size(&self, layer_name: &str) -> usize {
        self.layers.get(layer_name).map_or(0, |members| members.len())
    }

    pub fn type_size(&self, element_type: &str) -> usize {
        self.types.get(element_type).map_or(0, |members| members.len())
    }

    /// Monotonic counter bumped by every successful mutation
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mutations recorded since the last rebuild
    #[inline]
    pub fn pending_operations(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    pub fn bounds(&self) -> SpatialBounds {
        self.index.bounds()
    }

    /// Move the tree to new document bounds, rebuilding it immediately
    pub fn update_bounds(&self, new_bounds: SpatialBounds) -> Result<()> {
        new_bounds.validate()?;
        let _guard = self.write_guard();
        self.index.rebuild(Some(new_bounds));
        self.operation_count.store(0, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Rebuild the tree over its current bounds
    pub fn rebuild(&self) {
        let _guard = self.write_guard();
        self.index.rebuild(None);
        self.operation_count.store(0, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        let _guard = self.write_guard();
        self.index.clear();
        self.layers.clear();
        self.types.clear();
        self.operation_count.store(0, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Direct access to the underlying quadtree
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    fn resolve_members(
        &self,
        sets: &DashMap<String, HashSet<String>>,
        key: &str,
        field: fn(&SpatialElement) -> &str,
    ) -> Vec<Arc<SpatialElement>> {
        // Copy ids out first so the map shard is not held while the index is locked
        let ids: Vec<String> = match sets.get(key) {
            Some(members) => members.iter().cloned().collect(),
            None => return Vec::new(),
        };
        // An id may be re-inserted under another key between the two reads
        ids.iter()
            .filter_map(|id| self.index.get(id))
            .filter(|element| field(element) == key)
            .collect()
    }

    fn forget_membership(&self, element: &SpatialElement) {
        Self::remove_member(&self.layers, &element.layer_name, &element.element_id);
        Self::remove_member(&self.types, &element.element_type, &element.element_id);
    }

    fn remove_member(sets: &DashMap<String, HashSet<String>>, key: &str, element_id: &str) {
        if let Some(mut members) = sets.get_mut(key) {
            members.remove(element_id);
        }
        sets.remove_if(key, |_, members| members.is_empty());
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Index write mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Caller holds the write lock
    fn record_mutation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let operations = self.operation_count.fetch_add(1, Ordering::AcqRel) + 1;
        if operations > self.auto_rebuild_threshold
            && self
                .operation_count
                .compare_exchange(operations, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            tracing::debug!(operations, "auto-rebuilding spatial index");
            self.index.rebuild(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BasicElement;
    use geo::Coord;

    fn manager() -> SpatialIndexManager {
        SpatialIndexManager::new(IndexConfig {
            bounds: SpatialBounds::new(0.0, 0.0, 1000.0, 1000.0),
            ..IndexConfig::default()
        })
    }

    fn sorted_ids(elements: &[Arc<SpatialElement>]) -> Vec<String> {
        let mut ids: Vec<String> = elements.iter().map(|e| e.element_id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_config_default() {
        let config = IndexConfig::default();
        assert_eq!(config.max_objects, 10);
        assert_eq!(config.max_levels, 6);
        assert_eq!(config.auto_rebuild_threshold, 1000);
    }

    #[test]
    fn test_layer_and_type_membership() {
        let manager = manager();
        manager.add_element(
            BasicElement::new("t1", SpatialBounds::new(0.0, 0.0, 10.0, 10.0))
                .with_layer("text")
                .with_type("heading")
                .into_ref(),
        );
        manager.add_element(
            BasicElement::new("t2", SpatialBounds::new(20.0, 0.0, 10.0, 10.0))
                .with_layer("text")
                .into_ref(),
        );
        manager.add_element(
            BasicElement::new("s1", SpatialBounds::new(40.0, 0.0, 10.0, 10.0))
                .with_layer("shapes")
                .into_ref(),
        );

        assert_eq!(sorted_ids(&manager.query_by_layer("text")), vec!["t1", "t2"]);
        assert_eq!(sorted_ids(&manager.query_by_type("heading")), vec!["t1"]);
        assert_eq!(manager.layers(), vec!["shapes", "text"]);
        assert_eq!(manager.types(), vec!["element", "heading"]);
        assert!(manager.query_by_layer("missing").is_empty());
    }

    #[test]
    fn test_insert_then_remove_restores_state() {
        let manager = manager();
        manager.add_element(
            BasicElement::new("base", SpatialBounds::new(5.0, 5.0, 5.0, 5.0)).into_ref(),
        );
        let count_before = manager.get_element_count();

        manager.add_element(
            BasicElement::new("temp", SpatialBounds::new(50.0, 50.0, 5.0, 5.0))
                .with_layer("annotations")
                .with_type("note")
                .into_ref(),
        );
        assert!(manager.remove_element("temp"));

        assert_eq!(manager.get_element_count(), count_before);
        assert_eq!(manager.layer_size("annotations"), 0);
        assert_eq!(manager.type_size("note"), 0);
        assert!(!manager.layers().contains(&"annotations".to_string()));
        assert!(!manager.remove_element("temp"));
    }

    #[test]
    fn test_update_moves_membership() {
        let manager = manager();
        manager.add_element(
            BasicElement::new("e", SpatialBounds::new(0.0, 0.0, 1.0, 1.0))
                .with_layer("draft")
                .into_ref(),
        );
        manager.add_element(
            BasicElement::new("e", SpatialBounds::new(500.0, 500.0, 1.0, 1.0))
                .with_layer("final")
                .into_ref(),
        );

        assert_eq!(manager.get_element_count(), 1);
        assert_eq!(manager.layer_size("draft"), 0);
        assert_eq!(sorted_ids(&manager.query_by_layer("final")), vec!["e"]);
        assert_eq!(
            sorted_ids(&manager.query_point(Coord { x: 500.5, y: 500.5 })),
            vec!["e"]
        );
    }

    /// Every indexed element is in exactly one layer set and one type set
    fn assert_membership_consistent(manager: &SpatialIndexManager) {
        let count = manager.get_element_count();
        let layer_total: usize = manager.layers().iter().map(|l| manager.layer_size(l)).sum();
        let type_total: usize = manager.types().iter().map(|t| manager.type_size(t)).sum();
        assert_eq!(layer_total, count, "layers {:?}", manager.layers());
        assert_eq!(type_total, count, "types {:?}", manager.types());

        for layer in manager.layers() {
            for element in manager.query_by_layer(&layer) {
                assert_eq!(element.layer_name, layer);
            }
        }
    }

    #[test]
    fn test_concurrent_replacement_keeps_membership_in_step() {
        for _ in 0..20 {
            let manager = manager();
            std::thread::scope(|scope| {
                for t in 0..8 {
                    let manager = &manager;
                    scope.spawn(move || {
                        for i in 0..200 {
                            let element = BasicElement::new(
                                format!("e{}", i % 4),
                                SpatialBounds::new(t as f64 * 10.0, i as f64, 5.0, 5.0),
                            )
                            .with_layer(format!("layer{t}"))
                            .with_type(format!("type{}", (t + i) % 3));
                            manager.add_element(element.into_ref());
                        }
                    });
                }
            });

            assert_eq!(manager.get_element_count(), 4);
            assert_membership_consistent(&manager);
        }
    }

    #[test]
    fn test_concurrent_add_and_remove_leave_no_orphans() {
        let manager = manager();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let manager = &manager;
                scope.spawn(move || {
                    for i in 0..300 {
                        let id = format!("e{}", i % 6);
                        manager.add_element(
                            BasicElement::new(id.as_str(), SpatialBounds::new(i as f64, 0.0, 2.0, 2.0))
                                .with_layer(format!("layer{t}"))
                                .into_ref(),
                        );
                    }
                });
                scope.spawn(move || {
                    for i in 0..300 {
                        manager.remove_element(&format!("e{}", (i + t) % 6));
                    }
                });
            }
        });

        assert_membership_consistent(&manager);
        for id in (0..6).map(|i| format!("e{i}")) {
            let in_layers = manager
                .layers()
                .iter()
                .any(|l| manager.query_by_layer(l).iter().any(|e| e.element_id == id));
            assert_eq!(in_layers, manager.get(&id).is_some(), "{id}");
        }
    }

    #[test]
    fn test_insert_stamps_revision() {
        let manager = manager();
        let bounds = SpatialBounds::new(0.0, 0.0, 1.0, 1.0);
        manager.add_element(BasicElement::new("a", bounds).into_ref());
        manager.add_element(BasicElement::new("b", bounds).into_ref());
        assert_eq!(manager.get("a").unwrap().revision, 1);
        assert_eq!(manager.get("b").unwrap().revision, 2);

        manager.add_element(BasicElement::new("a", bounds).into_ref());
        assert_eq!(manager.get("a").unwrap().revision, 3);
        assert_eq!(manager.generation(), 3);

        // A rebuild keeps the entries as they are
        manager.rebuild();
        assert_eq!(manager.get("a").unwrap().revision, 3);
    }

    #[test]
    fn test_invalid_element_rejected() {
        let manager = manager();
        let generation = manager.generation();
        assert!(!manager.add_element(
            BasicElement::new("bad", SpatialBounds::new(f64::NAN, 0.0, 1.0, 1.0)).into_ref()
        ));
        assert_eq!(manager.get_element_count(), 0);
        assert_eq!(manager.layer_size("default"), 0);
        assert_eq!(manager.generation(), generation);
    }

    #[test]
    fn test_auto_rebuild_resets_counter() {
        let manager = SpatialIndexManager::new(IndexConfig {
            bounds: SpatialBounds::new(0.0, 0.0, 100.0, 100.0),
            auto_rebuild_threshold: 5,
            ..IndexConfig::default()
        });
        for i in 0..5 {
            manager.add_element(
                BasicElement::new(format!("e{i}"), SpatialBounds::new(i as f64, 0.0, 1.0, 1.0))
                    .into_ref(),
            );
        }
        assert_eq!(manager.pending_operations(), 5);

        manager.remove_element("e0");
        assert_eq!(manager.pending_operations(), 0, "sixth mutation triggers rebuild");
        assert_eq!(manager.get_element_count(), 4);
        assert_eq!(
            manager
                .query_region(&SpatialBounds::new(0.0, 0.0, 100.0, 100.0))
                .len(),
            4
        );
        assert_eq!(manager.generation(), 6);
    }

    #[test]
    fn test_update_bounds() {
        let manager = manager();
        manager.add_element(
            BasicElement::new("far", SpatialBounds::new(1500.0, 1500.0, 10.0, 10.0)).into_ref(),
        );
        manager
            .update_bounds(SpatialBounds::new(0.0, 0.0, 2000.0, 2000.0))
            .unwrap();
        assert_eq!(manager.bounds(), SpatialBounds::new(0.0, 0.0, 2000.0, 2000.0));
        assert_eq!(
            sorted_ids(&manager.query_point(Coord { x: 1505.0, y: 1505.0 })),
            vec!["far"]
        );
        assert!(
            manager
                .update_bounds(SpatialBounds::new(f64::NAN, 0.0, 1.0, 1.0))
                .is_err()
        );
    }

    #[test]
    fn test_clear() {
        let manager = manager();
        manager.add_element(
            BasicElement::new("a", SpatialBounds::new(1.0, 1.0, 1.0, 1.0)).into_ref(),
        );
        manager.clear();
        assert_eq!(manager.get_element_count(), 0);
        assert!(manager.layers().is_empty());
        assert!(manager.types().is_empty());
    }
}
