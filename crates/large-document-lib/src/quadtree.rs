//! Quadtree spatial index over document elements
//!
//! Nodes split into four equal quadrants (NE, NW, SW, SE) once they hold more than
//! `max_objects` elements. An element only moves into a child when it fits entirely
//! inside that child's quadrant; elements straddling a split line stay at the parent.
//! This keeps every element stored exactly once, at the cost of boundary-crossing
//! elements living at shallower levels.
//!
//! The whole tree is guarded by one mutex for the lifetime of the index, so it can be
//! shared between a rendering thread and a content-loading thread.

use crate::{CoreError, Point, Result, SpatialBounds, SpatialElement, degrade};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Default number of elements a node holds before splitting
pub(crate) const DEFAULT_MAX_OBJECTS: usize = 10;

/// Default maximum depth of the tree; deeper nodes accumulate without splitting
pub(crate) const DEFAULT_MAX_LEVELS: u32 = 6;

/// Quadrant order used by [`QuadTreeNode::children`] (y grows downwards)
const NE: usize = 0;
const NW: usize = 1;
const SW: usize = 2;
const SE: usize = 3;

/// Thread-safe quadtree index
///
/// Every public method locks the tree for its whole duration. Fallible operations have
/// `try_*` variants returning [`Result`]; the plain variants log failures and degrade to
/// an empty result or `false`.
#[derive(Debug)]
pub struct SpatialIndex {
    state: Mutex<IndexState>,
    max_objects: usize,
    max_levels: u32,
}

/// Everything behind the index lock
#[derive(Debug)]
struct IndexState {
    root: QuadTreeNode,
    /// Id lookup for update semantics and targeted removal
    elements: HashMap<String, Arc<SpatialElement>>,
}

/// A single node of the quadtree
#[derive(Debug)]
struct QuadTreeNode {
    /// Region covered by this node
    bounds: SpatialBounds,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Elements stored at this node; once split, only elements straddling quadrants
    objects: Vec<Arc<SpatialElement>>,
    /// Child nodes (NE, NW, SW, SE) if split
    children: Option<Box<[QuadTreeNode; 4]>>,
}

/// Shape statistics of the tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub element_count: usize,
    pub node_count: usize,
    pub max_depth: u32,
    /// Elements held at the root (straddlers of the first split line and out-of-bounds elements)
    pub root_objects: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Create an empty index covering `bounds` with default node limits
    pub fn new(bounds: SpatialBounds) -> Self {
        Self::with_limits(bounds, DEFAULT_MAX_OBJECTS, DEFAULT_MAX_LEVELS)
    }

    /// Create an empty index with explicit node limits
    ///
    /// # Arguments
    /// * `bounds` - Region covered by the root node
    /// * `max_objects` - Elements a node holds before splitting (at least 1)
    /// * `max_levels` - Maximum depth; nodes at this depth never split
    pub fn with_limits(bounds: SpatialBounds, max_objects: usize, max_levels: u32) -> Self {
        Self {
            state: Mutex::new(IndexState {
                root: QuadTreeNode::new(bounds, 0),
                elements: HashMap::new(),
            }),
            max_objects: max_objects.max(1),
            max_levels,
        }
    }

    /// Region covered by the root node
    pub fn bounds(&self) -> SpatialBounds {
        self.lock().root.bounds
    }

    /// Insert an element, replacing any element with the same id
    pub fn try_insert(&self, mut element: SpatialElement) -> Result<()> {
        element.bounds.validate()?;
        element.last_updated = Instant::now();

        let mut state = self.lock();
        if let Some(previous) = state.elements.remove(&element.element_id) {
            state.root.remove(&previous.element_id, &previous.bounds);
        }

        let element = Arc::new(element);
        state
            .elements
            .insert(element.element_id.clone(), element.clone());
        state
            .root
            .insert(element, self.max_objects, self.max_levels);
        Ok(())
    }

    /// Insert an element; returns `false` if it could not be indexed
    pub fn insert(&self, element: SpatialElement) -> bool {
        degrade("insert", self.try_insert(element).map(|()| true))
    }

    /// Remove an element by id; `Ok(true)` iff it was present
    pub fn try_remove(&self, element_id: &str) -> Result<bool> {
        let mut state = self.lock();
        let Some(previous) = state.elements.remove(element_id) else {
            return Ok(false);
        };

        if !state.root.remove(element_id, &previous.bounds) {
            // Placement is deterministic, so this only happens if the tree was corrupted
            tracing::warn!(element_id, "element not found along its path; scanning whole tree");
            state.root.remove_anywhere(element_id);
        }
        Ok(true)
    }

    /// Remove an element by id; true iff it was present
    pub fn remove(&self, element_id: &str) -> bool {
        degrade("remove", self.try_remove(element_id))
    }

    /// All elements whose bounds intersect `area` (no ordering guarantee)
    pub fn try_query(&self, area: &SpatialBounds) -> Result<Vec<Arc<SpatialElement>>> {
        area.validate()?;
        let state = self.lock();
        let mut results = Vec::new();
        state.root.query(area, &mut results);
        Ok(results)
    }

    pub fn query(&self, area: &SpatialBounds) -> Vec<Arc<SpatialElement>> {
        degrade("query", self.try_query(area))
    }

    /// All elements whose bounds contain `point`
    pub fn try_query_point(&self, point: Point) -> Result<Vec<Arc<SpatialElement>>> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(CoreError::InvalidPoint {
                x: point.x,
                y: point.y,
            });
        }
        let state = self.lock();
        let mut results = Vec::new();
        state.root.query_point(point, &mut results);
        Ok(results)
    }

    pub fn query_point(&self, point: Point) -> Vec<Arc<SpatialElement>> {
        degrade("query_point", self.try_query_point(point))
    }

    /// Up to `max_results` elements whose centers lie within `max_distance` of `point`
    ///
    /// Candidates come from a square pre-filter of side `2 * max_distance` centred on the
    /// point; this bounds the work but is an approximation, not an incremental
    /// nearest-neighbour search. Results are sorted by ascending center distance.
    pub fn try_query_nearest(
        &self,
        point: Point,
        max_distance: f64,
        max_results: usize,
    ) -> Result<Vec<(Arc<SpatialElement>, f64)>> {
        if !max_distance.is_finite() || max_distance < 0.0 {
            return Err(CoreError::InvalidBounds(format!(
                "max_distance must be finite and non-negative, got {max_distance}"
            )));
        }
        let search_area = SpatialBounds::new(
            point.x - max_distance,
            point.y - max_distance,
            2.0 * max_distance,
            2.0 * max_distance,
        );

        let mut candidates: Vec<(Arc<SpatialElement>, f64)> = self
            .try_query(&search_area)?
            .into_iter()
            .map(|element| {
                let distance = element.bounds.center_distance(point);
                (element, distance)
            })
            .filter(|(_, distance)| *distance <= max_distance)
            .collect();

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates.truncate(max_results);
        Ok(candidates)
    }

    pub fn query_nearest(
        &self,
        point: Point,
        max_distance: f64,
        max_results: usize,
    ) -> Vec<(Arc<SpatialElement>, f64)> {
        degrade(
            "query_nearest",
            self.try_query_nearest(point, max_distance, max_results),
        )
    }

    /// Look up an element by id
    pub fn get(&self, element_id: &str) -> Option<Arc<SpatialElement>> {
        self.lock().elements.get(element_id).cloned()
    }

    pub fn contains(&self, element_id: &str) -> bool {
        self.lock().elements.contains_key(element_id)
    }

    /// Number of indexed elements
    pub fn len(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().elements.is_empty()
    }

    /// Snapshot of every indexed element, in tree order
    pub fn all_elements(&self) -> Vec<Arc<SpatialElement>> {
        let state = self.lock();
        let mut results = Vec::with_capacity(state.elements.len());
        state.root.collect_all(&mut results);
        results
    }

    /// Drop every element, keeping the current bounds
    pub fn clear(&self) {
        let mut state = self.lock();
        let bounds = state.root.bounds;
        state.root = QuadTreeNode::new(bounds, 0);
        state.elements.clear();
    }

    /// Rebuild the tree from scratch, optionally over new bounds
    ///
    /// Snapshot, discard and reinsert happen under one lock acquisition, so concurrent
    /// readers never observe a half-built tree.
    pub fn rebuild(&self, new_bounds: Option<SpatialBounds>) {
        let mut state = self.lock();
        let bounds = new_bounds.unwrap_or(state.root.bounds);

        let mut snapshot = Vec::with_capacity(state.elements.len());
        state.root.collect_all(&mut snapshot);

        let mut root = QuadTreeNode::new(bounds, 0);
        for element in snapshot {
            root.insert(element, self.max_objects, self.max_levels);
        }
        state.root = root;

        tracing::debug!(
            elements = state.elements.len(),
            ?bounds,
            "spatial index rebuilt"
        );
    }

    /// Shape statistics of the current tree
    pub fn stats(&self) -> IndexStats {
        let state = self.lock();
        let mut stats = IndexStats {
            element_count: state.elements.len(),
            root_objects: state.root.objects.len(),
            ..IndexStats::default()
        };
        state.root.accumulate_stats(&mut stats);
        stats
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Spatial index mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl QuadTreeNode {
    fn new(bounds: SpatialBounds, level: u32) -> Self {
        Self {
            bounds,
            level,
            objects: Vec::new(),
            children: None,
        }
    }

    /// Split this node into 4 equal quadrants
    fn split(&mut self) {
        if self.children.is_some() {
            return; // Already split
        }

        let half_width = self.bounds.width / 2.0;
        let half_height = self.bounds.height / 2.0;
        let mid_x = self.bounds.x + half_width;
        let mid_y = self.bounds.y + half_height;
        let x = self.bounds.x;
        let y = self.bounds.y;
        let child_level = self.level + 1;

        let mut children = [
            QuadTreeNode::new(SpatialBounds::default(), child_level),
            QuadTreeNode::new(SpatialBounds::default(), child_level),
            QuadTreeNode::new(SpatialBounds::default(), child_level),
            QuadTreeNode::new(SpatialBounds::default(), child_level),
        ];
        children[NE].bounds = SpatialBounds::new(mid_x, y, half_width, half_height);
        children[NW].bounds = SpatialBounds::new(x, y, half_width, half_height);
        children[SW].bounds = SpatialBounds::new(x, mid_y, half_width, half_height);
        children[SE].bounds = SpatialBounds::new(mid_x, mid_y, half_width, half_height);

        self.children = Some(Box::new(children));
    }

    /// Index of the child quadrant that fully contains `bounds`, if any
    #[inline]
    fn get_index(children: &[QuadTreeNode; 4], bounds: &SpatialBounds) -> Option<usize> {
        children
            .iter()
            .position(|child| child.bounds.contains_bounds(bounds))
    }

    fn insert(&mut self, element: Arc<SpatialElement>, max_objects: usize, max_levels: u32) {
        if let Some(children) = &mut self.children {
            if let Some(index) = Self::get_index(children, &element.bounds) {
                children[index].insert(element, max_objects, max_levels);
                return;
            }
            // Straddles a split line: stays here
            self.objects.push(element);
            return;
        }

        self.objects.push(element);

        if self.objects.len() > max_objects && self.level < max_levels {
            self.split();
            self.redistribute(max_objects, max_levels);
        }
    }

    /// Push every object that fits entirely in a child down into it
    fn redistribute(&mut self, max_objects: usize, max_levels: u32) {
        let Some(children) = &mut self.children else {
            return;
        };

        let objects = std::mem::take(&mut self.objects);
        for object in objects {
            match Self::get_index(children, &object.bounds) {
                Some(index) => children[index].insert(object, max_objects, max_levels),
                None => self.objects.push(object),
            }
        }
    }

    /// Remove by following the path the element's bounds dictate
    fn remove(&mut self, element_id: &str, bounds: &SpatialBounds) -> bool {
        if let Some(position) = self
            .objects
            .iter()
            .position(|o| o.element_id == element_id)
        {
            self.objects.remove(position);
            return true;
        }

        match &mut self.children {
            Some(children) => match Self::get_index(children, bounds) {
                Some(index) => children[index].remove(element_id, bounds),
                None => false,
            },
            None => false,
        }
    }

    /// Remove from every node holding the id
    fn remove_anywhere(&mut self, element_id: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| o.element_id != element_id);
        let mut removed = self.objects.len() != before;

        if let Some(children) = &mut self.children {
            for child in children.iter_mut() {
                removed |= child.remove_anywhere(element_id);
            }
        }
        removed
    }

    /// Collect elements intersecting `area`
    ///
    /// Objects at the root are tested even when the area lies outside the root bounds,
    /// which keeps elements inserted outside the document bounds queryable.
    fn query(&self, area: &SpatialBounds, results: &mut Vec<Arc<SpatialElement>>) {
        let mut stack: SmallVec<[&QuadTreeNode; 32]> = SmallVec::new();
        stack.push(self);

        while let Some(node) = stack.pop() {
            results.extend(
                node.objects
                    .iter()
                    .filter(|o| o.bounds.intersects(area))
                    .cloned(),
            );
            if let Some(children) = &node.children {
                stack.extend(children.iter().filter(|c| c.bounds.intersects(area)));
            }
        }
    }

    fn query_point(&self, point: Point, results: &mut Vec<Arc<SpatialElement>>) {
        let mut stack: SmallVec<[&QuadTreeNode; 32]> = SmallVec::new();
        stack.push(self);

        while let Some(node) = stack.pop() {
            results.extend(
                node.objects
                    .iter()
                    .filter(|o| o.bounds.contains_point(point))
                    .cloned(),
            );
            if let Some(children) = &node.children {
                stack.extend(children.iter().filter(|c| c.bounds.contains_point(point)));
            }
        }
    }

    fn collect_all(&self, results: &mut Vec<Arc<SpatialElement>>) {
        results.extend(self.objects.iter().cloned());
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.collect_all(results);
            }
        }
    }

    fn accumulate_stats(&self, stats: &mut IndexStats) {
        stats.node_count += 1;
        stats.max_depth = stats.max_depth.max(self.level);
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.accumulate_stats(stats);
            }
        }
    }
}
