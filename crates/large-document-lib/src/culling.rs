//! Viewport culling with level-of-detail support and result caching
//!
//! Each frame the culler asks the spatial index for candidates around the viewport and
//! filters them with per-element heuristics ([`ElementCullInfo`]) under one of four
//! interchangeable [`CullingStrategy`]s. Results are cached per viewport for a short TTL,
//! so repeated calls for an unchanged view cost a map lookup.

use crate::{
    CoreError, LodLevel, Point, Result, SpatialBounds, SpatialElement, SpatialIndexManager,
    ViewportBounds, degrade,
};
use dashmap::DashMap;
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pre-fetch margin multiplier per LOD level (prefetch less when zoomed out)
const LOD_MARGIN_SCALE: [f64; 4] = [1.5, 1.2, 1.0, 0.8];

/// Minimum on-screen size multiplier per LOD level (demand larger elements when zoomed out)
const LOD_SIZE_SCALE: [f64; 4] = [1.0, 1.5, 2.0, 3.0];

/// Frustum radius as a fraction of the larger viewport side
const FRUSTUM_RADIUS_FACTOR: f64 = 0.7;

/// Below this zoom, unimportant elements are culled regardless of size
const LOW_ZOOM_THRESHOLD: f64 = 0.5;
const LOW_ZOOM_MIN_IMPORTANCE: f64 = 0.3;

const IMPORTANT_LAYERS: [&str; 3] = ["annotations", "text", "important"];
const IMPORTANT_TYPES: [&str; 3] = ["text", "title", "heading"];

/// How the visible set is computed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CullingStrategy {
    /// Region query on the expanded viewport, then per-element size/distance/importance tests
    Basic,
    /// Basic, with margin and minimum size scaled by the LOD level
    #[default]
    Hierarchical,
    /// Basic, plus a radius cutoff around the viewport center
    Frustum,
    /// Hierarchical, then drop elements fully covered by a higher element
    Occlusion,
}

/// Configuration for the viewport culler
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CullingConfig {
    /// Initial strategy. Default: hierarchical
    pub strategy: CullingStrategy,
    /// How long a cached result stays valid. Default: 1s
    pub cache_ttl: Duration,
    /// Maximum cached viewports; the oldest entry is evicted first. Default: 100
    pub cache_capacity: usize,
    /// Base minimum on-screen size in pixels, before importance scaling. Default: 2.0
    pub min_element_size: f64,
    /// Base maximum distance from the viewport center in document units. Default: 10000
    pub max_cull_distance: f64,
    /// Candidate count from which elements are evaluated in parallel. Default: 2048
    pub parallel_threshold: usize,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            strategy: CullingStrategy::default(),
            cache_ttl: Duration::from_secs(1),
            cache_capacity: 100,
            min_element_size: 2.0,
            max_cull_distance: 10_000.0,
            parallel_threshold: 2048,
        }
    }
}

/// Additive importance score in `[0, 1]`
///
/// Base 0.5; +0.2 for area > 10000; -0.2 for area < 100; +0.2 for z-index > 100;
/// +0.3 on an annotations/text/important layer; +0.2 for text/title/heading types.
pub fn calculate_element_importance(element: &SpatialElement) -> f64 {
    let mut importance = 0.5;

    let area = element.bounds.area();
    if area > 10_000.0 {
        importance += 0.2;
    } else if area < 100.0 {
        importance -= 0.2;
    }

    if element.z_index > 100 {
        importance += 0.2;
    }

    if IMPORTANT_LAYERS.contains(&element.layer_name.as_str()) {
        importance += 0.3;
    }

    if IMPORTANT_TYPES.contains(&element.element_type.as_str()) {
        importance += 0.2;
    }

    f64::clamp(importance, 0.0, 1.0)
}

/// Per-element culling parameters, computed once and reused across frames
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementCullInfo {
    /// Minimum on-screen size (pixels) for the element to be drawn
    pub min_size_threshold: f64,
    /// Maximum distance from the viewport center (document units)
    pub max_distance: f64,
    pub importance: f64,
    /// Number of frames in which the element was visible
    pub visibility_count: u64,
    /// `revision` of the element the info was derived from
    source_revision: u64,
}

impl ElementCullInfo {
    pub fn new(element: &SpatialElement, config: &CullingConfig) -> Self {
        let importance = calculate_element_importance(element);
        Self {
            min_size_threshold: config.min_element_size * (1.5 - importance),
            max_distance: config.max_cull_distance * (0.5 + importance),
            importance,
            visibility_count: 0,
            source_revision: element.revision,
        }
    }

    /// Whether the element should be skipped this frame
    ///
    /// # Arguments
    /// * `bounds` - Element bounds in document space
    /// * `viewport_center` - Center of the visible region
    /// * `zoom_level` - Current zoom (document units → pixels)
    /// * `size_scale` - LOD multiplier applied to the minimum size threshold
    pub fn should_cull(
        &self,
        bounds: &SpatialBounds,
        viewport_center: Point,
        zoom_level: f64,
        size_scale: f64,
    ) -> bool {
        let screen_size = bounds.width.min(bounds.height) * zoom_level;
        if screen_size < self.min_size_threshold * size_scale {
            return true;
        }

        if bounds.center_distance(viewport_center) > self.max_distance {
            return true;
        }

        zoom_level < LOW_ZOOM_THRESHOLD && self.importance < LOW_ZOOM_MIN_IMPORTANCE
    }
}

/// Outcome of one culling pass
#[derive(Clone, Debug, Default)]
pub struct CullingResult {
    /// Elements to render, in paint order (z-index ascending, then id)
    pub visible_elements: Vec<Arc<SpatialElement>>,
    pub culled_count: usize,
    /// Elements in the index at the time of culling
    pub total_elements: usize,
    pub lod_level: LodLevel,
    /// True when served from the cache without recomputation
    pub cache_hit: bool,
}

/// Snapshot of culler activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CullingStats {
    pub frames: u64,
    pub cache_hits: u64,
    pub last_visible_count: usize,
    /// Duration of the last computed (non-cached) pass
    pub last_cull_time: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    strategy: CullingStrategy,
    /// Bounds rounded to 0.1 document units, as tenths
    bounds: [i64; 4],
    /// Zoom rounded to 0.01, as hundredths
    zoom: i64,
}

impl CacheKey {
    fn new(strategy: CullingStrategy, viewport: &ViewportBounds) -> Self {
        let tenths = |v: f64| (v * 10.0).round() as i64;
        let b = &viewport.bounds;
        Self {
            strategy,
            bounds: [tenths(b.x), tenths(b.y), tenths(b.width), tenths(b.height)],
            zoom: (viewport.zoom_level * 100.0).round() as i64,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    result: CullingResult,
    inserted_at: Instant,
    generation: u64,
}

/// TTL cache of culling results keyed by strategy and rounded viewport
///
/// Lookups use `peek`, so entries are never promoted and the LRU order is insertion order:
/// on overflow the oldest inserted entry goes first.
#[derive(Debug)]
struct ViewportCullingCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ViewportCullingCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fresh result for `key` computed against the given index generation
    fn get(&self, key: &CacheKey, generation: u64) -> Option<CullingResult> {
        let mut entries = self.lock();
        let lookup = entries.peek(key).map(|entry| {
            (entry.inserted_at.elapsed() <= self.ttl && entry.generation == generation)
                .then(|| entry.result.clone())
        });

        match lookup {
            Some(Some(result)) => Some(result),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: CacheKey, result: CullingResult, generation: u64) {
        let entry = CacheEntry {
            result,
            inserted_at: Instant::now(),
            generation,
        };
        if let Some((evicted, _)) = self.lock().push(key, entry)
            && evicted != key
        {
            tracing::debug!(?evicted, "culling cache full; evicted oldest entry");
        }
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Culling cache mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Computes the per-frame visible element set
#[derive(Debug)]
pub struct ViewportCuller {
    config: CullingConfig,
    strategy: CullingStrategy,
    cache: ViewportCullingCache,
    /// Element id → cached culling parameters
    cull_info: DashMap<String, ElementCullInfo>,
    /// Index generation at which `cull_info` was last checked for removed ids
    pruned_generation: AtomicU64,
    frames: AtomicU64,
    cache_hits: AtomicU64,
    last_visible_count: AtomicUsize,
    last_cull_nanos: AtomicU64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ViewportCuller {
    pub fn new(config: CullingConfig) -> Self {
        Self {
            strategy: config.strategy,
            cache: ViewportCullingCache::new(config.cache_capacity, config.cache_ttl),
            cull_info: DashMap::new(),
            pruned_generation: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            last_visible_count: AtomicUsize::new(0),
            last_cull_nanos: AtomicU64::new(0),
            config,
        }
    }

    #[inline]
    pub fn strategy(&self) -> CullingStrategy {
        self.strategy
    }

    /// Switch strategy; cached results from the previous strategy are dropped
    pub fn set_strategy(&mut self, strategy: CullingStrategy) {
        if strategy != self.strategy {
            tracing::debug!(from = ?self.strategy, to = ?strategy, "culling strategy changed");
        }
        self.strategy = strategy;
        self.cache.clear();
    }

    /// Visible elements for `viewport`; degrades to an empty result on invalid input
    pub fn cull_elements(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> CullingResult {
        degrade("cull_elements", self.try_cull_elements(index, viewport))
    }

    /// Visible elements for `viewport`, rejecting non-finite bounds or non-positive zoom
    pub fn try_cull_elements(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> Result<CullingResult> {
        #[cfg(feature = "profiling")]
        profiling::scope!("culler::cull_elements");

        viewport.bounds.validate()?;
        if !viewport.zoom_level.is_finite() || viewport.zoom_level <= 0.0 {
            return Err(CoreError::InvalidZoom(viewport.zoom_level));
        }

        self.frames.fetch_add(1, Ordering::Relaxed);
        let generation = index.generation();
        let key = CacheKey::new(self.strategy, viewport);

        if let Some(mut cached) = self.cache.get(&key, generation) {
            cached.cache_hit = true;
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        self.prune_removed(index, generation);

        let started = Instant::now();
        let mut visible = match self.strategy {
            CullingStrategy::Basic => self.cull_basic(index, viewport),
            CullingStrategy::Hierarchical => self.cull_hierarchical(index, viewport),
            CullingStrategy::Frustum => self.cull_frustum(index, viewport),
            CullingStrategy::Occlusion => self.cull_occlusion(index, viewport),
        };
        visible.sort_by(|a, b| {
            a.z_index
                .cmp(&b.z_index)
                .then_with(|| a.element_id.cmp(&b.element_id))
        });

        let total_elements = index.get_element_count();
        let result = CullingResult {
            culled_count: total_elements.saturating_sub(visible.len()),
            total_elements,
            lod_level: viewport.lod_level(),
            cache_hit: false,
            visible_elements: visible,
        };

        let elapsed = started.elapsed();
        self.last_cull_nanos.store(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        self.last_visible_count
            .store(result.visible_elements.len(), Ordering::Relaxed);
        tracing::trace!(
            strategy = ?self.strategy,
            visible = result.visible_elements.len(),
            culled = result.culled_count,
            ?elapsed,
            "culled viewport"
        );

        self.cache.put(key, result.clone(), generation);
        Ok(result)
    }

    /// Cached culling parameters for an element, if computed
    ///
    /// Entries of elements removed from the index are dropped by the next computed pass.
    pub fn cull_info(&self, element_id: &str) -> Option<ElementCullInfo> {
        self.cull_info.get(element_id).map(|info| *info)
    }

    /// Drop cached parameters for a removed element right away
    pub fn forget_element(&self, element_id: &str) {
        self.cull_info.remove(element_id);
    }

    /// Drop every cached result (per-element parameters are kept)
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop cached results and per-element parameters
    pub fn reset(&self) {
        self.cache.clear();
        self.cull_info.clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> CullingStats {
        CullingStats {
            frames: self.frames.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            last_visible_count: self.last_visible_count.load(Ordering::Relaxed),
            last_cull_time: Duration::from_nanos(self.last_cull_nanos.load(Ordering::Relaxed)),
        }
    }

    pub fn config(&self) -> &CullingConfig {
        &self.config
    }

    /// Drop cull info of ids the index no longer holds, once per index generation
    fn prune_removed(&self, index: &SpatialIndexManager, generation: u64) {
        if self.pruned_generation.swap(generation, Ordering::AcqRel) == generation
            || self.cull_info.is_empty()
        {
            return;
        }

        let before = self.cull_info.len();
        self.cull_info.retain(|id, _| index.get(id).is_some());
        let pruned = before.saturating_sub(self.cull_info.len());
        if pruned > 0 {
            tracing::debug!(pruned, generation, "dropped cull info of removed elements");
        }
    }

    fn cull_basic(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> Vec<Arc<SpatialElement>> {
        let candidates = index.query_region(&viewport.expanded_bounds());
        self.evaluate(candidates, viewport, 1.0, None)
    }

    fn cull_hierarchical(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> Vec<Arc<SpatialElement>> {
        let lod = viewport.lod_level().as_index();
        let search_area = viewport
            .bounds
            .expand(viewport.margin * LOD_MARGIN_SCALE[lod]);
        let candidates = index.query_region(&search_area);
        self.evaluate(candidates, viewport, LOD_SIZE_SCALE[lod], None)
    }

    fn cull_frustum(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> Vec<Arc<SpatialElement>> {
        let radius = FRUSTUM_RADIUS_FACTOR * viewport.bounds.width.max(viewport.bounds.height);
        let candidates = index.query_region(&viewport.expanded_bounds());
        self.evaluate(candidates, viewport, 1.0, Some(radius))
    }

    /// Approximate 2D painter's occlusion: an element is hidden when an accepted element
    /// with strictly higher z-index fully contains it
    fn cull_occlusion(
        &self,
        index: &SpatialIndexManager,
        viewport: &ViewportBounds,
    ) -> Vec<Arc<SpatialElement>> {
        let mut survivors = self.cull_hierarchical(index, viewport);
        survivors.sort_by(|a, b| {
            b.z_index
                .cmp(&a.z_index)
                .then_with(|| a.element_id.cmp(&b.element_id))
        });

        let mut accepted: Vec<Arc<SpatialElement>> = Vec::with_capacity(survivors.len());
        for element in survivors {
            let occluded = accepted.iter().any(|front| {
                front.z_index > element.z_index && front.bounds.contains_bounds(&element.bounds)
            });
            if !occluded {
                accepted.push(element);
            }
        }
        accepted
    }

    /// Apply per-element tests, in parallel for large candidate sets
    fn evaluate(
        &self,
        candidates: Vec<Arc<SpatialElement>>,
        viewport: &ViewportBounds,
        size_scale: f64,
        radius: Option<f64>,
    ) -> Vec<Arc<SpatialElement>> {
        let center = viewport.center();
        let zoom = viewport.zoom_level;

        let keep = |element: &Arc<SpatialElement>| -> bool {
            if !element.is_visible() {
                return false;
            }
            if let Some(radius) = radius
                && element.bounds.center_distance(center) > radius
            {
                return false;
            }
            self.with_cull_info(element, |info| {
                if info.should_cull(&element.bounds, center, zoom, size_scale) {
                    false
                } else {
                    info.visibility_count += 1;
                    true
                }
            })
        };

        if candidates.len() >= self.config.parallel_threshold {
            candidates.into_par_iter().filter(|e| keep(e)).collect()
        } else {
            candidates.into_iter().filter(|e| keep(e)).collect()
        }
    }

    /// Run `f` on the element's cull info, (re)computing it if missing or stale
    fn with_cull_info<R>(
        &self,
        element: &SpatialElement,
        f: impl FnOnce(&mut ElementCullInfo) -> R,
    ) -> R {
        if let Some(mut info) = self.cull_info.get_mut(element.element_id.as_str()) {
            if info.source_revision != element.revision {
                let visibility_count = info.visibility_count;
                *info = ElementCullInfo::new(element, &self.config);
                info.visibility_count = visibility_count;
            }
            return f(&mut *info);
        }

        let mut info = self
            .cull_info
            .entry(element.element_id.clone())
            .or_insert_with(|| ElementCullInfo::new(element, &self.config));
        f(&mut *info)
    }
}
