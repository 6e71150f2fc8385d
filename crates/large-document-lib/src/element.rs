//! Document element contract and the index-owned wrapper around it
//!
//! Callers own their document elements; the index only keeps a shared reference
//! ([`ElementRef`]) next to the metadata it captured at insert time.

use crate::SpatialBounds;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// What the core needs from a renderable document element
pub trait DocumentElement: Send + Sync {
    /// Unique key of the element within the document
    fn element_id(&self) -> &str;

    /// Bounds in document space
    fn bounds(&self) -> SpatialBounds;

    fn z_index(&self) -> i32 {
        0
    }

    fn layer_name(&self) -> &str {
        "default"
    }

    fn element_type(&self) -> &str {
        "element"
    }

    fn is_visible(&self) -> bool {
        true
    }
}

/// Shared reference to a caller-owned element
pub type ElementRef = Arc<dyn DocumentElement>;

/// Index entry wrapping a caller element with the metadata captured at insert time
///
/// The index never observes later mutation of the underlying element: callers that move
/// an element must re-insert it.
#[derive(Clone)]
pub struct SpatialElement {
    pub element_id: String,
    pub bounds: SpatialBounds,
    pub z_index: i32,
    pub layer_name: String,
    pub element_type: String,
    pub last_updated: Instant,
    /// Manager generation of the insert that produced this entry (0 outside a manager)
    pub revision: u64,
    /// The wrapped element (borrowed, never mutated)
    pub element: ElementRef,
}

impl SpatialElement {
    /// Capture the element's current metadata
    pub fn new(element: ElementRef) -> Self {
        Self {
            element_id: element.element_id().to_owned(),
            bounds: element.bounds(),
            z_index: element.z_index(),
            layer_name: element.layer_name().to_owned(),
            element_type: element.element_type().to_owned(),
            last_updated: Instant::now(),
            revision: 0,
            element,
        }
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.element.is_visible()
    }
}

impl fmt::Debug for SpatialElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialElement")
            .field("element_id", &self.element_id)
            .field("bounds", &self.bounds)
            .field("z_index", &self.z_index)
            .field("layer_name", &self.layer_name)
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}

/// Plain-data element for callers without their own element type
#[derive(Clone, Debug, PartialEq)]
pub struct BasicElement {
    pub id: String,
    pub bounds: SpatialBounds,
    pub z_index: i32,
    pub layer: String,
    pub kind: String,
    pub visible: bool,
}

impl BasicElement {
    pub fn new(id: impl Into<String>, bounds: SpatialBounds) -> Self {
        Self {
            id: id.into(),
            bounds,
            z_index: 0,
            layer: "default".to_owned(),
            kind: "element".to_owned(),
            visible: true,
        }
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Wrap into a shared [`ElementRef`]
    pub fn into_ref(self) -> ElementRef {
        Arc::new(self)
    }
}

impl DocumentElement for BasicElement {
    fn element_id(&self) -> &str {
        &self.id
    }

    fn bounds(&self) -> SpatialBounds {
        self.bounds
    }

    fn z_index(&self) -> i32 {
        self.z_index
    }

    fn layer_name(&self) -> &str {
        &self.layer
    }

    fn element_type(&self) -> &str {
        &self.kind
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}
