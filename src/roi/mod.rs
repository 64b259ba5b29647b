//! Regions of interest: the editable polygon registry and its overlay.

mod registry;
pub mod render;

pub use registry::{
    EditState, InputKey, LoadOutcome, PointerEvent, Roi, RoiRegistry, SharedRegistry,
    DEFAULT_ROI_CONFIG_PATH, DEFAULT_THRESHOLD,
};

use crate::geometry::{point_in_polygon, Point};

/// Exact containment, boundary inclusive.
pub fn point_in_region(point: Point, polygon: &[Point]) -> bool {
    point_in_polygon(point, polygon)
}
