//! ROI registry and its interactive edit state machine.
//!
//! ```text
//! Idle --begin_point--> Drawing --close_polygon--> PendingThreshold
//!   ^                                                   |
//!   +-------------- Enter (commit) / Escape (cancel) ---+
//! ```
//!
//! Vertex dragging is orthogonal and only starts from `Idle`. Every mutation
//! requires edit mode; the transient states are never persisted.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::geometry::{point_in_polygon, Point};

pub const DEFAULT_THRESHOLD: u32 = 50;
pub const DEFAULT_ROI_CONFIG_PATH: &str = "roi_config.json";
/// Pointer-down closer than this (px) to a vertex grabs it.
const GRAB_RADIUS: f64 = 10.0;

/// One region of interest. Identity is its index in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roi {
    pub polygon: Vec<Point>,
    pub threshold: u32,
}

impl Roi {
    pub fn contains(&self, point: Point) -> bool {
        point_in_polygon(point, &self.polygon)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Drawing {
        points: Vec<Point>,
    },
    PendingThreshold {
        polygon: Vec<Point>,
        buffer: String,
        prompt: String,
    },
}

/// Keys understood while a threshold is being typed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKey {
    Char(char),
    Backspace,
    Enter,
    Escape,
}

/// Pointer events, mapped onto registry operations like a mouse callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerEvent {
    /// Left button down.
    PrimaryDown(Point),
    /// Right button down: close the polygon being drawn.
    SecondaryDown(Point),
    Move(Point),
    /// Left button up: release any dragged vertex.
    PrimaryUp(Point),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DragHandle {
    roi: usize,
    vertex: usize,
}

/// What `load` found on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file; the registry is unchanged.
    Missing,
    Loaded { rois: usize },
    /// Threshold count did not match polygon count; all reset to the default.
    ThresholdsReset { rois: usize },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RoiFile {
    #[serde(default)]
    polygons: Vec<Vec<Point>>,
    #[serde(default)]
    max_thresholds: Vec<u32>,
}

pub type SharedRegistry = Arc<Mutex<RoiRegistry>>;

#[derive(Clone, Debug)]
pub struct RoiRegistry {
    rois: Vec<Roi>,
    edit_mode: bool,
    state: EditState,
    drag: Option<DragHandle>,
    cursor: Point,
}

impl Default for RoiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoiRegistry {
    pub fn new() -> Self {
        Self {
            rois: Vec::new(),
            edit_mode: false,
            state: EditState::Idle,
            drag: None,
            cursor: Point::default(),
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn thresholds(&self) -> Vec<u32> {
        self.rois.iter().map(|roi| roi.threshold).collect()
    }

    pub fn state(&self) -> &EditState {
        &self.state
    }

    pub fn cursor(&self) -> Point {
        self.cursor
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn is_input_pending(&self) -> bool {
        matches!(self.state, EditState::PendingThreshold { .. })
    }

    // ------------------------------------------------------------------
    // Edit mode
    // ------------------------------------------------------------------

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn set_edit_mode(&mut self, on: bool) {
        if self.edit_mode != on {
            log::info!("ROI edit mode: {}", if on { "ON" } else { "OFF" });
        }
        self.edit_mode = on;
        if !on {
            self.drag = None;
        }
    }

    pub fn toggle_edit_mode(&mut self) -> bool {
        self.set_edit_mode(!self.edit_mode);
        self.edit_mode
    }

    /// Drop every ROI and the polygon being drawn. Edit mode only.
    pub fn clear(&mut self) -> bool {
        if !self.edit_mode || self.is_input_pending() {
            return false;
        }
        self.rois.clear();
        self.state = EditState::Idle;
        self.drag = None;
        log::info!("all ROIs cleared");
        true
    }

    // ------------------------------------------------------------------
    // Drawing and dragging
    // ------------------------------------------------------------------

    /// Grab a nearby vertex, start a polygon, or extend the current one.
    pub fn begin_point(&mut self, p: Point) {
        if !self.edit_mode || self.is_input_pending() {
            return;
        }
        match &mut self.state {
            EditState::Drawing { points } => points.push(p),
            EditState::Idle => {
                if let Some(handle) = self.vertex_near(p) {
                    self.drag = Some(handle);
                } else {
                    self.state = EditState::Drawing { points: vec![p] };
                }
            }
            EditState::PendingThreshold { .. } => {}
        }
    }

    /// Finish the polygon being drawn and ask for its threshold.
    ///
    /// Needs at least three points; otherwise nothing changes.
    pub fn close_polygon(&mut self) -> bool {
        if !self.edit_mode {
            return false;
        }
        let EditState::Drawing { points } = &mut self.state else {
            return false;
        };
        if points.len() < 3 {
            return false;
        }
        let polygon = std::mem::take(points);
        let prompt = format!(
            "Enter Threshold for ROI #{} (then press Enter):",
            self.rois.len() + 1
        );
        self.state = EditState::PendingThreshold {
            polygon,
            buffer: String::new(),
            prompt,
        };
        true
    }

    /// Move the grabbed vertex, if any.
    pub fn drag(&mut self, p: Point) {
        let Some(handle) = self.drag else {
            return;
        };
        if let Some(vertex) = self
            .rois
            .get_mut(handle.roi)
            .and_then(|roi| roi.polygon.get_mut(handle.vertex))
        {
            *vertex = p;
        }
    }

    pub fn release_drag(&mut self) {
        self.drag = None;
    }

    /// Track the pointer for the rubber band and forward to `drag`.
    pub fn pointer_moved(&mut self, p: Point) {
        self.cursor = p;
        if self.edit_mode && !self.is_input_pending() {
            self.drag(p);
        }
    }

    pub fn handle_pointer(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::PrimaryDown(p) => {
                self.cursor = p;
                self.begin_point(p);
            }
            PointerEvent::SecondaryDown(p) => {
                self.cursor = p;
                if !self.is_input_pending() {
                    self.close_polygon();
                }
            }
            PointerEvent::Move(p) => self.pointer_moved(p),
            PointerEvent::PrimaryUp(p) => {
                self.cursor = p;
                self.release_drag();
            }
        }
    }

    fn vertex_near(&self, p: Point) -> Option<DragHandle> {
        self.rois.iter().enumerate().find_map(|(roi, r)| {
            r.polygon
                .iter()
                .position(|v| v.distance_to(p) < GRAB_RADIUS)
                .map(|vertex| DragHandle { roi, vertex })
        })
    }

    // ------------------------------------------------------------------
    // Threshold input
    // ------------------------------------------------------------------

    /// Feed one key to the pending threshold prompt. Ignored otherwise.
    pub fn handle_input_key(&mut self, key: InputKey) {
        let EditState::PendingThreshold { buffer, .. } = &mut self.state else {
            return;
        };
        match key {
            InputKey::Char(c) if c.is_ascii_digit() => buffer.push(c),
            InputKey::Char(_) => {}
            InputKey::Backspace => {
                buffer.pop();
            }
            InputKey::Enter => self.commit_pending(),
            InputKey::Escape => {
                log::info!("ROI creation cancelled");
                self.state = EditState::Idle;
            }
        }
    }

    fn commit_pending(&mut self) {
        let (polygon, buffer) = match std::mem::replace(&mut self.state, EditState::Idle) {
            EditState::PendingThreshold {
                polygon, buffer, ..
            } => (polygon, buffer),
            other => {
                self.state = other;
                return;
            }
        };
        let threshold = buffer.parse::<u32>().unwrap_or(DEFAULT_THRESHOLD);
        self.rois.push(Roi { polygon, threshold });
        log::info!(
            "ROI {} created with max threshold: {}",
            self.rois.len(),
            threshold
        );
    }

    /// Append a finished ROI directly, bypassing the prompt.
    pub fn push(&mut self, polygon: Vec<Point>, threshold: u32) -> Result<()> {
        if polygon.len() < 3 {
            return Err(anyhow!("an ROI needs at least three points"));
        }
        self.rois.push(Roi { polygon, threshold });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = RoiFile {
            polygons: self.rois.iter().map(|roi| roi.polygon.clone()).collect(),
            max_thresholds: self.thresholds(),
        };
        let json = serde_json::to_vec_pretty(&file).context("serialize ROI config")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        crate::evidence::write_atomic(path, &json)
            .with_context(|| format!("write ROI config {}", path.display()))?;
        log::info!("ROI configuration saved to {}", path.display());
        Ok(())
    }

    /// Replace the ROIs with the contents of `path`.
    ///
    /// A missing file leaves the registry as is. Unreadable or malformed
    /// files are errors and also leave it unchanged.
    pub fn load(&mut self, path: &Path) -> Result<LoadOutcome> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "no ROI config file found: {}. Starting with no ROIs.",
                    path.display()
                );
                return Ok(LoadOutcome::Missing);
            }
            Err(e) => {
                return Err(anyhow!("failed to read ROI config {}: {}", path.display(), e))
            }
        };
        let file: RoiFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid ROI config {}: {}", path.display(), e))?;

        let count = file.polygons.len();
        let reset = file.max_thresholds.len() != count;
        let thresholds = if reset {
            log::warn!(
                "mismatch in loaded ROI config ({} polygons, {} thresholds). Resetting all thresholds to {}.",
                count,
                file.max_thresholds.len(),
                DEFAULT_THRESHOLD
            );
            vec![DEFAULT_THRESHOLD; count]
        } else {
            file.max_thresholds
        };
        self.rois = file
            .polygons
            .into_iter()
            .zip(thresholds)
            .map(|(polygon, threshold)| Roi { polygon, threshold })
            .collect();
        self.drag = None;
        log::info!(
            "ROI config loaded from {}. Found {} polygons.",
            path.display(),
            count
        );
        Ok(if reset {
            LoadOutcome::ThresholdsReset { rois: count }
        } else {
            LoadOutcome::Loaded { rois: count }
        })
    }
}
