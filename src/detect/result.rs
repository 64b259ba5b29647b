use serde::Serialize;

/// Axis-aligned detection box in the pixel space of the image it was found in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiStatus {
    Ok,
    Overflow,
}

impl RoiStatus {
    pub fn classify(count: u32, threshold: u32) -> Self {
        if count >= threshold {
            Self::Overflow
        } else {
            Self::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Overflow => "overflow",
        }
    }
}

/// Per-frame aggregation over all ROIs, in registry order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounts {
    pub roi_counts: Vec<u32>,
    pub statuses: Vec<RoiStatus>,
    pub total: u32,
    pub total_threshold: u32,
}

impl FrameCounts {
    /// Pair counts with thresholds. Both slices are in registry order.
    pub fn classify(roi_counts: Vec<u32>, thresholds: &[u32]) -> Self {
        let statuses = roi_counts
            .iter()
            .zip(thresholds)
            .map(|(&count, &threshold)| RoiStatus::classify(count, threshold))
            .collect();
        let total = roi_counts.iter().sum();
        let total_threshold = thresholds.iter().sum();
        Self {
            roi_counts,
            statuses,
            total,
            total_threshold,
        }
    }

    pub fn any_overflow(&self) -> bool {
        self.statuses.contains(&RoiStatus::Overflow)
    }
}
