use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Reporting bands for match confidence.
///
/// These are a presentation policy; acceptance thresholds are chosen by
/// each caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// Below 0.8: usable, but must be flagged.
    Low,
    /// 0.8 up to 0.9.
    Good,
    /// 0.9 and above.
    Strong,
}

impl ConfidenceBand {
    pub const GOOD: f64 = 0.8;
    pub const STRONG: f64 = 0.9;

    pub fn from_score(confidence: f64) -> Self {
        if confidence >= Self::STRONG {
            ConfidenceBand::Strong
        } else if confidence >= Self::GOOD {
            ConfidenceBand::Good
        } else {
            ConfidenceBand::Low
        }
    }
}

/// Where a scaled probe sits inside a search image.
///
/// Offsets are the probe's top-left pixel in the search image; the
/// rectangle always lies inside the search bounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
    /// Correlation at this offset, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Factor applied to the probe along x before matching.
    pub scale_x: f64,
    /// Factor applied to the probe along y before matching.
    pub scale_y: f64,
}

impl Alignment {
    /// Center of the matched rectangle in continuous pixel coordinates.
    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.confidence)
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Agreement between a metadata prediction and an image-based match.
///
/// Disagreement is reported, not fatal; both positions are kept so the
/// caller can choose.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheck {
    pub predicted: Point2<f64>,
    pub matched: Point2<f64>,
    pub distance_px: f64,
    pub threshold_px: f64,
    pub consistent: bool,
}

impl ConsistencyCheck {
    pub fn new(predicted: Point2<f64>, matched: Point2<f64>, threshold_px: f64) -> Self {
        let distance_px = (matched - predicted).norm();
        Self {
            predicted,
            matched,
            distance_px,
            threshold_px,
            consistent: distance_px <= threshold_px,
        }
    }
}

/// A detail image placed on an overview.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub detail_id: String,
    /// Match in the de-rotated overview frame.
    pub alignment: Alignment,
    /// Match center on the overview as acquired (rotation re-applied).
    pub center_px: Point2<f64>,
    /// Runner-up matches in the de-rotated frame, best first.
    pub secondary: Vec<Alignment>,
    /// Metadata prediction on the overview as acquired, when determinable.
    pub predicted_px: Option<Point2<f64>>,
    pub consistency: Option<ConsistencyCheck>,
}

impl Placement {
    pub fn band(&self) -> ConfidenceBand {
        self.alignment.band()
    }

    /// Consistent, or no prediction was available to disagree with.
    pub fn is_consistent(&self) -> bool {
        self.consistency.is_none_or(|c| c.consistent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_reporting_thresholds() {
        assert_eq!(ConfidenceBand::from_score(0.0), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0.7999), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0.8), ConfidenceBand::Good);
        assert_eq!(ConfidenceBand::from_score(0.8999), ConfidenceBand::Good);
        assert_eq!(ConfidenceBand::from_score(0.9), ConfidenceBand::Strong);
        assert_eq!(ConfidenceBand::from_score(1.0), ConfidenceBand::Strong);
    }

    #[test]
    fn alignment_center_is_rect_midpoint() {
        let a = Alignment {
            x: 10,
            y: 20,
            width: 30,
            height: 15,
            confidence: 0.85,
            scale_x: 0.25,
            scale_y: 0.25,
        };
        assert_eq!(a.center(), Point2::new(25.0, 27.5));
        assert_eq!(a.band(), ConfidenceBand::Good);
        assert!(a.passes(0.5));
        assert!(!a.passes(0.9));
    }

    #[test]
    fn consistency_uses_euclidean_distance() {
        let c = ConsistencyCheck::new(Point2::new(0.0, 0.0), Point2::new(60.0, 80.0), 100.0);
        assert_eq!(c.distance_px, 100.0);
        assert!(c.consistent);
        let far = ConsistencyCheck::new(Point2::new(0.0, 0.0), Point2::new(60.0, 81.0), 100.0);
        assert!(!far.consistent);
    }
}
