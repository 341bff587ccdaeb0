//! Face detection primitives shared by the classifier, clusterer and compositor.
//!
//! A detection is a square: its center `(row, col)` and its side length
//! `scale`, all in pixels of the source image.

use image::GrayImage;

/// Smallest face window tried by default, in pixels.
const DEFAULT_MIN_SIZE: u32 = 20;
/// Largest face window tried by default, in pixels.
const DEFAULT_MAX_SIZE: u32 = 2000;
/// Default sliding-window step as a fraction of the window size.
const DEFAULT_SHIFT_FACTOR: f32 = 0.1;
/// Default window growth ratio between pyramid levels.
const DEFAULT_SCALE_FACTOR: f32 = 1.1;
/// Default overlap above which two detections are the same face.
const DEFAULT_IOU_THRESHOLD: f64 = 0.18;

/// A square face region reported by a detector or produced by clustering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Row of the region center.
    pub row: i32,
    /// Column of the region center.
    pub col: i32,
    /// Side length of the region.
    pub scale: i32,
    /// Detector score; summed over members after clustering.
    pub confidence: f32,
}

impl Detection {
    /// Create a detection centered at `(row, col)`.
    #[must_use]
    pub fn new(row: i32, col: i32, scale: i32, confidence: f32) -> Self {
        Self {
            row,
            col,
            scale,
            confidence,
        }
    }

    /// Intersection-over-union of the two square regions.
    ///
    /// Returns `0.0` when the union is empty.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f64 {
        let (r1, c1, s1) = (
            f64::from(self.row),
            f64::from(self.col),
            f64::from(self.scale),
        );
        let (r2, c2, s2) = (
            f64::from(other.row),
            f64::from(other.col),
            f64::from(other.scale),
        );

        let over_row = ((r1 + s1 / 2.0).min(r2 + s2 / 2.0) - (r1 - s1 / 2.0).max(r2 - s2 / 2.0))
            .max(0.0);
        let over_col = ((c1 + s1 / 2.0).min(c2 + s2 / 2.0) - (c1 - s1 / 2.0).max(c2 - s2 / 2.0))
            .max(0.0);

        let inter = over_row * over_col;
        let union = s1 * s1 + s2 * s2 - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Top-left corner `(x, y)` of the square region.
    #[must_use]
    pub fn top_left(&self) -> (i64, i64) {
        let half = i64::from(self.scale / 2);
        (i64::from(self.col) - half, i64::from(self.row) - half)
    }
}

/// Tuning knobs for the sliding-window search and for clustering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Smallest window side tried.
    pub min_size: u32,
    /// Largest window side tried.
    pub max_size: u32,
    /// Window step as a fraction of the window side.
    pub shift_factor: f32,
    /// Ratio between consecutive window sizes.
    pub scale_factor: f32,
    /// Candidates scoring at or below this are discarded.
    pub quality_threshold: f32,
    /// Candidates overlapping at least this much are merged.
    pub iou_threshold: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            shift_factor: DEFAULT_SHIFT_FACTOR,
            scale_factor: DEFAULT_SCALE_FACTOR,
            quality_threshold: 0.0,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Pluggable face detection backend.
///
/// Implementations must be safe to share between concurrent requests; the
/// engine holds a single instance for the lifetime of the process.
pub trait FaceDetector: Send + Sync {
    /// Report raw, possibly overlapping face candidates in `gray`.
    fn detect(&self, gray: &GrayImage, params: &DetectionParams) -> Vec<Detection>;
}
