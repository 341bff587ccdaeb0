//! Merge redundant detections into one region per face.
//!
//! A cascade fires on many neighbouring windows and scales around every
//! face. Candidates overlapping at least `iou_threshold` with a seed are
//! averaged into a single detection; the seed is always the strongest
//! candidate not yet assigned.

use std::cmp::Ordering;

use crate::detection::Detection;

/// Strongest first; ties broken by position so the order is total.
fn strongest_first(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.row.cmp(&b.row))
        .then(a.col.cmp(&b.col))
        .then(a.scale.cmp(&b.scale))
}

/// Cluster overlapping detections.
///
/// Candidates with a non-positive scale are dropped. Each remaining
/// unassigned candidate, strongest first, seeds a cluster of every candidate
/// whose overlap with it is at least `iou_threshold`. A cluster is reported
/// at the integer mean position and scale of its members with their summed
/// confidence. The output does not depend on the input order.
#[must_use]
pub fn cluster_detections(detections: &[Detection], iou_threshold: f64) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = detections
        .iter()
        .filter(|d| d.scale > 0)
        .copied()
        .collect();
    candidates.sort_by(strongest_first);

    let mut assigned = vec![false; candidates.len()];
    let mut clusters = Vec::new();

    for (i, seed) in candidates.iter().enumerate() {
        if assigned[i] {
            continue;
        }

        let (mut row, mut col, mut scale, mut n) = (0i64, 0i64, 0i64, 0i64);
        let mut confidence = 0.0_f32;
        for (j, other) in candidates.iter().enumerate() {
            if seed.iou(other) >= iou_threshold {
                assigned[j] = true;
                row += i64::from(other.row);
                col += i64::from(other.col);
                scale += i64::from(other.scale);
                confidence += other.confidence;
                n += 1;
            }
        }

        // A positive-scale seed always overlaps itself fully.
        if n > 0 {
            #[allow(clippy::cast_possible_truncation)]
            clusters.push(Detection::new(
                (row / n) as i32,
                (col / n) as i32,
                (scale / n) as i32,
                confidence,
            ));
        }
    }

    clusters
}
