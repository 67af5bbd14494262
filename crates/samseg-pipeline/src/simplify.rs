//! Contour simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Distances are measured to the chord *segment*, not the infinite line:
//! a point whose projection falls outside the chord is measured to the
//! nearer endpoint. This matters for closed contours, whose first and
//! last points coincide and whose initial chord has zero length.

use crate::types::{Contour, GridPoint};

/// Simplify a contour, keeping points farther than `tolerance` from the
/// chord between their kept neighbours.
///
/// A tolerance of zero or less returns the contour unchanged. Contours
/// with fewer than 3 points are returned unchanged.
#[must_use = "returns the simplified contour"]
pub fn approximate_polygon(contour: &Contour, tolerance: f64) -> Contour {
    let points = contour.points();
    if tolerance <= 0.0 || points.len() < 3 {
        return contour.clone();
    }

    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[points.len() - 1] = true;

    rdp_recurse(points, 0, points.len() - 1, tolerance, &mut kept);

    let simplified: Vec<GridPoint> = points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect();

    Contour::new(simplified)
}

/// Tolerance that scales with the object: the contour's largest axis
/// range divided by `divisor`.
#[must_use]
pub fn adaptive_tolerance(contour: &Contour, divisor: f64) -> f64 {
    contour.extent() / divisor
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// The first of several equally distant points is the one kept.
fn rdp_recurse(
    points: &[GridPoint],
    start: usize,
    end: usize,
    tolerance: f64,
    kept: &mut [bool],
) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = segment_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Distance from `p` to the segment `a`–`b`.
///
/// Perpendicular distance when `p` projects strictly inside the segment,
/// otherwise the distance to the nearer endpoint.
fn segment_distance(p: GridPoint, a: GridPoint, b: GridPoint) -> f64 {
    let dr = b.row - a.row;
    let dc = b.col - a.col;

    let along_from_a = (p.row - a.row).mul_add(dr, (p.col - a.col) * dc);
    let along_from_b = (b.row - p.row).mul_add(dr, (b.col - p.col) * dc);

    if along_from_a > 0.0 && along_from_b > 0.0 {
        let cross = dr.mul_add(p.col - a.col, -(dc * (p.row - a.row)));
        cross.abs() / dr.hypot(dc)
    } else {
        p.distance(a).min(p.distance(b))
    }
}
