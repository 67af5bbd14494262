//! Mask postprocessing: from a boolean mask to one annotation polygon.
//!
//! 1. Trace every contour in the mask
//! 2. Keep the one with the longest perimeter (the object boundary;
//!    shorter ones are speckle and holes)
//! 3. Simplify with a tolerance proportional to the object's size
//! 4. Swap `(row, col)` to `(x, y)`

use crate::contour;
use crate::mask::Mask;
use crate::simplify;
use crate::types::{Contour, Polygon, SegmentError};

/// The contour with the greatest perimeter.
///
/// On exactly equal perimeters the earliest contour in `contours` wins,
/// so the choice follows tracing order and carries no spatial meaning.
#[must_use]
pub fn longest_contour(contours: &[Contour]) -> Option<&Contour> {
    let mut best: Option<(&Contour, f64)> = None;
    for contour in contours {
        let length = contour.perimeter();
        match best {
            Some((_, best_length)) if length <= best_length => {}
            _ => best = Some((contour, length)),
        }
    }
    best.map(|(contour, _)| contour)
}

/// Convert a mask into a simplified `(x, y)` polygon.
///
/// The simplification tolerance is the chosen contour's largest axis
/// range divided by `simplify_divisor`. A closed contour keeps its
/// repeated closing vertex.
///
/// # Errors
///
/// Returns [`SegmentError::NoContourFound`] if the mask has no boundary
/// or the simplified outline has fewer than 3 distinct vertices.
pub fn mask_to_polygon(mask: &Mask, simplify_divisor: f64) -> Result<Polygon, SegmentError> {
    let contours = contour::find_contours(mask);
    let longest = longest_contour(&contours).ok_or(SegmentError::NoContourFound)?;

    let tolerance = simplify::adaptive_tolerance(longest, simplify_divisor);
    let simplified = simplify::approximate_polygon(longest, tolerance);

    let distinct = if simplified.is_closed() {
        simplified.len() - 1
    } else {
        simplified.len()
    };
    if distinct < 3 {
        return Err(SegmentError::NoContourFound);
    }

    tracing::trace!(
        contours = contours.len(),
        traced_points = longest.len(),
        vertices = simplified.len(),
        tolerance,
        "simplified mask outline"
    );

    Ok(Polygon::new(
        simplified.points().iter().map(|p| p.to_xy()).collect(),
    ))
}
