//! Contour tracing: extract sub-pixel boundaries from a binary mask.
//!
//! Marching squares over every 2×2 cell neighbourhood at iso-level 0.5,
//! followed by assembly of the per-cell segments into ordered contours.
//! Boundary points sit on half-integer positions between a foreground
//! and a background cell.
//!
//! Contours come out in the order their first segment was found in a
//! row-major scan. Closed contours repeat their first point at the end;
//! contours that run into the mask border stay open.

use std::collections::{HashMap, VecDeque};

use ndarray::ArrayView2;

use crate::mask::Mask;
use crate::types::{Contour, GridPoint};

/// How diagonal-only neighbours are joined in ambiguous (saddle) cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Diagonal foreground cells stay separate contours.
    #[default]
    Low,
    /// Diagonal foreground cells are joined into one contour.
    High,
}

/// Trace every boundary in `mask` with [`Connectivity::Low`].
#[must_use]
pub fn find_contours(mask: &Mask) -> Vec<Contour> {
    find_contours_with(mask, Connectivity::Low)
}

/// Trace every boundary in `mask` with the given saddle connectivity.
#[must_use]
pub fn find_contours_with(mask: &Mask, connectivity: Connectivity) -> Vec<Contour> {
    assemble(march(mask.view(), connectivity))
}

/// Emit one or two directed boundary segments per mixed 2×2 cell.
///
/// Segment direction keeps foreground on a consistent side, which is what
/// lets [`assemble`] chain them end to start.
#[allow(clippy::cast_precision_loss)]
fn march(cells: ArrayView2<'_, bool>, connectivity: Connectivity) -> Vec<(GridPoint, GridPoint)> {
    let (rows, cols) = cells.dim();
    let mut segments = Vec::new();
    if rows < 2 || cols < 2 {
        return segments;
    }

    for r0 in 0..rows - 1 {
        for c0 in 0..cols - 1 {
            let case = u8::from(cells[[r0, c0]])
                | u8::from(cells[[r0, c0 + 1]]) << 1
                | u8::from(cells[[r0 + 1, c0]]) << 2
                | u8::from(cells[[r0 + 1, c0 + 1]]) << 3;
            if case == 0 || case == 15 {
                continue;
            }

            let r = r0 as f64;
            let c = c0 as f64;
            let top = GridPoint::new(r, c + 0.5);
            let bottom = GridPoint::new(r + 1.0, c + 0.5);
            let left = GridPoint::new(r + 0.5, c);
            let right = GridPoint::new(r + 0.5, c + 1.0);

            match case {
                1 => segments.push((top, left)),
                2 => segments.push((right, top)),
                3 => segments.push((right, left)),
                4 => segments.push((left, bottom)),
                5 => segments.push((top, bottom)),
                6 => match connectivity {
                    Connectivity::Low => {
                        segments.push((right, top));
                        segments.push((left, bottom));
                    }
                    Connectivity::High => {
                        segments.push((left, top));
                        segments.push((right, bottom));
                    }
                },
                7 => segments.push((right, bottom)),
                8 => segments.push((bottom, right)),
                9 => match connectivity {
                    Connectivity::Low => {
                        segments.push((top, left));
                        segments.push((bottom, right));
                    }
                    Connectivity::High => {
                        segments.push((top, right));
                        segments.push((bottom, left));
                    }
                },
                10 => segments.push((bottom, top)),
                11 => segments.push((bottom, left)),
                12 => segments.push((left, right)),
                13 => segments.push((top, right)),
                14 => segments.push((left, top)),
                _ => {}
            }
        }
    }
    segments
}

/// Exact-match lookup key for a boundary point.
///
/// Points shared by neighbouring cells are computed from the same corner
/// coordinates, so bitwise equality is reliable.
type Key = (u64, u64);

const fn key(p: GridPoint) -> Key {
    (p.row.to_bits(), p.col.to_bits())
}

/// Chain directed segments into contours.
///
/// `starts` and `ends` index the open ends of every partial contour. A
/// segment either extends one contour, joins two (the higher-numbered one
/// is absorbed), closes a contour on itself, or starts a new one.
fn assemble(segments: Vec<(GridPoint, GridPoint)>) -> Vec<Contour> {
    let mut contours: Vec<Option<VecDeque<GridPoint>>> = Vec::new();
    let mut starts: HashMap<Key, usize> = HashMap::new();
    let mut ends: HashMap<Key, usize> = HashMap::new();

    for (from, to) in segments {
        if from == to {
            continue;
        }
        let tail = starts.remove(&key(to));
        let head = ends.remove(&key(from));

        match (tail, head) {
            (Some(t), Some(h)) if t == h => {
                if let Some(points) = contours[h].as_mut() {
                    points.push_back(to);
                }
            }
            (Some(t), Some(h)) if t > h => {
                let Some(tail_points) = contours[t].take() else {
                    continue;
                };
                if let Some(head_points) = contours[h].as_mut() {
                    head_points.extend(tail_points);
                    if let Some(&last) = head_points.back() {
                        ends.insert(key(last), h);
                    }
                }
            }
            (Some(t), Some(h)) => {
                let Some(head_points) = contours[h].take() else {
                    continue;
                };
                if let Some(&first) = head_points.front() {
                    starts.remove(&key(first));
                }
                if let Some(tail_points) = contours[t].as_mut() {
                    for p in head_points.into_iter().rev() {
                        tail_points.push_front(p);
                    }
                    if let Some(&first) = tail_points.front() {
                        starts.insert(key(first), t);
                    }
                }
            }
            (Some(t), None) => {
                if let Some(points) = contours[t].as_mut() {
                    points.push_front(from);
                }
                starts.insert(key(from), t);
            }
            (None, Some(h)) => {
                if let Some(points) = contours[h].as_mut() {
                    points.push_back(to);
                }
                ends.insert(key(to), h);
            }
            (None, None) => {
                let index = contours.len();
                contours.push(Some(VecDeque::from([from, to])));
                starts.insert(key(from), index);
                ends.insert(key(to), index);
            }
        }
    }

    contours
        .into_iter()
        .flatten()
        .map(|points| Contour::new(Vec::from(points)))
        .collect()
}
