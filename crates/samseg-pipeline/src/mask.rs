//! Binary masks: thresholded decoder logits over the original image.

use ndarray::{Array2, ArrayView2};

use crate::types::{BoundingBox, GrayImage, Point};

/// A boolean `height × width` grid; `true` marks the segmented object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(Array2<bool>);

impl Mask {
    /// Wrap a `(rows, cols)` boolean grid.
    #[must_use]
    pub const fn new(cells: Array2<bool>) -> Self {
        Self(cells)
    }

    /// Threshold logits: cells strictly above `threshold` are foreground.
    #[must_use]
    pub fn threshold(logits: ArrayView2<'_, f32>, threshold: f32) -> Self {
        Self(logits.mapv(|v| v > threshold))
    }

    /// Build a mask from a grayscale raster: luma strictly above `level`
    /// is foreground.
    #[must_use]
    pub fn from_gray(image: &GrayImage, level: u8) -> Self {
        let (width, height) = image.dimensions();
        let cells = Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
            #[allow(clippy::cast_possible_truncation)]
            let pixel = image.get_pixel(col as u32, row as u32);
            pixel[0] > level
        });
        Self(cells)
    }

    /// Number of rows (image height).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.0.nrows()
    }

    /// Number of columns (image width).
    #[must_use]
    pub fn cols(&self) -> usize {
        self.0.ncols()
    }

    /// Read-only view of the cells.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, bool> {
        self.0.view()
    }

    /// Returns `true` if no cell is foreground.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&c| c)
    }

    /// Pixel-center bounds of the foreground, in image `(x, y)`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for ((row, col), &on) in self.0.indexed_iter() {
            if !on {
                continue;
            }
            bounds = Some(match bounds {
                None => (row, row, col, col),
                Some((r0, r1, c0, c1)) => (r0.min(row), r1.max(row), c0.min(col), c1.max(col)),
            });
        }
        bounds.map(|(r0, r1, c0, c1)| BoundingBox {
            min: Point::new(c0 as f64, r0 as f64),
            max: Point::new(c1 as f64, r1 as f64),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn threshold_is_strict() {
        let logits = array![[-1.0_f32, 0.0], [0.5, 3.0]];
        let mask = Mask::threshold(logits.view(), 0.0);
        assert_eq!(mask.view(), array![[false, false], [true, true]].view());
    }

    #[test]
    fn all_negative_logits_give_empty_mask() {
        let logits = Array2::from_elem((4, 6), -5.0_f32);
        let mask = Mask::threshold(logits.view(), 0.0);
        assert!(mask.is_empty());
        assert!(mask.bounding_box().is_none());
        assert_eq!((mask.rows(), mask.cols()), (4, 6));
    }

    #[test]
    fn from_gray_uses_rows_for_height() {
        let mut img = GrayImage::new(5, 3);
        img.put_pixel(4, 1, image::Luma([255]));
        let mask = Mask::from_gray(&img, 127);
        assert_eq!((mask.rows(), mask.cols()), (3, 5));
        assert!(mask.view()[[1, 4]]);
        assert!(!mask.view()[[0, 0]]);
    }

    #[test]
    fn bounding_box_reports_x_along_columns() {
        let mut cells = Array2::from_elem((10, 20), false);
        for row in 2..5 {
            for col in 7..15 {
                cells[[row, col]] = true;
            }
        }
        let bb = Mask::new(cells).bounding_box().unwrap();
        assert_eq!(bb.min, Point::new(7.0, 2.0));
        assert_eq!(bb.max, Point::new(14.0, 4.0));
    }
}
