//! labelme annotation serializer.
//!
//! A segmentation polygon becomes one labelme `polygon` shape. labelme
//! closes polygons implicitly, so a repeated closing vertex is dropped.
//!
//! [`LabelmeDocument`] wraps shapes in the on-disk annotation file layout
//! (`version`, `shapes`, `imagePath`, `imageHeight`, `imageWidth`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use samseg_pipeline::{Dimensions, Point, Polygon};

use crate::ExportError;

/// labelme file format version written into documents.
pub const LABELME_VERSION: &str = "5.4.1";

/// One labelme shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelmeShape {
    /// Class label.
    pub label: String,
    /// Vertices as `[x, y]` pairs.
    pub points: Vec<[f64; 2]>,
    /// Instance grouping; `null` for standalone shapes.
    pub group_id: Option<u32>,
    /// Always `"polygon"` for segmentation output.
    pub shape_type: String,
    /// Per-shape boolean flags.
    pub flags: BTreeMap<String, bool>,
}

/// A labelme annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelmeDocument {
    /// Format version.
    pub version: String,
    /// Per-image boolean flags.
    pub flags: BTreeMap<String, bool>,
    /// Annotated shapes.
    pub shapes: Vec<LabelmeShape>,
    /// Path of the annotated image, relative to the annotation file.
    pub image_path: String,
    /// Embedded image bytes; always `null` here.
    pub image_data: Option<String>,
    /// Image height in pixels.
    pub image_height: u32,
    /// Image width in pixels.
    pub image_width: u32,
}

impl LabelmeDocument {
    /// An empty annotation for an image.
    #[must_use]
    pub fn new(image_path: impl Into<String>, dimensions: Dimensions) -> Self {
        Self {
            version: LABELME_VERSION.to_owned(),
            flags: BTreeMap::new(),
            shapes: Vec::new(),
            image_path: image_path.into(),
            image_data: None,
            image_height: dimensions.height,
            image_width: dimensions.width,
        }
    }
}

/// Convert a polygon into a labelme `polygon` shape.
///
/// # Errors
///
/// Returns [`ExportError::EmptyPolygon`] if the polygon has no vertices.
pub fn to_labelme_shape(polygon: &Polygon, label: &str) -> Result<LabelmeShape, ExportError> {
    let mut points: &[Point] = polygon.points();
    if points.is_empty() {
        return Err(ExportError::EmptyPolygon);
    }
    if points.len() > 1 && points.first() == points.last() {
        points = &points[..points.len() - 1];
    }
    Ok(LabelmeShape {
        label: label.to_owned(),
        points: points.iter().map(|p| [p.x, p.y]).collect(),
        group_id: None,
        shape_type: "polygon".to_owned(),
        flags: BTreeMap::new(),
    })
}

/// Serialize a single polygon as pretty-printed labelme shape JSON.
///
/// # Errors
///
/// Returns [`ExportError::EmptyPolygon`] for an empty polygon and
/// [`ExportError::Json`] if serialization fails.
pub fn to_labelme_json(polygon: &Polygon, label: &str) -> Result<String, ExportError> {
    let shape = to_labelme_shape(polygon, label)?;
    Ok(serde_json::to_string_pretty(&shape)?)
}
