//! samseg-export: Pure serializers for segmentation polygons (sans-IO)
//!
//! Converts [`Polygon`](samseg_pipeline::Polygon)s into annotation and
//! preview formats. Currently supports labelme shape JSON and SVG
//! overlays.

pub mod labelme;
pub mod svg;

pub use labelme::{LabelmeDocument, LabelmeShape, to_labelme_json, to_labelme_shape};
pub use svg::{SvgMetadata, build_path_data, to_svg};

/// Errors from export serializers.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A polygon with no vertices cannot be exported.
    #[error("polygon has no vertices")]
    EmptyPolygon,

    /// JSON serialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}
