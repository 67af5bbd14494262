//! SVG overlay serializer.
//!
//! Renders a segmentation polygon as a closed `<path>` in image pixel
//! coordinates, with the prompt clicks as small circles on top. The
//! document has the image's size and `viewBox`, so it can be layered
//! directly over the source image.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Group, Path, Title};
use svg::node::{Node, Text, Value};

use samseg_pipeline::{Dimensions, Point, Polygon};

/// Radius of a prompt marker in pixels.
const PROMPT_RADIUS: f64 = 3.0;

/// Metadata to embed in the SVG document.
///
/// Text values are XML-escaped by the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`. Typically the image name.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized model configuration, embedded in a namespaced
    /// `<samseg:config>` element inside `<metadata>`.
    pub config_json: Option<&'a str>,
}

/// Build a closed SVG path `d` attribute from a polygon.
///
/// Uses `M` for the first vertex, `L` for the rest and `z` to close.
/// A repeated closing vertex is not emitted twice. Returns an empty
/// string for polygons with fewer than 2 distinct vertices.
///
/// # Examples
///
/// ```
/// use samseg_pipeline::{Point, Polygon};
/// use samseg_export::build_path_data;
///
/// let polygon = Polygon::new(vec![
///     Point::new(10.0, 20.0),
///     Point::new(30.0, 40.0),
///     Point::new(10.0, 40.0),
///     Point::new(10.0, 20.0),
/// ]);
/// assert_eq!(build_path_data(&polygon), "M10,20 L30,40 L10,40 z");
/// ```
#[must_use]
pub fn build_path_data(polygon: &Polygon) -> String {
    let mut points = polygon.points();
    if points.len() > 1 && points.first() == points.last() {
        points = &points[..points.len() - 1];
    }
    let Some((first, rest)) = points.split_first() else {
        return String::new();
    };
    if rest.is_empty() {
        return String::new();
    }

    let mut data = Data::new().move_to((first.x, first.y));
    for p in rest {
        data = data.line_to((p.x, p.y));
    }
    String::from(Value::from(data.close()))
}

/// Serialize a polygon and its prompts into an SVG overlay.
#[must_use]
pub fn to_svg(
    polygon: &Polygon,
    prompts: &[Point],
    dimensions: Dimensions,
    metadata: &SvgMetadata<'_>,
) -> String {
    let Dimensions { width, height } = dimensions;
    let mut doc = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width, height));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = metadata.config_json {
        let mut config_el = Element::new("samseg:config");
        config_el.assign("xmlns:samseg", "https://samseg.dev/ns/1");
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    let d = build_path_data(polygon);
    if !d.is_empty() {
        doc = doc.add(
            Path::new()
                .set("d", d)
                .set("fill", "lime")
                .set("fill-opacity", 0.3)
                .set("stroke", "lime")
                .set("stroke-width", 1),
        );
    }

    if !prompts.is_empty() {
        let mut group = Group::new().set("id", "prompts");
        for p in prompts {
            group = group.add(
                Circle::new()
                    .set("cx", p.x)
                    .set("cy", p.y)
                    .set("r", PROMPT_RADIUS)
                    .set("fill", "red"),
            );
        }
        doc = doc.add(group);
    }

    // The svg crate omits the XML declaration.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
