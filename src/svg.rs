use std::fmt::{self, Write};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::layout::BoundingBox;
use crate::measure::TextMetrics;
use crate::render::{ChannelArrays, Drawing, Renderer, Shape};
use crate::schema::ROW_ID;
use crate::value::{Record, Value};

/// Channels written through as SVG presentation attributes.
const STYLE_CHANNELS: [&str; 4] = ["fill", "stroke", "stroke-width", "opacity"];

const DEFAULT_RADIUS: f64 = 3.0;

pub struct SvgRenderer {
    metrics: TextMetrics,
}

impl Default for SvgRenderer {
    fn default() -> Self {
        Self {
            metrics: TextMetrics::default(),
        }
    }
}

impl SvgRenderer {
    pub fn new(metrics: TextMetrics) -> Self {
        Self { metrics }
    }

    fn render_partition(
        &self,
        svg: &mut String,
        shape: Shape,
        arrays: &ChannelArrays,
        bbox: &BoundingBox,
    ) -> std::result::Result<Vec<Record>, fmt::Error> {
        let rows = arrays.get(ROW_ID).map_or(0, Vec::len);
        let mut elements = Vec::with_capacity(rows);

        writeln!(svg, r#"<g class="{}">"#, shape)?;
        for i in 0..rows {
            let mut element: Record = arrays
                .iter()
                .map(|(channel, values)| (channel.clone(), values[i].clone()))
                .collect();
            let number = |name: &str, default: f64| {
                arrays
                    .get(name)
                    .and_then(|v| v[i].as_f64())
                    .unwrap_or(default)
            };
            let style = style_attrs(arrays, i);

            let (x, y, w, h) = match shape {
                Shape::Rect => {
                    let (x, y) = (number("x", bbox.x), number("y", bbox.y));
                    let (w, h) = (number("width", bbox.width), number("height", bbox.height));
                    writeln!(
                        svg,
                        r#"<rect x="{}" y="{}" width="{}" height="{}"{} />"#,
                        x, y, w, h, style
                    )?;
                    (x, y, w, h)
                }
                Shape::Circle => {
                    let (cx, cy) = (number("x", bbox.x), number("y", bbox.y));
                    let r = number("r", DEFAULT_RADIUS);
                    writeln!(
                        svg,
                        r#"<circle cx="{}" cy="{}" r="{}"{} />"#,
                        cx, cy, r, style
                    )?;
                    (cx - r, cy - r, r * 2.0, r * 2.0)
                }
                Shape::Text => {
                    let text = arrays
                        .get("text")
                        .map(|v| v[i].to_string())
                        .unwrap_or_default();
                    let (x, y) = (number("x", bbox.x), number("y", bbox.y));
                    let (w, h) = self.metrics.text_size(&text);
                    writeln!(
                        svg,
                        r#"<text x="{}" y="{}" dominant-baseline="hanging" font-family="monospace"{}>{}</text>"#,
                        x + self.metrics.padding_x,
                        y + self.metrics.padding_y,
                        style,
                        escape_xml(&text)
                    )?;
                    element.insert("text".to_string(), Value::Text(text));
                    (x, y, w, h)
                }
            };

            element.insert("x".to_string(), Value::Float(x));
            element.insert("y".to_string(), Value::Float(y));
            element.insert("width".to_string(), Value::Float(w));
            element.insert("height".to_string(), Value::Float(h));
            elements.push(element);
        }
        writeln!(svg, "</g>")?;

        Ok(elements)
    }
}

fn style_attrs(arrays: &ChannelArrays, row: usize) -> String {
    let mut attrs = String::new();
    for name in STYLE_CHANNELS {
        if let Some(value) = arrays.get(name).map(|v| &v[row]).filter(|v| !v.is_null()) {
            attrs.push_str(&format!(r#" {}="{}""#, name, escape_xml(&value.to_string())));
        }
    }
    attrs
}

#[async_trait]
impl Renderer for SvgRenderer {
    async fn draw(
        &self,
        shape: Shape,
        arrays: &ChannelArrays,
        bbox: &BoundingBox,
    ) -> Result<Drawing> {
        let mut handle = String::new();
        let elements = self
            .render_partition(&mut handle, shape, arrays, bbox)
            .map_err(|e| Error::Render(e.to_string()))?;
        Ok(Drawing { handle, elements })
    }

    async fn compose(&self, bbox: &BoundingBox, handles: &[String]) -> Result<String> {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="{} {} {} {}">"#,
            bbox.width, bbox.height, bbox.x, bbox.y, bbox.width, bbox.height
        );
        svg.push('\n');
        for handle in handles {
            svg.push_str(handle);
        }
        svg.push_str("</svg>\n");
        Ok(svg)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
