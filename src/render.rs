//! Renderer interface.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::layout::BoundingBox;
use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rect,
    Circle,
    Text,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rect => "rect",
            Self::Circle => "circle",
            Self::Text => "text",
        })
    }
}

/// Per-channel value columns of one partition. Always holds `id`.
pub type ChannelArrays = BTreeMap<String, Vec<Value>>;

/// A drawn partition: an opaque handle for [`Renderer::compose`] and one
/// attribute record per row, each carrying at least `id`, `x` and `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Drawing {
    pub handle: String,
    pub elements: Vec<Record>,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn draw(&self, shape: Shape, arrays: &ChannelArrays, bbox: &BoundingBox)
        -> Result<Drawing>;

    /// Join drawn handles, in order, into one document.
    async fn compose(&self, bbox: &BoundingBox, handles: &[String]) -> Result<String>;
}
