//! Bounding boxes, parent partitioning and layout placeholders.

use std::collections::BTreeMap;

use crate::scale::Axis;
use crate::value::{ResultSet, Value};

/// Column carrying the outer mark's row id in a nested mark's query.
pub const PARENT_ID: &str = "__parent_id";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn extent(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
        }
    }

    /// Shift a box given in this box's local coordinates to absolute ones.
    pub fn translate(&self, local: &BoundingBox) -> BoundingBox {
        BoundingBox::new(self.x + local.x, self.y + local.y, local.width, local.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutKind {
    /// Every row takes the whole partition.
    Fill,
    /// Row-major grid. Zero columns picks a near-square grid.
    Grid { columns: usize, padding: f64 },
    /// Rows side by side along `axis`, sized by an optional weight column.
    Stack {
        axis: Axis,
        weight: Option<String>,
        padding: f64,
    },
}

impl LayoutKind {
    pub fn grid(columns: usize, padding: f64) -> Self {
        Self::Grid { columns, padding }
    }

    pub fn stack(axis: Axis) -> Self {
        Self::Stack {
            axis,
            weight: None,
            padding: 0.0,
        }
    }

    pub fn weighted(axis: Axis, weight: impl Into<String>, padding: f64) -> Self {
        Self::Stack {
            axis,
            weight: Some(weight.into()),
            padding,
        }
    }

    pub fn weight_column(&self) -> Option<&str> {
        match self {
            Self::Stack { weight, .. } => weight.as_deref(),
            _ => None,
        }
    }

    /// Local cells for `count` rows inside `bbox`. `weights` is only read
    /// by weighted stacks and must then have `count` entries.
    pub fn place(&self, bbox: &BoundingBox, count: usize, weights: &[f64]) -> Vec<BoundingBox> {
        match self {
            Self::Fill => vec![BoundingBox::new(0.0, 0.0, bbox.width, bbox.height); count],
            Self::Grid { columns, padding } => place_grid(bbox, count, *columns, *padding),
            Self::Stack {
                axis,
                weight,
                padding,
            } => {
                let weights: Vec<f64> = if weight.is_some() && weights.len() == count {
                    weights.iter().map(|w| w.max(0.0)).collect()
                } else {
                    vec![1.0; count]
                };
                place_stack(bbox, &weights, *axis, *padding)
            }
        }
    }
}

fn place_grid(bbox: &BoundingBox, count: usize, columns: usize, padding: f64) -> Vec<BoundingBox> {
    if count == 0 {
        return Vec::new();
    }
    let columns = if columns == 0 {
        (count as f64).sqrt().ceil() as usize
    } else {
        columns
    };
    let rows = count.div_ceil(columns);

    let cell_w = ((bbox.width - padding * (columns + 1) as f64) / columns as f64).max(0.0);
    let cell_h = ((bbox.height - padding * (rows + 1) as f64) / rows as f64).max(0.0);

    let mut cells = Vec::with_capacity(count);
    let mut y = padding;
    for row in 0..rows {
        let mut x = padding;
        for col in 0..columns {
            if row * columns + col >= count {
                break;
            }
            cells.push(BoundingBox::new(x, y, cell_w, cell_h));
            x += cell_w + padding;
        }
        y += cell_h + padding;
    }
    cells
}

fn place_stack(bbox: &BoundingBox, weights: &[f64], axis: Axis, padding: f64) -> Vec<BoundingBox> {
    let total: f64 = weights.iter().sum();
    let gaps = padding * weights.len().saturating_sub(1) as f64;
    let available = (bbox.extent(axis) - gaps).max(0.0);

    let mut offset = 0.0;
    weights
        .iter()
        .map(|w| {
            let size = if total > 0.0 { available * w / total } else { 0.0 };
            let cell = match axis {
                Axis::X => BoundingBox::new(offset, 0.0, size, bbox.height),
                Axis::Y => BoundingBox::new(0.0, offset, bbox.width, size),
            };
            offset += size + padding;
            cell
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutComponent {
    X,
    Y,
    Width,
    Height,
}

impl LayoutComponent {
    /// Component implied by a channel name such as `x`, `y2` or `width`.
    pub fn for_channel(channel: &str) -> Option<Self> {
        match channel {
            "width" | "w" => Some(Self::Width),
            "height" | "h" => Some(Self::Height),
            c if c.starts_with('x') => Some(Self::X),
            c if c.starts_with('y') => Some(Self::Y),
            _ => None,
        }
    }

    pub fn of(self, cell: &BoundingBox) -> f64 {
        match self {
            Self::X => cell.x,
            Self::Y => cell.y,
            Self::Width => cell.width,
            Self::Height => cell.height,
        }
    }
}

/// Exact grouping key for a parent value; floats compare by bit pattern.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PartitionKey<'a> {
    Null,
    Int(i64),
    Float(u64),
    Text(&'a str),
}

impl<'a> PartitionKey<'a> {
    fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Int(n) => Self::Int(*n),
            Value::Float(f) => Self::Float(f.to_bits()),
            Value::Text(s) => Self::Text(s),
        }
    }
}

/// Row indices grouped by parent id, in order of first appearance. Without
/// a parent column every row falls into one partition keyed by null.
pub fn partition(rows: &ResultSet) -> Vec<(Value, Vec<usize>)> {
    let Some(col) = rows.column_index(PARENT_ID) else {
        return vec![(Value::Null, (0..rows.len()).collect())];
    };

    let mut index: BTreeMap<PartitionKey<'_>, usize> = BTreeMap::new();
    let mut parts: Vec<(Value, Vec<usize>)> = Vec::new();
    for (i, row) in rows.rows.iter().enumerate() {
        let parent = &row[col];
        let slot = *index.entry(PartitionKey::of(parent)).or_insert_with(|| {
            parts.push((parent.clone(), Vec::new()));
            parts.len() - 1
        });
        parts[slot].1.push(i);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox::new(10.0, 20.0, 100.0, 50.0)
    }

    #[test]
    fn test_grid_cells() {
        let cells = LayoutKind::grid(2, 10.0).place(&bbox(), 3, &[]);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0], BoundingBox::new(10.0, 10.0, 35.0, 10.0));
        assert_eq!(cells[1].x, 55.0);
        assert_eq!(cells[2], BoundingBox::new(10.0, 30.0, 35.0, 10.0));
    }

    #[test]
    fn test_weighted_stack() {
        let kind = LayoutKind::weighted(Axis::X, "v", 0.0);
        let cells = kind.place(&bbox(), 2, &[1.0, 3.0]);
        assert_eq!(cells[0].width, 25.0);
        assert_eq!(cells[1].x, 25.0);
        assert_eq!(cells[1].width, 75.0);
        assert_eq!(cells[1].height, 50.0);
    }

    #[test]
    fn test_translate_and_components() {
        let cell = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        let abs = bbox().translate(&cell);
        assert_eq!((abs.x, abs.y), (15.0, 25.0));
        assert_eq!(LayoutComponent::for_channel("y2"), Some(LayoutComponent::Y));
        assert_eq!(LayoutComponent::for_channel("fill"), None);
        assert_eq!(LayoutComponent::Width.of(&abs), 10.0);
    }

    #[test]
    fn test_partition_by_parent() {
        let rows = ResultSet::new(
            vec!["id".into(), PARENT_ID.into()],
            vec![
                vec![Value::Int(0), Value::Int(7)],
                vec![Value::Int(1), Value::Int(3)],
                vec![Value::Int(2), Value::Int(7)],
            ],
        );
        let parts = partition(&rows);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], (Value::Int(7), vec![0, 2]));
        assert_eq!(parts[1], (Value::Int(3), vec![1]));

        let mixed = ResultSet::new(
            vec!["id".into(), PARENT_ID.into()],
            vec![
                vec![Value::Int(0), Value::Int(1)],
                vec![Value::Int(1), Value::from("1")],
                vec![Value::Int(2), Value::Null],
                vec![Value::Int(3), Value::from("")],
            ],
        );
        let parts = partition(&mixed);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], (Value::from("1"), vec![1]));
        assert_eq!(parts[3], (Value::from(""), vec![3]));

        let flat = ResultSet::new(vec!["id".into()], vec![vec![Value::Int(0)]]);
        assert_eq!(partition(&flat), vec![(Value::Null, vec![0])]);
    }
}
