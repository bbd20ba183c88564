//! Marks: declared specs, classified channels and per-partition evaluation.

mod channel;
mod compile;
mod query;

pub use channel::{
    callback, field, get, layout, layout_component, lit, scaled, Aggregate, CallbackFn, Channel,
    ForeignRef, GetSpec, Mapping, RefTarget, Target, TransformFn,
};
pub use compile::{construct_query, resolve_reference};
pub use query::CompiledQuery;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::layout::{partition, BoundingBox, LayoutComponent};
use crate::render::{ChannelArrays, Shape};
use crate::scale::{Domain, ScaleMap};
use crate::schema::ROW_ID;
use crate::value::{Record, ResultSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkId(pub u64);

impl fmt::Display for MarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// `column op literal`; `column` is a source attribute or a channel name.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A mark as declared.
#[derive(Debug, Clone)]
pub struct MarkSpec {
    pub name: Option<String>,
    pub source: String,
    pub shape: Shape,
    pub channels: Vec<(String, Mapping)>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
}

impl MarkSpec {
    pub fn new(source: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: None,
            source: source.into(),
            shape,
            channels: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn channel(mut self, name: impl Into<String>, mapping: impl Into<Mapping>) -> Self {
        self.channels.push((name.into(), mapping.into()));
        self
    }

    pub fn filter(mut self, column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }
}

/// One parent's share of a mark's rows after layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub parent: Value,
    pub bbox: BoundingBox,
    pub arrays: ChannelArrays,
}

#[derive(Debug)]
pub struct Mark {
    pub id: MarkId,
    pub name: String,
    pub source: String,
    pub shape: Shape,
    pub channels: Vec<(String, Channel)>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub query: Option<CompiledQuery>,
    pub result: Option<ResultSet>,
    pub partitions: Vec<Partition>,
    pub scales: ScaleMap,
    /// Rendered attributes by row id.
    pub attributes: BTreeMap<i64, Record>,
    pub table: String,
    pub level: usize,
    pub refs: BTreeSet<MarkId>,
}

impl Mark {
    pub(crate) fn new(id: MarkId, spec: &MarkSpec, channels: Vec<(String, Channel)>, table: String) -> Self {
        let refs = channels
            .iter()
            .filter_map(|(_, c)| c.referenced_mark())
            .collect();
        Self {
            id,
            name: spec.name.clone().unwrap_or_else(|| id.to_string()),
            source: spec.source.clone(),
            shape: spec.shape,
            channels,
            filters: spec.filters.clone(),
            order_by: spec.order_by.clone(),
            query: None,
            result: None,
            partitions: Vec::new(),
            scales: ScaleMap::new(),
            attributes: BTreeMap::new(),
            table,
            level: 0,
            refs,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Split the query result by parent and resolve every channel inside
    /// each parent's box. `parent_bbox` returns `None` for parents that
    /// were not rendered; their rows are dropped.
    pub fn lay_out<F>(&mut self, parent_bbox: F) -> Vec<Partition>
    where
        F: Fn(&Value) -> Option<BoundingBox>,
    {
        let Some(result) = &self.result else {
            return Vec::new();
        };
        let columns = self.query.as_ref().map(|q| &q.columns);

        // Scale domains span the whole result.
        let domains: BTreeMap<&str, Domain> = self
            .channels
            .iter()
            .filter_map(|(name, channel)| match channel {
                Channel::Scaled { scale, .. } => {
                    let values = source_values(result, name, channel, columns, None);
                    Some((name.as_str(), scale.resolve_domain(&values)))
                }
                _ => None,
            })
            .collect();

        let mut scales = ScaleMap::new();
        let mut partitions = Vec::new();
        for (parent, rows) in partition(result) {
            let Some(bbox) = parent_bbox(&parent) else {
                log::debug!("{}: dropping {} rows of unrendered parent {}", self.id, rows.len(), parent);
                continue;
            };
            let mut arrays = ChannelArrays::new();
            arrays.insert(ROW_ID.to_string(), pick(result, ROW_ID, &rows));

            for (name, channel) in &self.channels {
                let values = match channel {
                    Channel::Constant(v) => vec![v.clone(); rows.len()],
                    Channel::Column { .. } | Channel::Foreign(_) => {
                        source_values(result, name, channel, columns, Some(rows.as_slice()))
                    }
                    Channel::Scaled { scale, .. } => {
                        let Some(domain) = domains.get(name.as_str()) else {
                            continue;
                        };
                        let resolved = scale.instantiate(domain.clone(), scale.resolve_range(name, &bbox));
                        let values = source_values(result, name, channel, columns, Some(rows.as_slice()))
                            .iter()
                            .map(|v| resolved.map(v))
                            .collect();
                        scales.entry(name.clone()).or_insert(resolved);
                        values
                    }
                    Channel::Layout { kind, component } => {
                        let weights: Vec<f64> = kind
                            .weight_column()
                            .map(|w| {
                                pick(result, w, &rows)
                                    .iter()
                                    .map(|v| v.as_f64().unwrap_or(0.0))
                                    .collect()
                            })
                            .unwrap_or_default();
                        kind.place(&bbox, rows.len(), &weights)
                            .iter()
                            .map(|cell| Value::Float(component.of(cell)))
                            .collect()
                    }
                    Channel::Callback(_) => continue,
                };
                arrays.insert(name.clone(), values);
            }

            // Callbacks see the row's query columns and resolved channels.
            for (name, channel) in &self.channels {
                let Channel::Callback(f) = channel else {
                    continue;
                };
                let values = rows
                    .iter()
                    .enumerate()
                    .map(|(i, &row)| {
                        let mut record = result.record(row).unwrap_or_default();
                        for (channel, values) in &arrays {
                            record.insert(channel.clone(), values[i].clone());
                        }
                        f(&record)
                    })
                    .collect();
                arrays.insert(name.clone(), values);
            }

            to_absolute(&mut arrays, &bbox);
            partitions.push(Partition {
                parent,
                bbox,
                arrays,
            });
        }

        self.scales = scales;
        partitions
    }
}

/// Values of `rows` in `column`, nulls if the column is absent.
fn pick(result: &ResultSet, column: &str, rows: &[usize]) -> Vec<Value> {
    match result.column_index(column) {
        Some(idx) => rows.iter().map(|&r| result.rows[r][idx].clone()).collect(),
        None => vec![Value::Null; rows.len()],
    }
}

/// Query values behind a column, foreign or scaled channel, transformed.
fn source_values(
    result: &ResultSet,
    name: &str,
    channel: &Channel,
    columns: Option<&BTreeMap<String, String>>,
    rows: Option<&[usize]>,
) -> Vec<Value> {
    let column = columns
        .and_then(|c| c.get(name))
        .map(String::as_str)
        .or_else(|| channel.column())
        .unwrap_or(name);
    let all: Vec<usize>;
    let rows = match rows {
        Some(rows) => rows,
        None => {
            all = (0..result.len()).collect();
            &all
        }
    };
    let values = pick(result, column, rows);
    match channel.transform() {
        Some(f) => values.iter().map(|v| f(v)).collect(),
        None => values,
    }
}

/// Coordinates are resolved relative to the partition; shift x/y channels
/// by its origin.
fn to_absolute(arrays: &mut ChannelArrays, bbox: &BoundingBox) {
    for (name, values) in arrays.iter_mut() {
        let offset = match LayoutComponent::for_channel(name) {
            Some(LayoutComponent::X) => bbox.x,
            Some(LayoutComponent::Y) => bbox.y,
            _ => continue,
        };
        for v in values.iter_mut() {
            if !v.is_numeric() {
                continue;
            }
            if let Some(x) = v.as_f64() {
                *v = Value::Float(x + offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutKind, PARENT_ID};
    use crate::scale::ScaleSpec;

    fn mark(channels: Vec<(&str, Channel)>) -> Mark {
        let spec = MarkSpec::new("T", Shape::Rect);
        let channels = channels
            .into_iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect();
        let mut mark = Mark::new(MarkId(1), &spec, channels, "mark_1".into());
        mark.result = Some(ResultSet::new(
            vec!["id".into(), "v".into(), PARENT_ID.into()],
            vec![
                vec![Value::Int(0), Value::Int(10), Value::Int(5)],
                vec![Value::Int(1), Value::Int(20), Value::Int(5)],
                vec![Value::Int(2), Value::Int(30), Value::Int(6)],
            ],
        ));
        mark
    }

    fn column(attr: &str) -> Channel {
        Channel::Column {
            attr: attr.to_string(),
            transform: None,
        }
    }

    #[test]
    fn test_lay_out_partitions_and_offsets() {
        let mut m = mark(vec![
            ("x", column("v")),
            ("fill", Channel::Constant(Value::from("red"))),
        ]);
        let parts = m.lay_out(|parent| match parent {
            Value::Int(5) => Some(BoundingBox::new(100.0, 0.0, 10.0, 10.0)),
            _ => None,
        });

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].arrays["id"], vec![Value::Int(0), Value::Int(1)]);
        assert_eq!(parts[0].arrays["x"], vec![Value::Float(110.0), Value::Float(120.0)]);
        assert_eq!(parts[0].arrays["fill"], vec![Value::from("red"), Value::from("red")]);
    }

    #[test]
    fn test_scaled_domain_spans_partitions() {
        let mut m = mark(vec![(
            "y",
            Channel::Scaled {
                source: Box::new(column("v")),
                scale: ScaleSpec::linear(),
            },
        )]);
        let parts = m.lay_out(|_| Some(BoundingBox::new(0.0, 0.0, 100.0, 100.0)));

        assert_eq!(parts[0].arrays["y"], vec![Value::Float(0.0), Value::Float(50.0)]);
        assert_eq!(parts[1].arrays["y"], vec![Value::Float(100.0)]);
        assert_eq!(m.scales["y"].domain, Domain::Continuous(10.0, 30.0));
    }

    #[test]
    fn test_layout_and_callback_channels() {
        let mut m = mark(vec![
            (
                "width",
                Channel::Layout {
                    kind: LayoutKind::stack(crate::scale::Axis::X),
                    component: LayoutComponent::Width,
                },
            ),
            (
                "label",
                Channel::Callback(std::sync::Arc::new(|r: &Record| {
                    Value::Float(r["v"].as_f64().unwrap_or(0.0) + r["width"].as_f64().unwrap_or(0.0))
                })),
            ),
        ]);
        let parts = m.lay_out(|_| Some(BoundingBox::new(0.0, 0.0, 100.0, 10.0)));

        assert_eq!(parts[0].arrays["width"], vec![Value::Float(50.0), Value::Float(50.0)]);
        assert_eq!(parts[0].arrays["label"], vec![Value::Float(60.0), Value::Float(70.0)]);
        assert_eq!(parts[1].arrays["width"], vec![Value::Float(100.0)]);
    }
}
