//! Scales mapping query values into drawing coordinates.
//!
//! A [`ScaleSpec`] is declared on a channel without knowing the data. Its
//! domain is resolved once from the mark's query result, and its range is
//! resolved per partition from the partition's bounding box.

use std::collections::BTreeMap;

use crate::layout::BoundingBox;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    Linear,
    Log,
    Sqrt,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Axis a channel is drawn along, going by its name.
    pub fn for_channel(channel: &str) -> Self {
        if channel.starts_with('y') || channel == "height" {
            Self::Y
        } else {
            Self::X
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeSpec {
    Fixed(f64, f64),
    /// The partition's extent along an axis.
    Extent(Axis),
    /// The extent along the axis the channel name implies.
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Continuous(f64, f64),
    Discrete(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSpec {
    pub kind: ScaleKind,
    pub domain: Option<Domain>,
    pub range: RangeSpec,
}

impl ScaleSpec {
    pub fn new(kind: ScaleKind) -> Self {
        Self {
            kind,
            domain: None,
            range: RangeSpec::Auto,
        }
    }

    pub fn linear() -> Self {
        Self::new(ScaleKind::Linear)
    }

    pub fn log() -> Self {
        Self::new(ScaleKind::Log)
    }

    pub fn sqrt() -> Self {
        Self::new(ScaleKind::Sqrt)
    }

    pub fn point() -> Self {
        Self::new(ScaleKind::Point)
    }

    pub fn domain(mut self, min: f64, max: f64) -> Self {
        self.domain = Some(Domain::Continuous(min, max));
        self
    }

    pub fn discrete_domain<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.domain = Some(Domain::Discrete(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn range(mut self, r0: f64, r1: f64) -> Self {
        self.range = RangeSpec::Fixed(r0, r1);
        self
    }

    pub fn extent(mut self, axis: Axis) -> Self {
        self.range = RangeSpec::Extent(axis);
        self
    }

    /// The fixed domain, or one computed from `values`.
    pub fn resolve_domain(&self, values: &[Value]) -> Domain {
        if let Some(domain) = &self.domain {
            return domain.clone();
        }

        if self.kind == ScaleKind::Point {
            let mut distinct: Vec<Value> = Vec::new();
            for v in values.iter().filter(|v| !v.is_null()) {
                if !distinct.contains(v) {
                    distinct.push(v.clone());
                }
            }
            distinct.sort_by(|a, b| {
                a.sort_key()
                    .partial_cmp(&b.sort_key())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            return Domain::Discrete(distinct);
        }

        let numbers = values
            .iter()
            .filter_map(Value::as_f64)
            .filter(|x| x.is_finite() && (self.kind != ScaleKind::Log || *x > 0.0));
        let (min, max) = numbers.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        });
        if min > max {
            match self.kind {
                ScaleKind::Log => Domain::Continuous(1.0, 10.0),
                _ => Domain::Continuous(0.0, 1.0),
            }
        } else {
            Domain::Continuous(min, max)
        }
    }

    pub fn resolve_range(&self, channel: &str, bbox: &BoundingBox) -> (f64, f64) {
        let axis = match &self.range {
            RangeSpec::Fixed(r0, r1) => return (*r0, *r1),
            RangeSpec::Extent(axis) => *axis,
            RangeSpec::Auto => Axis::for_channel(channel),
        };
        match axis {
            Axis::X => (0.0, bbox.width),
            Axis::Y => (0.0, bbox.height),
        }
    }

    pub fn instantiate(&self, domain: Domain, range: (f64, f64)) -> ResolvedScale {
        ResolvedScale {
            kind: self.kind,
            domain,
            range,
        }
    }
}

/// A scale with concrete domain and range.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScale {
    pub kind: ScaleKind,
    pub domain: Domain,
    pub range: (f64, f64),
}

impl ResolvedScale {
    /// Map one value. Values outside what the scale can place map to null.
    pub fn map(&self, value: &Value) -> Value {
        match (&self.domain, self.kind) {
            (Domain::Discrete(values), _) => match values.iter().position(|v| v == value) {
                Some(index) => Value::Float(self.point(index, values.len())),
                None => Value::Null,
            },
            (Domain::Continuous(d0, d1), kind) => {
                let Some(x) = value.as_f64() else {
                    return Value::Null;
                };
                let t = match kind {
                    ScaleKind::Log => {
                        if x <= 0.0 || *d0 <= 0.0 || *d1 <= 0.0 {
                            return Value::Null;
                        }
                        ratio(x.log10(), d0.log10(), d1.log10())
                    }
                    ScaleKind::Sqrt => ratio(signed_sqrt(x), signed_sqrt(*d0), signed_sqrt(*d1)),
                    ScaleKind::Linear | ScaleKind::Point => ratio(x, *d0, *d1),
                };
                let (r0, r1) = self.range;
                Value::Float(r0 + t * (r1 - r0))
            }
        }
    }

    /// Position of the `index`th of `count` points, half a step of padding
    /// on each side.
    fn point(&self, index: usize, count: usize) -> f64 {
        let (r0, r1) = self.range;
        let step = (r1 - r0) / count.max(1) as f64;
        r0 + step * (index as f64 + 0.5)
    }
}

fn ratio(x: f64, d0: f64, d1: f64) -> f64 {
    let denom = d1 - d0;
    if denom == 0.0 { 0.0 } else { (x - d0) / denom }
}

fn signed_sqrt(x: f64) -> f64 {
    x.signum() * x.abs().sqrt()
}

/// Resolved scales of a mark, by channel.
pub type ScaleMap = BTreeMap<String, ResolvedScale>;
