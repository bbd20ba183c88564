//! Channel mappings as declared, and their classified form.

use std::fmt;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::constraint::ConstraintId;
use crate::error::{Error, Result};
use crate::layout::{LayoutComponent, LayoutKind, PARENT_ID};
use crate::scale::ScaleSpec;
use crate::schema::ROW_ID;
use crate::value::{Record, Value};

use super::MarkId;

/// Per-row function over a row's query columns and resolved channels.
pub type CallbackFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Per-value function applied to a referenced column.
pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Min,
    Max,
    Median,
    Avg,
}

impl Aggregate {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "median" => Some(Self::Median),
            "avg" | "mean" => Some(Self::Avg),
            _ => None,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Median => "median",
            Self::Avg => "AVG",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Avg => "avg",
        }
    }
}

/// Split column text such as `count`, `avg(v)` or `v` into an optional
/// aggregate and an optional column.
fn parse_column(text: &str) -> (Option<Aggregate>, Option<String>) {
    let text = text.trim();
    if let Some(agg) = Aggregate::parse(text).filter(|a| *a == Aggregate::Count) {
        return (Some(agg), None);
    }
    if let Some((name, rest)) = text.split_once('(') {
        if let (Some(agg), Some(inner)) = (Aggregate::parse(name.trim()), rest.strip_suffix(')')) {
            let inner = inner.trim();
            let column = (!inner.is_empty() && inner != "*").then(|| inner.to_string());
            return (Some(agg), column);
        }
    }
    (None, Some(text.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Table(String),
    Mark(MarkId),
}

/// A reference built by [`get`].
#[derive(Clone)]
pub struct GetSpec {
    column: String,
    target: Option<Target>,
    search_key: Option<Vec<String>>,
    via: Option<ConstraintId>,
    aggregate: Option<Aggregate>,
    transform: Option<TransformFn>,
}

impl GetSpec {
    pub fn from_table(mut self, table: impl Into<String>) -> Self {
        self.target = Some(Target::Table(table.into()));
        self
    }

    pub fn from_mark(mut self, mark: MarkId) -> Self {
        self.target = Some(Target::Mark(mark));
        self
    }

    /// Follow the foreign key whose attributes on the source side are `key`.
    pub fn on<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_key = Some(key.into_iter().map(Into::into).collect());
        self
    }

    pub fn via(mut self, constraint: ConstraintId) -> Self {
        self.via = Some(constraint);
        self
    }

    pub fn aggregate(mut self, agg: Aggregate) -> Self {
        self.aggregate = Some(agg);
        self
    }

    pub fn transform(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for GetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetSpec")
            .field("column", &self.column)
            .field("target", &self.target)
            .field("search_key", &self.search_key)
            .field("via", &self.via)
            .field("aggregate", &self.aggregate)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A channel mapping as the user declares it.
#[derive(Clone)]
pub enum Mapping {
    Literal(Value),
    Field(String),
    Get(GetSpec),
    Scaled(Box<Mapping>, ScaleSpec),
    Layout(LayoutKind, Option<LayoutComponent>),
    Callback(CallbackFn),
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Self::Get(spec) => f.debug_tuple("Get").field(spec).finish(),
            Self::Scaled(inner, scale) => f.debug_tuple("Scaled").field(inner).field(scale).finish(),
            Self::Layout(kind, comp) => f.debug_tuple("Layout").field(kind).field(comp).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<GetSpec> for Mapping {
    fn from(spec: GetSpec) -> Self {
        Self::Get(spec)
    }
}

pub fn lit(value: impl Into<Value>) -> Mapping {
    Mapping::Literal(value.into())
}

pub fn field(name: impl Into<String>) -> Mapping {
    Mapping::Field(name.into())
}

/// Reference `column` on another table or mark. `count` and `agg(col)`
/// are read as aggregates.
pub fn get(column: impl Into<String>) -> GetSpec {
    GetSpec {
        column: column.into(),
        target: None,
        search_key: None,
        via: None,
        aggregate: None,
        transform: None,
    }
}

pub fn scaled(mapping: impl Into<Mapping>, scale: ScaleSpec) -> Mapping {
    Mapping::Scaled(Box::new(mapping.into()), scale)
}

pub fn layout(kind: LayoutKind) -> Mapping {
    Mapping::Layout(kind, None)
}

pub fn layout_component(kind: LayoutKind, component: LayoutComponent) -> Mapping {
    Mapping::Layout(kind, Some(component))
}

pub fn callback(f: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Mapping {
    Mapping::Callback(Arc::new(f))
}

/// Where a foreign reference looks for its column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Table(String),
    Mark(MarkId),
    /// Whichever reachable table has the column.
    Search,
}

#[derive(Clone)]
pub struct ForeignRef {
    /// `None` only for `count`.
    pub column: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub target: RefTarget,
    pub search_key: Option<Vec<String>>,
    pub via: Option<ConstraintId>,
    pub transform: Option<TransformFn>,
}

impl ForeignRef {
    /// Result column name before collision handling, e.g. `a` or `avg_v`.
    pub fn base_name(&self) -> String {
        match (self.aggregate, &self.column) {
            (Some(agg), Some(col)) => format!("{}_{}", agg.label(), col),
            (Some(agg), None) => agg.label().to_string(),
            (None, Some(col)) => col.clone(),
            (None, None) => "value".to_string(),
        }
    }
}

impl fmt::Debug for ForeignRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignRef")
            .field("column", &self.column)
            .field("aggregate", &self.aggregate)
            .field("target", &self.target)
            .field("search_key", &self.search_key)
            .field("via", &self.via)
            .finish()
    }
}

/// A classified channel.
#[derive(Clone)]
pub enum Channel {
    Constant(Value),
    Column {
        attr: String,
        transform: Option<TransformFn>,
    },
    Foreign(ForeignRef),
    Scaled {
        source: Box<Channel>,
        scale: ScaleSpec,
    },
    Layout {
        kind: LayoutKind,
        component: LayoutComponent,
    },
    Callback(CallbackFn),
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Column { attr, .. } => f.debug_tuple("Column").field(attr).finish(),
            Self::Foreign(r) => f.debug_tuple("Foreign").field(r).finish(),
            Self::Scaled { source, scale } => f
                .debug_struct("Scaled")
                .field("source", source)
                .field("scale", scale)
                .finish(),
            Self::Layout { kind, component } => f
                .debug_struct("Layout")
                .field("kind", kind)
                .field("component", component)
                .finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl Channel {
    /// Classify `mapping` for channel `name` of a mark over `source`.
    /// References to tables are checked against the catalog here; mark
    /// references are checked by the caller.
    pub fn classify(name: &str, mapping: &Mapping, catalog: &Catalog, source: &str) -> Result<Self> {
        // Both names key rows during layout and persist.
        if name == ROW_ID || name == PARENT_ID {
            return Err(Error::InvalidChannel {
                channel: name.to_string(),
                reason: "reserved channel name".to_string(),
            });
        }
        let table = catalog.table(source)?;
        match mapping {
            Mapping::Literal(v) => Ok(Self::Constant(v.clone())),
            Mapping::Field(attr) => {
                if !table.has_attribute(attr) {
                    return Err(Error::missing(source, attr.as_str()));
                }
                Ok(Self::Column {
                    attr: attr.clone(),
                    transform: None,
                })
            }
            Mapping::Get(spec) => Self::classify_get(spec, catalog, source),
            Mapping::Scaled(inner, scale) => {
                let source = Self::classify(name, inner, catalog, source)?;
                match source {
                    Self::Column { .. } | Self::Foreign(_) => Ok(Self::Scaled {
                        source: Box::new(source),
                        scale: scale.clone(),
                    }),
                    _ => Err(Error::InvalidChannel {
                        channel: name.to_string(),
                        reason: "only column and foreign references can be scaled".to_string(),
                    }),
                }
            }
            Mapping::Layout(kind, component) => {
                let component = component
                    .or_else(|| LayoutComponent::for_channel(name))
                    .ok_or_else(|| Error::InvalidChannel {
                        channel: name.to_string(),
                        reason: "cannot infer layout component from channel name".to_string(),
                    })?;
                if let Some(weight) = kind.weight_column() {
                    if !table.schema().contains(weight) {
                        return Err(Error::missing(source, weight));
                    }
                }
                Ok(Self::Layout {
                    kind: kind.clone(),
                    component,
                })
            }
            Mapping::Callback(f) => Ok(Self::Callback(f.clone())),
        }
    }

    fn classify_get(spec: &GetSpec, catalog: &Catalog, source: &str) -> Result<Self> {
        let (parsed, column) = parse_column(&spec.column);
        let aggregate = spec.aggregate.or(parsed);
        let table = catalog.table(source)?;

        // A plain column of the source itself.
        if aggregate.is_none() && spec.search_key.is_none() && spec.via.is_none() {
            let own = match &spec.target {
                None => true,
                Some(Target::Table(t)) => t == source,
                Some(Target::Mark(_)) => false,
            };
            if let Some(col) = column.as_deref().filter(|c| own && table.has_attribute(c)) {
                return Ok(Self::Column {
                    attr: col.to_string(),
                    transform: spec.transform.clone(),
                });
            }
        }

        let target = match &spec.target {
            Some(Target::Table(t)) => {
                let target = catalog.table(t)?;
                if let Some(col) = column.as_deref() {
                    if !target.has_attribute(col) {
                        return Err(Error::missing(t.as_str(), col));
                    }
                }
                RefTarget::Table(t.clone())
            }
            Some(Target::Mark(id)) => RefTarget::Mark(*id),
            None => {
                let Some(col) = column.as_deref() else {
                    return Err(Error::InvalidChannel {
                        channel: spec.column.clone(),
                        reason: "an aggregate without a column needs an explicit table".to_string(),
                    });
                };
                if catalog.tables_with_attribute(col, source).is_empty() {
                    return Err(Error::missing(source, col));
                }
                RefTarget::Search
            }
        };

        Ok(Self::Foreign(ForeignRef {
            column,
            aggregate,
            target,
            search_key: spec.search_key.clone(),
            via: spec.via,
            transform: spec.transform.clone(),
        }))
    }

    /// Foreign reference behind this channel, if any.
    pub fn foreign(&self) -> Option<&ForeignRef> {
        match self {
            Self::Foreign(r) => Some(r),
            Self::Scaled { source, .. } => source.foreign(),
            _ => None,
        }
    }

    /// Source attribute behind this channel, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Column { attr, .. } => Some(attr),
            Self::Scaled { source, .. } => source.column(),
            _ => None,
        }
    }

    pub fn referenced_mark(&self) -> Option<MarkId> {
        match self.foreign().map(|r| &r.target) {
            Some(RefTarget::Mark(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn transform(&self) -> Option<&TransformFn> {
        match self {
            Self::Column { transform, .. } => transform.as_ref(),
            Self::Foreign(r) => r.transform.as_ref(),
            Self::Scaled { source, .. } => source.transform(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .load_ddl(
                "CREATE TABLE A (aid INTEGER PRIMARY KEY, a TEXT);
                 CREATE TABLE T (aid INTEGER REFERENCES A(aid), v REAL);",
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_parse_column_text() {
        assert_eq!(parse_column("count"), (Some(Aggregate::Count), None));
        assert_eq!(
            parse_column("avg(v)"),
            (Some(Aggregate::Avg), Some("v".to_string()))
        );
        assert_eq!(parse_column("COUNT(*)"), (Some(Aggregate::Count), None));
        assert_eq!(parse_column("v"), (None, Some("v".to_string())));
        assert_eq!(parse_column("f(v)"), (None, Some("f(v)".to_string())));
    }

    #[test]
    fn test_classify_kinds() {
        let catalog = catalog();
        let c = |name: &str, m: Mapping| Channel::classify(name, &m, &catalog, "T");

        assert!(matches!(c("fill", lit("red")), Ok(Channel::Constant(_))));
        assert!(matches!(c("id", field("v")), Err(Error::InvalidChannel { .. })));
        assert!(matches!(c(PARENT_ID, lit(1)), Err(Error::InvalidChannel { .. })));
        assert!(matches!(c("x", field("v")), Ok(Channel::Column { .. })));
        assert!(matches!(c("x", get("v").into()), Ok(Channel::Column { .. })));
        assert!(matches!(c("x", get("a").into()), Ok(Channel::Foreign(_))));
        assert!(matches!(
            c("x", get("a").from_table("A").into()),
            Ok(Channel::Foreign(ForeignRef { target: RefTarget::Table(_), .. }))
        ));
        assert!(matches!(
            c("y", scaled(field("v"), ScaleSpec::linear())),
            Ok(Channel::Scaled { .. })
        ));
        assert!(matches!(
            c("x", layout(LayoutKind::Fill)),
            Ok(Channel::Layout { component: LayoutComponent::X, .. })
        ));
        assert!(matches!(c("label", callback(|_| Value::Null)), Ok(Channel::Callback(_))));
    }

    #[test]
    fn test_classify_errors() {
        let catalog = catalog();
        let c = |name: &str, m: Mapping| Channel::classify(name, &m, &catalog, "T");

        assert!(matches!(c("x", field("nope")), Err(Error::MissingAttribute { .. })));
        assert!(matches!(c("x", get("nope").into()), Err(Error::MissingAttribute { .. })));
        assert!(matches!(
            c("x", get("a").from_table("Nope").into()),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(c("fill", layout(LayoutKind::Fill)), Err(Error::InvalidChannel { .. })));
        assert!(matches!(
            c("x", layout(LayoutKind::weighted(crate::scale::Axis::X, "w", 0.0))),
            Err(Error::MissingAttribute { .. })
        ));
        assert!(matches!(
            c("x", scaled(lit(1), ScaleSpec::linear())),
            Err(Error::InvalidChannel { .. })
        ));
        assert!(matches!(c("n", get("count").into()), Err(Error::InvalidChannel { .. })));
    }

    #[test]
    fn test_aggregate_names() {
        let catalog = catalog();
        let channel =
            Channel::classify("n", &get("avg(v)").from_table("T").into(), &catalog, "A").unwrap();
        let foreign = channel.foreign().unwrap();
        assert_eq!(foreign.aggregate, Some(Aggregate::Avg));
        assert_eq!(foreign.base_name(), "avg_v");
    }
}
