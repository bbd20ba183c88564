//! Relational marks: visual elements bound to tables, joined along
//! foreign-key paths, compiled to one query each and scheduled through a
//! Query -> Layout -> Render -> Persist pipeline.

pub mod canvas;
pub mod catalog;
pub mod constraint;
pub mod engine;
pub mod error;
pub mod layout;
pub mod mark;
pub mod measure;
pub mod nest;
pub mod path;
pub mod render;
pub mod scale;
pub mod scheduler;
pub mod schema;
pub mod sql;
pub mod svg;
pub mod value;

pub use canvas::{Canvas, CanvasConfig};
pub use catalog::Catalog;
pub use constraint::{Cardinality, Constraint, ConstraintId, ForeignKey};
pub use engine::{Engine, SqliteEngine};
pub use error::{Error, Result, Warning};
pub use layout::{BoundingBox, LayoutComponent, LayoutKind};
pub use mark::{callback, field, get, layout, lit, scaled, Aggregate, FilterOp, MarkId, MarkSpec};
pub use path::FkPath;
pub use render::{Renderer, Shape};
pub use scale::{Axis, ScaleSpec};
pub use scheduler::{Stage, TaskGraph, TaskId, TaskState};
pub use schema::{Attribute, Schema, SemanticType, Table};
pub use svg::SvgRenderer;
pub use value::{ResultSet, Value};
