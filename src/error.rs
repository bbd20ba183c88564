//! Crate-wide error and warning types.

use std::fmt;

use thiserror::Error;

use crate::mark::MarkId;
use crate::scheduler::TaskId;
use crate::sql::SqlParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no foreign-key path from `{from}` to `{to}`")]
    NoPath { from: String, to: String },

    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("no constraint on `{inner}` with attributes {attrs:?} leads to `{outer}`")]
    NoMatchingConstraint {
        inner: String,
        outer: String,
        attrs: Vec<String>,
    },

    #[error("attribute `{attr}` not found in `{table}`")]
    MissingAttribute { table: String, attr: String },

    #[error("dependency cycle between marks {marks:?}")]
    Cycle { marks: Vec<MarkId> },

    #[error("task {task} failed: {source}")]
    TaskFailure {
        task: TaskId,
        #[source]
        source: Box<Error>,
    },

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("table `{0}` already exists")]
    DuplicateTable(String),

    #[error("unknown mark {0}")]
    UnknownMark(MarkId),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid channel `{channel}`: {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error("DDL error: {0}")]
    Ddl(#[from] SqlParseError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("render error: {0}")]
    Render(String),
}

impl Error {
    pub(crate) fn missing(table: impl Into<String>, attr: impl Into<String>) -> Self {
        Self::MissingAttribute {
            table: table.into(),
            attr: attr.into(),
        }
    }

    pub(crate) fn no_path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoPath {
            from: from.into(),
            to: to.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal diagnostics. These are logged and recorded, never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// More than one candidate could supply `attr`; `chosen` won.
    AmbiguousReference {
        attr: String,
        candidates: Vec<String>,
        chosen: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousReference {
                attr,
                candidates,
                chosen,
            } => write!(
                f,
                "ambiguous reference to `{}` (candidates: {}), using `{}`",
                attr,
                candidates.join(", "),
                chosen
            ),
        }
    }
}

impl Warning {
    pub(crate) fn emit(self) -> Self {
        log::warn!("{}", self);
        self
    }
}
