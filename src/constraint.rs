//! Key and foreign-key constraints.

use std::fmt;

use crate::error::{Error, Result};
use crate::schema::{Key, Table};

/// Catalog-assigned constraint identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub u64);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneOne,
    OneMany,
    ManyMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OneOne => "1:1",
            Self::OneMany => "1:*",
            Self::ManyMany => "*:*",
        })
    }
}

/// `t1(x) -- t2(y)`. For ONE_MANY, `t1` is always the "one" side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    t1: String,
    x: Vec<String>,
    t2: String,
    y: Vec<String>,
    cardinality: Cardinality,
}

impl ForeignKey {
    /// Build a foreign key and infer its cardinality from the tables'
    /// current candidate keys.
    pub fn new<S: AsRef<str>>(t1: &Table, x: &[S], t2: &Table, y: &[S]) -> Result<Self> {
        let x: Vec<String> = x.iter().map(|a| a.as_ref().to_string()).collect();
        let y: Vec<String> = y.iter().map(|a| a.as_ref().to_string()).collect();

        if x.is_empty() || x.len() != y.len() {
            return Err(Error::InvalidConstraint(format!(
                "foreign key {}({}) -> {}({}) has mismatched arity",
                t1.name(),
                x.join(", "),
                t2.name(),
                y.join(", ")
            )));
        }
        for (table, attrs) in [(t1, &x), (t2, &y)] {
            if let Some(missing) = attrs.iter().find(|a| !table.has_attribute(a)) {
                return Err(Error::missing(table.name(), missing.as_str()));
            }
        }

        let x_key = t1.is_key(&x);
        let y_key = t2.is_key(&y);
        let fk = match (x_key, y_key) {
            (true, true) => Self::raw(t1, x, t2, y, Cardinality::OneOne),
            (true, false) => Self::raw(t1, x, t2, y, Cardinality::OneMany),
            (false, true) => Self::raw(t2, y, t1, x, Cardinality::OneMany),
            (false, false) => Self::raw(t1, x, t2, y, Cardinality::ManyMany),
        };
        Ok(fk)
    }

    fn raw(t1: &Table, x: Vec<String>, t2: &Table, y: Vec<String>, cardinality: Cardinality) -> Self {
        Self {
            t1: t1.name().to_string(),
            x,
            t2: t2.name().to_string(),
            y,
            cardinality,
        }
    }

    pub fn t1(&self) -> &str {
        &self.t1
    }

    pub fn x(&self) -> &[String] {
        &self.x
    }

    pub fn t2(&self) -> &str {
        &self.t2
    }

    pub fn y(&self) -> &[String] {
        &self.y
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_self_join(&self) -> bool {
        self.t1 == self.t2
    }

    pub fn involves(&self, table: &str) -> bool {
        self.t1 == table || self.t2 == table
    }

    /// Attributes on `table`'s side. For a self join this is the "many"
    /// side (`y`), the side a traversal leaves from.
    pub fn attrs_on(&self, table: &str) -> Option<&[String]> {
        if self.t2 == table {
            Some(&self.y)
        } else if self.t1 == table {
            Some(&self.x)
        } else {
            None
        }
    }

    pub fn other_end(&self, table: &str) -> Option<&str> {
        if self.t2 == table {
            Some(&self.t1)
        } else if self.t1 == table {
            Some(&self.t2)
        } else {
            None
        }
    }

    /// Whether `attrs` (as a set) are the attributes on `table`'s side.
    pub fn matches_side<S: AsRef<str>>(&self, table: &str, attrs: &[S]) -> bool {
        let wanted: Key = attrs.iter().map(|a| a.as_ref().to_string()).collect();
        let sides: Vec<&[String]> = match (self.t1 == table, self.t2 == table) {
            (true, true) => vec![self.y.as_slice(), self.x.as_slice()],
            (false, true) => vec![self.y.as_slice()],
            (true, false) => vec![self.x.as_slice()],
            (false, false) => vec![],
        };
        sides
            .into_iter()
            .any(|side| side.iter().cloned().collect::<Key>() == wanted)
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) {} {}({})",
            self.t1,
            self.x.join(", "),
            self.cardinality,
            self.t2,
            self.y.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    PrimaryKey { table: String, attrs: Key },
    Unique { table: String, attrs: Key },
    ForeignKey(ForeignKey),
}

impl Constraint {
    pub fn primary_key<I, S>(table: impl Into<String>, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::PrimaryKey {
            table: table.into(),
            attrs: crate::schema::key(attrs),
        }
    }

    pub fn unique<I, S>(table: impl Into<String>, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Unique {
            table: table.into(),
            attrs: crate::schema::key(attrs),
        }
    }

    pub fn tables(&self) -> Vec<&str> {
        match self {
            Self::PrimaryKey { table, .. } | Self::Unique { table, .. } => vec![table],
            Self::ForeignKey(fk) => vec![fk.t1(), fk.t2()],
        }
    }

    pub fn as_foreign_key(&self) -> Option<&ForeignKey> {
        match self {
            Self::ForeignKey(fk) => Some(fk),
            _ => None,
        }
    }
}
