//! Table and schema primitives.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Row-identity attribute every table carries.
pub const ROW_ID: &str = "id";

/// Engine column backing [`ROW_ID`] when a table does not declare it.
pub const IMPLICIT_ROW_ID: &str = "rowid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Numeric,
    String,
    Datetime,
}

impl SemanticType {
    /// Map an SQL column type to its semantic type.
    pub fn from_sql(sql_type: &str) -> Self {
        let lower = sql_type.to_lowercase();
        let base = lower.split('(').next().unwrap_or(&lower).trim();

        match base {
            "int" | "integer" | "int2" | "int4" | "int8" | "bigint" | "smallint" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" | "real" | "float"
            | "float4" | "float8" | "double" | "double precision" | "decimal" | "numeric"
            | "boolean" | "bool" => Self::Numeric,
            "timestamp" | "timestamptz" | "datetime" | "date" | "time" | "timetz" | "year" => {
                Self::Datetime
            }
            t if t.starts_with("timestamp") => Self::Datetime,
            _ => Self::String,
        }
    }

    /// Column type used when this crate creates tables.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Numeric => "REAL",
            Self::String => "TEXT",
            Self::Datetime => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Numeric => "numeric",
            Self::String => "string",
            Self::Datetime => "datetime",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub typ: SemanticType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, typ: SemanticType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Numeric)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::String)
    }
}

/// Ordered attribute list with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    attrs: Vec<Attribute>,
}

impl Schema {
    pub fn new(attrs: Vec<Attribute>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for attr in &attrs {
            if !seen.insert(attr.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate attribute `{}`",
                    attr.name
                )));
            }
        }
        Ok(Self { attrs })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.iter().map(|a| a.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// A candidate key: a set of attribute names.
pub type Key = BTreeSet<String>;

pub fn key<I, S>(attrs: I) -> Key
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    attrs.into_iter().map(Into::into).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    display_name: String,
    schema: Schema,
    keys: Vec<Key>,
    derived: bool,
}

impl Table {
    /// Create a table. The row identity `{id}` is always a key.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            schema,
            keys: vec![key([ROW_ID])],
            derived: false,
        }
    }

    /// Mark a table as written by a mark's persist step.
    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// True for declared attributes and the implicit row id.
    pub fn has_attribute(&self, name: &str) -> bool {
        name == ROW_ID || self.schema.contains(name)
    }

    /// Attribute names excluding an implicit row id.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.schema.names()
    }

    pub fn has_explicit_row_id(&self) -> bool {
        self.schema.contains(ROW_ID)
    }

    /// Whether `attrs` (as a set) is one of the candidate keys.
    pub fn is_key<S: AsRef<str>>(&self, attrs: &[S]) -> bool {
        let wanted: Key = attrs.iter().map(|a| a.as_ref().to_string()).collect();
        self.keys.contains(&wanted)
    }

    pub fn add_key(&mut self, attrs: Key) -> Result<()> {
        if let Some(missing) = attrs.iter().find(|a| !self.has_attribute(a)) {
            return Err(Error::missing(&self.name, missing.as_str()));
        }
        if !self.keys.contains(&attrs) {
            self.keys.push(attrs);
        }
        Ok(())
    }

    /// SQL expression naming `attr` on this table, quoted unless it is the
    /// engine's implicit row id.
    pub fn column_sql(&self, attr: &str) -> String {
        if attr == ROW_ID && !self.has_explicit_row_id() {
            IMPLICIT_ROW_ID.to_string()
        } else {
            quote_ident(attr)
        }
    }
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(
            "A",
            Schema::new(vec![Attribute::numeric("aid"), Attribute::string("a")]).unwrap(),
        )
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let err = Schema::new(vec![Attribute::numeric("v"), Attribute::string("v")]);
        assert!(matches!(err, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_implicit_row_id() {
        let t = table();
        assert!(t.has_attribute("id"));
        assert!(!t.has_explicit_row_id());
        assert!(t.is_key(&["id"]));
        assert_eq!(t.column_sql("id"), "rowid");
        assert_eq!(t.column_sql("aid"), "\"aid\"");
    }

    #[test]
    fn test_add_key() {
        let mut t = table();
        assert!(!t.is_key(&["aid"]));
        t.add_key(key(["aid"])).unwrap();
        assert!(t.is_key(&["aid"]));
        assert!(t.add_key(key(["nope"])).is_err());
    }

    #[test]
    fn test_semantic_types() {
        assert_eq!(SemanticType::from_sql("VARCHAR(255)"), SemanticType::String);
        assert_eq!(SemanticType::from_sql("INTEGER"), SemanticType::Numeric);
        assert_eq!(SemanticType::from_sql("double precision"), SemanticType::Numeric);
        assert_eq!(SemanticType::from_sql("TIMESTAMPTZ"), SemanticType::Datetime);
        assert_eq!(SemanticType::from_sql("timestamp with time zone"), SemanticType::Datetime);
    }

    #[test]
    fn test_display_name_is_mutable() {
        let mut t = table();
        t.set_display_name("Authors");
        assert_eq!(t.display_name(), "Authors");
        assert_eq!(t.name(), "A");
    }
}
