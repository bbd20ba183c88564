//! Nesting relations between marks and the root canvas.

use crate::catalog::Catalog;
use crate::constraint::{Cardinality, ConstraintId};
use crate::error::{Error, Result, Warning};
use crate::layout::BoundingBox;
use crate::mark::MarkId;
use crate::path::FkPath;

/// Inner mark placed inside each row of an outer mark, joined along `path`
/// from the inner source to the outer source.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkNest {
    /// `None` for identity nests over the same source.
    pub constraint: Option<ConstraintId>,
    pub path: FkPath,
    pub inner: MarkId,
    pub outer: MarkId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Nest {
    Root { bbox: BoundingBox },
    Mark(MarkNest),
}

impl Nest {
    pub fn outer(&self) -> Option<MarkId> {
        match self {
            Self::Root { .. } => None,
            Self::Mark(n) => Some(n.outer),
        }
    }
}

/// Join along the first shortest path between the sources. Same-source
/// marks nest by identity.
pub fn nest_without_predicate(
    catalog: &Catalog,
    (inner, inner_source): (MarkId, &str),
    (outer, outer_source): (MarkId, &str),
) -> Result<(MarkNest, Vec<Warning>)> {
    if inner_source == outer_source {
        return Ok((identity(inner, outer, inner_source), Vec::new()));
    }
    let paths = catalog.find_paths(inner_source, outer_source)?;
    let mut warnings = Vec::new();
    if paths.len() > 1 {
        warnings.push(
            Warning::AmbiguousReference {
                attr: outer_source.to_string(),
                candidates: paths.iter().map(ToString::to_string).collect(),
                chosen: paths[0].to_string(),
            }
            .emit(),
        );
    }
    let path = paths
        .into_iter()
        .next()
        .ok_or_else(|| Error::no_path(inner_source, outer_source))?;
    Ok((
        MarkNest {
            constraint: path.first_constraint(),
            path,
            inner,
            outer,
        },
        warnings,
    ))
}

/// Join along the first foreign key whose attributes on the inner source's
/// side are `attrs` and which leads to the outer source.
pub fn nest_with_predicate<S: AsRef<str>>(
    catalog: &Catalog,
    (inner, inner_source): (MarkId, &str),
    (outer, outer_source): (MarkId, &str),
    attrs: &[S],
) -> Result<MarkNest> {
    let mut many_many = false;
    for (id, fk) in catalog.foreign_keys() {
        if !fk.matches_side(inner_source, attrs) {
            continue;
        }
        if fk.cardinality() == Cardinality::ManyMany {
            many_many = true;
            continue;
        }
        match catalog.find_path_via(inner_source, outer_source, id) {
            Ok(path) => {
                return Ok(MarkNest {
                    constraint: Some(id),
                    path,
                    inner,
                    outer,
                });
            }
            Err(Error::NoPath { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    let attrs: Vec<String> = attrs.iter().map(|a| a.as_ref().to_string()).collect();
    if many_many {
        return Err(Error::InvalidConstraint(format!(
            "only many-to-many constraints on {}({}) match",
            inner_source,
            attrs.join(", ")
        )));
    }
    Err(Error::NoMatchingConstraint {
        inner: inner_source.to_string(),
        outer: outer_source.to_string(),
        attrs,
    })
}

/// Join along an explicit constraint.
pub fn nest_via(
    catalog: &Catalog,
    (inner, inner_source): (MarkId, &str),
    (outer, outer_source): (MarkId, &str),
    constraint: ConstraintId,
) -> Result<MarkNest> {
    let fk = catalog.foreign_key(constraint)?;
    if fk.cardinality() == Cardinality::ManyMany {
        return Err(Error::InvalidConstraint(format!(
            "cannot nest along many-to-many constraint {}",
            fk
        )));
    }
    let path = catalog.find_path_via(inner_source, outer_source, constraint)?;
    Ok(MarkNest {
        constraint: Some(constraint),
        path,
        inner,
        outer,
    })
}

fn identity(inner: MarkId, outer: MarkId, source: &str) -> MarkNest {
    MarkNest {
        constraint: None,
        path: FkPath::empty(source),
        inner,
        outer,
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
                 CREATE TABLE T (aid INTEGER REFERENCES A(aid), aid2 INTEGER REFERENCES A(aid), v REAL);
                 CREATE TABLE U (x INTEGER, y INTEGER);
                 CREATE TABLE W (x INTEGER, y INTEGER);",
            )
            .unwrap();
        catalog.add_foreign_key("U", &["x"], "W", &["x"]).unwrap();
        catalog
    }

    const INNER: MarkId = MarkId(1);
    const OUTER: MarkId = MarkId(0);

    #[test]
    fn test_without_predicate() {
        let catalog = catalog();
        let (nest, warnings) = nest_without_predicate(&catalog, (INNER, "T"), (OUTER, "A")).unwrap();
        assert_eq!(nest.path.tables(), vec!["T", "A"]);
        assert_eq!(warnings.len(), 1);

        let (same, _) = nest_without_predicate(&catalog, (INNER, "T"), (OUTER, "T")).unwrap();
        assert!(same.path.is_empty());
        assert_eq!(same.constraint, None);

        assert!(matches!(
            nest_without_predicate(&catalog, (INNER, "A"), (OUTER, "T")),
            Err(Error::NoPath { .. })
        ));
    }

    #[test]
    fn test_with_predicate() {
        let catalog = catalog();
        let nest = nest_with_predicate(&catalog, (INNER, "T"), (OUTER, "A"), &["aid2"]).unwrap();
        assert_eq!(nest.path.steps()[0].from_attrs, vec!["aid2".to_string()]);
        assert_eq!(nest.constraint, nest.path.first_constraint());

        assert!(matches!(
            nest_with_predicate(&catalog, (INNER, "U"), (OUTER, "W"), &["x"]),
            Err(Error::InvalidConstraint(_))
        ));
        assert!(matches!(
            nest_with_predicate(&catalog, (INNER, "T"), (OUTER, "A"), &["v"]),
            Err(Error::NoMatchingConstraint { .. })
        ));
    }

    #[test]
    fn test_via_rejects_many_many() {
        let catalog = catalog();
        let (mm, _) = catalog
            .foreign_keys()
            .find(|(_, fk)| fk.cardinality() == Cardinality::ManyMany)
            .unwrap();
        assert!(matches!(
            nest_via(&catalog, (INNER, "U"), (OUTER, "W"), mm),
            Err(Error::InvalidConstraint(_))
        ));

        let (one_many, _) = catalog.foreign_keys().next().unwrap();
        let nest = nest_via(&catalog, (INNER, "T"), (OUTER, "A"), one_many).unwrap();
        assert_eq!(nest.path.signature(), vec![one_many]);
    }
}
