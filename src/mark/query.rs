//! SQL text for compiled mark queries.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::catalog::Catalog;
use crate::error::{Result, Warning};
use crate::layout::PARENT_ID;
use crate::path::FkPath;
use crate::schema::{quote_ident, Table, ROW_ID};

use super::channel::Aggregate;

/// A mark's query, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// Result column behind each query-backed channel.
    pub columns: BTreeMap<String, String>,
    pub paths: Vec<FkPath>,
    pub warnings: Vec<Warning>,
}

pub(crate) const BASE: &str = "base";
pub(crate) const PARENT: &str = "parent";

fn alias(step: usize) -> String {
    format!("t{}", step)
}

/// `FROM source t0 JOIN ... tk` along `path`, every step under a fresh
/// alias so a table can appear more than once.
fn join_chain(catalog: &Catalog, path: &FkPath, outer: bool) -> Result<String> {
    let mut sql = format!("FROM {} {}", quote_ident(path.source()), alias(0));
    let join = if outer { "LEFT JOIN" } else { "JOIN" };

    for (i, step) in path.steps().iter().enumerate() {
        let from = catalog.table(&step.from)?;
        let to = catalog.table(&step.to)?;
        let on: Vec<String> = step
            .from_attrs
            .iter()
            .zip(&step.to_attrs)
            .map(|(fa, ta)| {
                format!(
                    "{}.{} = {}.{}",
                    alias(i),
                    from.column_sql(fa),
                    alias(i + 1),
                    to.column_sql(ta)
                )
            })
            .collect();
        let _ = write!(
            sql,
            " {} {} {} ON {}",
            join,
            quote_ident(&step.to),
            alias(i + 1),
            on.join(" AND ")
        );
    }
    Ok(sql)
}

/// One selected value of a path CTE.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CteColumn {
    pub column: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub alias: String,
}

/// A CTE joining the source to one path's destination.
#[derive(Debug, Clone)]
pub(crate) struct PathCte {
    pub name: String,
    pub path: FkPath,
    pub columns: Vec<CteColumn>,
}

impl PathCte {
    pub fn to_sql(&self, catalog: &Catalog) -> Result<String> {
        let source = catalog.table(self.path.source())?;
        let target = catalog.table(self.path.destination())?;
        let last = alias(self.path.len());
        let source_id = format!("{}.{}", alias(0), source.column_sql(ROW_ID));
        let grouped = self.columns.iter().any(|c| c.aggregate.is_some());

        let mut select = vec![format!("{} AS {}", source_id, quote_ident(ROW_ID))];
        let mut group_by = vec![source_id];
        for col in &self.columns {
            let expr = match &col.column {
                Some(c) => format!("{}.{}", last, target.column_sql(c)),
                None => format!("{}.{}", last, target.column_sql(ROW_ID)),
            };
            match col.aggregate {
                Some(agg) => {
                    select.push(format!("{}({}) AS {}", agg.sql_name(), expr, quote_ident(&col.alias)))
                }
                None => {
                    select.push(format!("{} AS {}", expr, quote_ident(&col.alias)));
                    group_by.push(expr);
                }
            }
        }

        let mut sql = format!(
            "{} AS (SELECT {} {}",
            quote_ident(&self.name),
            select.join(", "),
            join_chain(catalog, &self.path, grouped)?
        );
        if grouped {
            let _ = write!(sql, " GROUP BY {}", group_by.join(", "));
        }
        sql.push(')');
        Ok(sql)
    }
}

/// Source row id plus every declared attribute.
pub(crate) fn base_cte(table: &Table) -> String {
    let mut select = vec![format!(
        "{}.{} AS {}",
        alias(0),
        table.column_sql(ROW_ID),
        quote_ident(ROW_ID)
    )];
    select.extend(
        table
            .attribute_names()
            .filter(|a| *a != ROW_ID)
            .map(|a| format!("{}.{}", alias(0), quote_ident(a))),
    );
    format!(
        "{} AS (SELECT {} FROM {} {})",
        quote_ident(BASE),
        select.join(", "),
        quote_ident(table.name()),
        alias(0)
    )
}

/// Source row id paired with the row id of the outer mark's source, reached
/// along `path`. An empty path pairs each row with itself.
pub(crate) fn parent_cte(catalog: &Catalog, path: &FkPath) -> Result<String> {
    let source = catalog.table(path.source())?;
    let outer = catalog.table(path.destination())?;
    Ok(format!(
        "{} AS (SELECT {}.{} AS {}, {}.{} AS {} {})",
        quote_ident(PARENT),
        alias(0),
        source.column_sql(ROW_ID),
        quote_ident(ROW_ID),
        alias(path.len()),
        outer.column_sql(ROW_ID),
        quote_ident(PARENT_ID),
        join_chain(catalog, path, false)?
    ))
}

pub(crate) fn qualified(cte: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(cte), quote_ident(column))
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
    fn test_base_cte_uses_rowid() {
        let catalog = catalog();
        assert_eq!(
            base_cte(catalog.table("T").unwrap()),
            r#""base" AS (SELECT t0.rowid AS "id", t0."aid", t0."v" FROM "T" t0)"#
        );
    }

    #[test]
    fn test_path_cte_join() {
        let catalog = catalog();
        let cte = PathCte {
            name: "p0".into(),
            path: catalog.find_path("T", "A").unwrap().unwrap(),
            columns: vec![CteColumn {
                column: Some("a".into()),
                aggregate: None,
                alias: "a".into(),
            }],
        };
        assert_eq!(
            cte.to_sql(&catalog).unwrap(),
            r#""p0" AS (SELECT t0.rowid AS "id", t1."a" AS "a" FROM "T" t0 JOIN "A" t1 ON t0."aid" = t1."aid")"#
        );
    }

    #[test]
    fn test_aggregate_cte_groups() {
        let catalog = catalog();
        let cte = PathCte {
            name: "p0".into(),
            path: catalog.find_reverse_path("A", "T").unwrap().unwrap(),
            columns: vec![
                CteColumn {
                    column: None,
                    aggregate: Some(Aggregate::Count),
                    alias: "count".into(),
                },
                CteColumn {
                    column: Some("v".into()),
                    aggregate: Some(Aggregate::Median),
                    alias: "median_v".into(),
                },
            ],
        };
        assert_eq!(
            cte.to_sql(&catalog).unwrap(),
            concat!(
                r#""p0" AS (SELECT t0.rowid AS "id", COUNT(t1.rowid) AS "count", median(t1."v") AS "median_v" "#,
                r#"FROM "A" t0 LEFT JOIN "T" t1 ON t0."aid" = t1."aid" GROUP BY t0.rowid)"#
            )
        );
    }

    #[test]
    fn test_identity_parent() {
        let catalog = catalog();
        assert_eq!(
            parent_cte(&catalog, &FkPath::empty("T")).unwrap(),
            r#""parent" AS (SELECT t0.rowid AS "id", t0.rowid AS "__parent_id" FROM "T" t0)"#
        );
    }
}
