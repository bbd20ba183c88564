//! Reference resolution and per-mark query construction.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::Catalog;
use crate::constraint::ConstraintId;
use crate::error::{Error, Result, Warning};
use crate::layout::PARENT_ID;
use crate::path::FkPath;
use crate::schema::{quote_ident, ROW_ID};

use super::channel::{ForeignRef, RefTarget};
use super::query::{base_cte, parent_cte, qualified, CompiledQuery, CteColumn, PathCte, BASE, PARENT};
use super::{Mark, MarkId};

/// Find the FK path a foreign reference from `source` follows. Mark
/// targets are looked up in `mark_tables`.
pub fn resolve_reference(
    catalog: &Catalog,
    source: &str,
    reference: &ForeignRef,
    mark_tables: &BTreeMap<MarkId, String>,
) -> Result<(FkPath, Vec<Warning>)> {
    match &reference.target {
        RefTarget::Table(table) => path_to(catalog, source, table, reference),
        RefTarget::Mark(id) => {
            let table = mark_tables.get(id).ok_or(Error::UnknownMark(*id))?;
            path_to(catalog, source, table, reference)
        }
        RefTarget::Search => search(catalog, source, reference),
    }
}

/// Shortest path to any table declaring the referenced column. Ties go to
/// the first table by name.
fn search(catalog: &Catalog, source: &str, reference: &ForeignRef) -> Result<(FkPath, Vec<Warning>)> {
    let column = reference.base_name();
    let attr = reference.column.as_deref().unwrap_or(&column);

    let mut found: Vec<(FkPath, Vec<Warning>)> = Vec::new();
    for table in catalog.tables_with_attribute(attr, source) {
        match path_to(catalog, source, table, reference) {
            Ok(hit) => found.push(hit),
            Err(Error::NoPath { .. } | Error::NoMatchingConstraint { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    found.sort_by_key(|(path, _)| path.len());

    let candidates: Vec<String> = found
        .iter()
        .map(|(p, _)| p.destination().to_string())
        .collect();
    let mut found = found.into_iter();
    let Some((path, mut warnings)) = found.next() else {
        return Err(Error::no_path(source, attr));
    };
    if candidates.len() > 1 {
        warnings.push(
            Warning::AmbiguousReference {
                attr: attr.to_string(),
                chosen: path.destination().to_string(),
                candidates,
            }
            .emit(),
        );
    }
    Ok((path, warnings))
}

fn path_to(
    catalog: &Catalog,
    source: &str,
    target: &str,
    reference: &ForeignRef,
) -> Result<(FkPath, Vec<Warning>)> {
    let fan_out = reference.aggregate.is_some();

    if let Some(key) = &reference.search_key {
        let mut last = None;
        let matching: Vec<ConstraintId> = catalog
            .foreign_keys()
            .filter(|(_, fk)| fk.matches_side(source, key))
            .map(|(id, _)| id)
            .collect();
        for id in matching {
            match path_via(catalog, source, target, id, fan_out) {
                Ok(path) => return Ok((path, Vec::new())),
                Err(e) => last = Some(e),
            }
        }
        return Err(last.unwrap_or_else(|| Error::NoMatchingConstraint {
            inner: source.to_string(),
            outer: target.to_string(),
            attrs: key.clone(),
        }));
    }

    if let Some(id) = reference.via {
        return Ok((path_via(catalog, source, target, id, fan_out)?, Vec::new()));
    }

    let paths = catalog.find_paths(source, target)?;
    if paths.is_empty() {
        if fan_out {
            if let Some(path) = catalog.find_reverse_path(source, target)? {
                return Ok((path, Vec::new()));
            }
        }
        return Err(Error::no_path(source, target));
    }

    let mut warnings = Vec::new();
    if paths.len() > 1 {
        warnings.push(
            Warning::AmbiguousReference {
                attr: reference.base_name(),
                candidates: paths.iter().map(ToString::to_string).collect(),
                chosen: paths[0].to_string(),
            }
            .emit(),
        );
    }
    let path = paths.into_iter().next().ok_or_else(|| Error::no_path(source, target))?;
    Ok((path, warnings))
}

/// `find_path_via`, walking the constraint backwards for fan-out
/// aggregates when the forward direction has no path.
fn path_via(
    catalog: &Catalog,
    source: &str,
    target: &str,
    id: ConstraintId,
    fan_out: bool,
) -> Result<FkPath> {
    match catalog.find_path_via(source, target, id) {
        Err(Error::NoPath { .. }) if fan_out => catalog
            .find_path_via(target, source, id)
            .map(|p| p.reversed()),
        other => other,
    }
}

/// Build the single query that yields one row per (filtered) source row of
/// `mark`, carrying `id`, every query-backed channel, and `__parent_id`
/// when `parent` (the path to the outer mark's source) is given.
pub fn construct_query(
    catalog: &Catalog,
    mark: &Mark,
    parent: Option<&FkPath>,
    mark_tables: &BTreeMap<MarkId, String>,
) -> Result<CompiledQuery> {
    let source = catalog.table(&mark.source)?;

    let mut used: BTreeSet<String> = source.attribute_names().map(String::from).collect();
    used.insert(ROW_ID.to_string());
    used.insert(PARENT_ID.to_string());

    let mut ctes: Vec<PathCte> = Vec::new();
    let mut warnings = Vec::new();
    let mut columns = BTreeMap::new();
    // Qualified expression per channel, for filters and ordering.
    let mut exprs: BTreeMap<String, String> = BTreeMap::new();

    for (name, channel) in &mark.channels {
        if let Some(attr) = channel.column() {
            columns.insert(name.clone(), attr.to_string());
            exprs.insert(name.clone(), qualified(BASE, attr));
            continue;
        }
        let Some(reference) = channel.foreign() else {
            continue;
        };

        let (path, found) = resolve_reference(catalog, &mark.source, reference, mark_tables)?;
        warnings.extend(found);

        let index = match ctes
            .iter()
            .position(|c| c.path.signature() == path.signature() && c.path.destination() == path.destination())
        {
            Some(i) => i,
            None => {
                ctes.push(PathCte {
                    name: format!("p{}", ctes.len()),
                    path,
                    columns: Vec::new(),
                });
                ctes.len() - 1
            }
        };
        let cte = &mut ctes[index];

        let existing = cte
            .columns
            .iter()
            .find(|c| c.column == reference.column && c.aggregate == reference.aggregate)
            .map(|c| c.alias.clone());
        let alias = match existing {
            Some(alias) => alias,
            None => {
                let alias = fresh_alias(&mut used, &reference.base_name(), name);
                cte.columns.push(CteColumn {
                    column: reference.column.clone(),
                    aggregate: reference.aggregate,
                    alias: alias.clone(),
                });
                alias
            }
        };
        exprs.insert(name.clone(), qualified(&cte.name, &alias));
        columns.insert(name.clone(), alias);
    }

    let resolve = |column: &str| -> Result<String> {
        if column == ROW_ID || source.schema().contains(column) {
            Ok(qualified(BASE, column))
        } else {
            exprs
                .get(column)
                .cloned()
                .ok_or_else(|| Error::missing(mark.source.as_str(), column))
        }
    };

    let mut with = vec![base_cte(source)];
    if let Some(path) = parent {
        with.push(parent_cte(catalog, path)?);
    }
    for cte in &ctes {
        with.push(cte.to_sql(catalog)?);
    }

    let mut select = vec![format!("{}.*", quote_ident(BASE))];
    let mut from = quote_ident(BASE);
    if parent.is_some() {
        select.push(qualified(PARENT, PARENT_ID));
        from.push_str(&format!(
            " JOIN {} ON {} = {}",
            quote_ident(PARENT),
            qualified(PARENT, ROW_ID),
            qualified(BASE, ROW_ID)
        ));
    }
    for cte in &ctes {
        select.extend(cte.columns.iter().map(|c| qualified(&cte.name, &c.alias)));
        from.push_str(&format!(
            " LEFT JOIN {} ON {} = {}",
            quote_ident(&cte.name),
            qualified(&cte.name, ROW_ID),
            qualified(BASE, ROW_ID)
        ));
    }

    let mut sql = format!(
        "WITH {} SELECT DISTINCT {} FROM {}",
        with.join(", "),
        select.join(", "),
        from
    );

    if !mark.filters.is_empty() {
        let conditions = mark
            .filters
            .iter()
            .map(|f| Ok(format!("{} {} {}", resolve(&f.column)?, f.op.sql(), f.value.to_sql_literal())))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    let order = if mark.order_by.is_empty() {
        vec![qualified(BASE, ROW_ID)]
    } else {
        mark.order_by
            .iter()
            .map(|o| Ok(format!("{}{}", resolve(&o.column)?, if o.descending { " DESC" } else { "" })))
            .collect::<Result<Vec<_>>>()?
    };
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));

    log::debug!("{} compiled: {}", mark.id, sql);
    Ok(CompiledQuery {
        sql,
        columns,
        paths: ctes.into_iter().map(|c| c.path).collect(),
        warnings,
    })
}

/// `base`, or `base_channel` (then numbered) when `base` is taken.
fn fresh_alias(used: &mut BTreeSet<String>, base: &str, channel: &str) -> String {
    let mut alias = base.to_string();
    if used.contains(&alias) {
        alias = format!("{}_{}", base, channel);
    }
    let stem = alias.clone();
    let mut n = 1;
    while used.contains(&alias) {
        alias = format!("{}_{}", stem, n);
        n += 1;
    }
    used.insert(alias.clone());
    alias
}
