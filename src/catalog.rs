//! Registry of tables and constraints.

use std::collections::BTreeMap;

use crate::constraint::{Constraint, ConstraintId, ForeignKey};
use crate::error::{Error, Result};
use crate::path::{DependencyGraph, FkPath};
use crate::schema::{Attribute, Schema, Table};
use crate::sql::parse_ddl;

/// Monotonic id source.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: Option<String>,
    constraint: Constraint,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
    constraints: BTreeMap<ConstraintId, Entry>,
    ids: IdGen,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(table.name()) {
            return Err(Error::DuplicateTable(table.name().to_string()));
        }
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Register a constraint. Key constraints add a candidate key to
    /// their table.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintId> {
        self.add_named_constraint(None, constraint)
    }

    pub fn add_named_constraint(
        &mut self,
        name: Option<String>,
        constraint: Constraint,
    ) -> Result<ConstraintId> {
        match &constraint {
            Constraint::PrimaryKey { table, attrs } | Constraint::Unique { table, attrs } => {
                self.table_mut(table)?.add_key(attrs.clone())?;
            }
            Constraint::ForeignKey(fk) => {
                for (table, attrs) in [(fk.t1(), fk.x()), (fk.t2(), fk.y())] {
                    let table = self.table(table)?;
                    if let Some(missing) = attrs.iter().find(|a| !table.has_attribute(a)) {
                        return Err(Error::missing(table.name(), missing.as_str()));
                    }
                }
            }
        }

        let id = ConstraintId(self.ids.next_id());
        log::debug!("registered constraint {}", id);
        self.constraints.insert(id, Entry { name, constraint });
        Ok(id)
    }

    /// Build a foreign key between two registered tables and register it.
    pub fn add_foreign_key<S: AsRef<str>>(
        &mut self,
        t1: &str,
        x: &[S],
        t2: &str,
        y: &[S],
    ) -> Result<ConstraintId> {
        let fk = ForeignKey::new(self.table(t1)?, x, self.table(t2)?, y)?;
        self.add_constraint(Constraint::ForeignKey(fk))
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(&id).map(|e| &e.constraint)
    }

    pub fn constraint_name(&self, id: ConstraintId) -> Option<&str> {
        self.constraints.get(&id).and_then(|e| e.name.as_deref())
    }

    pub fn foreign_key(&self, id: ConstraintId) -> Result<&ForeignKey> {
        self.constraint(id)
            .and_then(Constraint::as_foreign_key)
            .ok_or_else(|| Error::InvalidConstraint(format!("{} is not a foreign key", id)))
    }

    /// Foreign keys in id order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (ConstraintId, &ForeignKey)> {
        self.constraints
            .iter()
            .filter_map(|(id, e)| e.constraint.as_foreign_key().map(|fk| (*id, fk)))
    }

    /// Remove a table along with every constraint touching it.
    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))?;
        self.constraints
            .retain(|_, e| !e.constraint.tables().contains(&name));
        Ok(table)
    }

    /// A table name starting with `prefix` not yet in the catalog.
    pub fn fresh_table_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{}_{}", prefix, self.ids.next_id());
            if !self.tables.contains_key(&name) {
                return name;
            }
        }
    }

    /// Register the tables, keys and foreign keys declared by a DDL script.
    /// Returns the names of the new tables.
    pub fn load_ddl(&mut self, sql: &str) -> Result<Vec<String>> {
        let script = parse_ddl(sql)?;
        let mut added = Vec::new();

        for ddl in &script.tables {
            let schema = Schema::new(
                ddl.columns
                    .iter()
                    .map(|c| Attribute::new(c.name.clone(), c.typ))
                    .collect(),
            )?;
            self.add_table(Table::new(ddl.name.clone(), schema))?;

            if !ddl.primary_key.is_empty() {
                self.add_constraint(Constraint::primary_key(
                    ddl.name.clone(),
                    ddl.primary_key.iter().cloned(),
                ))?;
            }
            for cols in &ddl.unique {
                self.add_constraint(Constraint::unique(ddl.name.clone(), cols.iter().cloned()))?;
            }
            added.push(ddl.name.clone());
        }

        for fk in &script.foreign_keys {
            if !self.contains_table(&fk.table) || !self.contains_table(&fk.target) {
                log::warn!(
                    "skipping foreign key {}({}) -> {}: table not in catalog",
                    fk.table,
                    fk.columns.join(", "),
                    fk.target
                );
                continue;
            }
            let built = ForeignKey::new(
                self.table(&fk.table)?,
                &fk.columns,
                self.table(&fk.target)?,
                &fk.target_columns,
            )?;
            self.add_named_constraint(fk.name.clone(), Constraint::ForeignKey(built))?;
        }

        Ok(added)
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (id, fk) in self.foreign_keys() {
            graph.add_foreign_key(id, fk);
        }
        graph
    }

    fn check_tables(&self, source: &str, destination: &str) -> Result<()> {
        self.table(source)?;
        self.table(destination)?;
        Ok(())
    }

    pub fn find_path(&self, source: &str, destination: &str) -> Result<Option<FkPath>> {
        self.check_tables(source, destination)?;
        Ok(self.dependency_graph().find_path(source, destination))
    }

    pub fn find_paths(&self, source: &str, destination: &str) -> Result<Vec<FkPath>> {
        self.check_tables(source, destination)?;
        Ok(self.dependency_graph().find_paths(source, destination))
    }

    pub fn find_path_via(
        &self,
        source: &str,
        destination: &str,
        required: ConstraintId,
    ) -> Result<FkPath> {
        self.check_tables(source, destination)?;
        self.foreign_key(required)?;
        self.dependency_graph()
            .find_path_via(source, destination, required)
    }

    /// A many -> one path from `destination` to `source`, walked backwards.
    /// Used for aggregates that fan out from `source`.
    pub fn find_reverse_path(&self, source: &str, destination: &str) -> Result<Option<FkPath>> {
        self.check_tables(source, destination)?;
        Ok(self
            .dependency_graph()
            .find_path(destination, source)
            .map(|p| p.reversed()))
    }

    /// Tables other than `source` declaring `attr`, in name order. Mark
    /// tables are left out; they are only reachable by mark reference.
    pub fn tables_with_attribute(&self, attr: &str, source: &str) -> Vec<&str> {
        self.tables
            .values()
            .filter(|t| !t.is_derived() && t.name() != source && t.schema().contains(attr))
            .map(Table::name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Cardinality;

    const DDL: &str = r#"
        CREATE TABLE A (aid INTEGER PRIMARY KEY, a TEXT);
        CREATE TABLE B (bid INTEGER PRIMARY KEY, b TEXT);
        CREATE TABLE T (
            aid INTEGER REFERENCES A(aid),
            bid INTEGER,
            v REAL,
            FOREIGN KEY (bid) REFERENCES B(bid)
        );
        CREATE TABLE L (tid INTEGER REFERENCES Missing(id));
    "#;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.load_ddl(DDL).unwrap();
        catalog
    }

    #[test]
    fn test_load_ddl_registers_tables_and_keys() {
        let catalog = catalog();
        assert_eq!(catalog.tables().count(), 4);
        assert!(catalog.table("A").unwrap().is_key(&["aid"]));
        assert!(catalog.table("T").unwrap().is_key(&["id"]));
        assert_eq!(catalog.foreign_keys().count(), 2);
        for (_, fk) in catalog.foreign_keys() {
            assert_eq!(fk.cardinality(), Cardinality::OneMany);
            assert_eq!(fk.t2(), "T");
        }
    }

    #[test]
    fn test_paths_from_fact_table() {
        let catalog = catalog();
        assert_eq!(
            catalog.find_path("T", "A").unwrap().unwrap().tables(),
            vec!["T", "A"]
        );
        assert!(catalog.find_path("A", "B").unwrap().is_none());
        let back = catalog.find_reverse_path("A", "T").unwrap().unwrap();
        assert_eq!(back.tables(), vec!["A", "T"]);
        assert!(matches!(
            catalog.find_path("T", "Nope"),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn test_add_constraint_validates() {
        let mut catalog = catalog();
        assert!(matches!(
            catalog.add_constraint(Constraint::primary_key("Nope", ["id"])),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(
            catalog.add_foreign_key("T", &["nope"], "A", &["aid"]),
            Err(Error::MissingAttribute { .. })
        ));
        assert!(matches!(
            catalog.add_table(Table::new("A", Schema::default())),
            Err(Error::DuplicateTable(_))
        ));
    }

    #[test]
    fn test_drop_table_removes_constraints() {
        let mut catalog = catalog();
        catalog.drop_table("A").unwrap();
        assert_eq!(catalog.foreign_keys().count(), 1);
        assert!(catalog.table("A").is_err());
    }

    #[test]
    fn test_fresh_table_name_and_lookup() {
        let mut catalog = catalog();
        let name = catalog.fresh_table_name("mark");
        assert!(name.starts_with("mark_"));
        assert!(!catalog.contains_table(&name));
        assert_eq!(catalog.tables_with_attribute("a", "T"), vec!["A"]);
    }

    #[test]
    fn test_derived_tables_skipped_by_attribute_lookup() {
        let mut catalog = catalog();
        let schema = Schema::new(vec![Attribute::numeric("id"), Attribute::string("a")]).unwrap();
        catalog.add_table(Table::new("mark_0", schema).derived()).unwrap();
        catalog.add_foreign_key("mark_0", &["id"], "A", &["id"]).unwrap();
        assert_eq!(catalog.tables_with_attribute("a", "T"), vec!["A"]);
        assert!(catalog.table("mark_0").unwrap().is_derived());
    }
}
