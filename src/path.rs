//! Foreign-key dependency graph and path search.
//!
//! Edges point in the direction a join can follow without duplicating
//! rows: many -> one for ONE_MANY keys, both ways for ONE_ONE keys.
//! MANY_MANY keys contribute no edges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constraint::{Cardinality, ConstraintId, ForeignKey};
use crate::error::{Error, Result};

/// One hop across a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub constraint: ConstraintId,
    pub from: String,
    pub from_attrs: Vec<String>,
    pub to: String,
    pub to_attrs: Vec<String>,
}

impl PathStep {
    fn reversed(&self) -> Self {
        Self {
            constraint: self.constraint,
            from: self.to.clone(),
            from_attrs: self.to_attrs.clone(),
            to: self.from.clone(),
            to_attrs: self.from_attrs.clone(),
        }
    }
}

/// A chain of steps starting at `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkPath {
    source: String,
    steps: Vec<PathStep>,
}

impl FkPath {
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            steps: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        self.steps
            .last()
            .map_or(self.source.as_str(), |s| s.to.as_str())
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ordered constraint ids; two paths with the same signature are the
    /// same join.
    pub fn signature(&self) -> Vec<ConstraintId> {
        self.steps.iter().map(|s| s.constraint).collect()
    }

    pub fn first_constraint(&self) -> Option<ConstraintId> {
        self.steps.first().map(|s| s.constraint)
    }

    /// Tables in visiting order, source first.
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.source.as_str())
            .chain(self.steps.iter().map(|s| s.to.as_str()))
            .collect()
    }

    pub fn visits(&self, table: &str) -> bool {
        self.source == table || self.steps.iter().any(|s| s.to == table)
    }

    fn extended(&self, step: &PathStep) -> Self {
        let mut next = self.clone();
        next.steps.push(step.clone());
        next
    }

    fn concat(mut self, rest: &FkPath) -> Self {
        self.steps.extend(rest.steps.iter().cloned());
        self
    }

    /// The same join walked from the destination back to the source.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination().to_string(),
            steps: self.steps.iter().rev().map(PathStep::reversed).collect(),
        }
    }
}

impl fmt::Display for FkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        for step in &self.steps {
            write!(f, " -[{}]-> {}", step.constraint, step.to)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<PathStep>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edges a foreign key contributes.
    pub fn add_foreign_key(&mut self, id: ConstraintId, fk: &ForeignKey) {
        let many_to_one = PathStep {
            constraint: id,
            from: fk.t2().to_string(),
            from_attrs: fk.y().to_vec(),
            to: fk.t1().to_string(),
            to_attrs: fk.x().to_vec(),
        };
        match fk.cardinality() {
            Cardinality::OneOne => {
                let back = many_to_one.reversed();
                self.push(many_to_one);
                self.push(back);
            }
            Cardinality::OneMany => self.push(many_to_one),
            Cardinality::ManyMany => {}
        }
    }

    fn push(&mut self, step: PathStep) {
        let out = self.edges.entry(step.from.clone()).or_default();
        out.push(step);
        out.sort_by_key(|s| s.constraint);
    }

    pub fn neighbors(&self, table: &str) -> &[PathStep] {
        self.edges.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Directed steps that cross `constraint`.
    fn steps_of(&self, constraint: ConstraintId) -> Vec<&PathStep> {
        self.edges
            .values()
            .flatten()
            .filter(|s| s.constraint == constraint)
            .collect()
    }

    /// All shortest simple paths, deduplicated by signature.
    pub fn find_paths(&self, source: &str, destination: &str) -> Vec<FkPath> {
        if source == destination {
            return vec![FkPath::empty(source)];
        }

        let mut frontier = vec![FkPath::empty(source)];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            let mut found: Vec<FkPath> = Vec::new();
            let mut seen: BTreeSet<Vec<ConstraintId>> = BTreeSet::new();

            for path in &frontier {
                for step in self.neighbors(path.destination()) {
                    if path.visits(&step.to) {
                        continue;
                    }
                    let extended = path.extended(step);
                    if step.to == destination {
                        if seen.insert(extended.signature()) {
                            found.push(extended);
                        }
                    } else {
                        next.push(extended);
                    }
                }
            }

            if !found.is_empty() {
                return found;
            }
            frontier = next;
        }
        Vec::new()
    }

    /// First shortest simple path.
    pub fn find_path(&self, source: &str, destination: &str) -> Option<FkPath> {
        self.find_paths(source, destination).into_iter().next()
    }

    /// A simple path that crosses `required` before any other constraint
    /// beyond the shortest approach to it.
    pub fn find_path_via(
        &self,
        source: &str,
        destination: &str,
        required: ConstraintId,
    ) -> Result<FkPath> {
        // Entry candidates ordered by how far their near endpoint is.
        let mut entries: Vec<(FkPath, &PathStep)> = self
            .steps_of(required)
            .into_iter()
            .filter_map(|step| self.find_path(source, &step.from).map(|prefix| (prefix, step)))
            .collect();
        entries.sort_by_key(|(prefix, _)| prefix.len());

        for (prefix, step) in entries {
            let start = prefix.extended(step);
            if let Some(path) = self.depth_first(&start, destination) {
                return Ok(path);
            }
        }
        Err(Error::no_path(source, destination))
    }

    /// Iterative depth-first search from the end of `start`, backtracking
    /// on dead ends. Tables already on `start` are not revisited.
    fn depth_first(&self, start: &FkPath, destination: &str) -> Option<FkPath> {
        let mut stack = vec![FkPath::empty(start.destination())];
        while let Some(path) = stack.pop() {
            if path.destination() == destination {
                return Some(start.clone().concat(&path));
            }
            for step in self.neighbors(path.destination()).iter().rev() {
                let revisits = path.steps.iter().any(|s| s.to == step.to)
                    || (step.to != destination && start.visits(&step.to));
                if revisits || step.to == path.source {
                    continue;
                }
                stack.push(path.extended(step));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{key, Attribute, Schema, Table};

    fn table(name: &str, attrs: &[&str], key_attr: Option<&str>) -> Table {
        let mut t = Table::new(
            name,
            Schema::new(attrs.iter().map(|a| Attribute::numeric(*a)).collect()).unwrap(),
        );
        if let Some(k) = key_attr {
            t.add_key(key([k])).unwrap();
        }
        t
    }

    /// C -> B -> A chain of ONE_MANY keys plus an unrelated D.
    fn chain() -> DependencyGraph {
        let a = table("A", &["aid"], Some("aid"));
        let b = table("B", &["bid", "aid"], Some("bid"));
        let c = table("C", &["bid"], None);
        let mut g = DependencyGraph::new();
        g.add_foreign_key(ConstraintId(1), &ForeignKey::new(&b, &["aid"], &a, &["aid"]).unwrap());
        g.add_foreign_key(ConstraintId(2), &ForeignKey::new(&c, &["bid"], &b, &["bid"]).unwrap());
        g
    }

    #[test]
    fn test_find_path_follows_chain() {
        let g = chain();
        let path = g.find_path("C", "A").unwrap();
        assert_eq!(path.signature(), vec![ConstraintId(2), ConstraintId(1)]);
        assert_eq!(path.tables(), vec!["C", "B", "A"]);
        assert_eq!(path.destination(), "A");
    }

    #[test]
    fn test_no_path_against_direction_or_component() {
        let g = chain();
        assert!(g.find_path("A", "C").is_none());
        assert!(g.find_path("C", "D").is_none());
        assert!(g.find_path("A", "A").unwrap().is_empty());
    }

    #[test]
    fn test_reversed_path() {
        let g = chain();
        let back = g.find_path("C", "A").unwrap().reversed();
        assert_eq!(back.source(), "A");
        assert_eq!(back.tables(), vec!["A", "B", "C"]);
        assert_eq!(back.steps()[0].from_attrs, vec!["aid".to_string()]);
    }

    #[test]
    fn test_multiple_shortest_paths_deduplicated() {
        let a = table("A", &["aid"], Some("aid"));
        let t = table("T", &["aid", "aid2"], None);
        let mut g = DependencyGraph::new();
        g.add_foreign_key(ConstraintId(1), &ForeignKey::new(&t, &["aid"], &a, &["aid"]).unwrap());
        g.add_foreign_key(ConstraintId(2), &ForeignKey::new(&t, &["aid2"], &a, &["aid"]).unwrap());

        let paths = g.find_paths("T", "A");
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].signature(), vec![ConstraintId(1)]);

        let via = g.find_path_via("T", "A", ConstraintId(2)).unwrap();
        assert_eq!(via.signature(), vec![ConstraintId(2)]);
    }

    #[test]
    fn test_find_path_via_backtracks() {
        // After T -> X the search first tries the dead end X -> Z, then
        // backtracks to X -> Y -> A.
        let t = table("T", &["xid", "yid"], None);
        let x = table("X", &["xid", "yid", "zid"], Some("xid"));
        let y = table("Y", &["yid", "aid"], Some("yid"));
        let z = table("Z", &["zid"], Some("zid"));
        let a = table("A", &["aid"], Some("aid"));
        let mut g = DependencyGraph::new();
        g.add_foreign_key(ConstraintId(1), &ForeignKey::new(&t, &["xid"], &x, &["xid"]).unwrap());
        g.add_foreign_key(ConstraintId(2), &ForeignKey::new(&t, &["yid"], &y, &["yid"]).unwrap());
        g.add_foreign_key(ConstraintId(3), &ForeignKey::new(&y, &["aid"], &a, &["aid"]).unwrap());
        g.add_foreign_key(ConstraintId(4), &ForeignKey::new(&x, &["zid"], &z, &["zid"]).unwrap());
        g.add_foreign_key(ConstraintId(5), &ForeignKey::new(&x, &["yid"], &y, &["yid"]).unwrap());

        let path = g.find_path_via("T", "A", ConstraintId(1)).unwrap();
        assert_eq!(
            path.signature(),
            vec![ConstraintId(1), ConstraintId(5), ConstraintId(3)]
        );

        assert!(matches!(
            g.find_path_via("A", "T", ConstraintId(1)),
            Err(Error::NoPath { .. })
        ));
    }

    #[test]
    fn test_self_join_via() {
        let e = table("E", &["eid", "manager"], Some("eid"));
        let mut g = DependencyGraph::new();
        let fk = ForeignKey::new(&e, &["manager"], &e, &["eid"]).unwrap();
        assert!(fk.is_self_join());
        g.add_foreign_key(ConstraintId(7), &fk);

        let path = g.find_path_via("E", "E", ConstraintId(7)).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.steps()[0].from_attrs, vec!["manager".to_string()]);
        assert_eq!(path.steps()[0].to_attrs, vec!["eid".to_string()]);
    }

    #[test]
    fn test_one_one_edges_both_ways() {
        let a = table("A", &["aid"], Some("aid"));
        let b = table("B", &["aid"], Some("aid"));
        let mut g = DependencyGraph::new();
        g.add_foreign_key(ConstraintId(1), &ForeignKey::new(&a, &["aid"], &b, &["aid"]).unwrap());
        assert_eq!(g.edge_count(), 2);
        assert!(g.find_path("A", "B").is_some());
        assert!(g.find_path("B", "A").is_some());
    }
}
