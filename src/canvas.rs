//! The canvas: owns the catalog, marks, nests and backends, and runs the
//! task bodies.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;

use crate::catalog::{Catalog, IdGen};
use crate::constraint::{Constraint, ConstraintId};
use crate::engine::{ColumnDef, Engine, SqliteEngine, TableConstraint};
use crate::error::{Error, Result, Warning};
use crate::layout::BoundingBox;
use crate::mark::{construct_query, resolve_reference, Channel, CompiledQuery, Mark, MarkId, MarkSpec, RefTarget};
use crate::nest::{self, MarkNest, Nest};
use crate::render::Renderer;
use crate::scheduler::{kahn, Stage, TaskGraph, TaskId, TaskRunner, TaskState};
use crate::schema::{quote_ident, Attribute, Schema, SemanticType, Table, ROW_ID};
use crate::svg::SvgRenderer;
use crate::value::{Record, Value};

/// Canvas-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasConfig {
    pub width: f64,
    pub height: f64,
    /// Mark tables are named `<prefix>_<n>`.
    pub mark_table_prefix: String,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            mark_table_prefix: "mark".to_string(),
        }
    }
}

impl CanvasConfig {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, self.width, self.height)
    }
}

pub struct Canvas {
    config: CanvasConfig,
    catalog: Catalog,
    marks: BTreeMap<MarkId, Mark>,
    /// Keyed by the nested (inner) mark.
    nests: BTreeMap<MarkId, Nest>,
    /// `(referenced, referencing)` mark pairs.
    refs: BTreeSet<(MarkId, MarkId)>,
    tasks: TaskGraph,
    engine: Box<dyn Engine>,
    renderer: Box<dyn Renderer>,
    fragments: BTreeMap<MarkId, Vec<String>>,
    warnings: Vec<Warning>,
    ids: IdGen,
}

impl Canvas {
    pub fn new(engine: impl Engine + 'static, renderer: impl Renderer + 'static) -> Self {
        Self::with_config(CanvasConfig::default(), engine, renderer)
    }

    pub fn with_config(
        config: CanvasConfig,
        engine: impl Engine + 'static,
        renderer: impl Renderer + 'static,
    ) -> Self {
        Self {
            config,
            catalog: Catalog::new(),
            marks: BTreeMap::new(),
            nests: BTreeMap::new(),
            refs: BTreeSet::new(),
            tasks: TaskGraph::new(),
            engine: Box::new(engine),
            renderer: Box::new(renderer),
            fragments: BTreeMap::new(),
            warnings: Vec::new(),
            ids: IdGen::new(),
        }
    }

    /// In-memory SQLite with the SVG renderer.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteEngine::open_in_memory()?, SvgRenderer::default()))
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn mark(&self, id: MarkId) -> Result<&Mark> {
        self.marks.get(&id).ok_or(Error::UnknownMark(id))
    }

    fn mark_mut(&mut self, id: MarkId) -> Result<&mut Mark> {
        self.marks.get_mut(&id).ok_or(Error::UnknownMark(id))
    }

    pub fn marks(&self) -> impl Iterator<Item = &Mark> {
        self.marks.values()
    }

    pub fn nest_of(&self, id: MarkId) -> Option<&Nest> {
        self.nests.get(&id)
    }

    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.state(task)
    }

    /// Nesting warnings followed by those of each compiled query.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .iter()
            .chain(
                self.marks
                    .values()
                    .filter_map(|m| m.query.as_ref())
                    .flat_map(|q| q.warnings.iter()),
            )
            .cloned()
            .collect()
    }

    /// Run a DDL script in the engine and register what it declares.
    pub async fn load_ddl(&mut self, sql: &str) -> Result<Vec<String>> {
        self.engine.run(sql).await?;
        self.catalog.load_ddl(sql)
    }

    /// Register an existing engine table with its keys and the foreign
    /// keys whose targets are already in the catalog.
    pub async fn import_table(&mut self, name: &str) -> Result<()> {
        let columns = self.engine.columns(name).await?;
        if columns.is_empty() {
            return Err(Error::UnknownTable(name.to_string()));
        }
        let constraints = self.engine.constraints(name).await?;

        let schema = Schema::new(
            columns
                .into_iter()
                .map(|(col, typ)| Attribute::new(col, typ))
                .collect(),
        )?;
        self.catalog.add_table(Table::new(name, schema))?;

        for constraint in constraints {
            match constraint {
                TableConstraint::PrimaryKey(cols) => {
                    self.catalog.add_constraint(Constraint::primary_key(name, cols))?;
                }
                TableConstraint::Unique(cols) => {
                    self.catalog.add_constraint(Constraint::unique(name, cols))?;
                }
                TableConstraint::ForeignKey {
                    columns,
                    target,
                    target_columns,
                } => {
                    if !self.catalog.contains_table(&target) {
                        log::warn!("skipping foreign key {} -> {}: table not in catalog", name, target);
                        continue;
                    }
                    self.catalog
                        .add_foreign_key(name, &columns, &target, &target_columns)?;
                }
            }
        }
        log::debug!("imported table {}", name);
        Ok(())
    }

    /// Materialize `query` as table `name` and register it.
    pub async fn derive_table(&mut self, name: &str, query: &str) -> Result<()> {
        if self.catalog.contains_table(name) {
            return Err(Error::DuplicateTable(name.to_string()));
        }
        self.engine.create_table_as(name, query).await?;
        self.import_table(name).await
    }

    /// Classify a mark's channels and add it to the task graph.
    pub fn add_mark(&mut self, spec: MarkSpec) -> Result<MarkId> {
        self.catalog.table(&spec.source)?;
        let channels = spec
            .channels
            .iter()
            .map(|(name, mapping)| {
                Ok((
                    name.clone(),
                    Channel::classify(name, mapping, &self.catalog, &spec.source)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        for (_, channel) in &channels {
            let Some(reference) = channel.foreign() else {
                continue;
            };
            match &reference.target {
                RefTarget::Mark(id) => {
                    self.mark(*id)?;
                }
                // Table references fail here rather than at run time.
                RefTarget::Table(_) | RefTarget::Search => {
                    resolve_reference(&self.catalog, &spec.source, reference, &BTreeMap::new())?;
                }
            }
        }

        let id = MarkId(self.ids.next_id());
        let mut table = format!("{}_{}", self.config.mark_table_prefix, id.0);
        if self.catalog.contains_table(&table) {
            table = self.catalog.fresh_table_name(&self.config.mark_table_prefix);
        }
        let mark = Mark::new(id, &spec, channels, table);

        self.tasks.add_mark(id);
        for &referenced in &mark.refs {
            self.refs.insert((referenced, id));
            self.tasks.add_dependency(referenced, id);
        }
        log::debug!("added mark {} over {} as {}", id, mark.source, mark.name);
        self.marks.insert(id, mark);
        Ok(id)
    }

    fn check_unnested(&self, id: MarkId) -> Result<()> {
        self.mark(id)?;
        if self.nests.contains_key(&id) {
            return Err(Error::InvalidConstraint(format!("{} is already nested", id)));
        }
        Ok(())
    }

    fn nest_sources(&self, inner: MarkId, outer: MarkId) -> Result<(&str, &str)> {
        self.check_unnested(inner)?;
        if inner == outer {
            return Err(Error::InvalidConstraint(format!("{} cannot nest in itself", inner)));
        }
        Ok((self.mark(inner)?.source.as_str(), self.mark(outer)?.source.as_str()))
    }

    fn add_nest(&mut self, nest: MarkNest) {
        self.tasks.add_dependency(nest.outer, nest.inner);
        self.nests.insert(nest.inner, Nest::Mark(nest));
    }

    /// Give a top-level mark an explicit box.
    pub fn nest_in_root(&mut self, mark: MarkId, bbox: BoundingBox) -> Result<()> {
        self.check_unnested(mark)?;
        self.nests.insert(mark, Nest::Root { bbox });
        Ok(())
    }

    /// Nest `inner` inside `outer` along the shortest FK path between
    /// their sources.
    pub fn nest(&mut self, inner: MarkId, outer: MarkId) -> Result<()> {
        let (inner_source, outer_source) = self.nest_sources(inner, outer)?;
        let (nest, warnings) =
            nest::nest_without_predicate(&self.catalog, (inner, inner_source), (outer, outer_source))?;
        self.warnings.extend(warnings);
        self.add_nest(nest);
        Ok(())
    }

    /// Nest along the foreign key whose attributes on the inner source are
    /// `attrs`.
    pub fn nest_on<S: AsRef<str>>(&mut self, inner: MarkId, outer: MarkId, attrs: &[S]) -> Result<()> {
        let (inner_source, outer_source) = self.nest_sources(inner, outer)?;
        let nest = nest::nest_with_predicate(
            &self.catalog,
            (inner, inner_source),
            (outer, outer_source),
            attrs,
        )?;
        self.add_nest(nest);
        Ok(())
    }

    pub fn nest_via(&mut self, inner: MarkId, outer: MarkId, constraint: ConstraintId) -> Result<()> {
        let (inner_source, outer_source) = self.nest_sources(inner, outer)?;
        let nest = nest::nest_via(
            &self.catalog,
            (inner, inner_source),
            (outer, outer_source),
            constraint,
        )?;
        self.add_nest(nest);
        Ok(())
    }

    /// Level of every mark in the nest forest, top-level marks at 0.
    pub fn set_mark_levels(&mut self) -> Result<()> {
        let mut children: BTreeMap<MarkId, Vec<MarkId>> = BTreeMap::new();
        let mut queue = VecDeque::new();
        for &id in self.marks.keys() {
            match self.nests.get(&id).and_then(Nest::outer) {
                Some(outer) => children.entry(outer).or_default().push(id),
                None => queue.push_back((id, 0)),
            }
        }

        let mut levels = BTreeMap::new();
        while let Some((id, level)) = queue.pop_front() {
            levels.insert(id, level);
            for &child in children.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                queue.push_back((child, level + 1));
            }
        }

        let unreached: Vec<MarkId> = self
            .marks
            .keys()
            .copied()
            .filter(|id| !levels.contains_key(id))
            .collect();
        if !unreached.is_empty() {
            return Err(Error::Cycle { marks: unreached });
        }
        for (id, mark) in self.marks.iter_mut() {
            mark.level = levels.get(id).copied().unwrap_or(0);
        }
        Ok(())
    }

    /// Marks ordered so outer marks and referenced marks come first.
    pub fn sorted_marks(&self) -> Result<Vec<MarkId>> {
        let marks: Vec<MarkId> = self.marks.keys().copied().collect();
        let mut edges: BTreeSet<(MarkId, MarkId)> = self.refs.clone();
        for nest in self.nests.values() {
            if let Nest::Mark(n) = nest {
                edges.insert((n.outer, n.inner));
            }
        }
        kahn(&marks, &edges, |m| m).map_err(|marks| Error::Cycle { marks })
    }

    fn mark_tables(&self) -> BTreeMap<MarkId, String> {
        self.marks
            .iter()
            .filter(|(_, m)| self.catalog.contains_table(&m.table))
            .map(|(id, m)| (*id, m.table.clone()))
            .collect()
    }

    /// Compile a mark's query without running it. References to marks need
    /// those marks' tables to be persisted.
    pub fn compile(&self, id: MarkId) -> Result<CompiledQuery> {
        let mark = self.mark(id)?;
        let parent = match self.nests.get(&id) {
            Some(Nest::Mark(n)) => Some(&n.path),
            _ => None,
        };
        construct_query(&self.catalog, mark, parent, &self.mark_tables())
    }

    /// Order the marks and run every task.
    pub async fn run(&mut self) -> Result<()> {
        self.set_mark_levels()?;
        self.sorted_marks()?;
        self.fragments.clear();

        let mut tasks = std::mem::take(&mut self.tasks);
        let outcome = tasks.execute(self).await;
        self.tasks = tasks;
        outcome
    }

    /// All drawn fragments composed into one document, in mark order.
    pub async fn svg(&self) -> Result<String> {
        let mut handles = Vec::new();
        for id in self.sorted_marks()? {
            if let Some(fragments) = self.fragments.get(&id) {
                handles.extend(fragments.iter().cloned());
            }
        }
        self.renderer.compose(&self.config.bbox(), &handles).await
    }

    async fn run_query(&mut self, id: MarkId) -> Result<()> {
        let query = self.compile(id)?;
        let view = format!("{}_q", self.mark(id)?.table);
        self.engine.create_view(&view, &query.sql).await?;
        let result = self.engine.execute(&query.sql).await?;
        log::debug!("{} returned {} rows", id, result.len());

        let mark = self.mark_mut(id)?;
        mark.query = Some(query);
        mark.result = Some(result);
        Ok(())
    }

    fn run_layout(&mut self, id: MarkId) -> Result<()> {
        let root = match self.nests.get(&id) {
            Some(Nest::Root { bbox }) => *bbox,
            _ => self.config.bbox(),
        };
        let boxes: Option<BTreeMap<i64, BoundingBox>> = match self.nests.get(&id) {
            Some(Nest::Mark(n)) => Some(
                self.mark(n.outer)?
                    .attributes
                    .iter()
                    .filter_map(|(row, attrs)| element_bbox(attrs).map(|b| (*row, b)))
                    .collect(),
            ),
            _ => None,
        };

        let mark = self.mark_mut(id)?;
        mark.partitions = match boxes {
            Some(boxes) => {
                mark.lay_out(|parent| parent.as_i64().and_then(|row| boxes.get(&row).copied()))
            }
            None => mark.lay_out(|_| Some(root)),
        };
        Ok(())
    }

    async fn run_render(&mut self, id: MarkId) -> Result<()> {
        let mark = self.mark(id)?;
        let mut handles = Vec::with_capacity(mark.partitions.len());
        let mut attributes = BTreeMap::new();
        for partition in &mark.partitions {
            let drawing = self
                .renderer
                .draw(mark.shape, &partition.arrays, &partition.bbox)
                .await?;
            for element in drawing.elements {
                if let Some(row) = element.get(ROW_ID).and_then(Value::as_i64) {
                    attributes.insert(row, element);
                }
            }
            handles.push(drawing.handle);
        }

        self.fragments.insert(id, handles);
        self.mark_mut(id)?.attributes = attributes;
        Ok(())
    }

    async fn run_persist(&mut self, id: MarkId) -> Result<()> {
        let mark = self.mark(id)?;
        let (table, source) = (mark.table.clone(), mark.source.clone());

        let elements: BTreeMap<i64, Record> = mark
            .attributes
            .iter()
            .map(|(row, element)| {
                let coerced = element
                    .iter()
                    .filter(|(name, _)| name.as_str() != ROW_ID)
                    .map(|(name, value)| (name.clone(), value.coerce_numeric()))
                    .collect();
                (*row, coerced)
            })
            .collect();

        let mut types: BTreeMap<String, SemanticType> = BTreeMap::new();
        for element in elements.values() {
            for (name, value) in element {
                let typ = types.entry(name.clone()).or_insert(SemanticType::Numeric);
                if !value.is_null() && !value.is_numeric() {
                    *typ = SemanticType::String;
                }
            }
        }
        let columns: Vec<String> = types.keys().cloned().collect();
        let rows: Vec<Vec<Value>> = elements
            .iter()
            .map(|(row, element)| {
                std::iter::once(Value::Int(*row))
                    .chain(columns.iter().map(|c| element.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        let mut wanted = vec![(ROW_ID.to_string(), SemanticType::Numeric)];
        wanted.extend(types);
        let existing = self.engine.columns(&table).await?;

        if existing == wanted && self.catalog.contains_table(&table) {
            self.engine.run(&format!("DELETE FROM {}", quote_ident(&table))).await?;
        } else {
            if !existing.is_empty() {
                log::debug!("{}: attribute set changed, recreating {}", id, table);
                self.engine.drop_table(&table).await?;
            }
            if self.catalog.contains_table(&table) {
                self.catalog.drop_table(&table)?;
            }
            self.create_mark_table(&table, &source, &wanted).await?;
        }

        let mut insert_columns = vec![ROW_ID.to_string()];
        insert_columns.extend(columns);
        self.engine.insert_rows(&table, &insert_columns, &rows).await?;
        log::debug!("{}: persisted {} rows to {}", id, rows.len(), table);
        Ok(())
    }

    async fn create_mark_table(
        &mut self,
        table: &str,
        source: &str,
        columns: &[(String, SemanticType)],
    ) -> Result<()> {
        let defs: Vec<ColumnDef> = columns
            .iter()
            .map(|(name, typ)| {
                if name == ROW_ID {
                    ColumnDef::new(name.as_str(), "INTEGER").primary_key()
                } else {
                    ColumnDef::new(name.as_str(), typ.sql_type())
                }
            })
            .collect();
        self.engine.create_table(table, &defs).await?;

        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, typ)| Attribute::new(name.clone(), *typ))
                .collect(),
        )?;
        self.catalog.add_table(Table::new(table, schema).derived())?;
        self.catalog.add_constraint(Constraint::primary_key(table, [ROW_ID]))?;
        self.catalog.add_foreign_key(table, &[ROW_ID], source, &[ROW_ID])?;
        Ok(())
    }
}

/// Box of a rendered element; width and height default to zero.
fn element_bbox(element: &Record) -> Option<BoundingBox> {
    let number = |name: &str| element.get(name).and_then(Value::as_f64);
    Some(BoundingBox::new(
        number("x")?,
        number("y")?,
        number("width").unwrap_or(0.0),
        number("height").unwrap_or(0.0),
    ))
}

#[async_trait]
impl TaskRunner for Canvas {
    async fn run_task(&mut self, task: TaskId) -> Result<()> {
        match task.stage {
            Stage::Query => self.run_query(task.mark).await,
            Stage::Layout => self.run_layout(task.mark),
            Stage::Render => self.run_render(task.mark).await,
            Stage::Persist => self.run_persist(task.mark).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mark::{field, get, lit};
    use crate::render::Shape;

    async fn canvas() -> Canvas {
        let mut canvas = Canvas::in_memory().unwrap();
        canvas
            .load_ddl(
                "CREATE TABLE A (aid INTEGER PRIMARY KEY, a TEXT);
                 CREATE TABLE T (tid INTEGER PRIMARY KEY, aid INTEGER REFERENCES A(aid), v REAL);
                 INSERT INTO A VALUES (1, 'one'), (2, 'two');
                 INSERT INTO T VALUES (1, 1, 5), (2, 1, 7), (3, 2, 9);",
            )
            .await
            .unwrap();
        canvas
    }

    #[tokio::test]
    async fn test_add_mark_checks_references() {
        let mut canvas = canvas().await;
        assert!(matches!(
            canvas.add_mark(MarkSpec::new("Nope", Shape::Rect)),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(
            canvas.add_mark(MarkSpec::new("T", Shape::Rect).channel("x", get("a").from_mark(MarkId(9)))),
            Err(Error::UnknownMark(_))
        ));
        assert!(matches!(
            canvas.add_mark(MarkSpec::new("A", Shape::Rect).channel("x", get("v").from_table("T"))),
            Err(Error::NoPath { .. })
        ));
        let id = canvas
            .add_mark(MarkSpec::new("T", Shape::Rect).channel("x", field("v")))
            .unwrap();
        assert_eq!(canvas.mark(id).unwrap().table, "mark_0");
    }

    #[tokio::test]
    async fn test_nesting_rules() {
        let mut canvas = canvas().await;
        let outer = canvas.add_mark(MarkSpec::new("A", Shape::Rect)).unwrap();
        let inner = canvas.add_mark(MarkSpec::new("T", Shape::Rect)).unwrap();

        assert!(matches!(canvas.nest(outer, inner), Err(Error::NoPath { .. })));
        canvas.nest_on(inner, outer, &["aid"]).unwrap();
        assert!(matches!(canvas.nest(inner, outer), Err(Error::InvalidConstraint(_))));
        assert!(matches!(
            canvas.nest_in_root(inner, BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            Err(Error::InvalidConstraint(_))
        ));

        canvas.set_mark_levels().unwrap();
        assert_eq!(canvas.mark(outer).unwrap().level, 0);
        assert_eq!(canvas.mark(inner).unwrap().level, 1);
        assert_eq!(canvas.sorted_marks().unwrap(), vec![outer, inner]);
    }

    #[tokio::test]
    async fn test_nested_run_partitions_by_parent() {
        let mut canvas = canvas().await;
        let outer = canvas
            .add_mark(
                MarkSpec::new("A", Shape::Rect)
                    .channel("x", crate::mark::layout(crate::layout::LayoutKind::stack(crate::scale::Axis::X)))
                    .channel("width", crate::mark::layout(crate::layout::LayoutKind::stack(crate::scale::Axis::X))),
            )
            .unwrap();
        let inner = canvas
            .add_mark(
                MarkSpec::new("T", Shape::Text)
                    .channel("text", get("a").from_table("A"))
                    .channel("fill", lit("red")),
            )
            .unwrap();
        canvas.nest(inner, outer).unwrap();
        canvas.run().await.unwrap();

        let parts = &canvas.mark(inner).unwrap().partitions;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].bbox, BoundingBox::new(0.0, 0.0, 400.0, 600.0));
        assert_eq!(parts[1].bbox.x, 400.0);
        assert_eq!(parts[0].arrays["text"], vec![Value::from("one"), Value::from("one")]);
        assert_eq!(parts[1].arrays["text"], vec![Value::from("two")]);
        assert_eq!(
            canvas.task_state(TaskId::new(inner, Stage::Persist)),
            Some(TaskState::Complete)
        );

        let svg = canvas.svg().await.unwrap();
        assert_eq!(svg.matches("<text").count(), 3);
        assert_eq!(svg.matches("<rect").count(), 2);
    }

    #[tokio::test]
    async fn test_mark_reference_reads_persisted_table() {
        let mut canvas = canvas().await;
        let first = canvas
            .add_mark(MarkSpec::new("T", Shape::Rect).channel("x", field("v")))
            .unwrap();
        let second = canvas
            .add_mark(MarkSpec::new("T", Shape::Text).channel("text", get("x").from_mark(first)))
            .unwrap();

        assert!(matches!(canvas.compile(second), Err(Error::UnknownMark(_))));
        canvas.run().await.unwrap();

        let result = canvas.mark(second).unwrap().result.as_ref().unwrap();
        assert_eq!(
            result.column("x").unwrap(),
            vec![Value::Float(5.0), Value::Float(7.0), Value::Float(9.0)]
        );
    }

    #[tokio::test]
    async fn test_search_skips_mark_tables_on_rerun() {
        let mut canvas = Canvas::in_memory().unwrap();
        canvas
            .load_ddl(
                "CREATE TABLE z (id INTEGER PRIMARY KEY, text TEXT);
                 CREATE TABLE T (id INTEGER PRIMARY KEY, zid INTEGER REFERENCES z(id));
                 INSERT INTO z VALUES (1, 'old');
                 INSERT INTO T VALUES (1, 1);",
            )
            .await
            .unwrap();
        let id = canvas
            .add_mark(MarkSpec::new("T", Shape::Text).channel("text", get("text")))
            .unwrap();

        canvas.run().await.unwrap();
        canvas.engine().run("UPDATE z SET text = 'new'").await.unwrap();
        canvas.run().await.unwrap();

        let mark = canvas.mark(id).unwrap();
        let query = mark.query.as_ref().unwrap();
        assert_eq!(query.paths.len(), 1);
        assert_eq!(query.paths[0].destination(), "z");
        assert!(canvas.warnings().is_empty());
        assert_eq!(
            mark.result.as_ref().unwrap().column("text"),
            Some(vec![Value::from("new")])
        );
    }

    #[tokio::test]
    async fn test_persist_coerces_numeric_text() {
        let mut canvas = canvas().await;
        let id = canvas
            .add_mark(MarkSpec::new("T", Shape::Text).channel("text", field("v")))
            .unwrap();
        canvas.run().await.unwrap();

        let table = canvas.mark(id).unwrap().table.clone();
        let columns = canvas.engine().columns(&table).await.unwrap();
        assert!(columns.contains(&("text".to_string(), SemanticType::Numeric)));

        let stored = canvas
            .engine()
            .execute(&format!("SELECT text, typeof(text) FROM {} ORDER BY id", table))
            .await
            .unwrap();
        assert_eq!(
            stored.rows,
            vec![
                vec![Value::Float(5.0), Value::from("real")],
                vec![Value::Float(7.0), Value::from("real")],
                vec![Value::Float(9.0), Value::from("real")],
            ]
        );
    }

    #[tokio::test]
    async fn test_sorted_marks_waits_for_nest_and_reference() {
        let mut canvas = canvas().await;
        let referenced = canvas
            .add_mark(MarkSpec::new("T", Shape::Rect).channel("x", field("v")))
            .unwrap();
        let inner = canvas
            .add_mark(MarkSpec::new("T", Shape::Text).channel("text", get("x").from_mark(referenced)))
            .unwrap();
        let outer = canvas.add_mark(MarkSpec::new("A", Shape::Rect)).unwrap();
        canvas.nest(inner, outer).unwrap();

        assert_eq!(canvas.sorted_marks().unwrap(), vec![referenced, outer, inner]);

        canvas.run().await.unwrap();
        for stage in Stage::ALL {
            assert_eq!(
                canvas.task_state(TaskId::new(inner, stage)),
                Some(TaskState::Complete)
            );
        }
        let result = canvas.mark(inner).unwrap().result.as_ref().unwrap();
        assert_eq!(result.len(), 3);
    }
}
