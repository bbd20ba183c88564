use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ToSql};

use super::{ColumnDef, Engine, TableConstraint};
use crate::error::Result;
use crate::schema::{quote_ident, SemanticType, ROW_ID};
use crate::value::{ResultSet, Value};

/// [`Engine`] backed by an SQLite connection.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.create_aggregate_function(
            "median",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            Median,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(&self, sql: &str) -> Result<ResultSet> {
        log::debug!("sqlite query: {}", sql);
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql_value(row.get_ref(i)?));
            }
            rows.push(values);
        }
        Ok(ResultSet::new(columns, rows))
    }

    fn batch(&self, sql: &str) -> Result<()> {
        log::debug!("sqlite batch: {}", sql);
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    fn insert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn table_info(&self, table: &str) -> Result<Vec<(String, String, i64)>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let rows = stmt.query_map(params![table], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn unique_indexes(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND origin = 'u'",
        )?;
        let names = stmt
            .query_map(params![table], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            let cols = info
                .query_map(params![name], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            indexes.push(cols);
        }
        Ok(indexes)
    }

    fn foreign_key_list(&self, table: &str) -> Result<Vec<(i64, String, String, Option<String>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let rows = stmt.query_map(params![table], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn introspect(&self, table: &str) -> Result<Vec<TableConstraint>> {
        let mut constraints = Vec::new();

        let mut pk: Vec<(i64, String)> = self
            .table_info(table)?
            .into_iter()
            .filter(|(_, _, pk)| *pk > 0)
            .map(|(name, _, pk)| (pk, name))
            .collect();
        pk.sort();
        if !pk.is_empty() {
            constraints.push(TableConstraint::PrimaryKey(
                pk.into_iter().map(|(_, name)| name).collect(),
            ));
        }

        for cols in self.unique_indexes(table)? {
            constraints.push(TableConstraint::Unique(cols));
        }

        let mut current: Option<(i64, TableConstraint)> = None;
        for (id, target, from, to) in self.foreign_key_list(table)? {
            // A missing `to` references the target's primary key.
            let to = match to {
                Some(to) => to,
                None => self.primary_key_of(&target)?,
            };
            if let Some((cur, TableConstraint::ForeignKey { columns, target_columns, .. })) =
                current.as_mut()
            {
                if *cur == id {
                    columns.push(from);
                    target_columns.push(to);
                    continue;
                }
            }
            if let Some((_, fk)) = current.take() {
                constraints.push(fk);
            }
            current = Some((
                id,
                TableConstraint::ForeignKey {
                    columns: vec![from],
                    target,
                    target_columns: vec![to],
                },
            ));
        }
        if let Some((_, fk)) = current {
            constraints.push(fk);
        }

        Ok(constraints)
    }

    fn primary_key_of(&self, table: &str) -> Result<String> {
        Ok(self
            .table_info(table)?
            .into_iter()
            .find(|(_, _, pk)| *pk == 1)
            .map(|(name, _, _)| name)
            .unwrap_or_else(|| ROW_ID.to_string()))
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        self.query(sql)
    }

    async fn run(&self, sql: &str) -> Result<()> {
        self.batch(sql)
    }

    async fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<()> {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.sql_type);
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        self.batch(&format!("CREATE TABLE {} ({})", quote_ident(name), defs.join(", ")))
    }

    async fn create_table_as(&self, name: &str, query: &str) -> Result<()> {
        self.batch(&format!("CREATE TABLE {} AS {}", quote_ident(name), query))
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))
    }

    async fn create_view(&self, name: &str, query: &str) -> Result<()> {
        let name = quote_ident(name);
        self.batch(&format!(
            "DROP VIEW IF EXISTS {name}; CREATE VIEW {name} AS {query}"
        ))
    }

    async fn insert_rows(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<()> {
        self.insert(table, columns, rows)
    }

    async fn columns(&self, table: &str) -> Result<Vec<(String, SemanticType)>> {
        Ok(self
            .table_info(table)?
            .into_iter()
            .map(|(name, sql_type, _)| {
                let typ = SemanticType::from_sql(&sql_type);
                (name, typ)
            })
            .collect())
    }

    async fn constraints(&self, table: &str) -> Result<Vec<TableConstraint>> {
        self.introspect(table)
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// `median(x)` over the numeric inputs of a group.
struct Median;

impl Aggregate<Vec<f64>, Option<f64>> for Median {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<Vec<f64>> {
        Ok(Vec::new())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Vec<f64>) -> rusqlite::Result<()> {
        match ctx.get_raw(0) {
            ValueRef::Integer(i) => acc.push(i as f64),
            ValueRef::Real(f) => acc.push(f),
            _ => {}
        }
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        acc: Option<Vec<f64>>,
    ) -> rusqlite::Result<Option<f64>> {
        let Some(mut values) = acc.filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        Ok(Some(if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn engine() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .run(
                "CREATE TABLE A (aid INTEGER PRIMARY KEY, a TEXT UNIQUE);
                 CREATE TABLE T (v REAL, aid INTEGER REFERENCES A(aid));
                 INSERT INTO A VALUES (1, 'x'), (2, 'y');
                 INSERT INTO T VALUES (1.0, 1), (2.0, 1), (4.0, 2);",
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_execute_maps_values() {
        let engine = engine().await;
        let rs = engine
            .execute("SELECT rowid AS id, v, NULL AS n FROM T ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rs.columns, vec!["id", "v", "n"]);
        assert_eq!(rs.rows[0], vec![Value::Int(1), Value::Float(1.0), Value::Null]);
    }

    #[tokio::test]
    async fn test_median_aggregate() {
        let engine = engine().await;
        let rs = engine
            .execute("SELECT aid, median(v) AS m FROM T GROUP BY aid ORDER BY aid")
            .await
            .unwrap();
        assert_eq!(rs.column("m").unwrap(), vec![Value::Float(1.5), Value::Float(4.0)]);
    }

    #[tokio::test]
    async fn test_introspection() {
        let engine = engine().await;
        assert_eq!(
            engine.columns("A").await.unwrap(),
            vec![
                ("aid".to_string(), SemanticType::Numeric),
                ("a".to_string(), SemanticType::String)
            ]
        );
        assert_eq!(
            engine.constraints("T").await.unwrap(),
            vec![TableConstraint::ForeignKey {
                columns: vec!["aid".into()],
                target: "A".into(),
                target_columns: vec!["aid".into()],
            }]
        );
        let a = engine.constraints("A").await.unwrap();
        assert_eq!(a[0], TableConstraint::PrimaryKey(vec!["aid".into()]));
        assert_eq!(a[1], TableConstraint::Unique(vec!["a".into()]));
        assert!(engine.columns("Nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_insert_and_view() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .create_table(
                "m",
                &[
                    ColumnDef::new("id", "INTEGER").primary_key(),
                    ColumnDef::new("x", "REAL"),
                ],
            )
            .await
            .unwrap();
        engine
            .insert_rows(
                "m",
                &["id".to_string(), "x".to_string()],
                &[vec![Value::Int(0), Value::Float(3.0)], vec![Value::Int(1), Value::Null]],
            )
            .await
            .unwrap();

        engine.create_view("m_q", "SELECT id FROM m").await.unwrap();
        engine.create_view("m_q", "SELECT x FROM m").await.unwrap();
        let rs = engine.execute("SELECT * FROM m_q").await.unwrap();
        assert_eq!(rs.columns, vec!["x"]);
        assert_eq!(rs.len(), 2);
    }
}
