//! Parser for `CREATE TABLE` and `ALTER TABLE ... ADD CONSTRAINT` scripts.
//!
//! Everything else in a script (inserts, indexes, views, options) is
//! skipped statement by statement.

use thiserror::Error;

use super::lexer::{Keyword, Lexer, Token};
use crate::schema::{SemanticType, ROW_ID};

#[derive(Debug, Error)]
pub enum SqlParseError {
    #[error("Expected {expected}, found {found:?}")]
    Expected { expected: &'static str, found: Token },
    #[error("Unexpected end of input")]
    UnexpectedEof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DdlColumn {
    pub name: String,
    pub sql_type: String,
    pub typ: SemanticType,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DdlTable {
    pub name: String,
    pub columns: Vec<DdlColumn>,
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DdlForeignKey {
    pub name: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub target: String,
    pub target_columns: Vec<String>,
}

/// Tables and foreign keys declared by a script, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DdlScript {
    pub tables: Vec<DdlTable>,
    pub foreign_keys: Vec<DdlForeignKey>,
}

pub fn parse_ddl(input: &str) -> Result<DdlScript, SqlParseError> {
    let tokens = Lexer::new(input).tokenize();
    Parser { tokens, pos: 0 }.parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, kw: Keyword) -> bool {
        if self.current().is(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<String> {
        match self.current() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        }
    }

    /// `name` or `schema.name`, keeping the last part.
    fn qualified_name(&mut self) -> Option<String> {
        let mut name = self.ident()?;
        while self.current() == &Token::Dot {
            self.advance();
            name = self.ident()?;
        }
        Some(name)
    }

    fn parse(&mut self) -> Result<DdlScript, SqlParseError> {
        let mut script = DdlScript::default();

        while self.current() != &Token::Eof {
            if self.eat(Keyword::Create) {
                if self.eat(Keyword::Table) {
                    if self.eat(Keyword::If) {
                        self.eat(Keyword::Not);
                        self.eat(Keyword::Exists);
                    }
                    if let Some(name) = self.qualified_name() {
                        self.parse_table_body(name, &mut script)?;
                    }
                }
                self.skip_statement();
            } else if self.eat(Keyword::Alter) {
                self.parse_alter_table(&mut script)?;
                self.skip_statement();
            } else {
                self.skip_statement();
            }
        }

        Ok(script)
    }

    fn parse_table_body(&mut self, name: String, script: &mut DdlScript) -> Result<(), SqlParseError> {
        if self.current() != &Token::LParen {
            return Ok(());
        }
        self.advance();

        let mut table = DdlTable {
            name,
            ..DdlTable::default()
        };

        loop {
            match self.current() {
                Token::RParen => {
                    self.advance();
                    break;
                }
                Token::Eof => return Err(SqlParseError::UnexpectedEof),
                Token::Comma => self.advance(),
                Token::Keyword(Keyword::Constraint) => {
                    self.advance();
                    let constraint_name = self.ident();
                    self.parse_table_constraint(&mut table, constraint_name, script)?;
                }
                Token::Keyword(
                    Keyword::Primary | Keyword::Unique | Keyword::Foreign | Keyword::Check,
                ) => self.parse_table_constraint(&mut table, None, script)?,
                Token::Keyword(Keyword::Index | Keyword::Key) => self.skip_item(),
                Token::Ident(_) => self.parse_column(&mut table, script)?,
                _ => self.advance(),
            }
        }

        script.tables.push(table);
        Ok(())
    }

    fn parse_table_constraint(
        &mut self,
        table: &mut DdlTable,
        name: Option<String>,
        script: &mut DdlScript,
    ) -> Result<(), SqlParseError> {
        if self.eat(Keyword::Primary) {
            self.eat(Keyword::Key);
            table.primary_key = self.column_list()?;
        } else if self.eat(Keyword::Unique) {
            self.eat(Keyword::Key);
            let cols = self.column_list()?;
            if !cols.is_empty() {
                table.unique.push(cols);
            }
        } else if self.eat(Keyword::Foreign) {
            self.eat(Keyword::Key);
            let columns = self.column_list()?;
            if self.eat(Keyword::References) {
                let (target, target_columns) = self.reference()?;
                script.foreign_keys.push(DdlForeignKey {
                    name,
                    table: table.name.clone(),
                    columns,
                    target,
                    target_columns,
                });
            }
        }
        self.skip_item();
        Ok(())
    }

    fn parse_column(&mut self, table: &mut DdlTable, script: &mut DdlScript) -> Result<(), SqlParseError> {
        let Some(name) = self.ident() else {
            return Ok(());
        };

        // Type words and their parenthesized arguments, e.g. `DOUBLE PRECISION`
        // or `VARCHAR(255)`.
        let mut type_parts: Vec<String> = Vec::new();
        loop {
            match self.current() {
                Token::Ident(word) => {
                    type_parts.push(word.clone());
                    self.advance();
                }
                Token::LParen if !type_parts.is_empty() => {
                    let args = self.collect_parenthesized();
                    if let Some(last) = type_parts.last_mut() {
                        last.push_str(&format!("({})", args));
                    }
                }
                _ => break,
            }
        }
        let sql_type = type_parts.join(" ");

        let mut column = DdlColumn {
            typ: SemanticType::from_sql(&sql_type),
            name,
            sql_type,
            not_null: false,
        };

        loop {
            match self.current() {
                Token::Comma | Token::RParen | Token::Eof => break,
                Token::Keyword(Keyword::Primary) => {
                    self.advance();
                    self.eat(Keyword::Key);
                    table.primary_key = vec![column.name.clone()];
                }
                Token::Keyword(Keyword::Unique) => {
                    self.advance();
                    self.eat(Keyword::Key);
                    table.unique.push(vec![column.name.clone()]);
                }
                Token::Keyword(Keyword::Not) => {
                    self.advance();
                    if self.eat(Keyword::Null) {
                        column.not_null = true;
                    }
                }
                Token::Keyword(Keyword::References) => {
                    self.advance();
                    let (target, target_columns) = self.reference()?;
                    script.foreign_keys.push(DdlForeignKey {
                        name: None,
                        table: table.name.clone(),
                        columns: vec![column.name.clone()],
                        target,
                        target_columns,
                    });
                }
                Token::LParen => {
                    self.collect_parenthesized();
                }
                _ => self.advance(),
            }
        }

        table.columns.push(column);
        Ok(())
    }

    /// `ALTER TABLE [ONLY] t ADD [CONSTRAINT name] FOREIGN KEY ...`
    fn parse_alter_table(&mut self, script: &mut DdlScript) -> Result<(), SqlParseError> {
        if !self.eat(Keyword::Table) {
            return Ok(());
        }
        self.eat(Keyword::Only);
        let Some(table_name) = self.qualified_name() else {
            return Ok(());
        };
        if !self.eat(Keyword::Add) {
            return Ok(());
        }
        let name = if self.eat(Keyword::Constraint) {
            self.ident()
        } else {
            None
        };
        if !self.eat(Keyword::Foreign) {
            return Ok(());
        }
        self.eat(Keyword::Key);
        let columns = self.column_list()?;
        if self.eat(Keyword::References) {
            let (target, target_columns) = self.reference()?;
            script.foreign_keys.push(DdlForeignKey {
                name,
                table: table_name,
                columns,
                target,
                target_columns,
            });
        }
        Ok(())
    }

    /// `target [(col, ...)]`; a bare target references its row id.
    fn reference(&mut self) -> Result<(String, Vec<String>), SqlParseError> {
        let target = self.qualified_name().ok_or_else(|| SqlParseError::Expected {
            expected: "referenced table",
            found: self.current().clone(),
        })?;
        let mut columns = self.column_list()?;
        if columns.is_empty() {
            columns.push(ROW_ID.to_string());
        }
        Ok((target, columns))
    }

    fn column_list(&mut self) -> Result<Vec<String>, SqlParseError> {
        let mut cols = Vec::new();
        if self.current() != &Token::LParen {
            return Ok(cols);
        }
        self.advance();

        loop {
            match self.current() {
                Token::Ident(name) => {
                    cols.push(name.clone());
                    self.advance();
                }
                Token::Comma => self.advance(),
                Token::RParen => {
                    self.advance();
                    return Ok(cols);
                }
                Token::Eof => return Err(SqlParseError::UnexpectedEof),
                // ASC/DESC, collations and the like
                _ => self.advance(),
            }
        }
    }

    /// Consume a balanced `( ... )` group, returning its flattened text.
    fn collect_parenthesized(&mut self) -> String {
        let mut parts = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.current() {
                Token::LParen => {
                    depth += 1;
                    if depth > 1 {
                        parts.push("(".to_string());
                    }
                }
                Token::RParen => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.advance();
                        break;
                    }
                    parts.push(")".to_string());
                }
                Token::Eof => break,
                Token::Ident(s) | Token::Num(s) => parts.push(s.clone()),
                Token::Comma => parts.push(",".to_string()),
                _ => {}
            }
            self.advance();
        }
        parts.join("")
    }

    /// Skip to the next top-level `,` or `)` of a table body.
    fn skip_item(&mut self) {
        loop {
            match self.current() {
                Token::Comma | Token::RParen | Token::Eof => return,
                Token::LParen => {
                    self.collect_parenthesized();
                }
                _ => self.advance(),
            }
        }
    }

    fn skip_statement(&mut self) {
        while !matches!(self.current(), Token::Semicolon | Token::Eof) {
            self.advance();
        }
        if self.current() == &Token::Semicolon {
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_table() {
        let sql = r#"
            CREATE TABLE users (
                id INT PRIMARY KEY,
                email VARCHAR(255) NOT NULL UNIQUE,
                joined TIMESTAMP
            );
        "#;

        let script = parse_ddl(sql).unwrap();
        assert_eq!(script.tables.len(), 1);

        let users = &script.tables[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert_eq!(users.unique, vec![vec!["email".to_string()]]);
        assert_eq!(users.columns[1].sql_type, "VARCHAR(255)");
        assert_eq!(users.columns[1].typ, SemanticType::String);
        assert!(users.columns[1].not_null);
        assert_eq!(users.columns[2].typ, SemanticType::Datetime);
    }

    #[test]
    fn test_inline_and_table_foreign_keys() {
        let sql = r#"
            CREATE TABLE A (aid INTEGER PRIMARY KEY, a TEXT);
            CREATE TABLE B (bid INTEGER PRIMARY KEY, b TEXT);
            CREATE TABLE T (
                aid INTEGER REFERENCES A(aid) ON DELETE CASCADE,
                bid INTEGER,
                CONSTRAINT t_b FOREIGN KEY (bid) REFERENCES B (bid)
            );
        "#;

        let script = parse_ddl(sql).unwrap();
        assert_eq!(script.tables.len(), 3);
        assert_eq!(
            script.foreign_keys,
            vec![
                DdlForeignKey {
                    name: None,
                    table: "T".into(),
                    columns: vec!["aid".into()],
                    target: "A".into(),
                    target_columns: vec!["aid".into()],
                },
                DdlForeignKey {
                    name: Some("t_b".into()),
                    table: "T".into(),
                    columns: vec!["bid".into()],
                    target: "B".into(),
                    target_columns: vec!["bid".into()],
                },
            ]
        );
    }

    #[test]
    fn test_composite_keys_and_bare_reference() {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS public.enrollment (
                student INTEGER REFERENCES students,
                course INTEGER,
                grade DOUBLE PRECISION,
                PRIMARY KEY (student, course),
                CHECK (grade >= 0)
            );
        "#;

        let script = parse_ddl(sql).unwrap();
        let t = &script.tables[0];
        assert_eq!(t.name, "enrollment");
        assert_eq!(t.primary_key, vec!["student".to_string(), "course".to_string()]);
        assert_eq!(t.columns.len(), 3);
        assert_eq!(t.columns[2].typ, SemanticType::Numeric);
        assert_eq!(script.foreign_keys[0].target_columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_alter_table_and_skipped_statements() {
        let sql = r#"
            CREATE TABLE users (id SERIAL PRIMARY KEY);
            CREATE INDEX idx ON users (id);
            INSERT INTO users VALUES (1);
            CREATE TABLE orders (id INT, user_id INT);
            ALTER TABLE ONLY public.orders
                ADD CONSTRAINT orders_user FOREIGN KEY (user_id) REFERENCES public.users(id);
        "#;

        let script = parse_ddl(sql).unwrap();
        assert_eq!(script.tables.len(), 2);
        assert_eq!(script.foreign_keys.len(), 1);
        assert_eq!(script.foreign_keys[0].name.as_deref(), Some("orders_user"));
        assert_eq!(script.foreign_keys[0].table, "orders");
        assert_eq!(script.foreign_keys[0].target, "users");
    }

    #[test]
    fn test_unterminated_table() {
        assert!(matches!(
            parse_ddl("CREATE TABLE t (id INT"),
            Err(SqlParseError::UnexpectedEof)
        ));
    }
}
