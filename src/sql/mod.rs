//! DDL script parsing for catalog loading.

mod lexer;
mod parser;

pub use parser::{parse_ddl, DdlColumn, DdlForeignKey, DdlScript, DdlTable, SqlParseError};
