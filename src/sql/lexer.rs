//! Tokenizer for DDL scripts.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Create,
    Alter,
    Add,
    Table,
    Only,
    Primary,
    Key,
    Foreign,
    References,
    Not,
    Null,
    Unique,
    Default,
    On,
    Constraint,
    Index,
    If,
    Exists,
    Check,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        let kw = match word.to_uppercase().as_str() {
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "ADD" => Self::Add,
            "TABLE" => Self::Table,
            "ONLY" => Self::Only,
            "PRIMARY" => Self::Primary,
            "KEY" => Self::Key,
            "FOREIGN" => Self::Foreign,
            "REFERENCES" => Self::References,
            "NOT" => Self::Not,
            "NULL" => Self::Null,
            "UNIQUE" => Self::Unique,
            "DEFAULT" => Self::Default,
            "ON" => Self::On,
            "CONSTRAINT" => Self::Constraint,
            "INDEX" => Self::Index,
            "IF" => Self::If,
            "EXISTS" => Self::Exists,
            "CHECK" => Self::Check,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    Ident(String),
    Str(String),
    Num(String),

    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    /// Any other punctuation, kept so expressions can be skipped.
    Symbol(char),

    Eof,
}

impl Token {
    pub fn is(&self, kw: Keyword) -> bool {
        matches!(self, Self::Keyword(k) if *k == kw)
    }
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_until_newline(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        let mut prev = '\0';
        for c in self.chars.by_ref() {
            if prev == '*' && c == '/' {
                break;
            }
            prev = c;
        }
    }

    fn read_while(&mut self, first: char, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            s.push(c);
            self.chars.next();
        }
        s
    }

    /// Read up to `close`; a doubled `close` is an escaped literal.
    fn read_delimited(&mut self, close: char) -> String {
        let mut s = String::new();
        while let Some(c) = self.chars.next() {
            if c == close {
                if self.chars.peek() == Some(&close) {
                    s.push(c);
                    self.chars.next();
                    continue;
                }
                break;
            }
            s.push(c);
        }
        s
    }

    pub fn next_token(&mut self) -> Token {
        while let Some(c) = self.chars.next() {
            match c {
                c if c.is_whitespace() => continue,
                '-' if self.chars.peek() == Some(&'-') => self.skip_until_newline(),
                '#' => self.skip_until_newline(),
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    self.skip_block_comment();
                }
                '(' => return Token::LParen,
                ')' => return Token::RParen,
                ',' => return Token::Comma,
                ';' => return Token::Semicolon,
                '.' => return Token::Dot,
                '"' => return Token::Ident(self.read_delimited('"')),
                '`' => return Token::Ident(self.read_delimited('`')),
                '[' => return Token::Ident(self.read_delimited(']')),
                '\'' => return Token::Str(self.read_delimited('\'')),
                '-' if self.chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                    return Token::Num(self.read_while('-', |d| d.is_ascii_digit() || d == '.'));
                }
                c if c.is_ascii_digit() => {
                    return Token::Num(self.read_while(c, |d| d.is_ascii_digit() || d == '.'));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.read_while(c, |d| d.is_alphanumeric() || d == '_' || d == '$');
                    return match Keyword::lookup(&word) {
                        Some(kw) => Token::Keyword(kw),
                        None => Token::Ident(word),
                    };
                }
                other => return Token::Symbol(other),
            }
        }
        Token::Eof
    }

    /// Collect all tokens, ending with [`Token::Eof`].
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_tokens() {
        let tokens = Lexer::new("CREATE TABLE users (id INT);").tokenize();

        assert_eq!(tokens[0], Token::Keyword(Keyword::Create));
        assert_eq!(tokens[1], Token::Keyword(Keyword::Table));
        assert_eq!(tokens[2], Token::Ident("users".to_string()));
        assert_eq!(tokens[3], Token::LParen);
        assert_eq!(tokens[4], Token::Ident("id".to_string()));
        assert_eq!(tokens[5], Token::Ident("INT".to_string()));
        assert_eq!(tokens[6], Token::RParen);
        assert_eq!(tokens[7], Token::Semicolon);
        assert_eq!(tokens[8], Token::Eof);
    }

    #[test]
    fn test_quoted_identifiers_and_strings() {
        let tokens = Lexer::new(r#"CREATE TABLE "User ""T""" (`col` TEXT DEFAULT 'it''s');"#).tokenize();

        assert_eq!(tokens[2], Token::Ident("User \"T\"".to_string()));
        assert_eq!(tokens[4], Token::Ident("col".to_string()));
        assert_eq!(tokens[7], Token::Str("it's".to_string()));
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = Lexer::new("-- comment\nCREATE /* block */ TABLE t (v REAL DEFAULT -1.5);").tokenize();

        assert!(tokens[0].is(Keyword::Create));
        assert!(tokens[1].is(Keyword::Table));
        assert!(tokens.contains(&Token::Num("-1.5".to_string())));
    }
}
