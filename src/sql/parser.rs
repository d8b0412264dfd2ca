//! Recursive-descent parser. One statement per call; a trailing semicolon
//! is accepted, anything after it is rejected.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::Result;

use crate::error::SoleError;
use crate::schema::ColumnType;

use super::ast::{
    ColumnSpec, CompareOp, Comparison, Literal, Pragma, SelectColumns, Statement,
};
use super::lexer::{Keyword, Lexer, Token};

pub fn parse_statement<'a>(arena: &'a Bump, input: &'a str) -> Result<Statement<'a>> {
    let mut parser = Parser {
        arena,
        lexer: Lexer::new(input),
        current: Token::Eof,
    };
    parser.advance()?;
    let statement = parser.statement()?;
    parser.finish()?;
    Ok(statement)
}

struct Parser<'a> {
    arena: &'a Bump,
    lexer: Lexer<'a>,
    current: Token<'a>,
}

fn syntax(detail: impl Into<String>) -> eyre::Report {
    SoleError::usage(detail.into()).into()
}

impl<'a> Parser<'a> {
    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token();
        if let Token::Error(message) = self.current {
            return Err(syntax(format!("syntax error: {message}")));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        if self.current == Token::Keyword(keyword) {
            self.advance()
        } else {
            Err(syntax(format!(
                "expected {:?}, found {:?}",
                keyword, self.current
            )))
        }
    }

    fn expect(&mut self, token: Token<'a>) -> Result<()> {
        if self.current == token {
            self.advance()
        } else {
            Err(syntax(format!(
                "expected {:?}, found {:?}",
                token, self.current
            )))
        }
    }

    fn eat(&mut self, token: Token<'a>) -> Result<bool> {
        if self.current == token {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn identifier(&mut self) -> Result<&'a str> {
        match self.current {
            Token::Identifier(name) => {
                self.advance()?;
                Ok(name)
            }
            other => Err(syntax(format!("expected identifier, found {:?}", other))),
        }
    }

    fn finish(&mut self) -> Result<()> {
        let _ = self.eat(Token::Semicolon)?;
        if self.current != Token::Eof {
            return Err(syntax(format!(
                "unexpected trailing input: {:?}",
                self.current
            )));
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<Statement<'a>> {
        match self.current {
            Token::Keyword(Keyword::Create) => self.create_table(),
            Token::Keyword(Keyword::Drop) => self.drop_table(),
            Token::Keyword(Keyword::Insert) => self.insert(),
            Token::Keyword(Keyword::Select) => self.select(),
            Token::Keyword(Keyword::Update) => self.update(),
            Token::Keyword(Keyword::Delete) => self.delete(),
            Token::Keyword(Keyword::Begin) => {
                self.advance()?;
                let _ = self.eat(Token::Keyword(Keyword::Transaction))?;
                Ok(Statement::Begin)
            }
            Token::Keyword(Keyword::Commit) => {
                self.advance()?;
                Ok(Statement::Commit)
            }
            Token::Keyword(Keyword::Rollback) => {
                self.advance()?;
                Ok(Statement::Rollback)
            }
            Token::Keyword(Keyword::Pragma) => self.pragma(),
            other => Err(syntax(format!("expected a statement, found {:?}", other))),
        }
    }

    fn create_table(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Create)?;
        self.expect_keyword(Keyword::Table)?;
        let name = self.identifier()?;
        self.expect(Token::LeftParen)?;

        let mut columns = BumpVec::new_in(self.arena);
        loop {
            let col_name = self.identifier()?;
            let column_type = self.column_type()?;
            columns.push(ColumnSpec {
                name: col_name,
                column_type,
            });
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RightParen)?;
        Ok(Statement::CreateTable { name, columns })
    }

    fn column_type(&mut self) -> Result<ColumnType> {
        let column_type = match self.current {
            Token::Keyword(Keyword::Integer) | Token::Keyword(Keyword::Int) => {
                ColumnType::Integer
            }
            Token::Keyword(Keyword::Real) => ColumnType::Real,
            Token::Keyword(Keyword::Text) => ColumnType::Text,
            Token::Keyword(Keyword::Blob) => ColumnType::Blob,
            other => {
                return Err(syntax(format!(
                    "expected a column type (INTEGER, REAL, TEXT, BLOB), found {:?}",
                    other
                )))
            }
        };
        self.advance()?;
        Ok(column_type)
    }

    fn drop_table(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Drop)?;
        self.expect_keyword(Keyword::Table)?;
        let name = self.identifier()?;
        Ok(Statement::DropTable { name })
    }

    fn insert(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.identifier()?;

        let columns = if self.eat(Token::LeftParen)? {
            let mut names = BumpVec::new_in(self.arena);
            loop {
                names.push(self.identifier()?);
                if !self.eat(Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            Some(names)
        } else {
            None
        };

        self.expect_keyword(Keyword::Values)?;
        let mut rows = BumpVec::new_in(self.arena);
        loop {
            self.expect(Token::LeftParen)?;
            let mut row = BumpVec::new_in(self.arena);
            loop {
                row.push(self.literal()?);
                if !self.eat(Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            rows.push(row);
            if !self.eat(Token::Comma)? {
                break;
            }
        }

        Ok(Statement::Insert {
            table,
            columns,
            rows,
        })
    }

    fn select(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Select)?;

        let columns = if self.eat(Token::Star)? {
            SelectColumns::All
        } else {
            let mut names = BumpVec::new_in(self.arena);
            loop {
                names.push(self.identifier()?);
                if !self.eat(Token::Comma)? {
                    break;
                }
            }
            SelectColumns::Named(names)
        };

        self.expect_keyword(Keyword::From)?;
        let table = self.identifier()?;
        let filter = self.where_clause()?;

        Ok(Statement::Select {
            table,
            columns,
            filter,
        })
    }

    fn update(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.identifier()?;
        self.expect_keyword(Keyword::Set)?;

        let mut assignments = BumpVec::new_in(self.arena);
        loop {
            let column = self.identifier()?;
            self.expect(Token::Eq)?;
            let literal = self.literal()?;
            assignments.push((column, literal));
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        let filter = self.where_clause()?;

        Ok(Statement::Update {
            table,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.identifier()?;
        let filter = self.where_clause()?;
        Ok(Statement::Delete { table, filter })
    }

    fn where_clause(&mut self) -> Result<Option<Comparison<'a>>> {
        if !self.eat(Token::Keyword(Keyword::Where))? {
            return Ok(None);
        }
        let column = self.identifier()?;
        let op = match self.current {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::LtEq => CompareOp::LtEq,
            Token::Gt => CompareOp::Gt,
            Token::GtEq => CompareOp::GtEq,
            other => {
                return Err(syntax(format!(
                    "expected a comparison operator, found {:?}",
                    other
                )))
            }
        };
        self.advance()?;
        let literal = self.literal()?;
        Ok(Some(Comparison {
            column,
            op,
            literal,
        }))
    }

    fn literal(&mut self) -> Result<Literal<'a>> {
        let literal = match self.current {
            Token::Keyword(Keyword::Null) => Literal::Null,
            Token::Integer(i) => Literal::Integer(i),
            Token::Real(r) => Literal::Real(r),
            Token::String(s) => Literal::String(s),
            Token::HexBlob(hex) => {
                if hex.len() % 2 != 0 {
                    return Err(syntax("blob literal needs an even number of hex digits"));
                }
                Literal::HexBlob(hex)
            }
            Token::Minus => {
                self.advance()?;
                return match self.current {
                    Token::Integer(i) => {
                        self.advance()?;
                        Ok(Literal::Integer(-i))
                    }
                    Token::Real(r) => {
                        self.advance()?;
                        Ok(Literal::Real(-r))
                    }
                    other => Err(syntax(format!(
                        "expected a number after '-', found {:?}",
                        other
                    ))),
                };
            }
            other => return Err(syntax(format!("expected a literal, found {:?}", other))),
        };
        self.advance()?;
        Ok(literal)
    }

    fn pragma(&mut self) -> Result<Statement<'a>> {
        self.expect_keyword(Keyword::Pragma)?;
        let name = self.identifier()?;
        if self.eat(Token::Eq)? {
            // Pragma values may be bare words (journal_mode = wal), some of
            // which lex as keywords (journal_mode = rollback).
            let literal = match self.current {
                Token::Identifier(word) => {
                    self.advance()?;
                    Literal::String(word)
                }
                Token::Keyword(word) if word != Keyword::Null => {
                    self.advance()?;
                    Literal::String(word.as_str())
                }
                _ => self.literal()?,
            };
            Ok(Statement::Pragma(Pragma::Set(name, literal)))
        } else {
            Ok(Statement::Pragma(Pragma::Get(name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<'a>(arena: &'a Bump, sql: &'a str) -> Statement<'a> {
        parse_statement(arena, sql).unwrap()
    }

    #[test]
    fn create_table() {
        let arena = Bump::new();
        let stmt = parse(&arena, "CREATE TABLE users (id INTEGER, name TEXT)");
        match stmt {
            Statement::CreateTable { name, columns } => {
                assert_eq!(name, "users");
                assert_eq!(columns.len(), 2);
                assert_eq!(columns[0].name, "id");
                assert_eq!(columns[0].column_type, ColumnType::Integer);
                assert_eq!(columns[1].column_type, ColumnType::Text);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn insert_multiple_rows() {
        let arena = Bump::new();
        let stmt = parse(&arena, "INSERT INTO t VALUES (1, 'a'), (2, 'b');");
        match stmt {
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                assert_eq!(table, "t");
                assert!(columns.is_none());
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1][0], Literal::Integer(2));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn insert_with_column_list() {
        let arena = Bump::new();
        let stmt = parse(&arena, "INSERT INTO t (b, a) VALUES (1, 2)");
        match stmt {
            Statement::Insert { columns, .. } => {
                let columns = columns.unwrap();
                assert_eq!(&columns[..], &["b", "a"]);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn select_with_filter() {
        let arena = Bump::new();
        let stmt = parse(&arena, "SELECT id, name FROM users WHERE age >= 21");
        match stmt {
            Statement::Select {
                table,
                columns,
                filter,
            } => {
                assert_eq!(table, "users");
                assert!(matches!(columns, SelectColumns::Named(ref n) if n.len() == 2));
                let filter = filter.unwrap();
                assert_eq!(filter.column, "age");
                assert_eq!(filter.op, CompareOp::GtEq);
                assert_eq!(filter.literal, Literal::Integer(21));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn update_and_delete() {
        let arena = Bump::new();
        let stmt = parse(&arena, "UPDATE t SET a = 1, b = 'x' WHERE id = 3");
        assert!(matches!(
            stmt,
            Statement::Update { ref assignments, .. } if assignments.len() == 2
        ));

        let stmt = parse(&arena, "DELETE FROM t");
        assert!(matches!(
            stmt,
            Statement::Delete { filter: None, .. }
        ));
    }

    #[test]
    fn transaction_control() {
        let arena = Bump::new();
        assert_eq!(parse(&arena, "BEGIN"), Statement::Begin);
        assert_eq!(parse(&arena, "BEGIN TRANSACTION"), Statement::Begin);
        assert_eq!(parse(&arena, "COMMIT"), Statement::Commit);
        assert_eq!(parse(&arena, "ROLLBACK"), Statement::Rollback);
    }

    #[test]
    fn pragma_get_and_set() {
        let arena = Bump::new();
        assert_eq!(
            parse(&arena, "PRAGMA user_version"),
            Statement::Pragma(Pragma::Get("user_version"))
        );
        assert_eq!(
            parse(&arena, "PRAGMA user_version = 7"),
            Statement::Pragma(Pragma::Set("user_version", Literal::Integer(7)))
        );
        assert_eq!(
            parse(&arena, "PRAGMA journal_mode = wal"),
            Statement::Pragma(Pragma::Set("journal_mode", Literal::String("wal")))
        );
        // Some mode names collide with keywords.
        assert_eq!(
            parse(&arena, "PRAGMA journal_mode = rollback"),
            Statement::Pragma(Pragma::Set("journal_mode", Literal::String("rollback")))
        );
        assert_eq!(
            parse(&arena, "PRAGMA journal_mode = delete"),
            Statement::Pragma(Pragma::Set("journal_mode", Literal::String("delete")))
        );
    }

    #[test]
    fn negative_literals() {
        let arena = Bump::new();
        let stmt = parse(&arena, "INSERT INTO t VALUES (-5, -2.5)");
        match stmt {
            Statement::Insert { rows, .. } => {
                assert_eq!(rows[0][0], Literal::Integer(-5));
                assert_eq!(rows[0][1], Literal::Real(-2.5));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let arena = Bump::new();
        assert!(parse_statement(&arena, "COMMIT extra").is_err());
    }

    #[test]
    fn syntax_errors_are_usage_errors() {
        let arena = Bump::new();
        let err = parse_statement(&arena, "SELEC * FROM t").unwrap_err();
        assert!(matches!(
            crate::error::SoleError::of(&err),
            Some(crate::error::SoleError::Usage { .. })
        ));
    }
}
