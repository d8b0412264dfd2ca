//! # SQL Lexer
//!
//! Zero-copy tokenizer: identifier and string tokens are borrowed slices
//! into the input. Keywords are matched case-insensitively through a
//! compile-time perfect hash map.

use phf::phf_map;

static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "CREATE" => Keyword::Create,
    "TABLE" => Keyword::Table,
    "DROP" => Keyword::Drop,
    "SELECT" => Keyword::Select,
    "INSERT" => Keyword::Insert,
    "INTO" => Keyword::Into,
    "VALUES" => Keyword::Values,
    "UPDATE" => Keyword::Update,
    "SET" => Keyword::Set,
    "DELETE" => Keyword::Delete,
    "FROM" => Keyword::From,
    "WHERE" => Keyword::Where,
    "BEGIN" => Keyword::Begin,
    "COMMIT" => Keyword::Commit,
    "ROLLBACK" => Keyword::Rollback,
    "TRANSACTION" => Keyword::Transaction,
    "PRAGMA" => Keyword::Pragma,
    "NULL" => Keyword::Null,
    "INTEGER" => Keyword::Integer,
    "INT" => Keyword::Int,
    "REAL" => Keyword::Real,
    "TEXT" => Keyword::Text,
    "BLOB" => Keyword::Blob,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Create,
    Table,
    Drop,
    Select,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    From,
    Where,
    Begin,
    Commit,
    Rollback,
    Transaction,
    Pragma,
    Null,
    Integer,
    Int,
    Real,
    Text,
    Blob,
}

impl Keyword {
    /// Lowercase spelling, for contexts that treat a keyword as a plain
    /// word (pragma values like `journal_mode = rollback`).
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Create => "create",
            Keyword::Table => "table",
            Keyword::Drop => "drop",
            Keyword::Select => "select",
            Keyword::Insert => "insert",
            Keyword::Into => "into",
            Keyword::Values => "values",
            Keyword::Update => "update",
            Keyword::Set => "set",
            Keyword::Delete => "delete",
            Keyword::From => "from",
            Keyword::Where => "where",
            Keyword::Begin => "begin",
            Keyword::Commit => "commit",
            Keyword::Rollback => "rollback",
            Keyword::Transaction => "transaction",
            Keyword::Pragma => "pragma",
            Keyword::Null => "null",
            Keyword::Integer => "integer",
            Keyword::Int => "int",
            Keyword::Real => "real",
            Keyword::Text => "text",
            Keyword::Blob => "blob",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'a> {
    Keyword(Keyword),
    Identifier(&'a str),
    /// Contents between single quotes, `''` unescaped lazily by the parser.
    String(&'a str),
    Integer(i64),
    Real(f64),
    /// Hex blob literal `x'AB01'`, contents between the quotes.
    HexBlob(&'a str),
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Star,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Minus,
    Eof,
    Error(&'static str),
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes().get(self.pos + ahead).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'-' if self.peek_at(1) == Some(b'-') => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace();

        let Some(b) = self.peek() else {
            return Token::Eof;
        };

        match b {
            b'(' => self.single(Token::LeftParen),
            b')' => self.single(Token::RightParen),
            b',' => self.single(Token::Comma),
            b';' => self.single(Token::Semicolon),
            b'*' => self.single(Token::Star),
            b'=' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                }
                Token::Eq
            }
            b'!' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::NotEq
                } else {
                    Token::Error("expected '=' after '!'")
                }
            }
            b'<' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.pos += 1;
                        Token::LtEq
                    }
                    Some(b'>') => {
                        self.pos += 1;
                        Token::NotEq
                    }
                    _ => Token::Lt,
                }
            }
            b'>' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            b'-' => self.single(Token::Minus),
            b'\'' => self.string_literal(),
            b'"' => self.quoted_identifier(),
            b'0'..=b'9' | b'.' => self.number(),
            b'x' | b'X' if self.peek_at(1) == Some(b'\'') => self.hex_blob(),
            _ if is_ident_start(b) => self.identifier_or_keyword(),
            _ => Token::Error("unexpected character"),
        }
    }

    fn single(&mut self, token: Token<'a>) -> Token<'a> {
        self.pos += 1;
        token
    }

    fn string_literal(&mut self) -> Token<'a> {
        let start = self.pos + 1;
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Token::Error("unterminated string literal"),
                Some(b'\'') => {
                    // '' is an escaped quote, not the end.
                    if self.peek_at(1) == Some(b'\'') {
                        self.pos += 2;
                        continue;
                    }
                    let end = self.pos;
                    self.pos += 1;
                    return Token::String(&self.input[start..end]);
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn quoted_identifier(&mut self) -> Token<'a> {
        let start = self.pos + 1;
        self.pos += 1;
        while let Some(b) = self.peek() {
            if b == b'"' {
                let end = self.pos;
                self.pos += 1;
                return Token::Identifier(&self.input[start..end]);
            }
            self.pos += 1;
        }
        Token::Error("unterminated quoted identifier")
    }

    fn hex_blob(&mut self) -> Token<'a> {
        self.pos += 2; // x'
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\'' {
                let end = self.pos;
                self.pos += 1;
                return Token::HexBlob(&self.input[start..end]);
            }
            if !b.is_ascii_hexdigit() {
                return Token::Error("invalid hex digit in blob literal");
            }
            self.pos += 1;
        }
        Token::Error("unterminated blob literal")
    }

    fn number(&mut self) -> Token<'a> {
        let start = self.pos;
        let mut is_real = false;

        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_real => {
                    is_real = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_real = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let text = &self.input[start..self.pos];
        if is_real {
            match text.parse::<f64>() {
                Ok(v) => Token::Real(v),
                Err(_) => Token::Error("malformed real literal"),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => Token::Integer(v),
                Err(_) => Token::Error("integer literal out of range"),
            }
        }
    }

    fn identifier_or_keyword(&mut self) -> Token<'a> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_ident_continue(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];

        // Uppercase into a stack buffer for the phf lookup; identifiers
        // longer than any keyword can skip it.
        let mut upper = [0u8; 16];
        if text.len() <= upper.len() {
            for (dst, src) in upper.iter_mut().zip(text.bytes()) {
                *dst = src.to_ascii_uppercase();
            }
            if let Ok(key) = std::str::from_utf8(&upper[..text.len()]) {
                if let Some(&keyword) = KEYWORDS.get(key) {
                    return Token::Keyword(keyword);
                }
            }
        }

        Token::Identifier(text)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
