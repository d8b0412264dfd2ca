//! Statement AST. Nodes borrow identifiers from the input string and list
//! storage from a per-statement bump arena, so a parsed statement costs no
//! heap allocation of its own.

use bumpalo::collections::Vec as BumpVec;

use crate::schema::ColumnType;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    Null,
    Integer(i64),
    Real(f64),
    String(&'a str),
    /// Hex digits of a blob literal, decoded at bind time.
    HexBlob(&'a str),
}

impl Literal<'_> {
    /// Materializes the literal into an owned [`Value`]. String literals
    /// collapse `''` escapes here; blob literals decode their hex digits.
    pub fn to_value(&self) -> Value {
        match *self {
            Literal::Null => Value::Null,
            Literal::Integer(i) => Value::Integer(i),
            Literal::Real(r) => Value::Real(r),
            Literal::String(s) => Value::Text(s.replace("''", "'")),
            Literal::HexBlob(hex) => {
                let mut bytes = Vec::with_capacity(hex.len() / 2);
                let digits = hex.as_bytes();
                let mut i = 0;
                while i + 1 < digits.len() {
                    let hi = (digits[i] as char).to_digit(16).unwrap_or(0) as u8;
                    let lo = (digits[i + 1] as char).to_digit(16).unwrap_or(0) as u8;
                    bytes.push(hi << 4 | lo);
                    i += 2;
                }
                Value::Blob(bytes)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// `column OP literal` predicate of a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison<'a> {
    pub column: &'a str,
    pub op: CompareOp,
    pub literal: Literal<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSpec<'a> {
    pub name: &'a str,
    pub column_type: ColumnType,
}

#[derive(Debug, PartialEq)]
pub enum SelectColumns<'a> {
    All,
    Named(BumpVec<'a, &'a str>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pragma<'a> {
    Get(&'a str),
    Set(&'a str, Literal<'a>),
}

#[derive(Debug, PartialEq)]
pub enum Statement<'a> {
    CreateTable {
        name: &'a str,
        columns: BumpVec<'a, ColumnSpec<'a>>,
    },
    DropTable {
        name: &'a str,
    },
    Insert {
        table: &'a str,
        columns: Option<BumpVec<'a, &'a str>>,
        rows: BumpVec<'a, BumpVec<'a, Literal<'a>>>,
    },
    Select {
        table: &'a str,
        columns: SelectColumns<'a>,
        filter: Option<Comparison<'a>>,
    },
    Update {
        table: &'a str,
        assignments: BumpVec<'a, (&'a str, Literal<'a>)>,
        filter: Option<Comparison<'a>>,
    },
    Delete {
        table: &'a str,
        filter: Option<Comparison<'a>>,
    },
    Begin,
    Commit,
    Rollback,
    Pragma(Pragma<'a>),
}

impl Statement<'_> {
    /// True when executing this statement may modify the database.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::CreateTable { .. }
                | Statement::DropTable { .. }
                | Statement::Insert { .. }
                | Statement::Update { .. }
                | Statement::Delete { .. }
        )
    }
}
