//! # SQL Layer
//!
//! A small SQL front end: hand-written lexer, recursive-descent parser into
//! an arena-allocated AST, and a row-at-a-time executor over the storage
//! layer.
//!
//! Statements are parsed fully before execution; reads are then driven
//! lazily by the cursor, which steps the table scan one row per call. The
//! AST borrows from both the input string and a per-statement bump arena,
//! so parsing allocates nothing that outlives the statement.
//!
//! Supported statements:
//!
//! ```text
//! CREATE TABLE t (col TYPE, ...)      TYPE := INTEGER|REAL|TEXT|BLOB
//! DROP TABLE t
//! INSERT INTO t [(cols)] VALUES (lit, ...), ...
//! SELECT * | col, ... FROM t [WHERE col OP lit]
//! UPDATE t SET col = lit, ... [WHERE col OP lit]
//! DELETE FROM t [WHERE col OP lit]
//! BEGIN | COMMIT | ROLLBACK
//! PRAGMA name [= value]
//! ```

mod ast;
mod executor;
mod lexer;
mod parser;

pub use ast::{
    ColumnSpec, Comparison, CompareOp, Literal, Pragma, SelectColumns, Statement,
};
pub use executor::{
    execute_delete, execute_insert, execute_update, RowPosition, TableScan,
};
pub use lexer::{Keyword, Lexer, Token};
pub use parser::parse_statement;
