//! # SoleDB
//!
//! An embedded, transactional, single-file relational storage engine.
//!
//! The entire database is one file of fixed-size pages. Connections within
//! a process share the file's state — one memory map, one lock table, one
//! write-ahead log — and coordinate through a five-level lock ladder
//! (SHARED through EXCLUSIVE) in rollback-journal mode, or through
//! snapshot-isolated readers and a single serialized writer in WAL mode.
//!
//! ```no_run
//! use soledb::{Connection, Value};
//!
//! # fn main() -> eyre::Result<()> {
//! let mut conn = Connection::open("app.db")?;
//! conn.execute("CREATE TABLE users (id INTEGER, name TEXT)")?;
//!
//! conn.execute("BEGIN")?;
//! conn.execute("INSERT INTO users VALUES (1, 'ada'), (2, 'lin')")?;
//! conn.execute("COMMIT")?;
//!
//! let mut rows = conn.query("SELECT name FROM users WHERE id >= 2")?;
//! while let Some(row) = rows.step()? {
//!     assert_eq!(row.get(0), &Value::Text("lin".into()));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`storage`]: page store (mmap), file header, rollback journal, WAL
//! - [`locking`]: lock table and busy-retry policy
//! - [`schema`]: table catalog rooted at page 1
//! - [`sql`]: lexer, parser, and row-at-a-time executor
//! - [`connection`]: connections, transactions, cursors, pragmas

pub mod connection;
pub mod diag;
pub mod error;
pub mod locking;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod types;

pub use connection::{
    Connection, ConnectionBuilder, ExecuteResult, JournalMode, Row, Rows,
};
pub use diag::set_log_callback;
pub use error::{codes, SoleError};
pub use locking::BusyPolicy;
pub use types::Value;
