//! # Connection
//!
//! `Connection` is the public handle to a database: it parses and executes
//! SQL, manages the transaction lifecycle, and applies the busy policy when
//! lock acquisition hits contention.
//!
//! Connections to the same file share one [`SharedFile`]: a single memory
//! map, one lock table, one WAL. A connection itself is `Send` but not
//! `Sync`; share a file by opening more connections, not by sharing one.
//!
//! ```no_run
//! use soledb::Connection;
//!
//! # fn main() -> eyre::Result<()> {
//! let mut conn = Connection::open("app.db")?;
//! conn.execute("CREATE TABLE users (id INTEGER, name TEXT)")?;
//! conn.execute("INSERT INTO users VALUES (1, 'ada')")?;
//! let mut rows = conn.query("SELECT name FROM users WHERE id = 1")?;
//! while let Some(row) = rows.step()? {
//!     println!("{}", row.get(0));
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod cursor;
mod pages;
mod pragma;
mod shared;
mod transaction;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bumpalo::Bump;
use eyre::Result;
use tracing::debug;

use crate::error::SoleError;
use crate::locking::BusyPolicy;
use crate::schema::{self, Catalog, ColumnDef, TableDef};
use crate::sql::{
    execute_delete, execute_insert, execute_update, parse_statement, Statement,
};
use crate::storage::PageIo;
use crate::types::Value;

pub use builder::ConnectionBuilder;
pub use cursor::{Row, Rows};
pub(crate) use shared::SharedFile;
use transaction::ActiveTxn;

/// How commits reach the main database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Pre-images to a sidecar journal, pages written in place at commit.
    Rollback,
    /// Pages appended to a write-ahead log, checkpointed later.
    Wal,
}

impl JournalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Rollback => "rollback",
            JournalMode::Wal => "wal",
        }
    }
}

/// Outcome of [`Connection::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    /// Rows inserted, updated, or deleted. DDL and transaction control
    /// report zero.
    RowsAffected(u64),
    /// Value produced by a PRAGMA.
    PragmaValue(Value),
}

impl ExecuteResult {
    pub fn rows_affected(&self) -> u64 {
        match self {
            ExecuteResult::RowsAffected(n) => *n,
            ExecuteResult::PragmaValue(_) => 0,
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    pub(crate) id: u64,
    pub(crate) shared: Arc<SharedFile>,
    pub(crate) busy: BusyPolicy,
    pub(crate) shared_cache: bool,
    pub(crate) txn: Option<ActiveTxn>,
    /// WAL frames that trigger an automatic checkpoint after commit;
    /// 0 disables.
    pub(crate) auto_checkpoint: u64,
    catalog: Catalog,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.shared.path)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens (creating if needed) a database file with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ConnectionBuilder::new().open(path)
    }

    /// Opens a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        ConnectionBuilder::new().open_memory()
    }

    pub(crate) fn from_shared(
        shared: Arc<SharedFile>,
        busy: BusyPolicy,
        shared_cache: bool,
        auto_checkpoint: u64,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            shared,
            busy,
            shared_cache,
            txn: None,
            auto_checkpoint,
            catalog: Catalog::default(),
        }
    }

    /// Replaces the busy policy. Timeout and handler occupy one slot: the
    /// last one set wins.
    pub fn set_busy_policy(&mut self, policy: BusyPolicy) {
        self.busy = policy;
    }

    /// Convenience for `set_busy_policy(BusyPolicy::Timeout(..))`; zero
    /// reverts to failing immediately.
    pub fn set_busy_timeout(&mut self, timeout: std::time::Duration) {
        self.busy = if timeout.is_zero() {
            BusyPolicy::Fail
        } else {
            BusyPolicy::Timeout(timeout)
        };
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.shared.journal_mode()
    }

    /// Executes a statement that returns no rows. `SELECT` must go through
    /// [`query`](Self::query).
    pub fn execute(&mut self, sql: &str) -> Result<ExecuteResult> {
        let arena = Bump::new();
        let statement = parse_statement(&arena, sql)?;
        debug!(target: "soledb::sql", sql, "execute");

        match statement {
            Statement::Begin => {
                self.begin_explicit()?;
                Ok(ExecuteResult::RowsAffected(0))
            }
            Statement::Commit => {
                let txn_is_explicit = self.txn.as_ref().is_some_and(|t| t.explicit);
                if !txn_is_explicit {
                    return Err(SoleError::usage("COMMIT without a matching BEGIN").into());
                }
                self.commit()?;
                Ok(ExecuteResult::RowsAffected(0))
            }
            Statement::Rollback => {
                let txn_is_explicit = self.txn.as_ref().is_some_and(|t| t.explicit);
                if !txn_is_explicit {
                    return Err(SoleError::usage("ROLLBACK without a matching BEGIN").into());
                }
                self.rollback()?;
                Ok(ExecuteResult::RowsAffected(0))
            }
            Statement::Pragma(pragma) => self.run_pragma(pragma),
            Statement::Select { .. } => {
                Err(SoleError::usage("SELECT returns rows; use query() instead of execute()")
                    .into())
            }
            Statement::CreateTable { name, columns } => {
                let columns: Vec<ColumnDef> = columns
                    .iter()
                    .map(|spec| ColumnDef {
                        name: spec.name.to_string(),
                        column_type: spec.column_type,
                    })
                    .collect();
                self.with_autocommit(|conn| {
                    conn.begin_write()?;
                    conn.with_view(|view| schema::create_table(view, name, columns))?;
                    Ok(ExecuteResult::RowsAffected(0))
                })
            }
            Statement::DropTable { name } => self.with_autocommit(|conn| {
                conn.begin_write()?;
                conn.with_view(|view| schema::drop_table(view, name))?;
                Ok(ExecuteResult::RowsAffected(0))
            }),
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let columns: Option<Vec<&str>> =
                    columns.as_ref().map(|c| c.iter().copied().collect());
                let rows: Vec<Vec<crate::sql::Literal<'_>>> =
                    rows.iter().map(|r| r.iter().copied().collect()).collect();
                self.with_autocommit(|conn| {
                    conn.begin_write()?;
                    let def = conn.table_def(table)?;
                    let n = conn.with_view(|view| {
                        execute_insert(view, &def, columns.as_deref(), &rows)
                    })?;
                    Ok(ExecuteResult::RowsAffected(n))
                })
            }
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let assignments: Vec<_> = assignments.iter().copied().collect();
                self.with_autocommit(|conn| {
                    conn.begin_write()?;
                    let def = conn.table_def(table)?;
                    let n = conn.with_view(|view| {
                        execute_update(view, &def, &assignments, filter.as_ref())
                    })?;
                    Ok(ExecuteResult::RowsAffected(n))
                })
            }
            Statement::Delete { table, filter } => self.with_autocommit(|conn| {
                conn.begin_write()?;
                let def = conn.table_def(table)?;
                let n = conn.with_view(|view| execute_delete(view, &def, filter.as_ref()))?;
                Ok(ExecuteResult::RowsAffected(n))
            }),
        }
    }

    /// Executes a `SELECT`, returning a lazy cursor. Row fetching happens
    /// in [`Rows::step`]; nothing is read before the first step.
    pub fn query(&mut self, sql: &str) -> Result<Rows<'_>> {
        let arena = Bump::new();
        let statement = parse_statement(&arena, sql)?;
        debug!(target: "soledb::sql", sql, "query");

        let Statement::Select {
            table,
            columns,
            filter,
        } = statement
        else {
            return Err(
                SoleError::usage("query() only accepts SELECT; use execute()").into(),
            );
        };

        let implicit = self.ensure_txn();
        let setup = (|| {
            self.begin_read()?;
            let def = self.table_def(table)?;
            cursor::plan_select(&def, &columns, filter.as_ref())
        })();

        match setup {
            Ok(plan) => Ok(Rows::new(self, plan, implicit)),
            Err(err) => {
                if implicit {
                    self.finish_txn();
                }
                Err(err)
            }
        }
    }

    /// Copies WAL content into the main file. No-op in rollback mode.
    /// Returns `(total_frames, frames_backfilled)`.
    pub fn checkpoint(&mut self) -> Result<(u64, u64)> {
        self.shared.checkpoint()
    }

    /// Resolves a table, reloading the cached catalog when DDL moved the
    /// schema version.
    pub(crate) fn table_def(&mut self, name: &str) -> Result<TableDef> {
        let cached_version = self.catalog.version;
        let reload = self.with_view(|view| {
            let page0 = view.read_page(0)?;
            let version = crate::storage::FileHeader::from_bytes(&page0)?.schema_version();
            if version != cached_version {
                Ok(Some(schema::load(view)?))
            } else {
                Ok(None)
            }
        })?;
        if let Some(catalog) = reload {
            self.catalog = catalog;
        }

        self.catalog
            .table(name)
            .cloned()
            .ok_or_else(|| SoleError::usage(format!("no such table: {name}")).into())
    }

    /// Retries `attempt` under the busy policy until it succeeds, the
    /// policy gives up, or the request is illegal. Shared-cache
    /// connections skip the policy entirely: blocking a sibling in the
    /// same process deadlocks more often than it helps.
    pub(crate) fn acquire_with_busy(
        &mut self,
        operation: &'static str,
        mut attempt: impl FnMut(&Self) -> Result<bool>,
    ) -> Result<()> {
        let mut retries = 0u32;
        loop {
            if attempt(self)? {
                return Ok(());
            }

            if self.shared_cache {
                return Err(SoleError::SharedCacheBusy { operation }.into());
            }

            match self.busy.next_retry(retries) {
                Some(delay) => {
                    debug!(
                        target: "soledb::lock",
                        operation,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        "lock contended, retrying"
                    );
                    std::thread::sleep(delay);
                    retries += 1;
                }
                None => return Err(SoleError::Contention { operation }.into()),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // An open transaction dies with the connection: dirty pages are
        // discarded and all locks released.
        self.finish_txn();
    }
}
