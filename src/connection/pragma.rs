//! PRAGMA surface. Reads report engine or header state; writes either
//! update the header inside a small autocommit transaction or adjust
//! per-connection settings (busy_timeout, wal_autocheckpoint).

use std::time::Duration;

use eyre::Result;

use crate::error::SoleError;
use crate::locking::BusyPolicy;
use crate::sql::Pragma;
use crate::storage::{FileHeader, PageIo, Wal};
use crate::types::Value;

use super::{Connection, ExecuteResult, JournalMode};

impl Connection {
    pub(crate) fn run_pragma(&mut self, pragma: Pragma<'_>) -> Result<ExecuteResult> {
        match pragma {
            Pragma::Get(name) => self.pragma_get(name),
            Pragma::Set(name, literal) => {
                let value = literal.to_value();
                self.pragma_set(name, value)
            }
        }
    }

    fn pragma_get(&mut self, name: &str) -> Result<ExecuteResult> {
        let value = match name.to_ascii_lowercase().as_str() {
            "user_version" => Value::Integer(self.read_header(|h| h.user_version() as i64)?),
            "application_id" => Value::Integer(self.read_header(|h| h.application_id() as i64)?),
            "schema_version" => Value::Integer(self.read_header(|h| h.schema_version() as i64)?),
            "page_size" => Value::Integer(self.shared.store.read().page_size() as i64),
            "page_count" => Value::Integer(self.read_header(|h| h.page_count() as i64)?),
            "freelist_count" => Value::Integer(self.read_header(|h| h.freelist_count() as i64)?),
            "journal_mode" => Value::Text(self.shared.journal_mode().as_str().to_string()),
            "busy_timeout" => {
                let millis = match &self.busy {
                    BusyPolicy::Timeout(d) => d.as_millis() as i64,
                    _ => 0,
                };
                Value::Integer(millis)
            }
            "wal_autocheckpoint" => Value::Integer(self.auto_checkpoint as i64),
            "wal_checkpoint" => {
                let (total, backfilled) = self.checkpoint()?;
                Value::Text(format!("{backfilled}/{total}"))
            }
            other => {
                return Err(SoleError::usage(format!("unknown pragma: {other}")).into());
            }
        };
        Ok(ExecuteResult::PragmaValue(value))
    }

    fn pragma_set(&mut self, name: &str, value: Value) -> Result<ExecuteResult> {
        match name.to_ascii_lowercase().as_str() {
            "user_version" => {
                let v = expect_integer(name, &value)?;
                self.write_header(move |h| h.set_user_version(v as u32))?;
                Ok(ExecuteResult::RowsAffected(0))
            }
            "application_id" => {
                let v = expect_integer(name, &value)?;
                self.write_header(move |h| h.set_application_id(v as u32))?;
                Ok(ExecuteResult::RowsAffected(0))
            }
            "busy_timeout" => {
                let millis = expect_integer(name, &value)?.max(0) as u64;
                self.set_busy_timeout(Duration::from_millis(millis));
                Ok(ExecuteResult::PragmaValue(Value::Integer(millis as i64)))
            }
            "wal_autocheckpoint" => {
                let frames = expect_integer(name, &value)?.max(0) as u64;
                self.auto_checkpoint = frames;
                Ok(ExecuteResult::PragmaValue(Value::Integer(frames as i64)))
            }
            "journal_mode" => {
                let requested = match &value {
                    Value::Text(s) => match s.to_ascii_lowercase().as_str() {
                        "wal" => JournalMode::Wal,
                        "rollback" | "delete" => JournalMode::Rollback,
                        other => {
                            return Err(SoleError::usage(format!(
                                "unknown journal mode '{other}'"
                            ))
                            .into())
                        }
                    },
                    other => {
                        return Err(SoleError::usage(format!(
                            "journal_mode expects a mode name, got {}",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let resulting = self.switch_journal_mode(requested)?;
                Ok(ExecuteResult::PragmaValue(Value::Text(
                    resulting.as_str().to_string(),
                )))
            }
            other => Err(SoleError::usage(format!("unknown pragma: {other}")).into()),
        }
    }

    fn read_header<R>(&mut self, f: impl FnOnce(&FileHeader) -> R) -> Result<R> {
        let implicit = self.ensure_txn();
        let result = (|| {
            self.begin_read()?;
            self.with_view(|view| {
                let page0 = view.read_page(0)?;
                Ok(f(FileHeader::from_bytes(&page0)?))
            })
        })();
        if implicit {
            self.finish_txn();
        }
        result
    }

    fn write_header(&mut self, f: impl FnOnce(&mut FileHeader)) -> Result<()> {
        self.with_autocommit(|conn| {
            conn.begin_write()?;
            conn.with_view(|view| {
                let mut page0 = view.read_page(0)?;
                f(FileHeader::from_bytes_mut(&mut page0)?);
                view.write_page(0, &page0)
            })
        })
    }

    /// Switches the file's journal mode. Requires that this connection has
    /// no open transaction; returns the mode actually in effect (memory
    /// databases silently stay in rollback mode).
    fn switch_journal_mode(&mut self, requested: JournalMode) -> Result<JournalMode> {
        self.expect_no_txn("changing journal_mode")?;

        // WAL needs a sidecar file; a memory database has nowhere to put
        // one and keeps rolling back via its dirty cache.
        if self.shared.path.is_none() {
            return Ok(JournalMode::Rollback);
        }

        let current = self.shared.journal_mode();
        if current == requested {
            return Ok(current);
        }

        // The switch rewrites page 0 and swaps the durability machinery;
        // every connection on the file must be between transactions.
        if !self.shared.locks.is_idle() {
            return Err(SoleError::Contention {
                operation: "change journal_mode",
            }
            .into());
        }

        match requested {
            JournalMode::Wal => {
                let mut mode = self.shared.mode.lock();
                let mut wal_guard = self.shared.wal.lock();
                let mut store = self.shared.store.write();

                let path = self.shared.path.as_deref().ok_or_else(|| {
                    SoleError::usage("WAL mode requires a file-backed database")
                })?;
                let wal = Wal::create(path, store.page_size())?;

                let mut page0 = store.read_page(0)?;
                FileHeader::from_bytes_mut(&mut page0)?.set_wal_mode(true);
                store.write_page(0, &page0)?;
                store.sync()?;

                *wal_guard = Some(wal);
                *mode = JournalMode::Wal;
                Ok(JournalMode::Wal)
            }
            JournalMode::Rollback => {
                // Everything must be back in the main file before the WAL
                // disappears.
                self.checkpoint()?;

                let mut mode = self.shared.mode.lock();
                let mut wal_guard = self.shared.wal.lock();

                if self.shared.wal_index.backfilled() != self.shared.wal_index.mx_frame() {
                    return Err(SoleError::Contention {
                        operation: "disable WAL mode",
                    }
                    .into());
                }

                let mut store = self.shared.store.write();
                let mut page0 = store.read_page(0)?;
                FileHeader::from_bytes_mut(&mut page0)?.set_wal_mode(false);
                store.write_page(0, &page0)?;
                store.sync()?;
                drop(store);

                if let Some(wal) = wal_guard.take() {
                    wal.delete()?;
                }
                self.shared.wal_index.reset();
                *mode = JournalMode::Rollback;
                Ok(JournalMode::Rollback)
            }
        }
    }
}

fn expect_integer(pragma: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(SoleError::usage(format!(
            "pragma {pragma} expects an integer, got {}",
            other.type_name()
        ))
        .into()),
    }
}
