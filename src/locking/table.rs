//! Per-file lock table. One instance lives in each `SharedFile`; every
//! connection to that file goes through it, keyed by connection id.

use hashbrown::HashSet;
use parking_lot::Mutex;

use eyre::Result;

use crate::error::SoleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    Unlocked,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

impl std::fmt::Display for LockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockLevel::Unlocked => "UNLOCKED",
            LockLevel::Shared => "SHARED",
            LockLevel::Reserved => "RESERVED",
            LockLevel::Pending => "PENDING",
            LockLevel::Exclusive => "EXCLUSIVE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct State {
    shared: HashSet<u64>,
    /// The single connection at RESERVED or above, with its level.
    writer: Option<(u64, LockLevel)>,
    /// WAL mode serializes writers here instead of climbing the ladder.
    wal_writer: Option<u64>,
}

#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<State>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level_of(&self, conn: u64) -> LockLevel {
        let state = self.state.lock();
        match state.writer {
            Some((id, level)) if id == conn => level,
            _ if state.shared.contains(&conn) => LockLevel::Shared,
            _ => LockLevel::Unlocked,
        }
    }

    /// SHARED: granted unless another connection holds PENDING or
    /// EXCLUSIVE. Idempotent for a connection already at SHARED or above.
    pub fn try_shared(&self, conn: u64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.writer {
            Some((id, _)) if id == conn => Ok(true),
            Some((_, level)) if level >= LockLevel::Pending => Ok(false),
            _ => {
                state.shared.insert(conn);
                Ok(true)
            }
        }
    }

    /// RESERVED: requires SHARED; granted unless another connection is
    /// already at RESERVED or above.
    pub fn try_reserved(&self, conn: u64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.writer {
            Some((id, _)) if id == conn => Ok(true),
            Some(_) => Ok(false),
            None => {
                if !state.shared.contains(&conn) {
                    return Err(SoleError::usage(
                        "RESERVED requested without holding SHARED",
                    )
                    .into());
                }
                state.writer = Some((conn, LockLevel::Reserved));
                Ok(true)
            }
        }
    }

    /// PENDING: requires RESERVED held by this connection. Always granted
    /// (it only announces intent and gates new readers); escalation to
    /// EXCLUSIVE is where the wait happens.
    pub fn try_pending(&self, conn: u64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.writer {
            Some((id, level)) if id == conn => {
                if level < LockLevel::Reserved {
                    return Err(
                        SoleError::usage("PENDING requested without holding RESERVED").into(),
                    );
                }
                state.writer = Some((conn, level.max(LockLevel::Pending)));
                Ok(true)
            }
            _ => Err(SoleError::usage("PENDING requested without holding RESERVED").into()),
        }
    }

    /// EXCLUSIVE: requires PENDING; granted once no other connection holds
    /// SHARED.
    pub fn try_exclusive(&self, conn: u64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.writer {
            Some((id, level)) if id == conn => {
                if level < LockLevel::Pending {
                    return Err(
                        SoleError::usage("EXCLUSIVE requested without holding PENDING").into(),
                    );
                }
                let others = state.shared.iter().any(|&id| id != conn);
                if others {
                    return Ok(false);
                }
                state.writer = Some((conn, LockLevel::Exclusive));
                Ok(true)
            }
            _ => Err(SoleError::usage("EXCLUSIVE requested without holding PENDING").into()),
        }
    }

    /// Drops every lock the connection holds, returning it to UNLOCKED.
    pub fn release_all(&self, conn: u64) {
        let mut state = self.state.lock();
        state.shared.remove(&conn);
        if matches!(state.writer, Some((id, _)) if id == conn) {
            state.writer = None;
        }
        if state.wal_writer == Some(conn) {
            state.wal_writer = None;
        }
    }

    /// Downgrades a writer back to SHARED, keeping its read lock.
    pub fn downgrade_to_shared(&self, conn: u64) {
        let mut state = self.state.lock();
        if matches!(state.writer, Some((id, _)) if id == conn) {
            state.writer = None;
            state.shared.insert(conn);
        }
    }

    /// True when some connection holds RESERVED or above.
    pub fn writer_active(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// WAL writer flag: one writer at a time, readers unaffected.
    pub fn try_wal_writer(&self, conn: u64) -> bool {
        let mut state = self.state.lock();
        match state.wal_writer {
            Some(id) => id == conn,
            None => {
                state.wal_writer = Some(conn);
                true
            }
        }
    }

    pub fn release_wal_writer(&self, conn: u64) {
        let mut state = self.state.lock();
        if state.wal_writer == Some(conn) {
            state.wal_writer = None;
        }
    }

    /// True when no connection holds any lock. Checkpoint reset needs this.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.shared.is_empty() && state.writer.is_none() && state.wal_writer.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_shared_holders() {
        let table = LockTable::new();
        assert!(table.try_shared(1).unwrap());
        assert!(table.try_shared(2).unwrap());
        assert!(table.try_shared(3).unwrap());
        assert_eq!(table.level_of(2), LockLevel::Shared);
    }

    #[test]
    fn reserved_coexists_with_shared() {
        let table = LockTable::new();
        table.try_shared(1).unwrap();
        table.try_shared(2).unwrap();

        assert!(table.try_reserved(1).unwrap());
        // New readers still admitted under RESERVED.
        assert!(table.try_shared(3).unwrap());
        // But only one RESERVED at a time.
        assert!(!table.try_reserved(2).unwrap());
    }

    #[test]
    fn reserved_without_shared_is_usage_error() {
        let table = LockTable::new();
        let err = table.try_reserved(1).unwrap_err();
        assert!(matches!(
            SoleError::of(&err),
            Some(SoleError::Usage { .. })
        ));
    }

    #[test]
    fn pending_blocks_new_readers() {
        let table = LockTable::new();
        table.try_shared(1).unwrap();
        table.try_shared(2).unwrap();
        table.try_reserved(1).unwrap();
        assert!(table.try_pending(1).unwrap());

        // Existing reader keeps its lock; a new one is refused.
        assert_eq!(table.level_of(2), LockLevel::Shared);
        assert!(!table.try_shared(3).unwrap());
    }

    #[test]
    fn exclusive_waits_for_readers_to_drain() {
        let table = LockTable::new();
        table.try_shared(1).unwrap();
        table.try_shared(2).unwrap();
        table.try_reserved(1).unwrap();
        table.try_pending(1).unwrap();

        assert!(!table.try_exclusive(1).unwrap());
        table.release_all(2);
        assert!(table.try_exclusive(1).unwrap());
        assert_eq!(table.level_of(1), LockLevel::Exclusive);
    }

    #[test]
    fn release_returns_to_unlocked_and_frees_writer_slot() {
        let table = LockTable::new();
        table.try_shared(1).unwrap();
        table.try_reserved(1).unwrap();
        table.release_all(1);

        assert_eq!(table.level_of(1), LockLevel::Unlocked);
        table.try_shared(2).unwrap();
        assert!(table.try_reserved(2).unwrap());
    }

    #[test]
    fn downgrade_keeps_shared() {
        let table = LockTable::new();
        table.try_shared(1).unwrap();
        table.try_reserved(1).unwrap();
        table.downgrade_to_shared(1);

        assert_eq!(table.level_of(1), LockLevel::Shared);
        assert!(!table.writer_active());
    }

    #[test]
    fn wal_writer_excludes_other_writers_not_readers() {
        let table = LockTable::new();
        assert!(table.try_wal_writer(1));
        assert!(!table.try_wal_writer(2));
        assert!(table.try_wal_writer(1)); // re-entrant for the holder

        // Readers are untouched by the WAL writer flag.
        assert!(table.try_shared(2).unwrap());

        table.release_wal_writer(1);
        assert!(table.try_wal_writer(2));
    }
}
