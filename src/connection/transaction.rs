//! Transaction lifecycle. Transactions are deferred: `BEGIN` (or the first
//! statement of an autocommit batch) acquires nothing; the read side starts
//! at the first page read and the write side at the first page write.
//!
//! Writes never touch the main file mid-transaction. They accumulate in the
//! transaction's private dirty-page cache and reach the file only at commit:
//! in rollback mode under an EXCLUSIVE lock after the journal holds synced
//! pre-images, in WAL mode as appended frames published to the index.

use eyre::Result;
use hashbrown::{HashMap, HashSet};

use crate::error::SoleError;
use crate::storage::{FileHeader, PageIo, PageStore, RollbackJournal, WalSnapshot};

use super::{Connection, JournalMode};

#[derive(Debug)]
pub(crate) struct ActiveTxn {
    pub explicit: bool,
    pub mode: JournalMode,
    pub read_started: bool,
    pub write_started: bool,
    /// WAL-mode read snapshot; pins the checkpoint while held.
    pub snapshot: Option<WalSnapshot>,
    /// Private page cache: every page this transaction has written.
    pub dirty: HashMap<u32, Vec<u8>>,
    pub journal: Option<RollbackJournal>,
    /// Pages whose pre-image is already in the journal.
    pub journaled: HashSet<u32>,
    /// Logical page count as seen by this transaction.
    pub page_count: u32,
    pub orig_page_count: u32,
}

impl ActiveTxn {
    pub fn new(explicit: bool, mode: JournalMode) -> Self {
        Self {
            explicit,
            mode,
            read_started: false,
            write_started: false,
            snapshot: None,
            dirty: HashMap::new(),
            journal: None,
            journaled: HashSet::new(),
            page_count: 0,
            orig_page_count: 0,
        }
    }

    pub fn has_writes(&self) -> bool {
        !self.dirty.is_empty()
    }
}

impl Connection {
    /// Starts an explicit transaction. Fails inside an existing one.
    pub(crate) fn begin_explicit(&mut self) -> Result<()> {
        if self.txn.as_ref().is_some_and(|t| t.explicit) {
            return Err(SoleError::usage("cannot start a transaction within a transaction").into());
        }
        // An implicit read transaction (open cursor) cannot coexist with
        // BEGIN because cursors hold the connection borrow; leftover
        // implicit state is stale, but its locks and reader slot must
        // still be released before starting over.
        self.finish_txn();
        let mode = self.shared.journal_mode();
        self.txn = Some(ActiveTxn::new(true, mode));
        Ok(())
    }

    /// Ensures a transaction exists, creating an implicit one. Returns
    /// whether this call created it (the caller then owns commit/rollback).
    pub(crate) fn ensure_txn(&mut self) -> bool {
        if self.txn.is_none() {
            let mode = self.shared.journal_mode();
            self.txn = Some(ActiveTxn::new(false, mode));
            true
        } else {
            false
        }
    }

    /// Starts the read side: SHARED lock in rollback mode, a snapshot in
    /// WAL mode.
    pub(crate) fn begin_read(&mut self) -> Result<()> {
        let txn = self
            .txn
            .as_ref()
            .ok_or_else(|| SoleError::usage("no active transaction"))?;
        if txn.read_started {
            return Ok(());
        }
        let mode = txn.mode;

        match mode {
            JournalMode::Rollback => {
                self.acquire_with_busy("begin read transaction", |conn| {
                    conn.shared.locks.try_shared(conn.id)
                })?;
                let page_count = self.shared.store.read().page_count();
                let txn = self.txn.as_mut().unwrap();
                txn.page_count = page_count;
                txn.orig_page_count = page_count;
                txn.read_started = true;
            }
            JournalMode::Wal => {
                let snapshot = self.shared.wal_index.begin_reader();
                let page_count = if snapshot.db_size > 0 {
                    snapshot.db_size
                } else {
                    self.shared.store.read().page_count()
                };
                let txn = self.txn.as_mut().unwrap();
                txn.snapshot = Some(snapshot);
                txn.page_count = page_count;
                txn.orig_page_count = page_count;
                txn.read_started = true;
            }
        }
        Ok(())
    }

    /// Starts the write side: RESERVED lock plus journal in rollback mode,
    /// the WAL writer slot in WAL mode.
    pub(crate) fn begin_write(&mut self) -> Result<()> {
        self.begin_read()?;

        let txn = self.txn.as_ref().ok_or_else(|| {
            SoleError::usage("no active transaction")
        })?;
        if txn.write_started {
            return Ok(());
        }
        let mode = txn.mode;

        match mode {
            JournalMode::Rollback => {
                self.acquire_with_busy("begin write transaction", |conn| {
                    conn.shared.locks.try_reserved(conn.id)
                })?;

                // File-backed databases journal pre-images from here on;
                // memory databases roll back by discarding the dirty cache.
                let journal = match &self.shared.path {
                    Some(path) => {
                        let store = self.shared.store.read();
                        Some(RollbackJournal::create(
                            path,
                            store.page_size(),
                            store.page_count(),
                        )?)
                    }
                    None => None,
                };

                let txn = self.txn.as_mut().unwrap();
                txn.journal = journal;
                txn.write_started = true;
            }
            JournalMode::Wal => {
                self.acquire_with_busy("begin write transaction", |conn| {
                    Ok(conn.shared.locks.try_wal_writer(conn.id))
                })?;

                // Writer snapshot moves to the head of the log: the single
                // writer always builds on the newest commit.
                let txn = self.txn.as_mut().unwrap();
                if let Some(old) = txn.snapshot.take() {
                    self.shared.wal_index.end_reader(old.slot);
                }
                let snapshot = self.shared.wal_index.begin_reader();
                let txn = self.txn.as_mut().unwrap();
                txn.page_count = if snapshot.db_size > 0 {
                    snapshot.db_size
                } else {
                    self.shared.store.read().page_count()
                };
                txn.orig_page_count = txn.page_count;
                txn.snapshot = Some(snapshot);
                txn.write_started = true;
            }
        }
        Ok(())
    }

    /// Commits the active transaction.
    pub(crate) fn commit(&mut self) -> Result<()> {
        let Some(txn) = self.txn.as_ref() else {
            return Err(SoleError::usage("no transaction is active").into());
        };

        let result = if txn.has_writes() {
            match txn.mode {
                JournalMode::Rollback => self.commit_rollback_mode(),
                JournalMode::Wal => self.commit_wal_mode(),
            }
        } else {
            Ok(())
        };

        self.finish_txn();
        result
    }

    fn commit_rollback_mode(&mut self) -> Result<()> {
        // Climb the ladder: PENDING stops new readers, EXCLUSIVE waits for
        // existing ones to drain.
        self.shared.locks.try_pending(self.id)?;
        self.acquire_with_busy("commit", |conn| conn.shared.locks.try_exclusive(conn.id))?;

        let txn = self.txn.as_mut().unwrap();

        // Page 0 changes at every commit (change counter, page count), so
        // its pre-image must be journaled like any other page.
        let mut page0 = match txn.dirty.get(&0) {
            Some(img) => img.clone(),
            None => {
                let store = self.shared.store.read();
                let img = store.page_bytes(0)?.to_vec();
                if let Some(journal) = txn.journal.as_mut() {
                    if txn.journaled.insert(0) {
                        journal.append_page(0, &img)?;
                    }
                }
                img
            }
        };
        {
            let header = FileHeader::from_bytes_mut(&mut page0)?;
            header.set_page_count(txn.page_count);
            header.bump_change_counter();
        }
        txn.dirty.insert(0, page0);

        // Pre-images must be durable before the main file is touched.
        if let Some(journal) = txn.journal.as_ref() {
            journal.sync().map_err(|e| {
                eyre::Report::from(SoleError::Durability {
                    operation: "commit",
                    detail: format!("journal sync failed: {e}"),
                })
            })?;
        }

        let mut store = self.shared.store.write();
        let orig_count = store.page_count();
        let undo = collect_undo(&store, &txn.dirty)?;

        // A failure mid-write leaves the file half-updated; put the
        // pre-images back before other connections can read it.
        if let Err(err) = apply_dirty(&mut store, &txn.dirty, txn.page_count) {
            restore_images(&mut store, &undo, orig_count);
            drop(store);
            if let Some(journal) = txn.journal.take() {
                let _ = journal.delete();
            }
            return Err(err);
        }
        drop(store);

        // Deleting the journal is the commit point.
        if let Some(journal) = txn.journal.take() {
            journal.delete()?;
        }
        Ok(())
    }

    fn commit_wal_mode(&mut self) -> Result<()> {
        let txn = self.txn.as_mut().unwrap();

        let mut page0 = match txn.dirty.get(&0) {
            Some(img) => img.clone(),
            None => {
                // Base image through the snapshot, same as a read would see.
                let mut wal_guard = self.shared.wal.lock();
                let frame = txn
                    .snapshot
                    .and_then(|s| self.shared.wal_index.frame_for(0, s.mx_frame));
                match (frame, wal_guard.as_mut()) {
                    (Some(frame_no), Some(wal)) => wal.read_frame(frame_no)?.1,
                    _ => self.shared.store.read().page_bytes(0)?.to_vec(),
                }
            }
        };
        {
            let header = FileHeader::from_bytes_mut(&mut page0)?;
            header.set_page_count(txn.page_count);
            header.bump_change_counter();
        }
        txn.dirty.insert(0, page0);

        let mut wal_guard = self.shared.wal.lock();
        let wal = wal_guard
            .as_mut()
            .ok_or_else(|| SoleError::usage("WAL transaction but journal_mode is rollback"))?;

        // Deterministic frame order; the last frame carries the commit
        // marker (nonzero db_size).
        let mut pages: Vec<u32> = txn.dirty.keys().copied().collect();
        pages.sort_unstable();

        let start_frame = wal.frame_count();
        let mut published = Vec::with_capacity(pages.len());
        let total = pages.len();
        let appended = (|| -> Result<()> {
            for (i, page_no) in pages.iter().copied().enumerate() {
                let db_size = if i + 1 == total { txn.page_count } else { 0 };
                let frame_no = wal.append_frame(page_no, db_size, &txn.dirty[&page_no])?;
                published.push((page_no, frame_no));
            }
            wal.sync().map_err(|e| {
                eyre::Report::from(SoleError::Durability {
                    operation: "commit",
                    detail: format!("WAL sync failed: {e}"),
                })
            })
        })();
        if let Err(err) = appended {
            // The failed commit's frames, commit marker included, must not
            // survive into the prefix a reopen would replay.
            let _ = wal.rewind(start_frame);
            return Err(err);
        }

        let mx_frame = wal.frame_count();
        let frame_count = mx_frame;
        drop(wal_guard);

        // Publication makes the commit visible to new snapshots.
        self.shared
            .wal_index
            .publish(&published, mx_frame, txn.page_count);

        // Release before checkpointing so the checkpoint sees no writer.
        let auto = self.auto_checkpoint;
        self.finish_txn();

        if auto > 0 && frame_count >= auto {
            let _ = self.shared.checkpoint();
        }
        Ok(())
    }

    /// Rolls back the active transaction: the dirty cache is discarded and
    /// the journal (which the main file never saw) deleted.
    pub(crate) fn rollback(&mut self) -> Result<()> {
        let Some(txn) = self.txn.as_mut() else {
            return Err(SoleError::usage("no transaction is active").into());
        };
        txn.dirty.clear();
        if let Some(journal) = txn.journal.take() {
            journal.delete()?;
        }
        self.finish_txn();
        Ok(())
    }

    /// Drops all transaction state and every lock or snapshot it held.
    /// Safe to call twice.
    pub(crate) fn finish_txn(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            if let Some(journal) = txn.journal.take() {
                // Best effort; an undeleted journal of an unsynced txn is
                // ignored by recovery.
                let _ = journal.delete();
            }
            if let Some(snapshot) = txn.snapshot {
                self.shared.wal_index.end_reader(snapshot.slot);
            }
        }
        self.shared.locks.release_all(self.id);
        self.shared.locks.release_wal_writer(self.id);
    }

    /// Runs `f` inside an implicit transaction unless an explicit one is
    /// open. Used by autocommit DML.
    pub(crate) fn with_autocommit<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let implicit = self.ensure_txn();
        let result = f(self);
        if implicit {
            match result {
                Ok(value) => {
                    self.commit()?;
                    Ok(value)
                }
                Err(err) => {
                    let _ = self.rollback();
                    Err(err)
                }
            }
        } else {
            result
        }
    }

    /// Runs `f` inside its own transaction: commits when `f` returns `Ok`,
    /// rolls back when it returns `Err`. Entering with a transaction
    /// already open is a usage error, same as a nested `BEGIN`.
    pub fn with_transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.txn.is_some() {
            return Err(
                SoleError::usage("cannot start a transaction within a transaction").into(),
            );
        }
        self.begin_explicit()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    pub(crate) fn expect_no_txn(&self, what: &str) -> Result<()> {
        if self.txn.is_some() {
            return Err(
                SoleError::usage(format!("{what} requires no active transaction")).into(),
            );
        }
        Ok(())
    }
}

/// In-memory pre-images of the pages a commit is about to overwrite, so a
/// half-applied write phase can be undone without re-reading the journal.
fn collect_undo(store: &PageStore, dirty: &HashMap<u32, Vec<u8>>) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut undo = Vec::with_capacity(dirty.len());
    for &page_no in dirty.keys() {
        if page_no < store.page_count() {
            undo.push((page_no, store.page_bytes(page_no)?.to_vec()));
        }
    }
    Ok(undo)
}

fn apply_dirty(
    store: &mut PageStore,
    dirty: &HashMap<u32, Vec<u8>>,
    new_page_count: u32,
) -> Result<()> {
    if new_page_count > store.page_count() {
        store.grow(new_page_count)?;
    }
    for (&page_no, image) in dirty.iter() {
        store.write_page(page_no, image)?;
    }
    if new_page_count < store.page_count() {
        store.truncate(new_page_count)?;
    }
    store.sync()
}

/// Best-effort undo of a failed `apply_dirty`: pre-images back in place,
/// file back to its original length.
fn restore_images(store: &mut PageStore, undo: &[(u32, Vec<u8>)], orig_page_count: u32) {
    for (page_no, image) in undo {
        let _ = store.write_page(*page_no, image);
    }
    let _ = store.truncate(orig_page_count);
    let _ = store.sync();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_images_undoes_a_half_applied_commit() {
        let mut store = PageStore::create_memory(512).unwrap();
        store.grow(4).unwrap();
        let marked = vec![0x33u8; 512];
        store.write_page(2, &marked).unwrap();
        store.write_page(3, &marked).unwrap();

        let mut dirty: HashMap<u32, Vec<u8>> = HashMap::new();
        dirty.insert(2, vec![0x44; 512]);
        dirty.insert(3, vec![0x55; 512]);

        let orig_count = store.page_count();
        let undo = collect_undo(&store, &dirty).unwrap();

        // Only one page of the batch landed before the "failure".
        store.write_page(2, &dirty[&2]).unwrap();
        restore_images(&mut store, &undo, orig_count);

        assert_eq!(store.page_count(), orig_count);
        assert_eq!(store.read_page(2).unwrap(), marked);
        assert_eq!(store.read_page(3).unwrap(), marked);
    }

    #[test]
    fn restore_images_discards_pages_the_commit_added() {
        let mut store = PageStore::create_memory(512).unwrap();
        let orig_count = store.page_count();

        let mut dirty: HashMap<u32, Vec<u8>> = HashMap::new();
        dirty.insert(2, vec![0x77; 512]);
        let undo = collect_undo(&store, &dirty).unwrap();

        apply_dirty(&mut store, &dirty, 3).unwrap();
        assert_eq!(store.page_count(), 3);

        restore_images(&mut store, &undo, orig_count);
        assert_eq!(store.page_count(), orig_count);
    }

    #[test]
    fn begin_after_stale_implicit_txn_releases_its_locks() {
        let mut conn = Connection::open_memory().unwrap();
        conn.ensure_txn();
        conn.begin_read().unwrap();
        assert!(!conn.shared.locks.is_idle());

        conn.begin_explicit().unwrap();
        assert!(conn.shared.locks.is_idle());
        conn.rollback().unwrap();
    }
}
