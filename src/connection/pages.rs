//! Transactional page view. [`PageView`] implements [`PageIo`] over a
//! transaction: reads come from the dirty cache, then the WAL (bounded by
//! the snapshot), then the main file; writes journal a pre-image on first
//! touch and land in the dirty cache. The catalog, free-list, and executor
//! code all run against this view, so a transaction's effects stay private
//! until commit.

use eyre::{ensure, Result};
use parking_lot::RwLockReadGuard;

use crate::storage::{PageIo, PageStore, Wal, WalIndex};

use super::transaction::ActiveTxn;
use super::{Connection, JournalMode};

pub(crate) struct PageView<'a> {
    txn: &'a mut ActiveTxn,
    store: &'a PageStore,
    wal: Option<&'a mut Wal>,
    wal_index: &'a WalIndex,
}

impl PageView<'_> {
    /// Base image of a page as of the transaction's snapshot, bypassing the
    /// dirty cache.
    fn base_image(&mut self, page_no: u32) -> Result<Vec<u8>> {
        if let (Some(snapshot), Some(wal)) = (self.txn.snapshot, self.wal.as_deref_mut()) {
            if let Some(frame_no) = self.wal_index.frame_for(page_no, snapshot.mx_frame) {
                return Ok(wal.read_frame(frame_no)?.1);
            }
        }
        if page_no < self.store.page_count() {
            return Ok(self.store.page_bytes(page_no)?.to_vec());
        }
        // Allocated past the end of the file within this transaction but
        // never written: still all zeroes.
        Ok(vec![0u8; self.store.page_size()])
    }
}

impl PageIo for PageView<'_> {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn page_count(&self) -> u32 {
        self.txn.page_count
    }

    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>> {
        ensure!(
            page_no < self.txn.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.txn.page_count
        );
        if let Some(image) = self.txn.dirty.get(&page_no) {
            return Ok(image.clone());
        }
        self.base_image(page_no)
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.store.page_size(),
            "page write of {} bytes does not match page size {}",
            data.len(),
            self.store.page_size()
        );
        ensure!(
            page_no < self.txn.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.txn.page_count
        );

        // First touch of a pre-existing page: capture its pre-image before
        // the dirty cache hides the original.
        if self.txn.mode == JournalMode::Rollback
            && self.txn.journal.is_some()
            && page_no < self.txn.orig_page_count
            && !self.txn.journaled.contains(&page_no)
            && !self.txn.dirty.contains_key(&page_no)
        {
            let image = self.base_image(page_no)?;
            self.txn
                .journal
                .as_mut()
                .map(|j| j.append_page(page_no, &image))
                .transpose()?;
            self.txn.journaled.insert(page_no);
        }

        self.txn.dirty.insert(page_no, data.to_vec());
        Ok(())
    }

    fn extend(&mut self) -> Result<u32> {
        let page_no = self.txn.page_count;
        self.txn.page_count += 1;
        self.txn
            .dirty
            .insert(page_no, vec![0u8; self.store.page_size()]);
        Ok(page_no)
    }
}

impl Connection {
    /// Runs `f` against the transaction's page view, holding the WAL and
    /// store locks for the duration. Lock order (WAL mutex before store
    /// lock) matches the checkpoint path.
    pub(crate) fn with_view<R>(
        &mut self,
        f: impl FnOnce(&mut PageView<'_>) -> Result<R>,
    ) -> Result<R> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| crate::error::SoleError::usage("no active transaction"))?;

        let mut wal_guard = self.shared.wal.lock();
        let store_guard: RwLockReadGuard<'_, PageStore> = self.shared.store.read();

        let mut view = PageView {
            txn,
            store: &store_guard,
            wal: wal_guard.as_mut(),
            wal_index: &self.shared.wal_index,
        };
        f(&mut view)
    }
}
