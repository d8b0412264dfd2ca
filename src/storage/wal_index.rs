//! # WAL Index
//!
//! The in-process counterpart to the WAL file: a shared map from page
//! number to the list of frames holding versions of that page, plus the
//! bookkeeping readers and the checkpointer need.
//!
//! A reader snapshots `mx_frame` (the last published commit frame) when its
//! transaction begins and registers that watermark in a reader slot. Page
//! lookups then return the newest frame for the page that is at or below
//! the snapshot, so concurrent commits never become visible mid-read. The
//! checkpointer backfills only frames at or below the minimum registered
//! reader mark; a full reset requires no readers at all.
//!
//! All connections to one database file share a single `WalIndex` through
//! their `SharedFile`, so the index is process-scoped by construction.

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

/// Snapshot handed to a read transaction.
#[derive(Debug, Clone, Copy)]
pub struct WalSnapshot {
    /// Last frame visible to this reader.
    pub mx_frame: u64,
    /// Database page count as of that frame (0 when the WAL is empty).
    pub db_size: u32,
    /// Slot to release via `end_reader`.
    pub slot: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Newest-first would complicate the binary search; frames per page are
    /// kept in append order, so the list is sorted ascending.
    pages: HashMap<u32, SmallVec<[u64; 4]>>,
    mx_frame: u64,
    db_size: u32,
    /// Frames up to this number have been copied into the main file.
    backfilled: u64,
    reader_marks: Vec<Option<u64>>,
}

/// Shared frame lookup for one database file.
#[derive(Debug, Default)]
pub struct WalIndex {
    state: RwLock<IndexState>,
}

impl WalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader at the current watermark.
    pub fn begin_reader(&self) -> WalSnapshot {
        let mut state = self.state.write();
        let mark = state.mx_frame;
        let db_size = state.db_size;

        let slot = match state.reader_marks.iter().position(Option::is_none) {
            Some(i) => {
                state.reader_marks[i] = Some(mark);
                i
            }
            None => {
                state.reader_marks.push(Some(mark));
                state.reader_marks.len() - 1
            }
        };

        WalSnapshot {
            mx_frame: mark,
            db_size,
            slot,
        }
    }

    pub fn end_reader(&self, slot: usize) {
        let mut state = self.state.write();
        if let Some(mark) = state.reader_marks.get_mut(slot) {
            *mark = None;
        }
    }

    /// Newest frame holding `page_no` at or below the snapshot, if any.
    pub fn frame_for(&self, page_no: u32, mx_frame: u64) -> Option<u64> {
        let state = self.state.read();
        let frames = state.pages.get(&page_no)?;
        // Ascending frame numbers: take the last one within the snapshot.
        match frames.binary_search(&mx_frame) {
            Ok(_) => Some(mx_frame),
            Err(0) => None,
            Err(i) => Some(frames[i - 1]),
        }
    }

    /// Publishes the frames of a committed transaction. Readers that began
    /// before this call never observe the new frames because their snapshot
    /// watermark predates them.
    pub fn publish(&self, frames: &[(u32, u64)], mx_frame: u64, db_size: u32) {
        let mut state = self.state.write();
        for &(page_no, frame_no) in frames {
            state.pages.entry(page_no).or_default().push(frame_no);
        }
        state.mx_frame = mx_frame;
        state.db_size = db_size;
    }

    pub fn mx_frame(&self) -> u64 {
        self.state.read().mx_frame
    }

    pub fn db_size(&self) -> u32 {
        self.state.read().db_size
    }

    pub fn backfilled(&self) -> u64 {
        self.state.read().backfilled
    }

    pub fn set_backfilled(&self, frame_no: u64) {
        let mut state = self.state.write();
        state.backfilled = state.backfilled.max(frame_no);
    }

    /// Smallest registered reader mark, or `None` when no readers exist.
    pub fn min_reader_mark(&self) -> Option<u64> {
        self.state.read().reader_marks.iter().flatten().min().copied()
    }

    pub fn has_readers(&self) -> bool {
        self.state.read().reader_marks.iter().any(Option::is_some)
    }

    /// Highest frame the checkpointer may safely copy into the main file:
    /// everything up to the oldest reader's snapshot, or the full log when
    /// no readers are registered.
    pub fn checkpoint_limit(&self) -> u64 {
        let state = self.state.read();
        state
            .reader_marks
            .iter()
            .flatten()
            .min()
            .copied()
            .unwrap_or(state.mx_frame)
            .min(state.mx_frame)
    }

    /// Frames (page, frame_no) that need backfilling, newest frame per page
    /// only, restricted to `..=limit`.
    pub fn frames_to_backfill(&self, limit: u64) -> Vec<(u32, u64)> {
        let state = self.state.read();
        let mut out = Vec::new();
        for (&page_no, frames) in state.pages.iter() {
            let newest = frames
                .iter()
                .rev()
                .find(|&&f| f <= limit && f > state.backfilled)
                .copied();
            if let Some(frame_no) = newest {
                out.push((page_no, frame_no));
            }
        }
        // Deterministic order keeps checkpoints reproducible under test.
        out.sort_unstable_by_key(|&(_, f)| f);
        out
    }

    /// Clears the index after the WAL file has been reset. Callers must
    /// hold the checkpoint exclusivity guarantees (no readers, fully
    /// backfilled).
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.pages.clear();
        state.mx_frame = 0;
        state.db_size = 0;
        state.backfilled = 0;
    }
}
