//! # Storage Module
//!
//! This module provides the storage layer for SoleDB: a fixed-size page
//! abstraction over a single database file, plus the two durability
//! subsystems (rollback journal and write-ahead log) layered next to it.
//!
//! ## Single-File Layout
//!
//! The entire database lives in one file, a sequence of fixed-size pages:
//!
//! ```text
//! my.db            # page 0: file header, page 1: catalog root, pages 2+: data
//! my.db-journal    # rollback journal (exists only during/after a write txn)
//! my.db-wal        # write-ahead log (exists while journal_mode = wal)
//! ```
//!
//! The page size is chosen at file creation (power of two, 512–65536 bytes)
//! and is immutable thereafter; it is recorded in the page-0 header and
//! validated on every open.
//!
//! ## Memory-Mapped Access
//!
//! The main file is memory-mapped. Page reads return slices into the map;
//! growth requires `&mut self`, so the borrow checker guarantees no page
//! reference survives a remap. One `PageStore` exists per file per process,
//! shared by all connections behind a `RwLock` — connections never hold
//! independent mappings of the same file.
//!
//! ## Module Organization
//!
//! - `header`: zerocopy page-0 file header
//! - `page`: record-page header, cell layout, validation
//! - `pager`: `PageStore` (mmap or memory backing), free-list, `PageIo`
//! - `journal`: rollback-journal pre-images and hot-journal recovery
//! - `wal`: WAL file, frame format, checksums
//! - `wal_index`: in-process shared WAL index and reader marks

mod header;
pub mod journal;
mod page;
mod pager;
mod wal;
mod wal_index;

pub use header::FileHeader;
pub use journal::RollbackJournal;
pub use page::{
    append_cell, cell_at, first_cell_offset, init_page, next_cell_offset, overwrite_cell,
    tombstone_cell, validate_page, PageHeader, PageType,
};
pub use pager::{allocate_page, free_page, PageIo, PageStore};
pub use wal::{wal_path, RecoveredFrame, Wal, WalFrameHeader, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE};
pub use wal_index::{WalIndex, WalSnapshot};

pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const FILE_HEADER_SIZE: usize = 64;
pub const PAGE_HEADER_SIZE: usize = 16;

/// Page number of the catalog root. Fixed at file creation.
pub const CATALOG_ROOT_PAGE: u32 = 1;

pub fn is_valid_page_size(page_size: usize) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size.is_power_of_two()
}
