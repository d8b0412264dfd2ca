//! Per-file shared state and the process-wide registry.
//!
//! Exactly one [`SharedFile`] exists per database file per process. It owns
//! the single memory map (inside `PageStore`), the lock table, the WAL
//! handle, and the WAL index. Connections hold an `Arc` to it; the registry
//! keeps `Weak` references so a file's state dies with its last connection.
//!
//! Opening a file also performs crash recovery: a hot rollback journal is
//! replayed before the first connection sees the data, and an existing WAL
//! is scanned so its committed frames become visible through the index.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::diag;
use crate::error::codes;
use crate::locking::LockTable;
use crate::storage::{journal, PageIo, PageStore, Wal, WalIndex};

use super::JournalMode;

static REGISTRY: Mutex<Option<HashMap<PathBuf, Weak<SharedFile>>>> = Mutex::new(None);

pub(crate) struct SharedFile {
    /// `None` for memory databases.
    pub path: Option<PathBuf>,
    pub store: RwLock<PageStore>,
    pub locks: LockTable,
    /// Present while the file operates in WAL mode.
    pub wal: Mutex<Option<Wal>>,
    pub wal_index: WalIndex,
    /// Journal mode is a property of the file, shared by every connection.
    pub mode: Mutex<JournalMode>,
}

impl std::fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SharedFile {
    /// Opens (or creates) the shared state for a file, going through the
    /// registry so concurrent opens of the same path converge on one
    /// instance.
    pub fn open(path: &Path, create: bool, page_size: usize) -> Result<Arc<Self>> {
        let key = normalize(path);

        let mut registry = REGISTRY.lock();
        let map = registry.get_or_insert_with(HashMap::new);

        if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let shared = Arc::new(Self::open_uncached(path, create, page_size)?);
        map.insert(key, Arc::downgrade(&shared));

        // Opportunistic cleanup of entries whose files have been closed.
        map.retain(|_, weak| weak.strong_count() > 0);

        Ok(shared)
    }

    fn open_uncached(path: &Path, create: bool, page_size: usize) -> Result<Self> {
        let exists = path.exists();
        let mut store = if exists {
            PageStore::open(path)?
        } else if create {
            PageStore::create(path, page_size)?
        } else {
            eyre::bail!("database file '{}' does not exist", path.display());
        };

        // A hot journal means the last writer died between syncing its
        // pre-images and reaching the commit point. Replay it before
        // anything reads the file.
        if journal::is_hot(path) {
            let replayed = journal::recover(&mut store, path)
                .wrap_err("hot journal recovery failed")?;
            diag::log(
                codes::NOTICE_RECOVER_JOURNAL,
                &format!(
                    "recovered rollback journal for '{}' ({} pages restored)",
                    path.display(),
                    replayed
                ),
            );
        }

        let wal_index = WalIndex::new();
        let mut mode = JournalMode::Rollback;
        let mut wal = None;

        if store.header()?.wal_mode() {
            mode = JournalMode::Wal;
            let wal_file = crate::storage::wal_path(path);
            if wal_file.exists() {
                let (opened, frames) = Wal::open(path, store.page_size())?;
                if !frames.is_empty() {
                    let pairs: Vec<(u32, u64)> =
                        frames.iter().map(|f| (f.page_no, f.frame_no)).collect();
                    let last = frames.last().unwrap();
                    wal_index.publish(&pairs, last.frame_no, last.db_size);
                    diag::log(
                        codes::NOTICE_RECOVER_WAL,
                        &format!(
                            "recovered {} WAL frames for '{}'",
                            frames.len(),
                            path.display()
                        ),
                    );
                }
                wal = Some(opened);
            } else {
                wal = Some(Wal::create(path, store.page_size())?);
            }
        }

        Ok(Self {
            path: Some(path.to_path_buf()),
            store: RwLock::new(store),
            locks: LockTable::new(),
            wal: Mutex::new(wal),
            wal_index,
            mode: Mutex::new(mode),
        })
    }

    /// Builds an unregistered shared state over a memory store. Every
    /// memory database is private to the connections cloned from it.
    pub fn memory(page_size: usize) -> Result<Arc<Self>> {
        let store = PageStore::create_memory(page_size)?;
        Ok(Arc::new(Self {
            path: None,
            store: RwLock::new(store),
            locks: LockTable::new(),
            wal: Mutex::new(None),
            wal_index: WalIndex::new(),
            mode: Mutex::new(JournalMode::Rollback),
        }))
    }

    pub fn journal_mode(&self) -> JournalMode {
        *self.mode.lock()
    }

    /// Copies checkpointable WAL frames back into the main file. Returns
    /// `(log_frames, backfilled_through)`. Resets the log when everything
    /// is backfilled and no reader holds a snapshot.
    pub fn checkpoint(&self) -> Result<(u64, u64)> {
        let mut wal_guard = self.wal.lock();
        let Some(wal) = wal_guard.as_mut() else {
            return Ok((0, 0));
        };

        let limit = self.wal_index.checkpoint_limit();
        let frames = self.wal_index.frames_to_backfill(limit);

        if !frames.is_empty() {
            let mut store = self.store.write();
            for &(page_no, frame_no) in &frames {
                let (frame_page, image) = wal.read_frame(frame_no)?;
                debug_assert_eq!(frame_page, page_no);
                if page_no >= store.page_count() {
                    store.grow(page_no + 1)?;
                }
                store.write_page(page_no, &image)?;
            }

            // Fully caught up: the file can shrink to the committed size.
            if limit == self.wal_index.mx_frame() {
                let db_size = self.wal_index.db_size();
                if db_size >= 2 && db_size < store.page_count() {
                    store.truncate(db_size)?;
                }
            }
            store.sync()?;
        }

        self.wal_index.set_backfilled(limit);

        let mx = self.wal_index.mx_frame();
        if self.wal_index.backfilled() == mx && !self.wal_index.has_readers() {
            wal.reset()?;
            self.wal_index.reset();
        } else if limit < mx {
            diag::log(
                codes::WARNING_CHECKPOINT,
                "checkpoint stopped early: a reader snapshot pins the log",
            );
        }

        Ok((mx, limit))
    }
}

/// Registry key for a path. Canonicalizes the parent so `./db` and `db`
/// share state; the file itself may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
