//! Connection builder: open options that have to be decided before the
//! first page is read.

use std::path::Path;
use std::time::Duration;

use eyre::Result;

use crate::diag;
use crate::locking::BusyPolicy;
use crate::storage::DEFAULT_PAGE_SIZE;

use super::shared::SharedFile;
use super::{Connection, JournalMode};

/// Default WAL frames between automatic checkpoints.
pub const DEFAULT_AUTO_CHECKPOINT: u64 = 1000;

#[derive(Debug)]
pub struct ConnectionBuilder {
    create: bool,
    page_size: usize,
    busy_timeout: Option<Duration>,
    shared_cache: bool,
    journal_mode: Option<JournalMode>,
    auto_checkpoint: u64,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            create: true,
            page_size: DEFAULT_PAGE_SIZE,
            busy_timeout: None,
            shared_cache: false,
            journal_mode: None,
            auto_checkpoint: DEFAULT_AUTO_CHECKPOINT,
        }
    }

    /// Whether to create the file when it does not exist. Defaults to true.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Page size used when creating a new file (power of two, 512..=65536).
    /// Existing files keep the size they were created with.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Initial busy timeout; without one, contended locks fail immediately.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Shared-cache semantics: lock contention with sibling connections
    /// reports `SharedCacheBusy` immediately, bypassing the busy policy.
    pub fn shared_cache(mut self, shared_cache: bool) -> Self {
        self.shared_cache = shared_cache;
        self
    }

    /// Journal mode to switch to right after opening.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    /// WAL frames that trigger an automatic checkpoint after commit; zero
    /// disables automatic checkpoints.
    pub fn wal_autocheckpoint(mut self, frames: u64) -> Self {
        self.auto_checkpoint = frames;
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Connection> {
        diag::mark_engine_used();
        let shared = SharedFile::open(path.as_ref(), self.create, self.page_size)?;
        self.finish(shared)
    }

    pub fn open_memory(self) -> Result<Connection> {
        diag::mark_engine_used();
        let shared = SharedFile::memory(self.page_size)?;
        self.finish(shared)
    }

    fn finish(self, shared: std::sync::Arc<SharedFile>) -> Result<Connection> {
        let busy = match self.busy_timeout {
            Some(t) if !t.is_zero() => BusyPolicy::Timeout(t),
            _ => BusyPolicy::Fail,
        };

        let mut conn =
            Connection::from_shared(shared, busy, self.shared_cache, self.auto_checkpoint);

        if let Some(mode) = self.journal_mode {
            if conn.journal_mode() != mode {
                conn.execute(&format!("PRAGMA journal_mode = {}", mode.as_str()))?;
            }
        }
        Ok(conn)
    }
}
