//! # Rollback Journal
//!
//! In rollback-journal mode, a write transaction records the original image
//! of every page it is about to modify in a sidecar `*-journal` file before
//! the main file is touched. If the process dies mid-commit, the next opener
//! finds a "hot" journal and replays those pre-images, restoring the file to
//! its pre-transaction state. Deleting the journal is the commit point: a
//! transaction is committed if and only if its journal no longer exists.
//!
//! ## File Layout
//!
//! ```text
//! +-----------------------------+
//! | JournalHeader (32 bytes)    |
//! +-----------------------------+
//! | page_no: u32 | crc64: u64   |  record 0
//! | page image (page_size)      |
//! +-----------------------------+
//! | ...                         |  record 1, 2, ...
//! +-----------------------------+
//! ```
//!
//! Each record carries a CRC-64 of its page image. Recovery replays records
//! from the start and stops at the first record that is truncated or fails
//! its checksum; everything before that point is valid by construction
//! because records are written and synced strictly in order.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::pager::PageStore;
use super::PageIo;

pub const JOURNAL_MAGIC: &[u8; 8] = b"SoleJrn1";
pub const JOURNAL_HEADER_SIZE: usize = 32;
const RECORD_PREFIX_SIZE: usize = 12;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct JournalHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    /// Page count of the main file when the transaction began. Recovery
    /// truncates back to this.
    orig_page_count: U32,
    salt: U32,
    header_checksum: U64,
}

const _: () = assert!(std::mem::size_of::<JournalHeader>() == JOURNAL_HEADER_SIZE);

impl JournalHeader {
    fn new(page_size: u32, orig_page_count: u32, salt: u32) -> Self {
        let mut header = Self {
            magic: *JOURNAL_MAGIC,
            version: U32::new(1),
            page_size: U32::new(page_size),
            orig_page_count: U32::new(orig_page_count),
            salt: U32::new(salt),
            header_checksum: U64::new(0),
        };
        header.header_checksum = U64::new(header.compute_checksum());
        header
    }

    fn compute_checksum(&self) -> u64 {
        CRC64.checksum(&self.as_bytes()[..JOURNAL_HEADER_SIZE - 8])
    }

    fn is_valid(&self) -> bool {
        &self.magic == JOURNAL_MAGIC
            && self.version.get() == 1
            && self.header_checksum.get() == self.compute_checksum()
    }
}

/// Sidecar journal path for a database file.
pub fn journal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-journal");
    PathBuf::from(os)
}

/// An open rollback journal for one write transaction.
#[derive(Debug)]
pub struct RollbackJournal {
    file: File,
    path: PathBuf,
    page_size: usize,
    orig_page_count: u32,
    record_count: u32,
}

impl RollbackJournal {
    /// Creates (or truncates) the journal and writes its header. The header
    /// is not synced here; `sync` before the main file is modified covers it.
    pub fn create(db_path: &Path, page_size: usize, orig_page_count: u32) -> Result<Self> {
        let path = journal_path(db_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create journal '{}'", path.display()))?;

        let salt = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        let header = JournalHeader::new(page_size as u32, orig_page_count, salt);
        file.write_all(header.as_bytes())
            .wrap_err("failed to write journal header")?;

        Ok(Self {
            file,
            path,
            page_size,
            orig_page_count,
            record_count: 0,
        })
    }

    pub fn orig_page_count(&self) -> u32 {
        self.orig_page_count
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Appends the pre-image of a page. Must be called before the page is
    /// first modified within the transaction.
    pub fn append_page(&mut self, page_no: u32, image: &[u8]) -> Result<()> {
        ensure!(
            image.len() == self.page_size,
            "journal pre-image of {} bytes does not match page size {}",
            image.len(),
            self.page_size
        );

        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        prefix[..4].copy_from_slice(&page_no.to_le_bytes());
        prefix[4..].copy_from_slice(&CRC64.checksum(image).to_le_bytes());

        self.file
            .write_all(&prefix)
            .wrap_err("failed to write journal record")?;
        self.file
            .write_all(image)
            .wrap_err("failed to write journal page image")?;
        self.record_count += 1;
        Ok(())
    }

    /// Syncs the journal to durable storage. Required before any journaled
    /// page may be written to the main file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync journal")
    }

    /// Deletes the journal. This is the commit point of a rollback-mode
    /// transaction: once the journal is gone the transaction is committed.
    pub fn delete(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)
            .wrap_err_with(|| format!("failed to delete journal '{}'", self.path.display()))
    }
}

/// True when a journal exists next to the database and carries a valid
/// header: evidence of a transaction that never reached its commit point.
pub fn is_hot(db_path: &Path) -> bool {
    let path = journal_path(db_path);
    let Ok(mut file) = File::open(&path) else {
        return false;
    };

    let mut buf = [0u8; JOURNAL_HEADER_SIZE];
    if file.read_exact(&mut buf).is_err() {
        // A zero-length or truncated-header journal holds no pre-images;
        // nothing to replay.
        return false;
    }

    JournalHeader::read_from_bytes(&buf)
        .map(|h| h.is_valid())
        .unwrap_or(false)
}

/// Replays a hot journal into the main file, truncates the file back to its
/// pre-transaction page count, syncs, and deletes the journal.
pub fn recover(store: &mut PageStore, db_path: &Path) -> Result<u32> {
    let path = journal_path(db_path);
    let mut file = File::open(&path)
        .wrap_err_with(|| format!("failed to open hot journal '{}'", path.display()))?;

    let mut header_buf = [0u8; JOURNAL_HEADER_SIZE];
    file.read_exact(&mut header_buf)
        .wrap_err("failed to read journal header")?;
    let header = JournalHeader::read_from_bytes(&header_buf)
        .map_err(|e| eyre::eyre!("failed to parse journal header: {:?}", e))?;
    ensure!(header.is_valid(), "journal header failed validation");
    ensure!(
        header.page_size.get() as usize == store.page_size(),
        "journal page size {} does not match database page size {}",
        header.page_size.get(),
        store.page_size()
    );

    let orig_page_count = header.orig_page_count.get();
    let page_size = store.page_size();

    // The interrupted transaction may have grown the file past the journaled
    // range; make sure every journaled page is addressable before replay.
    let mut replayed = 0u32;
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    let mut image = vec![0u8; page_size];

    loop {
        match file.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(_) => break,
        }
        if file.read_exact(&mut image).is_err() {
            break;
        }

        let page_no = u32::from_le_bytes(prefix[..4].try_into()?);
        let expected_crc = u64::from_le_bytes(prefix[4..].try_into()?);
        if CRC64.checksum(&image) != expected_crc {
            break;
        }
        if page_no >= orig_page_count {
            // Pre-images are only ever taken of pages that existed when the
            // transaction began; anything else is garbage past a tear.
            break;
        }

        if page_no >= store.page_count() {
            store.grow(page_no + 1)?;
        }
        store.write_page(page_no, &image)?;
        replayed += 1;
    }

    // Page 0 may have been replayed with the original page_count already in
    // it, but the file itself could still be longer.
    store.truncate(orig_page_count.max(2))?;
    store.sync()?;

    drop(file);
    std::fs::remove_file(&path)
        .wrap_err_with(|| format!("failed to delete journal '{}' after recovery", path.display()))?;

    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn no_journal_is_not_hot() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        assert!(!is_hot(&db));
    }

    #[test]
    fn empty_journal_is_not_hot() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        File::create(journal_path(&db)).unwrap();
        assert!(!is_hot(&db));
    }

    #[test]
    fn journal_with_header_is_hot() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let journal = RollbackJournal::create(&db, 512, 2).unwrap();
        journal.sync().unwrap();
        assert!(is_hot(&db));
    }

    #[test]
    fn delete_removes_hotness() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let journal = RollbackJournal::create(&db, 512, 2).unwrap();
        journal.delete().unwrap();
        assert!(!is_hot(&db));
    }

    #[test]
    fn recover_restores_pre_images_and_truncates() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mut store = PageStore::create(&db, 512).unwrap();
        let page = store.extend().unwrap();
        let original = vec![0x11u8; 512];
        store.write_page(page, &original).unwrap();
        store.sync().unwrap();

        // Simulate an interrupted transaction: journal the pre-image, then
        // scribble on the page and grow the file.
        let mut journal = RollbackJournal::create(&db, 512, store.page_count()).unwrap();
        journal.append_page(page, &original).unwrap();
        journal.sync().unwrap();
        drop(journal);

        store.write_page(page, &vec![0xFF; 512]).unwrap();
        store.extend().unwrap();
        store.sync().unwrap();

        assert!(is_hot(&db));
        let replayed = recover(&mut store, &db).unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(store.page_count(), 3);
        assert_eq!(store.read_page(page).unwrap(), original);
        assert!(!is_hot(&db));
    }

    #[test]
    fn recover_stops_at_corrupt_record() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mut store = PageStore::create(&db, 512).unwrap();
        let p1 = store.extend().unwrap();
        let p2 = store.extend().unwrap();
        let image1 = vec![0x22u8; 512];
        let image2 = vec![0x33u8; 512];
        store.write_page(p1, &image1).unwrap();
        store.write_page(p2, &image2).unwrap();

        let mut journal = RollbackJournal::create(&db, 512, store.page_count()).unwrap();
        journal.append_page(p1, &image1).unwrap();
        journal.append_page(p2, &image2).unwrap();
        journal.sync().unwrap();
        drop(journal);

        // Flip a byte inside the second record's page image.
        let jpath = journal_path(&db);
        let mut bytes = std::fs::read(&jpath).unwrap();
        let second_image_off = JOURNAL_HEADER_SIZE + 2 * RECORD_PREFIX_SIZE + 512 + 100;
        bytes[second_image_off] ^= 0xFF;
        std::fs::write(&jpath, &bytes).unwrap();

        store.write_page(p1, &vec![0u8; 512]).unwrap();
        store.write_page(p2, &vec![0u8; 512]).unwrap();

        let replayed = recover(&mut store, &db).unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(store.read_page(p1).unwrap(), image1);
        // The second page stays as-is: its pre-image failed the checksum.
        assert_eq!(store.read_page(p2).unwrap(), vec![0u8; 512]);
    }
}
