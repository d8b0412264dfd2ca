//! # Write-Ahead Log
//!
//! In WAL mode, committed pages are appended to a sidecar `*-wal` file
//! instead of being written into the main database. Readers consult the
//! in-process [`WalIndex`](super::WalIndex) to find the newest frame for a
//! page at or below their snapshot; a checkpoint later copies frames back
//! into the main file.
//!
//! ## File Layout
//!
//! ```text
//! +------------------------------+
//! | WalHeader (32 bytes)         |
//! +------------------------------+
//! | WalFrameHeader (24 bytes)    |  frame 1
//! | page image (page_size)       |
//! +------------------------------+
//! | ...                          |  frame 2, 3, ...
//! +------------------------------+
//! ```
//!
//! A frame whose `db_size` field is nonzero is a commit frame: it marks the
//! end of a transaction and records the database page count as of that
//! commit. Frames after the last commit frame belong to an unfinished
//! transaction and are ignored on recovery.
//!
//! Every frame checksums its header fields plus page image with CRC-64 and
//! embeds the header salts; a frame with a stale salt or bad checksum ends
//! the valid prefix. Salts are renewed on every reset, so frames left over
//! from before a checkpoint-reset can never be mistaken for live ones.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const WAL_MAGIC: &[u8; 8] = b"SoleWal1";
pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct WalHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    salt1: U32,
    salt2: U32,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<WalHeader>() == WAL_HEADER_SIZE);

impl WalHeader {
    fn new(page_size: u32, salt1: u32, salt2: u32) -> Self {
        let mut header = Self {
            magic: *WAL_MAGIC,
            version: U32::new(1),
            page_size: U32::new(page_size),
            salt1: U32::new(salt1),
            salt2: U32::new(salt2),
            checksum: U64::new(0),
        };
        header.checksum = U64::new(header.compute_checksum());
        header
    }

    fn compute_checksum(&self) -> u64 {
        CRC64.checksum(&self.as_bytes()[..WAL_HEADER_SIZE - 8])
    }

    fn is_valid(&self) -> bool {
        &self.magic == WAL_MAGIC
            && self.version.get() == 1
            && self.checksum.get() == self.compute_checksum()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WalFrameHeader {
    page_no: U32,
    /// Database page count after this commit; 0 for non-commit frames.
    db_size: U32,
    salt1: U32,
    salt2: U32,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<WalFrameHeader>() == WAL_FRAME_HEADER_SIZE);

impl WalFrameHeader {
    pub fn page_no(&self) -> u32 {
        self.page_no.get()
    }

    pub fn db_size(&self) -> u32 {
        self.db_size.get()
    }

    pub fn is_commit(&self) -> bool {
        self.db_size.get() != 0
    }

    fn compute_checksum(&self, data: &[u8]) -> u64 {
        let mut digest = CRC64.digest();
        digest.update(&self.as_bytes()[..WAL_FRAME_HEADER_SIZE - 8]);
        digest.update(data);
        digest.finalize()
    }
}

fn new_salts() -> (u32, u32) {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    ((nanos as u32) | 1, (nanos >> 32) as u32 ^ 0x9E37_79B9)
}

/// Sidecar WAL path for a database file.
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

/// The on-disk write-ahead log. Append and read of frames; the mapping from
/// page number to frame lives in [`WalIndex`](super::WalIndex).
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    page_size: usize,
    salt1: u32,
    salt2: u32,
    /// Number of valid frames currently in the file.
    frame_count: u64,
}

/// A frame recovered by [`Wal::open`]'s scan of the file.
#[derive(Debug, Clone, Copy)]
pub struct RecoveredFrame {
    pub frame_no: u64,
    pub page_no: u32,
    pub db_size: u32,
}

impl Wal {
    /// Creates an empty WAL with fresh salts, truncating any existing file.
    pub fn create(db_path: &Path, page_size: usize) -> Result<Self> {
        let path = wal_path(db_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create WAL '{}'", path.display()))?;

        let (salt1, salt2) = new_salts();
        let header = WalHeader::new(page_size as u32, salt1, salt2);
        file.write_all(header.as_bytes())
            .wrap_err("failed to write WAL header")?;
        file.sync_all().wrap_err("failed to sync new WAL")?;

        Ok(Self {
            file,
            path,
            page_size,
            salt1,
            salt2,
            frame_count: 0,
        })
    }

    /// Opens an existing WAL and scans it for the valid frame prefix,
    /// reporting every frame up to and including the last commit frame.
    /// Frames past the last commit frame (a torn transaction) are discarded.
    pub fn open(db_path: &Path, page_size: usize) -> Result<(Self, Vec<RecoveredFrame>)> {
        let path = wal_path(db_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open WAL '{}'", path.display()))?;

        let mut header_buf = [0u8; WAL_HEADER_SIZE];
        file.read_exact(&mut header_buf)
            .wrap_err("failed to read WAL header")?;
        let header = WalHeader::read_from_bytes(&header_buf)
            .map_err(|e| eyre::eyre!("failed to parse WAL header: {:?}", e))?;
        ensure!(header.is_valid(), "WAL header failed validation");
        ensure!(
            header.page_size.get() as usize == page_size,
            "WAL page size {} does not match database page size {}",
            header.page_size.get(),
            page_size
        );

        let salt1 = header.salt1.get();
        let salt2 = header.salt2.get();

        let mut frames = Vec::new();
        let mut last_commit = 0usize;
        let mut frame_buf = [0u8; WAL_FRAME_HEADER_SIZE];
        let mut image = vec![0u8; page_size];
        let mut frame_no = 0u64;

        loop {
            if file.read_exact(&mut frame_buf).is_err() {
                break;
            }
            if file.read_exact(&mut image).is_err() {
                break;
            }
            let Ok(frame) = WalFrameHeader::read_from_bytes(&frame_buf) else {
                break;
            };
            if frame.salt1.get() != salt1 || frame.salt2.get() != salt2 {
                break;
            }
            if frame.checksum.get() != frame.compute_checksum(&image) {
                break;
            }

            frame_no += 1;
            frames.push(RecoveredFrame {
                frame_no,
                page_no: frame.page_no(),
                db_size: frame.db_size(),
            });
            if frame.is_commit() {
                last_commit = frames.len();
            }
        }

        frames.truncate(last_commit);
        let frame_count = frames.len() as u64;

        let wal = Self {
            file,
            path,
            page_size,
            salt1,
            salt2,
            frame_count,
        };
        Ok((wal, frames))
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn frame_offset(&self, frame_no: u64) -> u64 {
        WAL_HEADER_SIZE as u64
            + (frame_no - 1) * (WAL_FRAME_HEADER_SIZE + self.page_size) as u64
    }

    /// Appends one frame and returns its frame number (1-based). `db_size`
    /// is nonzero only on the final frame of a commit.
    pub fn append_frame(&mut self, page_no: u32, db_size: u32, data: &[u8]) -> Result<u64> {
        ensure!(
            data.len() == self.page_size,
            "WAL frame of {} bytes does not match page size {}",
            data.len(),
            self.page_size
        );

        let mut frame = WalFrameHeader {
            page_no: U32::new(page_no),
            db_size: U32::new(db_size),
            salt1: U32::new(self.salt1),
            salt2: U32::new(self.salt2),
            checksum: U64::new(0),
        };
        frame.checksum = U64::new(frame.compute_checksum(data));

        let frame_no = self.frame_count + 1;
        self.file
            .seek(SeekFrom::Start(self.frame_offset(frame_no)))
            .wrap_err("failed to seek WAL")?;
        self.file
            .write_all(frame.as_bytes())
            .wrap_err("failed to write WAL frame header")?;
        self.file
            .write_all(data)
            .wrap_err("failed to write WAL frame data")?;

        self.frame_count = frame_no;
        Ok(frame_no)
    }

    /// Discards frames past `frame_count`, undoing an append batch whose
    /// commit never became durable. Without this, a reopen's prefix scan
    /// would replay the failed commit as if it had succeeded.
    pub fn rewind(&mut self, frame_count: u64) -> Result<()> {
        if frame_count >= self.frame_count {
            return Ok(());
        }
        self.file
            .set_len(self.frame_offset(frame_count + 1))
            .wrap_err("failed to truncate WAL after failed commit")?;
        self.frame_count = frame_count;
        Ok(())
    }

    /// Reads the page image stored in a frame.
    pub fn read_frame(&mut self, frame_no: u64) -> Result<(u32, Vec<u8>)> {
        ensure!(
            frame_no >= 1 && frame_no <= self.frame_count,
            "WAL frame {} out of range (1..={})",
            frame_no,
            self.frame_count
        );

        self.file
            .seek(SeekFrom::Start(self.frame_offset(frame_no)))
            .wrap_err("failed to seek WAL")?;

        let mut frame_buf = [0u8; WAL_FRAME_HEADER_SIZE];
        self.file
            .read_exact(&mut frame_buf)
            .wrap_err("failed to read WAL frame header")?;
        let frame = WalFrameHeader::read_from_bytes(&frame_buf)
            .map_err(|e| eyre::eyre!("failed to parse WAL frame header: {:?}", e))?;

        let mut image = vec![0u8; self.page_size];
        self.file
            .read_exact(&mut image)
            .wrap_err("failed to read WAL frame data")?;

        ensure!(
            frame.checksum.get() == frame.compute_checksum(&image),
            "WAL frame {} failed checksum",
            frame_no
        );

        Ok((frame.page_no(), image))
    }

    /// Syncs appended frames to durable storage. A WAL-mode commit is
    /// durable once this returns for its commit frame.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync WAL")
    }

    /// Resets the log to empty with fresh salts. Only legal once every
    /// frame has been checkpointed into the main file.
    pub fn reset(&mut self) -> Result<()> {
        let (salt1, salt2) = new_salts();
        let header = WalHeader::new(self.page_size as u32, salt1, salt2);

        self.file
            .set_len(WAL_HEADER_SIZE as u64)
            .wrap_err("failed to truncate WAL")?;
        self.file
            .seek(SeekFrom::Start(0))
            .wrap_err("failed to seek WAL")?;
        self.file
            .write_all(header.as_bytes())
            .wrap_err("failed to rewrite WAL header")?;
        self.file.sync_all().wrap_err("failed to sync reset WAL")?;

        self.salt1 = salt1;
        self.salt2 = salt2;
        self.frame_count = 0;
        Ok(())
    }

    /// Deletes the WAL file. Used when switching back to rollback mode
    /// after a full checkpoint.
    pub fn delete(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)
            .wrap_err_with(|| format!("failed to delete WAL '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page(fill: u8, size: usize) -> Vec<u8> {
        vec![fill; size]
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mut wal = Wal::create(&db, 512).unwrap();
        let f1 = wal.append_frame(5, 0, &page(0xAA, 512)).unwrap();
        let f2 = wal.append_frame(7, 8, &page(0xBB, 512)).unwrap();
        assert_eq!((f1, f2), (1, 2));

        let (p, data) = wal.read_frame(1).unwrap();
        assert_eq!(p, 5);
        assert_eq!(data, page(0xAA, 512));
        let (p, data) = wal.read_frame(2).unwrap();
        assert_eq!(p, 7);
        assert_eq!(data, page(0xBB, 512));
    }

    #[test]
    fn reopen_recovers_committed_frames_only() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        {
            let mut wal = Wal::create(&db, 512).unwrap();
            wal.append_frame(2, 0, &page(1, 512)).unwrap();
            wal.append_frame(3, 4, &page(2, 512)).unwrap(); // commit
            wal.append_frame(4, 0, &page(3, 512)).unwrap(); // torn txn
            wal.sync().unwrap();
        }

        let (wal, frames) = Wal::open(&db, 512).unwrap();
        assert_eq!(wal.frame_count(), 2);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].page_no, 3);
        assert_eq!(frames[1].db_size, 4);
    }

    #[test]
    fn corrupt_frame_ends_valid_prefix() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        {
            let mut wal = Wal::create(&db, 512).unwrap();
            wal.append_frame(2, 3, &page(1, 512)).unwrap();
            wal.append_frame(2, 3, &page(2, 512)).unwrap();
            wal.sync().unwrap();
        }

        let path = wal_path(&db);
        let mut bytes = std::fs::read(&path).unwrap();
        let second_frame_data = WAL_HEADER_SIZE + (WAL_FRAME_HEADER_SIZE + 512) + WAL_FRAME_HEADER_SIZE + 17;
        bytes[second_frame_data] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (wal, frames) = Wal::open(&db, 512).unwrap();
        assert_eq!(wal.frame_count(), 1);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn reset_clears_frames_and_invalidates_old_tail() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mut wal = Wal::create(&db, 512).unwrap();
        wal.append_frame(2, 3, &page(9, 512)).unwrap();
        wal.sync().unwrap();

        wal.reset().unwrap();
        assert_eq!(wal.frame_count(), 0);

        // New frames after reset carry the new salts and read back fine.
        wal.append_frame(2, 3, &page(7, 512)).unwrap();
        let (p, data) = wal.read_frame(1).unwrap();
        assert_eq!(p, 2);
        assert_eq!(data, page(7, 512));
    }

    #[test]
    fn rewind_discards_uncommitted_append_batch() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        let mut wal = Wal::create(&db, 512).unwrap();
        wal.append_frame(2, 3, &page(1, 512)).unwrap();
        wal.sync().unwrap();

        let mark = wal.frame_count();
        wal.append_frame(4, 0, &page(2, 512)).unwrap();
        wal.append_frame(5, 5, &page(3, 512)).unwrap();
        wal.rewind(mark).unwrap();
        assert_eq!(wal.frame_count(), 1);
        drop(wal);

        // A reopen sees only the durable commit.
        let (wal, frames) = Wal::open(&db, 512).unwrap();
        assert_eq!(wal.frame_count(), 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].page_no, 2);
    }

    #[test]
    fn page_size_mismatch_is_rejected_on_open() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");

        Wal::create(&db, 512).unwrap();
        assert!(Wal::open(&db, 4096).is_err());
    }
}
