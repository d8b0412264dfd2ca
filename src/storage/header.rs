//! # File Header
//!
//! Page 0 of every database file begins with a 64-byte header identifying the
//! file and recording global state: page geometry, schema and user versions,
//! the free-list head, and the journal-mode flag.
//!
//! ## Layout (64 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field            Description
//! ------  ----  ---------------  ---------------------------------------
//! 0       16    magic            "SoleDB format 1\0"
//! 16      4     version          File format version (currently 1)
//! 20      4     page_size        Power of two, 512..=65536; immutable
//! 24      4     page_count       Pages in the database (incl. page 0)
//! 28      4     schema_version   Bumped by every DDL statement
//! 32      4     user_version     Free for the application (PRAGMA)
//! 36      4     application_id   Free for the application (PRAGMA)
//! 40      4     freelist_head    First free-list trunk page (0 = empty)
//! 44      4     freelist_count   Total pages on the free list
//! 48      4     change_counter   Bumped by every committed write txn
//! 52      4     wal_mode         1 when the file is operated in WAL mode
//! 56      8     reserved
//! ```
//!
//! The layout is zerocopy-transmutable and must remain byte-compatible
//! across engine versions: unknown reserved bytes are preserved on write.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::SoleError;

use super::{is_valid_page_size, FILE_HEADER_SIZE};

pub const FILE_MAGIC: &[u8; 16] = b"SoleDB format 1\x00";
pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    page_count: U32,
    schema_version: U32,
    user_version: U32,
    application_id: U32,
    freelist_head: U32,
    freelist_count: U32,
    change_counter: U32,
    wal_mode: U32,
    reserved: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(page_size: u32, page_count: u32) -> Self {
        Self {
            magic: *FILE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(page_size),
            page_count: U32::new(page_count),
            schema_version: U32::new(1),
            user_version: U32::new(0),
            application_id: U32::new(0),
            freelist_head: U32::new(0),
            freelist_count: U32::new(0),
            change_counter: U32::new(0),
            wal_mode: U32::new(0),
            reserved: [0u8; 8],
        }
    }

    /// Parses and validates the header at the start of page 0. Validation
    /// failures are corruption: there is no safe continuation against a file
    /// whose header does not check out.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;

        if &header.magic != FILE_MAGIC {
            return Err(SoleError::corruption("invalid magic in file header").into());
        }
        if header.version.get() != CURRENT_VERSION {
            return Err(SoleError::corruption(format!(
                "unsupported file format version {} (expected {})",
                header.version.get(),
                CURRENT_VERSION
            ))
            .into());
        }
        if !is_valid_page_size(header.page_size.get() as usize) {
            return Err(SoleError::corruption(format!(
                "invalid page size {} in file header",
                header.page_size.get()
            ))
            .into());
        }

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))
    }

    pub fn write_to(&self, bytes: &mut [u8]) -> Result<()> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );
        bytes[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, count: u32) {
        self.page_count = U32::new(count);
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version.get()
    }

    pub fn set_schema_version(&mut self, v: u32) {
        self.schema_version = U32::new(v);
    }

    pub fn user_version(&self) -> u32 {
        self.user_version.get()
    }

    pub fn set_user_version(&mut self, v: u32) {
        self.user_version = U32::new(v);
    }

    pub fn application_id(&self) -> u32 {
        self.application_id.get()
    }

    pub fn set_application_id(&mut self, v: u32) {
        self.application_id = U32::new(v);
    }

    pub fn freelist_head(&self) -> u32 {
        self.freelist_head.get()
    }

    pub fn set_freelist_head(&mut self, page_no: u32) {
        self.freelist_head = U32::new(page_no);
    }

    pub fn freelist_count(&self) -> u32 {
        self.freelist_count.get()
    }

    pub fn set_freelist_count(&mut self, count: u32) {
        self.freelist_count = U32::new(count);
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter.get()
    }

    pub fn bump_change_counter(&mut self) {
        self.change_counter = U32::new(self.change_counter.get().wrapping_add(1));
    }

    pub fn wal_mode(&self) -> bool {
        self.wal_mode.get() != 0
    }

    pub fn set_wal_mode(&mut self, enabled: bool) {
        self.wal_mode = U32::new(u32::from(enabled));
    }
}
