//! # Page Types and Cell Layout
//!
//! Every page except page 0 begins with a 16-byte header describing what the
//! page holds and where its free space starts. Record and catalog pages
//! store variable-length cells appended back to back; free-list trunk pages
//! use their own fixed layout (see `pager`).
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     page_type    Catalog, Record, FreelistTrunk
//! 1       1     flags        Unused, reserved
//! 2       2     cell_count   Live (non-tombstoned) cells on this page
//! 4       4     free_start   Offset where the next cell is appended
//! 8       4     next_page    Next page in this chain (0 = end)
//! 12      4     reserved
//! ```
//!
//! ## Cell Layout
//!
//! ```text
//! +-------------------+-----------+----------------------+
//! | cap_and_flags:u32 | len: u32  | payload (cap bytes)  |
//! +-------------------+-----------+----------------------+
//! ```
//!
//! `cap` is the space reserved for the payload; `len <= cap` is the live
//! payload length. The high bit of `cap_and_flags` marks a tombstone. An
//! in-place overwrite is permitted whenever the new payload fits in `cap`,
//! which keeps iteration offsets stable while a scan is in progress on the
//! same connection.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::PAGE_HEADER_SIZE;

pub const CELL_HEADER_SIZE: usize = 8;
const TOMBSTONE_BIT: u32 = 0x8000_0000;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    Catalog = 0x01,
    Record = 0x02,
    FreelistTrunk = 0x30,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Catalog,
            0x02 => PageType::Record,
            0x30 => PageType::FreelistTrunk,
            _ => PageType::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    cell_count: U16,
    free_start: U32,
    next_page: U32,
    reserved: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            cell_count: U16::new(0),
            free_start: U32::new(PAGE_HEADER_SIZE as u32),
            next_page: U32::new(0),
            reserved: [0; 4],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn cell_count(&self) -> u16 {
        self.cell_count.get()
    }

    pub fn set_cell_count(&mut self, count: u16) {
        self.cell_count = U16::new(count);
    }

    pub fn free_start(&self) -> u32 {
        self.free_start.get()
    }

    pub fn set_free_start(&mut self, offset: u32) {
        self.free_start = U32::new(offset);
    }

    pub fn next_page(&self) -> u32 {
        self.next_page.get()
    }

    pub fn set_next_page(&mut self, page_no: u32) {
        self.next_page = U32::new(page_no);
    }
}

/// Initializes `data` as an empty page of the given type.
pub fn init_page(data: &mut [u8], page_type: PageType) {
    data.fill(0);
    let header = PageHeader::new(page_type);
    data[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());
}

pub fn validate_page(data: &[u8], page_size: usize) -> Result<()> {
    ensure!(
        data.len() == page_size,
        "invalid page size: {} != {}",
        data.len(),
        page_size
    );

    let header = PageHeader::from_bytes(data)?;

    // An all-zero page is a freshly allocated page that was never
    // initialized; that is valid.
    if header.page_type == 0 && header.free_start.get() == 0 {
        return Ok(());
    }

    ensure!(
        header.page_type() != PageType::Unknown,
        "invalid page type: {:02x}",
        header.page_type
    );
    ensure!(
        header.free_start() >= PAGE_HEADER_SIZE as u32,
        "free_start {} < PAGE_HEADER_SIZE {}",
        header.free_start(),
        PAGE_HEADER_SIZE
    );
    ensure!(
        header.free_start() <= page_size as u32,
        "free_start {} > page size {}",
        header.free_start(),
        page_size
    );

    Ok(())
}

/// Appends a cell to a record/catalog page. Returns the cell offset, or
/// `None` when the payload does not fit in the remaining free space.
pub fn append_cell(data: &mut [u8], payload: &[u8]) -> Result<Option<u32>> {
    ensure!(
        payload.len() < TOMBSTONE_BIT as usize,
        "cell payload too large: {} bytes",
        payload.len()
    );

    let free_start = PageHeader::from_bytes(data)?.free_start() as usize;
    let needed = CELL_HEADER_SIZE + payload.len();

    if free_start + needed > data.len() {
        return Ok(None);
    }

    data[free_start..free_start + 4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    data[free_start + 4..free_start + 8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    data[free_start + 8..free_start + 8 + payload.len()].copy_from_slice(payload);

    let header = PageHeader::from_bytes_mut(data)?;
    header.set_free_start((free_start + needed) as u32);
    header.set_cell_count(header.cell_count() + 1);

    Ok(Some(free_start as u32))
}

/// Reads the cell at `offset`. Returns `(payload, tombstoned)`.
pub fn cell_at(data: &[u8], offset: u32) -> Result<(&[u8], bool)> {
    let offset = offset as usize;
    ensure!(
        offset + CELL_HEADER_SIZE <= data.len(),
        "cell offset {} out of bounds",
        offset
    );

    let cap_and_flags = u32::from_le_bytes(data[offset..offset + 4].try_into()?);
    let tombstoned = cap_and_flags & TOMBSTONE_BIT != 0;
    let cap = (cap_and_flags & !TOMBSTONE_BIT) as usize;
    let len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into()?) as usize;

    ensure!(
        len <= cap && offset + CELL_HEADER_SIZE + cap <= data.len(),
        "cell at offset {} overruns page (cap={}, len={})",
        offset,
        cap,
        len
    );

    Ok((
        &data[offset + CELL_HEADER_SIZE..offset + CELL_HEADER_SIZE + len],
        tombstoned,
    ))
}

/// Returns the offset of the cell following the one at `offset`, or `None`
/// when `offset` was the last cell on the page.
pub fn next_cell_offset(data: &[u8], offset: u32) -> Result<Option<u32>> {
    let free_start = PageHeader::from_bytes(data)?.free_start();
    let offset = offset as usize;
    ensure!(
        offset + CELL_HEADER_SIZE <= data.len(),
        "cell offset {} out of bounds",
        offset
    );

    let cap = (u32::from_le_bytes(data[offset..offset + 4].try_into()?) & !TOMBSTONE_BIT) as usize;
    let next = (offset + CELL_HEADER_SIZE + cap) as u32;

    if next >= free_start {
        Ok(None)
    } else {
        Ok(Some(next))
    }
}

/// Offset of the first cell on a page, or `None` for an empty page.
pub fn first_cell_offset(data: &[u8]) -> Result<Option<u32>> {
    let header = PageHeader::from_bytes(data)?;
    if header.free_start() as usize > PAGE_HEADER_SIZE {
        Ok(Some(PAGE_HEADER_SIZE as u32))
    } else {
        Ok(None)
    }
}

/// Marks the cell at `offset` as deleted, keeping its space reserved so
/// iteration offsets stay stable.
pub fn tombstone_cell(data: &mut [u8], offset: u32) -> Result<()> {
    let off = offset as usize;
    ensure!(
        off + CELL_HEADER_SIZE <= data.len(),
        "cell offset {} out of bounds",
        offset
    );

    let cap_and_flags = u32::from_le_bytes(data[off..off + 4].try_into()?);
    if cap_and_flags & TOMBSTONE_BIT == 0 {
        data[off..off + 4].copy_from_slice(&(cap_and_flags | TOMBSTONE_BIT).to_le_bytes());
        let header = PageHeader::from_bytes_mut(data)?;
        header.set_cell_count(header.cell_count().saturating_sub(1));
    }
    Ok(())
}

/// Overwrites the cell payload in place, reviving the cell if it was
/// tombstoned. Returns false when the new payload exceeds the cell's
/// reserved capacity.
pub fn overwrite_cell(data: &mut [u8], offset: u32, payload: &[u8]) -> Result<bool> {
    let off = offset as usize;
    ensure!(
        off + CELL_HEADER_SIZE <= data.len(),
        "cell offset {} out of bounds",
        offset
    );

    let cap_and_flags = u32::from_le_bytes(data[off..off + 4].try_into()?);
    let cap = (cap_and_flags & !TOMBSTONE_BIT) as usize;

    if payload.len() > cap {
        return Ok(false);
    }

    if cap_and_flags & TOMBSTONE_BIT != 0 {
        data[off..off + 4].copy_from_slice(&(cap_and_flags & !TOMBSTONE_BIT).to_le_bytes());
        let header = PageHeader::from_bytes_mut(data)?;
        header.set_cell_count(header.cell_count() + 1);
    }

    data[off + 4..off + 8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    data[off + CELL_HEADER_SIZE..off + CELL_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 512;

    fn empty_page(page_type: PageType) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        init_page(&mut data, page_type);
        data
    }

    #[test]
    fn page_header_size_is_16_bytes() {
        assert_eq!(std::mem::size_of::<PageHeader>(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn init_page_sets_type_and_free_start() {
        let data = empty_page(PageType::Record);
        let header = PageHeader::from_bytes(&data).unwrap();

        assert_eq!(header.page_type(), PageType::Record);
        assert_eq!(header.cell_count(), 0);
        assert_eq!(header.free_start(), PAGE_HEADER_SIZE as u32);
        assert_eq!(header.next_page(), 0);
    }

    #[test]
    fn append_and_read_cells() {
        let mut data = empty_page(PageType::Record);

        let off_a = append_cell(&mut data, b"alpha").unwrap().unwrap();
        let off_b = append_cell(&mut data, b"beta").unwrap().unwrap();

        let (payload, dead) = cell_at(&data, off_a).unwrap();
        assert_eq!(payload, b"alpha");
        assert!(!dead);

        let (payload, _) = cell_at(&data, off_b).unwrap();
        assert_eq!(payload, b"beta");

        assert_eq!(PageHeader::from_bytes(&data).unwrap().cell_count(), 2);
    }

    #[test]
    fn cell_iteration_walks_in_order() {
        let mut data = empty_page(PageType::Record);
        append_cell(&mut data, b"one").unwrap().unwrap();
        append_cell(&mut data, b"two").unwrap().unwrap();
        append_cell(&mut data, b"three").unwrap().unwrap();

        let mut seen = Vec::new();
        let mut offset = first_cell_offset(&data).unwrap();
        while let Some(off) = offset {
            let (payload, _) = cell_at(&data, off).unwrap();
            seen.push(payload.to_vec());
            offset = next_cell_offset(&data, off).unwrap();
        }

        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn append_returns_none_when_full() {
        let mut data = empty_page(PageType::Record);
        let big = vec![0xAB; PAGE_SIZE];
        assert!(append_cell(&mut data, &big).unwrap().is_none());
    }

    #[test]
    fn tombstone_hides_cell_and_decrements_count() {
        let mut data = empty_page(PageType::Record);
        let off = append_cell(&mut data, b"gone").unwrap().unwrap();

        tombstone_cell(&mut data, off).unwrap();

        let (_, dead) = cell_at(&data, off).unwrap();
        assert!(dead);
        assert_eq!(PageHeader::from_bytes(&data).unwrap().cell_count(), 0);

        // Idempotent
        tombstone_cell(&mut data, off).unwrap();
        assert_eq!(PageHeader::from_bytes(&data).unwrap().cell_count(), 0);
    }

    #[test]
    fn overwrite_in_place_when_it_fits() {
        let mut data = empty_page(PageType::Record);
        let off = append_cell(&mut data, b"longer payload").unwrap().unwrap();

        assert!(overwrite_cell(&mut data, off, b"short").unwrap());
        let (payload, _) = cell_at(&data, off).unwrap();
        assert_eq!(payload, b"short");

        // Iteration offset is unchanged: next cell lands after the original cap.
        let off_b = append_cell(&mut data, b"next").unwrap().unwrap();
        assert_eq!(next_cell_offset(&data, off).unwrap(), Some(off_b));
    }

    #[test]
    fn overwrite_revives_tombstoned_cell() {
        let mut data = empty_page(PageType::Record);
        let off = append_cell(&mut data, b"original").unwrap().unwrap();
        tombstone_cell(&mut data, off).unwrap();
        assert_eq!(PageHeader::from_bytes(&data).unwrap().cell_count(), 0);

        assert!(overwrite_cell(&mut data, off, b"revived").unwrap());
        let (payload, dead) = cell_at(&data, off).unwrap();
        assert_eq!(payload, b"revived");
        assert!(!dead);
        assert_eq!(PageHeader::from_bytes(&data).unwrap().cell_count(), 1);
    }

    #[test]
    fn overwrite_rejects_oversized_payload() {
        let mut data = empty_page(PageType::Record);
        let off = append_cell(&mut data, b"tiny").unwrap().unwrap();

        assert!(!overwrite_cell(&mut data, off, b"much larger payload").unwrap());
    }

    #[test]
    fn validate_accepts_zeroed_and_initialized_pages() {
        let zeroed = vec![0u8; PAGE_SIZE];
        assert!(validate_page(&zeroed, PAGE_SIZE).is_ok());

        let data = empty_page(PageType::Catalog);
        assert!(validate_page(&data, PAGE_SIZE).is_ok());
    }

    #[test]
    fn validate_rejects_bad_free_start() {
        let mut data = empty_page(PageType::Record);
        PageHeader::from_bytes_mut(&mut data)
            .unwrap()
            .set_free_start(PAGE_SIZE as u32 + 1);

        assert!(validate_page(&data, PAGE_SIZE).is_err());
    }
}
