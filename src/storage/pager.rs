//! # Page Store
//!
//! `PageStore` is the fixed-size page abstraction over a single database
//! file: read and write pages by number, grow, truncate, and sync. The
//! backing is either a memory-mapped file or, for `:memory:` databases, a
//! plain in-process buffer. Exactly one `PageStore` exists per file per
//! process; connections share it behind a `RwLock` and never hold their own
//! mapping of the same file.
//!
//! ## The `PageIo` Seam
//!
//! Page allocation and the free list are written against the small `PageIo`
//! trait rather than `PageStore` directly. A write transaction implements
//! `PageIo` over its private dirty-page cache, so allocating or freeing a
//! page inside a transaction mutates buffered page images only; nothing
//! touches the file until commit. `PageStore` implements the same trait for
//! the non-transactional paths (recovery, checkpoint, tests).
//!
//! ## Free List
//!
//! Freed pages are kept on a chain of trunk pages:
//!
//! ```text
//! header.freelist_head ──► trunk ──► trunk ──► 0
//!
//! trunk page:
//! +-------------+-------------+---------------------+
//! | PageHeader  | count: u32  | entries: u32 ...    |
//! +-------------+-------------+---------------------+
//! ```
//!
//! `allocate_page` pops an entry (or consumes an empty trunk itself) before
//! growing the file; `free_page` pushes onto the head trunk, starting a new
//! trunk when the head is full.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::error::SoleError;

use super::header::FileHeader;
use super::page::{init_page, PageHeader, PageType};
use super::{is_valid_page_size, CATALOG_ROOT_PAGE, FILE_HEADER_SIZE, PAGE_HEADER_SIZE};

/// Minimal page-level access used by the free-list and catalog code. Both
/// `PageStore` (direct) and a transaction's buffered view implement this.
pub trait PageIo {
    fn page_size(&self) -> usize;
    fn page_count(&self) -> u32;
    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>>;
    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()>;
    /// Appends one zeroed page and returns its number.
    fn extend(&mut self) -> Result<u32>;
}

#[derive(Debug)]
enum Backing {
    Mapped {
        file: File,
        mmap: MmapMut,
        path: PathBuf,
    },
    Memory(Vec<u8>),
}

#[derive(Debug)]
pub struct PageStore {
    backing: Backing,
    page_size: usize,
    page_count: u32,
}

impl PageStore {
    /// Creates a new database file with a header page and an empty catalog
    /// root page.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            is_valid_page_size(page_size),
            "invalid page size {}: must be a power of two in 512..=65536",
            page_size
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        file.set_len(2 * page_size as u64)
            .wrap_err("failed to size new database file")?;

        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // files lead to undefined behavior. This is safe because:
        // 1. We just created this file with truncate=true
        // 2. The registry guarantees one PageStore per file per process
        // 3. The mmap lifetime is tied to PageStore, preventing use-after-unmap
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let mut store = Self {
            backing: Backing::Mapped {
                file,
                mmap,
                path: path.to_path_buf(),
            },
            page_size,
            page_count: 2,
        };

        store.init_fresh()?;
        store.sync()?;
        Ok(store)
    }

    /// Creates a memory-only database (`:memory:`). WAL mode is unavailable
    /// on this backing.
    pub fn create_memory(page_size: usize) -> Result<Self> {
        ensure!(
            is_valid_page_size(page_size),
            "invalid page size {}: must be a power of two in 512..=65536",
            page_size
        );

        let mut store = Self {
            backing: Backing::Memory(vec![0u8; 2 * page_size]),
            page_size,
            page_count: 2,
        };
        store.init_fresh()?;
        Ok(store)
    }

    fn init_fresh(&mut self) -> Result<()> {
        let page_size = self.page_size;
        let header = FileHeader::new(page_size as u32, 2);
        header.write_to(self.page_bytes_mut(0)?)?;
        init_page(self.page_bytes_mut(CATALOG_ROOT_PAGE)?, PageType::Catalog);
        Ok(())
    }

    /// Opens an existing database file, validating the page-0 header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size as usize >= 2 * super::MIN_PAGE_SIZE,
            "database file '{}' is too small ({} bytes)",
            path.display(),
            file_size
        );

        // SAFETY: see `create` — single mapping per file enforced by the
        // registry, lifetime tied to PageStore.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let header = FileHeader::from_bytes(&mmap[..FILE_HEADER_SIZE])
            .wrap_err_with(|| format!("invalid header in '{}'", path.display()))?;
        let page_size = header.page_size() as usize;
        let page_count = header.page_count();

        if (page_count as u64) * (page_size as u64) > file_size {
            return Err(SoleError::corruption(format!(
                "header claims {} pages of {} bytes but file is only {} bytes",
                page_count, page_size, file_size
            ))
            .into());
        }

        Ok(Self {
            backing: Backing::Mapped {
                file,
                mmap,
                path: path.to_path_buf(),
            },
            page_size,
            page_count,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Mapped { path, .. } => Some(path),
            Backing::Memory(_) => None,
        }
    }

    fn buf(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { mmap, .. } => mmap,
            Backing::Memory(buf) => buf,
        }
    }

    fn buf_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Mapped { mmap, .. } => mmap,
            Backing::Memory(buf) => buf,
        }
    }

    pub fn page_bytes(&self, page_no: u32) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );
        let offset = page_no as usize * self.page_size;
        let page_size = self.page_size;
        Ok(&self.buf()[offset..offset + page_size])
    }

    pub fn page_bytes_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );
        let offset = page_no as usize * self.page_size;
        let page_size = self.page_size;
        Ok(&mut self.buf_mut()[offset..offset + page_size])
    }

    /// Copy of the page-0 header.
    pub fn header(&self) -> Result<FileHeader> {
        Ok(*FileHeader::from_bytes(self.page_bytes(0)?)?)
    }

    /// Grows the file to `new_page_count` pages, remapping as needed, and
    /// records the new count in the page-0 header.
    pub fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        let new_size = new_page_count as u64 * self.page_size as u64;

        match &mut self.backing {
            Backing::Mapped { file, mmap, .. } => {
                mmap.flush().wrap_err("failed to flush mmap before grow")?;
                file.set_len(new_size)
                    .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

                // SAFETY: grow() takes &mut self, so no page references can
                // exist when the old mapping is replaced (borrow checker).
                // The file was extended before remapping and the old mmap is
                // dropped on assignment.
                *mmap = unsafe {
                    MmapMut::map_mut(&*file).wrap_err("failed to remap file after grow")?
                };
            }
            Backing::Memory(buf) => buf.resize(new_size as usize, 0),
        }

        self.page_count = new_page_count;
        FileHeader::from_bytes_mut(self.page_bytes_mut(0)?)?.set_page_count(new_page_count);
        Ok(())
    }

    /// Shrinks the file to `new_page_count` pages. The header and catalog
    /// root pages can never be truncated away.
    pub fn truncate(&mut self, new_page_count: u32) -> Result<()> {
        ensure!(
            new_page_count >= 2,
            "cannot truncate below 2 pages (header + catalog root)"
        );
        if new_page_count >= self.page_count {
            return Ok(());
        }

        let new_size = new_page_count as u64 * self.page_size as u64;

        match &mut self.backing {
            Backing::Mapped { file, mmap, .. } => {
                mmap.flush()
                    .wrap_err("failed to flush mmap before truncate")?;
                file.set_len(new_size)
                    .wrap_err_with(|| format!("failed to truncate file to {} bytes", new_size))?;

                // SAFETY: same reasoning as grow() — &mut self guarantees no
                // outstanding page references across the remap.
                *mmap = unsafe {
                    MmapMut::map_mut(&*file).wrap_err("failed to remap file after truncate")?
                };
            }
            Backing::Memory(buf) => buf.truncate(new_size as usize),
        }

        self.page_count = new_page_count;
        FileHeader::from_bytes_mut(self.page_bytes_mut(0)?)?.set_page_count(new_page_count);
        Ok(())
    }

    /// Flushes all dirty pages to durable storage.
    pub fn sync(&self) -> Result<()> {
        match &self.backing {
            Backing::Mapped { mmap, .. } => mmap
                .flush()
                .map_err(|e| {
                    SoleError::Io {
                        operation: "sync database file",
                        source: e,
                    }
                    .into()
                }),
            Backing::Memory(_) => Ok(()),
        }
    }
}

impl PageIo for PageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>> {
        Ok(self.page_bytes(page_no)?.to_vec())
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "page write of {} bytes does not match page size {}",
            data.len(),
            self.page_size
        );
        self.page_bytes_mut(page_no)?.copy_from_slice(data);
        Ok(())
    }

    fn extend(&mut self) -> Result<u32> {
        let new_page = self.page_count;
        self.grow(new_page + 1)?;
        Ok(new_page)
    }
}

fn trunk_capacity(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE - 4) / 4
}

fn trunk_count(data: &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(
        data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].try_into()?,
    ))
}

fn trunk_set_count(data: &mut [u8], count: u32) {
    data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].copy_from_slice(&count.to_le_bytes());
}

fn trunk_entry(data: &[u8], idx: usize) -> Result<u32> {
    let off = PAGE_HEADER_SIZE + 4 + idx * 4;
    Ok(u32::from_le_bytes(data[off..off + 4].try_into()?))
}

fn trunk_set_entry(data: &mut [u8], idx: usize, page_no: u32) {
    let off = PAGE_HEADER_SIZE + 4 + idx * 4;
    data[off..off + 4].copy_from_slice(&page_no.to_le_bytes());
}

/// Allocates a page: pops from the free list if possible, otherwise grows
/// the file. The returned page's contents are unspecified; callers
/// initialize it.
pub fn allocate_page<P: PageIo>(io: &mut P) -> Result<u32> {
    let mut page0 = io.read_page(0)?;
    let head = FileHeader::from_bytes(&page0)?.freelist_head();

    if head == 0 {
        return io.extend();
    }

    let mut trunk = io.read_page(head)?;
    ensure!(
        PageHeader::from_bytes(&trunk)?.page_type() == PageType::FreelistTrunk,
        "freelist head page {} is not a trunk page",
        head
    );
    let count = trunk_count(&trunk)?;

    let header = FileHeader::from_bytes_mut(&mut page0)?;
    let allocated = if count > 0 {
        let page_no = trunk_entry(&trunk, count as usize - 1)?;
        trunk_set_count(&mut trunk, count - 1);
        io.write_page(head, &trunk)?;
        page_no
    } else {
        // Empty trunk: hand out the trunk page itself.
        let next = PageHeader::from_bytes(&trunk)?.next_page();
        header.set_freelist_head(next);
        head
    };

    header.set_freelist_count(header.freelist_count().saturating_sub(1));
    io.write_page(0, &page0)?;
    Ok(allocated)
}

/// Returns a page to the free list.
pub fn free_page<P: PageIo>(io: &mut P, page_no: u32) -> Result<()> {
    if page_no <= CATALOG_ROOT_PAGE {
        bail!("cannot free reserved page {}", page_no);
    }
    ensure!(
        page_no < io.page_count(),
        "cannot free page {} beyond end of file ({})",
        page_no,
        io.page_count()
    );

    let mut page0 = io.read_page(0)?;
    let head = FileHeader::from_bytes(&page0)?.freelist_head();

    let becomes_trunk = if head == 0 {
        true
    } else {
        let mut trunk = io.read_page(head)?;
        let count = trunk_count(&trunk)? as usize;
        if count < trunk_capacity(io.page_size()) {
            trunk_set_entry(&mut trunk, count, page_no);
            trunk_set_count(&mut trunk, count as u32 + 1);
            io.write_page(head, &trunk)?;
            false
        } else {
            true
        }
    };

    if becomes_trunk {
        let mut trunk = vec![0u8; io.page_size()];
        init_page(&mut trunk, PageType::FreelistTrunk);
        PageHeader::from_bytes_mut(&mut trunk)?.set_next_page(head);
        trunk_set_count(&mut trunk, 0);
        io.write_page(page_no, &trunk)?;
        FileHeader::from_bytes_mut(&mut page0)?.set_freelist_head(page_no);
    }

    let header = FileHeader::from_bytes_mut(&mut page0)?;
    header.set_freelist_count(header.freelist_count() + 1);
    io.write_page(0, &page0)?;
    Ok(())
}
