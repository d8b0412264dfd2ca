//! # Catalog
//!
//! Table definitions live in the catalog: a chain of catalog pages rooted at
//! page 1, one cell per table. Dropping a table tombstones its cell; the
//! slot is reclaimed by a later `CREATE TABLE` whose record fits the cell's
//! capacity.
//!
//! ## Cell Encoding
//!
//! ```text
//! name_len: u16, name bytes,
//! root_page: u32,
//! col_count: u16,
//! per column: name_len: u16, name bytes, type: u8
//! ```
//!
//! Every DDL statement bumps `schema_version` in the file header; cached
//! catalogs are reloaded when the stored version moves past the cached one.

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::error::SoleError;
use crate::storage::{
    allocate_page, append_cell, cell_at, first_cell_offset, free_page, init_page,
    next_cell_offset, overwrite_cell, tombstone_cell, FileHeader, PageHeader, PageIo, PageType,
    CATALOG_ROOT_PAGE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    fn to_byte(self) -> u8 {
        match self {
            ColumnType::Integer => 1,
            ColumnType::Real => 2,
            ColumnType::Text => 3,
            ColumnType::Blob => 4,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            1 => ColumnType::Integer,
            2 => ColumnType::Real,
            3 => ColumnType::Text,
            4 => ColumnType::Blob,
            other => {
                return Err(
                    SoleError::corruption(format!("unknown column type byte {other}")).into(),
                )
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub root_page: u32,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// In-memory view of the catalog, cached per connection and invalidated by
/// `schema_version`.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
    /// `schema_version` this view was loaded at.
    pub version: u32,
}

impl Catalog {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn encode_table(def: &TableDef, out: &mut Vec<u8>) -> Result<()> {
    ensure!(def.name.len() <= u16::MAX as usize, "table name too long");
    ensure!(
        def.columns.len() <= u16::MAX as usize,
        "too many columns in table '{}'",
        def.name
    );

    out.extend_from_slice(&(def.name.len() as u16).to_le_bytes());
    out.extend_from_slice(def.name.as_bytes());
    out.extend_from_slice(&def.root_page.to_le_bytes());
    out.extend_from_slice(&(def.columns.len() as u16).to_le_bytes());
    for col in &def.columns {
        ensure!(col.name.len() <= u16::MAX as usize, "column name too long");
        out.extend_from_slice(&(col.name.len() as u16).to_le_bytes());
        out.extend_from_slice(col.name.as_bytes());
        out.push(col.column_type.to_byte());
    }
    Ok(())
}

fn decode_table(data: &[u8]) -> Result<TableDef> {
    let mut pos = 0usize;

    let read_u16 = |data: &[u8], pos: &mut usize| -> Result<u16> {
        ensure!(*pos + 2 <= data.len(), "catalog cell truncated");
        let v = u16::from_le_bytes(data[*pos..*pos + 2].try_into()?);
        *pos += 2;
        Ok(v)
    };

    let name_len = read_u16(data, &mut pos)? as usize;
    ensure!(pos + name_len <= data.len(), "catalog cell truncated");
    let name = std::str::from_utf8(&data[pos..pos + name_len])?.to_string();
    pos += name_len;

    ensure!(pos + 4 <= data.len(), "catalog cell truncated");
    let root_page = u32::from_le_bytes(data[pos..pos + 4].try_into()?);
    pos += 4;

    let col_count = read_u16(data, &mut pos)? as usize;
    let mut columns = Vec::with_capacity(col_count);
    for _ in 0..col_count {
        let len = read_u16(data, &mut pos)? as usize;
        ensure!(pos + len <= data.len(), "catalog cell truncated");
        let col_name = std::str::from_utf8(&data[pos..pos + len])?.to_string();
        pos += len;
        ensure!(pos < data.len(), "catalog cell truncated");
        let column_type = ColumnType::from_byte(data[pos])?;
        pos += 1;
        columns.push(ColumnDef {
            name: col_name,
            column_type,
        });
    }

    Ok(TableDef {
        name,
        root_page,
        columns,
    })
}

/// Walks every live cell on the catalog chain.
fn for_each_cell<P, F>(io: &mut P, mut visit: F) -> Result<()>
where
    P: PageIo,
    F: FnMut(u32, u32, &[u8]) -> Result<()>,
{
    let mut page_no = CATALOG_ROOT_PAGE;
    while page_no != 0 {
        let page = io.read_page(page_no)?;
        ensure!(
            PageHeader::from_bytes(&page)?.page_type() == PageType::Catalog,
            "page {} on catalog chain is not a catalog page",
            page_no
        );

        let mut offset = first_cell_offset(&page)?;
        while let Some(off) = offset {
            let (payload, tombstoned) = cell_at(&page, off)?;
            if !tombstoned {
                visit(page_no, off, payload)?;
            }
            offset = next_cell_offset(&page, off)?;
        }

        page_no = PageHeader::from_bytes(&page)?.next_page();
    }
    Ok(())
}

/// Loads the full catalog. `version` is taken from the file header so the
/// caller can detect staleness later.
pub fn load<P: PageIo>(io: &mut P) -> Result<Catalog> {
    let page0 = io.read_page(0)?;
    let version = FileHeader::from_bytes(&page0)?.schema_version();

    let mut tables = HashMap::new();
    for_each_cell(io, |_, _, payload| {
        let def = decode_table(payload)?;
        tables.insert(def.name.to_ascii_lowercase(), def);
        Ok(())
    })?;

    Ok(Catalog { tables, version })
}

fn bump_schema_version<P: PageIo>(io: &mut P) -> Result<u32> {
    let mut page0 = io.read_page(0)?;
    let header = FileHeader::from_bytes_mut(&mut page0)?;
    let next = header.schema_version().wrapping_add(1);
    header.set_schema_version(next);
    io.write_page(0, &page0)?;
    Ok(next)
}

/// Appends a catalog cell, reusing a tombstoned slot when one fits,
/// extending the chain with a fresh catalog page when every page is full.
fn insert_catalog_cell<P: PageIo>(io: &mut P, payload: &[u8]) -> Result<()> {
    let mut page_no = CATALOG_ROOT_PAGE;
    loop {
        let mut page = io.read_page(page_no)?;

        // Reuse a tombstoned cell if its capacity fits.
        let mut offset = first_cell_offset(&page)?;
        while let Some(off) = offset {
            let (_, tombstoned) = cell_at(&page, off)?;
            if tombstoned && overwrite_cell(&mut page, off, payload)? {
                io.write_page(page_no, &page)?;
                return Ok(());
            }
            offset = next_cell_offset(&page, off)?;
        }

        if append_cell(&mut page, payload)?.is_some() {
            io.write_page(page_no, &page)?;
            return Ok(());
        }

        let next = PageHeader::from_bytes(&page)?.next_page();
        if next != 0 {
            page_no = next;
            continue;
        }

        // Chain is full: link a new catalog page and retry there.
        let new_page_no = allocate_page(io)?;
        let mut new_page = vec![0u8; io.page_size()];
        init_page(&mut new_page, PageType::Catalog);
        io.write_page(new_page_no, &new_page)?;

        let mut page = io.read_page(page_no)?;
        PageHeader::from_bytes_mut(&mut page)?.set_next_page(new_page_no);
        io.write_page(page_no, &page)?;
        page_no = new_page_no;
    }
}

/// Creates a table: allocates its root record page, writes the catalog
/// cell, bumps the schema version. Fails if the name is taken.
pub fn create_table<P: PageIo>(
    io: &mut P,
    name: &str,
    columns: Vec<ColumnDef>,
) -> Result<TableDef> {
    ensure!(!name.is_empty(), "table name cannot be empty");
    ensure!(!columns.is_empty(), "table '{}' has no columns", name);

    let existing = load(io)?;
    if existing.table(name).is_some() {
        return Err(SoleError::usage(format!("table '{name}' already exists")).into());
    }
    {
        let mut seen = HashMap::new();
        for col in &columns {
            if seen
                .insert(col.name.to_ascii_lowercase(), ())
                .is_some()
            {
                return Err(SoleError::usage(format!(
                    "duplicate column '{}' in table '{}'",
                    col.name, name
                ))
                .into());
            }
        }
    }

    let root_page = allocate_page(io)?;
    let mut page = vec![0u8; io.page_size()];
    init_page(&mut page, PageType::Record);
    io.write_page(root_page, &page)?;

    let def = TableDef {
        name: name.to_string(),
        root_page,
        columns,
    };
    let mut payload = Vec::new();
    encode_table(&def, &mut payload)?;
    insert_catalog_cell(io, &payload)?;
    bump_schema_version(io)?;
    Ok(def)
}

/// Drops a table: tombstones its catalog cell, frees its record pages,
/// bumps the schema version.
pub fn drop_table<P: PageIo>(io: &mut P, name: &str) -> Result<()> {
    let lowered = name.to_ascii_lowercase();

    let mut found: Option<(u32, u32, u32)> = None;
    for_each_cell(io, |page_no, offset, payload| {
        let def = decode_table(payload)?;
        if def.name.to_ascii_lowercase() == lowered {
            found = Some((page_no, offset, def.root_page));
        }
        Ok(())
    })?;

    let Some((page_no, offset, root_page)) = found else {
        return Err(SoleError::usage(format!("no such table: {name}")).into());
    };

    let mut page = io.read_page(page_no)?;
    tombstone_cell(&mut page, offset)?;
    io.write_page(page_no, &page)?;

    // Free the table's record chain.
    let mut record_page = root_page;
    while record_page != 0 {
        let page = io.read_page(record_page)?;
        let next = PageHeader::from_bytes(&page)?.next_page();
        free_page(io, record_page)?;
        record_page = next;
    }

    bump_schema_version(io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageStore;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef {
                name: "id".into(),
                column_type: ColumnType::Integer,
            },
            ColumnDef {
                name: "name".into(),
                column_type: ColumnType::Text,
            },
        ]
    }

    #[test]
    fn empty_catalog_loads_empty() {
        let mut store = PageStore::create_memory(512).unwrap();
        let catalog = load(&mut store).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.version, 1);
    }

    #[test]
    fn create_and_reload() {
        let mut store = PageStore::create_memory(512).unwrap();
        let def = create_table(&mut store, "users", columns()).unwrap();
        assert!(def.root_page >= 2);

        let catalog = load(&mut store).unwrap();
        assert_eq!(catalog.len(), 1);
        let loaded = catalog.table("users").unwrap();
        assert_eq!(loaded, &def);
        assert_eq!(catalog.version, 2);
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let mut store = PageStore::create_memory(512).unwrap();
        create_table(&mut store, "Users", columns()).unwrap();

        let catalog = load(&mut store).unwrap();
        assert!(catalog.table("USERS").is_some());
        assert!(catalog.table("users").is_some());
    }

    #[test]
    fn duplicate_table_is_usage_error() {
        let mut store = PageStore::create_memory(512).unwrap();
        create_table(&mut store, "t", columns()).unwrap();

        let err = create_table(&mut store, "T", columns()).unwrap_err();
        assert!(matches!(
            SoleError::of(&err),
            Some(SoleError::Usage { .. })
        ));
    }

    #[test]
    fn duplicate_column_is_usage_error() {
        let mut store = PageStore::create_memory(512).unwrap();
        let cols = vec![
            ColumnDef {
                name: "a".into(),
                column_type: ColumnType::Integer,
            },
            ColumnDef {
                name: "A".into(),
                column_type: ColumnType::Text,
            },
        ];
        assert!(create_table(&mut store, "t", cols).is_err());
    }

    #[test]
    fn drop_removes_table_and_frees_pages() {
        let mut store = PageStore::create_memory(512).unwrap();
        let def = create_table(&mut store, "t", columns()).unwrap();
        drop_table(&mut store, "t").unwrap();

        let catalog = load(&mut store).unwrap();
        assert!(catalog.table("t").is_none());

        // The root page went back to the free list.
        let header = store.header().unwrap();
        assert!(header.freelist_count() >= 1);
        let _ = def;
    }

    #[test]
    fn drop_missing_table_fails() {
        let mut store = PageStore::create_memory(512).unwrap();
        assert!(drop_table(&mut store, "nope").is_err());
    }

    #[test]
    fn dropped_slot_is_reused() {
        let mut store = PageStore::create_memory(512).unwrap();
        create_table(&mut store, "a", columns()).unwrap();
        let pages_before = store.page_count();

        drop_table(&mut store, "a").unwrap();
        create_table(&mut store, "b", columns()).unwrap();

        // Same-size definition reuses the tombstoned cell and the freed
        // root page: no growth.
        assert_eq!(store.page_count(), pages_before);
    }

    #[test]
    fn catalog_spills_to_chained_page() {
        let mut store = PageStore::create_memory(512).unwrap();

        for i in 0..30 {
            create_table(&mut store, &format!("table_number_{i:04}"), columns()).unwrap();
        }

        let catalog = load(&mut store).unwrap();
        assert_eq!(catalog.len(), 30);
        for i in 0..30 {
            assert!(catalog.table(&format!("table_number_{i:04}")).is_some());
        }
    }
}
