//! Statement execution over the storage layer. Everything here is generic
//! over [`PageIo`], so the same code runs against the store directly or
//! against a write transaction's buffered page view.
//!
//! Rows live as cells on a chain of record pages rooted at the table's
//! `root_page`. Cells are appended and tombstoned, never compacted, so a
//! scan's (page, offset) position stays valid across writes made through
//! the same connection; an UPDATE that no longer fits its cell is
//! re-appended at the end of the chain where an open scan will encounter
//! the new version.

use eyre::{ensure, Result};

use crate::error::SoleError;
use crate::schema::TableDef;
use crate::storage::{
    allocate_page, append_cell, cell_at, first_cell_offset, init_page, next_cell_offset,
    overwrite_cell, tombstone_cell, PageHeader, PageIo, PageType,
};
use crate::types::{decode_record, encode_record, Value};

use super::ast::{CompareOp, Comparison, Literal};

/// Stable position of a row: record page number and cell offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPosition {
    pub page_no: u32,
    pub offset: u32,
}

/// Lazy scan over a table's record chain. Each `step` re-reads the current
/// page, so rows written through the same connection after the scan passed
/// them stay invisible while later insertions become visible.
#[derive(Debug)]
pub struct TableScan {
    page_no: u32,
    /// Offset of the next cell to examine; `None` before the first cell of
    /// the current page.
    next_offset: Option<u32>,
    entered: bool,
}

impl TableScan {
    pub fn new(root_page: u32) -> Self {
        Self {
            page_no: root_page,
            next_offset: None,
            entered: false,
        }
    }

    /// Advances to the next live row, or `None` at end of table.
    pub fn step<P: PageIo>(&mut self, io: &mut P) -> Result<Option<(RowPosition, Vec<Value>)>> {
        loop {
            if self.page_no == 0 {
                return Ok(None);
            }

            let page = io.read_page(self.page_no)?;
            ensure!(
                PageHeader::from_bytes(&page)?.page_type() == PageType::Record,
                "page {} on record chain is not a record page",
                self.page_no
            );

            if !self.entered {
                self.next_offset = first_cell_offset(&page)?;
                self.entered = true;
            }

            while let Some(offset) = self.next_offset {
                let (payload, tombstoned) = cell_at(&page, offset)?;
                self.next_offset = next_cell_offset(&page, offset)?;
                if !tombstoned {
                    let row = decode_record(payload)?;
                    return Ok(Some((
                        RowPosition {
                            page_no: self.page_no,
                            offset,
                        },
                        row,
                    )));
                }
            }

            self.page_no = PageHeader::from_bytes(&page)?.next_page();
            self.entered = false;
        }
    }
}

/// Appends a record cell somewhere on the table's chain, reusing a
/// tombstoned slot whose capacity fits, extending the chain when full.
fn insert_record<P: PageIo>(io: &mut P, root_page: u32, payload: &[u8]) -> Result<RowPosition> {
    ensure!(
        payload.len() + crate::storage::PAGE_HEADER_SIZE + 8 <= io.page_size(),
        "row of {} bytes does not fit in a {}-byte page",
        payload.len(),
        io.page_size()
    );

    let mut page_no = root_page;
    loop {
        let mut page = io.read_page(page_no)?;

        let mut offset = first_cell_offset(&page)?;
        while let Some(off) = offset {
            let (_, tombstoned) = cell_at(&page, off)?;
            if tombstoned && overwrite_cell(&mut page, off, payload)? {
                io.write_page(page_no, &page)?;
                return Ok(RowPosition {
                    page_no,
                    offset: off,
                });
            }
            offset = next_cell_offset(&page, off)?;
        }

        if let Some(off) = append_cell(&mut page, payload)? {
            io.write_page(page_no, &page)?;
            return Ok(RowPosition {
                page_no,
                offset: off,
            });
        }

        let next = PageHeader::from_bytes(&page)?.next_page();
        if next != 0 {
            page_no = next;
            continue;
        }

        let new_page_no = allocate_page(io)?;
        let mut new_page = vec![0u8; io.page_size()];
        init_page(&mut new_page, PageType::Record);
        io.write_page(new_page_no, &new_page)?;

        let mut page = io.read_page(page_no)?;
        PageHeader::from_bytes_mut(&mut page)?.set_next_page(new_page_no);
        io.write_page(page_no, &page)?;
        page_no = new_page_no;
    }
}

/// Resolves a WHERE column to its index before any row is read, so an
/// unknown name fails even on an empty table.
fn filter_column(def: &TableDef, filter: &Comparison<'_>) -> Result<usize> {
    def.column_index(filter.column).ok_or_else(|| {
        SoleError::usage(format!(
            "no such column '{}' in table '{}'",
            filter.column, def.name
        ))
        .into()
    })
}

/// Evaluates a resolved WHERE predicate against a decoded row. NULL never
/// matches, regardless of operator.
fn row_matches(column: usize, filter: &Comparison<'_>, row: &[Value]) -> bool {
    let value = row.get(column).unwrap_or(&Value::Null);
    let target = filter.literal.to_value();

    let Some(ordering) = value.compare(&target) else {
        return false;
    };

    match filter.op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::NotEq => !ordering.is_eq(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::LtEq => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::GtEq => ordering.is_ge(),
    }
}

/// INSERT: binds each literal row to the table's column order and appends
/// it. Unmentioned columns become NULL. Returns the number of rows written.
pub fn execute_insert<P: PageIo>(
    io: &mut P,
    def: &TableDef,
    columns: Option<&[&str]>,
    rows: &[Vec<Literal<'_>>],
) -> Result<u64> {
    let column_order: Vec<usize> = match columns {
        None => (0..def.columns.len()).collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                def.column_index(name).ok_or_else(|| {
                    SoleError::usage(format!(
                        "no such column '{}' in table '{}'",
                        name, def.name
                    ))
                    .into()
                })
            })
            .collect::<Result<_>>()?,
    };

    let mut payload = Vec::new();
    for literals in rows {
        ensure!(
            literals.len() == column_order.len(),
            "{} values supplied for {} columns",
            literals.len(),
            column_order.len()
        );

        let mut row = vec![Value::Null; def.columns.len()];
        for (literal, &idx) in literals.iter().zip(&column_order) {
            row[idx] = literal.to_value();
        }

        payload.clear();
        encode_record(&row, &mut payload)?;
        insert_record(io, def.root_page, &payload)?;
    }

    Ok(rows.len() as u64)
}

/// UPDATE: two-phase so the scan never chases its own re-appended rows.
/// Matching positions are collected first, then each row is rewritten in
/// place when it fits its cell, or tombstoned and re-appended when it grew.
pub fn execute_update<P: PageIo>(
    io: &mut P,
    def: &TableDef,
    assignments: &[(&str, Literal<'_>)],
    filter: Option<&Comparison<'_>>,
) -> Result<u64> {
    let indices: Vec<usize> = assignments
        .iter()
        .map(|(name, _)| {
            def.column_index(name).ok_or_else(|| {
                SoleError::usage(format!(
                    "no such column '{}' in table '{}'",
                    name, def.name
                ))
                .into()
            })
        })
        .collect::<Result<_>>()?;

    let filter = filter
        .map(|f| Ok::<_, eyre::Report>((f, filter_column(def, f)?)))
        .transpose()?;

    let mut matches = Vec::new();
    let mut scan = TableScan::new(def.root_page);
    while let Some((pos, row)) = scan.step(io)? {
        let keep = match filter {
            Some((f, idx)) => row_matches(idx, f, &row),
            None => true,
        };
        if keep {
            matches.push((pos, row));
        }
    }

    let updated = matches.len() as u64;
    let mut payload = Vec::new();
    for (pos, mut row) in matches {
        for (&idx, (_, literal)) in indices.iter().zip(assignments) {
            row[idx] = literal.to_value();
        }

        payload.clear();
        encode_record(&row, &mut payload)?;

        let mut page = io.read_page(pos.page_no)?;
        if overwrite_cell(&mut page, pos.offset, &payload)? {
            io.write_page(pos.page_no, &page)?;
        } else {
            tombstone_cell(&mut page, pos.offset)?;
            io.write_page(pos.page_no, &page)?;
            insert_record(io, def.root_page, &payload)?;
        }
    }

    Ok(updated)
}

/// DELETE: collects matching positions, then tombstones them.
pub fn execute_delete<P: PageIo>(
    io: &mut P,
    def: &TableDef,
    filter: Option<&Comparison<'_>>,
) -> Result<u64> {
    let filter = filter
        .map(|f| Ok::<_, eyre::Report>((f, filter_column(def, f)?)))
        .transpose()?;

    let mut positions = Vec::new();
    let mut scan = TableScan::new(def.root_page);
    while let Some((pos, row)) = scan.step(io)? {
        let keep = match filter {
            Some((f, idx)) => row_matches(idx, f, &row),
            None => true,
        };
        if keep {
            positions.push(pos);
        }
    }

    for pos in &positions {
        let mut page = io.read_page(pos.page_no)?;
        tombstone_cell(&mut page, pos.offset)?;
        io.write_page(pos.page_no, &page)?;
    }

    Ok(positions.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{create_table, ColumnDef, ColumnType};
    use crate::storage::PageStore;

    fn setup() -> (PageStore, TableDef) {
        let mut store = PageStore::create_memory(512).unwrap();
        let def = create_table(
            &mut store,
            "t",
            vec![
                ColumnDef {
                    name: "id".into(),
                    column_type: ColumnType::Integer,
                },
                ColumnDef {
                    name: "name".into(),
                    column_type: ColumnType::Text,
                },
            ],
        )
        .unwrap();
        (store, def)
    }

    fn rows_of(store: &mut PageStore, def: &TableDef) -> Vec<Vec<Value>> {
        let mut scan = TableScan::new(def.root_page);
        let mut out = Vec::new();
        while let Some((_, row)) = scan.step(store).unwrap() {
            out.push(row);
        }
        out
    }

    #[test]
    fn insert_and_scan() {
        let (mut store, def) = setup();
        let n = execute_insert(
            &mut store,
            &def,
            None,
            &[
                vec![Literal::Integer(1), Literal::String("a")],
                vec![Literal::Integer(2), Literal::String("b")],
            ],
        )
        .unwrap();
        assert_eq!(n, 2);

        let rows = rows_of(&mut store, &def);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::Integer(1), Value::Text("a".into())]);
        assert_eq!(rows[1], vec![Value::Integer(2), Value::Text("b".into())]);
    }

    #[test]
    fn insert_with_column_list_fills_gaps_with_null() {
        let (mut store, def) = setup();
        execute_insert(
            &mut store,
            &def,
            Some(&["name"]),
            &[vec![Literal::String("only-name")]],
        )
        .unwrap();

        let rows = rows_of(&mut store, &def);
        assert_eq!(rows[0][0], Value::Null);
        assert_eq!(rows[0][1], Value::Text("only-name".into()));
    }

    #[test]
    fn insert_arity_mismatch_fails() {
        let (mut store, def) = setup();
        let result = execute_insert(&mut store, &def, None, &[vec![Literal::Integer(1)]]);
        assert!(result.is_err());
    }

    #[test]
    fn delete_with_filter() {
        let (mut store, def) = setup();
        execute_insert(
            &mut store,
            &def,
            None,
            &[
                vec![Literal::Integer(1), Literal::String("a")],
                vec![Literal::Integer(2), Literal::String("b")],
                vec![Literal::Integer(3), Literal::String("c")],
            ],
        )
        .unwrap();

        let filter = Comparison {
            column: "id",
            op: CompareOp::Lt,
            literal: Literal::Integer(3),
        };
        let n = execute_delete(&mut store, &def, Some(&filter)).unwrap();
        assert_eq!(n, 2);

        let rows = rows_of(&mut store, &def);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Integer(3));
    }

    #[test]
    fn update_in_place_and_grown() {
        let (mut store, def) = setup();
        execute_insert(
            &mut store,
            &def,
            None,
            &[vec![Literal::Integer(1), Literal::String("short")]],
        )
        .unwrap();

        // Same-size update stays in place.
        let n = execute_update(
            &mut store,
            &def,
            &[("name", Literal::String("shore"))],
            None,
        )
        .unwrap();
        assert_eq!(n, 1);

        // A much larger value forces tombstone + re-append.
        let long = "a-considerably-longer-name-value-than-before";
        let n = execute_update(&mut store, &def, &[("name", Literal::String(long))], None)
            .unwrap();
        assert_eq!(n, 1);

        let rows = rows_of(&mut store, &def);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Value::Text(long.into()));
    }

    #[test]
    fn null_never_matches_a_filter() {
        let (mut store, def) = setup();
        execute_insert(
            &mut store,
            &def,
            Some(&["name"]),
            &[vec![Literal::String("x")]],
        )
        .unwrap();

        let filter = Comparison {
            column: "id",
            op: CompareOp::NotEq,
            literal: Literal::Integer(0),
        };
        assert_eq!(execute_delete(&mut store, &def, Some(&filter)).unwrap(), 0);
    }

    #[test]
    fn unknown_column_in_filter_is_usage_error() {
        // The table is empty: resolution must not depend on rows existing.
        let (mut store, def) = setup();
        let filter = Comparison {
            column: "nope",
            op: CompareOp::Eq,
            literal: Literal::Integer(1),
        };

        let err = execute_delete(&mut store, &def, Some(&filter)).unwrap_err();
        assert!(matches!(
            SoleError::of(&err),
            Some(SoleError::Usage { .. })
        ));

        let err = execute_update(
            &mut store,
            &def,
            &[("name", Literal::String("x"))],
            Some(&filter),
        )
        .unwrap_err();
        assert!(matches!(
            SoleError::of(&err),
            Some(SoleError::Usage { .. })
        ));
    }

    #[test]
    fn rows_spill_across_pages() {
        let (mut store, def) = setup();
        // 512-byte pages: enough rows to force chained record pages.
        let rows: Vec<Vec<Literal<'_>>> = (0..40)
            .map(|i| vec![Literal::Integer(i), Literal::String("padding-padding")])
            .collect();
        execute_insert(&mut store, &def, None, &rows).unwrap();

        let read_back = rows_of(&mut store, &def);
        assert_eq!(read_back.len(), 40);
        assert_eq!(read_back[39][0], Value::Integer(39));
        assert!(store.page_count() > 3);
    }

    #[test]
    fn deleted_slot_is_reused_by_insert() {
        let (mut store, def) = setup();
        execute_insert(
            &mut store,
            &def,
            None,
            &[vec![Literal::Integer(1), Literal::String("abc")]],
        )
        .unwrap();
        let pages = store.page_count();

        execute_delete(&mut store, &def, None).unwrap();
        execute_insert(
            &mut store,
            &def,
            None,
            &[vec![Literal::Integer(2), Literal::String("xyz")]],
        )
        .unwrap();

        assert_eq!(store.page_count(), pages);
        let rows = rows_of(&mut store, &def);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Integer(2));
    }
}
