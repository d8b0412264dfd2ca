//! Lazy row cursor. A `Rows` value holds the connection borrow for its
//! whole life, so the transaction (and in rollback mode the SHARED lock)
//! it reads under cannot end underneath it; dropping the cursor ends the
//! implicit read transaction it started.
//!
//! Stepping re-reads pages through the transaction view, so a cursor opened
//! inside a write transaction sees that transaction's own uncommitted
//! changes: rows inserted behind the cursor's position will be returned,
//! tombstoned rows ahead of it will be skipped.

use eyre::Result;
use std::sync::Arc;

use crate::error::SoleError;
use crate::schema::TableDef;
use crate::sql::{CompareOp, Comparison, SelectColumns, TableScan};
use crate::types::Value;

use super::Connection;

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    pub fn get(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolved filter: column index instead of name, owned value.
#[derive(Debug, Clone)]
pub(crate) struct RowFilter {
    column: usize,
    op: CompareOp,
    value: Value,
}

impl RowFilter {
    fn matches(&self, row: &[Value]) -> bool {
        let cell = row.get(self.column).unwrap_or(&Value::Null);
        let Some(ordering) = cell.compare(&self.value) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => ordering.is_eq(),
            CompareOp::NotEq => !ordering.is_eq(),
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::LtEq => ordering.is_le(),
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::GtEq => ordering.is_ge(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SelectPlan {
    root_page: u32,
    /// Indices into the stored row, in output order.
    projection: Vec<usize>,
    output_columns: Arc<Vec<String>>,
    filter: Option<RowFilter>,
}

/// Resolves column names against the table definition before any row is
/// read, so name errors surface at `query` time rather than mid-iteration.
pub(crate) fn plan_select(
    def: &TableDef,
    columns: &SelectColumns<'_>,
    filter: Option<&Comparison<'_>>,
) -> Result<SelectPlan> {
    let projection: Vec<usize> = match columns {
        SelectColumns::All => (0..def.columns.len()).collect(),
        SelectColumns::Named(names) => names
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

    let output_columns = Arc::new(
        projection
            .iter()
            .map(|&i| def.columns[i].name.clone())
            .collect::<Vec<_>>(),
    );

    let filter = filter
        .map(|f| {
            let column = def.column_index(f.column).ok_or_else(|| {
                eyre::Report::from(SoleError::usage(format!(
                    "no such column '{}' in table '{}'",
                    f.column, def.name
                )))
            })?;
            Ok::<_, eyre::Report>(RowFilter {
                column,
                op: f.op,
                value: f.literal.to_value(),
            })
        })
        .transpose()?;

    Ok(SelectPlan {
        root_page: def.root_page,
        projection,
        output_columns,
        filter,
    })
}

/// Cursor over the rows of a `SELECT`. Created by
/// [`Connection::query`](super::Connection::query).
pub struct Rows<'conn> {
    conn: &'conn mut Connection,
    scan: TableScan,
    plan: SelectPlan,
    /// Whether dropping this cursor ends the transaction it started.
    implicit_txn: bool,
    done: bool,
}

impl std::fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.plan.output_columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'conn> Rows<'conn> {
    pub(crate) fn new(conn: &'conn mut Connection, plan: SelectPlan, implicit_txn: bool) -> Self {
        Self {
            conn,
            scan: TableScan::new(plan.root_page),
            plan,
            implicit_txn,
            done: false,
        }
    }

    /// Names of the output columns, in order.
    pub fn columns(&self) -> &[String] {
        &self.plan.output_columns
    }

    /// Fetches the next matching row, or `None` when the scan is finished.
    pub fn step(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }

        let scan = &mut self.scan;
        let plan = &self.plan;

        let row = self.conn.with_view(|view| {
            while let Some((_, row)) = scan.step(view)? {
                if let Some(filter) = &plan.filter {
                    if !filter.matches(&row) {
                        continue;
                    }
                }
                return Ok(Some(row));
            }
            Ok(None)
        })?;

        match row {
            Some(values) => Ok(Some(Row {
                columns: self.plan.output_columns.clone(),
                values: self
                    .plan
                    .projection
                    .iter()
                    .map(|&i| values.get(i).cloned().unwrap_or(Value::Null))
                    .collect(),
            })),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Drains the cursor into a vector.
    pub fn collect_all(mut self) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.step()? {
            out.push(row);
        }
        Ok(out)
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        // A cursor that started its own read transaction ends it; a cursor
        // inside an explicit transaction leaves the transaction open.
        if self.implicit_txn {
            self.conn.finish_txn();
        }
    }
}
