//! Domain types shared by the store boundary and the synchronization core.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a sheet as assigned by the store.
pub type SheetId = String;

/// A 1-based (row, col) address within a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_label(self.col), self.row)
    }
}

/// Row/column bounds of a sheet. Both bounds only ever grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub max_rows: u32,
    pub max_cols: u32,
}

impl Extent {
    pub fn new(max_rows: u32, max_cols: u32) -> Self {
        Self { max_rows, max_cols }
    }

    pub fn contains(&self, cell: CellRef) -> bool {
        (1..=self.max_rows).contains(&cell.row) && (1..=self.max_cols).contains(&cell.col)
    }

    /// Replace zero bounds (unset in the store) with the given fallback.
    pub fn or_default_bounds(self, fallback: Extent) -> Self {
        Self {
            max_rows: if self.max_rows == 0 {
                fallback.max_rows
            } else {
                self.max_rows
            },
            max_cols: if self.max_cols == 0 {
                fallback.max_cols
            } else {
                self.max_cols
            },
        }
    }

    pub fn with_extra_row(self) -> Self {
        Self {
            max_rows: self.max_rows.saturating_add(1),
            ..self
        }
    }

    pub fn with_extra_col(self) -> Self {
        Self {
            max_cols: self.max_cols.saturating_add(1),
            ..self
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.max_rows, self.max_cols)
    }
}

/// Spreadsheet column label for a 1-based column: 1 → "A", 27 → "AA".
pub fn column_label(col: u32) -> String {
    let mut n = col;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

/// Entry of the sheet list, ordered by creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSummary {
    pub id: SheetId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A stored cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRecord {
    pub cell: CellRef,
    pub value: String,
}

/// A persisted per-cell checklist + comment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub sheet_id: SheetId,
    pub cell: CellRef,
    pub checked_items: BTreeSet<String>,
    pub comment: String,
    pub updated_at: DateTime<Utc>,
}

/// Pushed notification that a cell row changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellChange {
    pub sheet_id: SheetId,
    pub cell: CellRef,
    pub value: String,
}

/// Pushed notification that an annotation row changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationChange {
    pub sheet_id: SheetId,
    pub cell: CellRef,
    pub checked_items: BTreeSet<String>,
    pub comment: String,
    pub updated_at: DateTime<Utc>,
}

/// One event of a sheet's realtime change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Cell(CellChange),
    Annotation(AnnotationChange),
}

impl ChangeEvent {
    pub fn sheet_id(&self) -> &str {
        match self {
            Self::Cell(change) => &change.sheet_id,
            Self::Annotation(change) => &change.sheet_id,
        }
    }

    pub fn cell(&self) -> CellRef {
        match self {
            Self::Cell(change) => change.cell,
            Self::Annotation(change) => change.cell,
        }
    }
}

impl From<&AnnotationRecord> for AnnotationChange {
    fn from(record: &AnnotationRecord) -> Self {
        Self {
            sheet_id: record.sheet_id.clone(),
            cell: record.cell,
            checked_items: record.checked_items.clone(),
            comment: record.comment.clone(),
            updated_at: record.updated_at,
        }
    }
}
