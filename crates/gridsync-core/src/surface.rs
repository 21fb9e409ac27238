//! Rendered grid surface abstraction and the session status line.

use std::collections::HashMap;
use std::fmt;

use crate::types::{CellRef, Extent};

/// Transient status shown next to the grid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Loading,
    Saved,
    LoadFailed(String),
    SaveFailed(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => Ok(()),
            Self::Loading => f.write_str("loading..."),
            Self::Saved => f.write_str("saved"),
            Self::LoadFailed(msg) => write!(f, "load failed: {msg}"),
            Self::SaveFailed(msg) => write!(f, "save failed: {msg}"),
        }
    }
}

/// The editable grid as the user sees it.
///
/// The session writes to the surface; a frontend implements it over its own
/// widgets. `cell_text` must return what is currently displayed, including
/// text the user typed but that has not been saved yet.
pub trait GridSurface: Send {
    /// Recreate the grid for `extent` and fill it with `cells`.
    fn rebuild(&mut self, extent: Extent, cells: Vec<(CellRef, String)>);

    /// Display `value` in one cell. Cells outside the extent are ignored.
    fn render_cell(&mut self, cell: CellRef, value: &str);

    fn cell_text(&self, cell: CellRef) -> String;

    fn show_status(&mut self, status: &SyncStatus);
}

/// Headless surface keeping rendered text in memory.
#[derive(Debug, Default)]
pub struct MemorySurface {
    extent: Option<Extent>,
    cells: HashMap<CellRef, String>,
    status: SyncStatus,
    rebuilds: usize,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Number of full rebuilds so far.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}

impl GridSurface for MemorySurface {
    fn rebuild(&mut self, extent: Extent, cells: Vec<(CellRef, String)>) {
        self.extent = Some(extent);
        self.cells = cells
            .into_iter()
            .filter(|(cell, _)| extent.contains(*cell))
            .collect();
        self.rebuilds += 1;
    }

    fn render_cell(&mut self, cell: CellRef, value: &str) {
        if self.extent.is_some_and(|extent| extent.contains(cell)) {
            self.cells.insert(cell, value.to_string());
        }
    }

    fn cell_text(&self, cell: CellRef) -> String {
        self.cells.get(&cell).cloned().unwrap_or_default()
    }

    fn show_status(&mut self, status: &SyncStatus) {
        self.status = status.clone();
    }
}
