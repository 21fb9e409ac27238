//! Tracks the one cell that currently has input focus.

use crate::types::CellRef;

/// At most one focused cell. Used only as a suppression predicate for
/// incoming remote values; never persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FocusTracker {
    focused: Option<CellRef>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Focus a cell, returning the previously focused cell if it differs.
    pub fn set_focused(&mut self, cell: CellRef) -> Option<CellRef> {
        let previous = self.focused.replace(cell);
        previous.filter(|prev| *prev != cell)
    }

    /// Clear focus, returning the cell that lost it.
    pub fn clear_focused(&mut self) -> Option<CellRef> {
        self.focused.take()
    }

    pub fn is_focused(&self, cell: CellRef) -> bool {
        self.focused == Some(cell)
    }

    pub fn focused(&self) -> Option<CellRef> {
        self.focused
    }

    /// Cell one row below the focused one, clamped to the last row.
    pub fn below(&self, max_rows: u32) -> Option<CellRef> {
        self.focused
            .map(|cell| CellRef::new(cell.row.saturating_add(1).min(max_rows), cell.col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_focus_replaces_previous() {
        let mut focus = FocusTracker::new();
        assert_eq!(focus.set_focused(CellRef::new(1, 1)), None);
        assert_eq!(
            focus.set_focused(CellRef::new(2, 2)),
            Some(CellRef::new(1, 1))
        );
        assert!(!focus.is_focused(CellRef::new(1, 1)));
        assert!(focus.is_focused(CellRef::new(2, 2)));
    }

    #[test]
    fn refocusing_same_cell_reports_no_transfer() {
        let mut focus = FocusTracker::new();
        focus.set_focused(CellRef::new(3, 1));
        assert_eq!(focus.set_focused(CellRef::new(3, 1)), None);
    }

    #[test]
    fn clear_returns_cell_that_lost_focus() {
        let mut focus = FocusTracker::new();
        focus.set_focused(CellRef::new(1, 4));
        assert_eq!(focus.clear_focused(), Some(CellRef::new(1, 4)));
        assert_eq!(focus.clear_focused(), None);
        assert_eq!(focus.focused(), None);
    }

    #[test]
    fn below_clamps_to_last_row() {
        let mut focus = FocusTracker::new();
        assert_eq!(focus.below(3), None);
        focus.set_focused(CellRef::new(2, 5));
        assert_eq!(focus.below(3), Some(CellRef::new(3, 5)));
        focus.set_focused(CellRef::new(3, 5));
        assert_eq!(focus.below(3), Some(CellRef::new(3, 5)));
    }
}
