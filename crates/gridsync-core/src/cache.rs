//! In-memory cell cache: the rendering source of truth.

use std::collections::HashMap;

use crate::types::{CellRecord, CellRef};

/// Mapping of (sheet, row, col) to the current cell value.
///
/// An absent cell reads as the empty string. Callers trigger re-rendering.
#[derive(Debug, Default)]
pub struct CellCache {
    sheets: HashMap<String, HashMap<CellRef, String>>,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sheet_id: &str, cell: CellRef) -> &str {
        self.sheets
            .get(sheet_id)
            .and_then(|cells| cells.get(&cell))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Overwrite a cell value. No merge.
    pub fn set(&mut self, sheet_id: &str, cell: CellRef, value: impl Into<String>) {
        let value = value.into();
        match self.sheets.get_mut(sheet_id) {
            Some(cells) => {
                cells.insert(cell, value);
            }
            None => {
                self.sheets
                    .entry(sheet_id.to_string())
                    .or_default()
                    .insert(cell, value);
            }
        }
    }

    /// Bulk-populate a sheet from a store listing.
    pub fn load(&mut self, sheet_id: &str, records: impl IntoIterator<Item = CellRecord>) {
        let cells = self.sheets.entry(sheet_id.to_string()).or_default();
        for record in records {
            cells.insert(record.cell, record.value);
        }
    }

    /// Drop every cached value (sheet switch).
    pub fn clear(&mut self) {
        self.sheets.clear();
    }

    /// Snapshot of one sheet's cached cells, ordered by (row, col).
    pub fn sheet_cells(&self, sheet_id: &str) -> Vec<(CellRef, String)> {
        let mut cells: Vec<(CellRef, String)> = self
            .sheets
            .get(sheet_id)
            .map(|cells| cells.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default();
        cells.sort_by_key(|(cell, _)| *cell);
        cells
    }

    pub fn len(&self) -> usize {
        self.sheets.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_cell_reads_as_empty() {
        let cache = CellCache::new();
        assert_eq!(cache.get("s1", CellRef::new(1, 1)), "");
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_without_merging() {
        let mut cache = CellCache::new();
        cache.set("s1", CellRef::new(2, 3), "5");
        cache.set("s1", CellRef::new(2, 3), "50");
        assert_eq!(cache.get("s1", CellRef::new(2, 3)), "50");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sheets_are_isolated() {
        let mut cache = CellCache::new();
        cache.set("s1", CellRef::new(1, 1), "a");
        cache.set("s2", CellRef::new(1, 1), "b");
        assert_eq!(cache.get("s1", CellRef::new(1, 1)), "a");
        assert_eq!(cache.get("s2", CellRef::new(1, 1)), "b");
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = CellCache::new();
        cache.load(
            "s1",
            vec![
                CellRecord {
                    cell: CellRef::new(1, 1),
                    value: "x".into(),
                },
                CellRecord {
                    cell: CellRef::new(1, 2),
                    value: "y".into(),
                },
            ],
        );
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("s1", CellRef::new(1, 1)), "");
    }

    #[test]
    fn sheet_cells_are_sorted() {
        let mut cache = CellCache::new();
        cache.set("s1", CellRef::new(2, 1), "c");
        cache.set("s1", CellRef::new(1, 2), "b");
        cache.set("s1", CellRef::new(1, 1), "a");
        let values: Vec<String> = cache
            .sheet_cells("s1")
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }
}
