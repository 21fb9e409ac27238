//! Cell repository: persistence for the `cells` table.

use rusqlite::{params, OptionalExtension};

use crate::sheet_repository::SheetRepository;
use crate::{Db, DbError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCell {
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub updated_at: String,
}

pub struct CellRepository<'a> {
    db: &'a Db,
}

impl<'a> CellRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Insert or overwrite one cell. Last write wins.
    pub fn upsert(
        &self,
        sheet_id: &str,
        row: u32,
        col: u32,
        value: &str,
        updated_at: &str,
    ) -> Result<(), DbError> {
        validate_position(row, col)?;
        if !SheetRepository::new(self.db).exists(sheet_id)? {
            return Err(DbError::SheetNotFound(sheet_id.to_string()));
        }
        self.db.conn().execute(
            "INSERT INTO cells (sheet_id, row_num, col_num, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (sheet_id, row_num, col_num) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![sheet_id, row, col, value, updated_at],
        )?;
        Ok(())
    }

    pub fn get(&self, sheet_id: &str, row: u32, col: u32) -> Result<Option<String>, DbError> {
        let value = self
            .db
            .conn()
            .query_row(
                "SELECT value FROM cells WHERE sheet_id = ?1 AND row_num = ?2 AND col_num = ?3",
                params![sheet_id, row, col],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Every stored cell of a sheet in row-major order.
    pub fn list(&self, sheet_id: &str) -> Result<Vec<StoredCell>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT row_num, col_num, value, updated_at
             FROM cells
             WHERE sheet_id = ?1
             ORDER BY row_num, col_num",
        )?;
        let rows = stmt.query_map(params![sheet_id], |r| {
            Ok(StoredCell {
                row: r.get(0)?,
                col: r.get(1)?,
                value: r.get(2)?,
                updated_at: r.get(3)?,
            })
        })?;
        let mut cells = Vec::new();
        for row in rows {
            cells.push(row?);
        }
        Ok(cells)
    }
}

pub(crate) fn validate_position(row: u32, col: u32) -> Result<(), DbError> {
    if row == 0 || col == 0 {
        return Err(DbError::Validation(format!(
            "cell position is 1-based, got row {row} col {col}"
        )));
    }
    Ok(())
}
