//! Sheet repository: persistence for the `sheets` table.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::{Db, DbError};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sheet {
    pub id: String,
    pub name: String,
    pub max_rows: u32,
    pub max_cols: u32,
    pub created_at: String,
}

pub struct SheetRepository<'a> {
    db: &'a Db,
}

impl<'a> SheetRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Insert `sheet`, assigning its id (when empty) and `created_at`.
    pub fn create(&self, sheet: &mut Sheet) -> Result<(), DbError> {
        let name = sheet.name.trim();
        if name.is_empty() {
            return Err(DbError::Validation("sheet name is required".into()));
        }
        if sheet.max_rows == 0 || sheet.max_cols == 0 {
            return Err(DbError::Validation(format!(
                "sheet extent must be positive, got {}x{}",
                sheet.max_rows, sheet.max_cols
            )));
        }

        sheet.name = name.to_string();
        if sheet.id.is_empty() {
            sheet.id = Uuid::new_v4().to_string();
        }
        sheet.created_at = crate::now_rfc3339();

        self.db.conn().execute(
            "INSERT INTO sheets (id, name, max_rows, max_cols, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sheet.id,
                sheet.name,
                sheet.max_rows,
                sheet.max_cols,
                sheet.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Sheet, DbError> {
        self.db
            .conn()
            .query_row(
                "SELECT id, name, max_rows, max_cols, created_at
                 FROM sheets
                 WHERE id = ?1",
                params![id],
                scan_sheet,
            )
            .optional()?
            .ok_or_else(|| DbError::SheetNotFound(id.to_string()))
    }

    pub fn exists(&self, id: &str) -> Result<bool, DbError> {
        let found = self
            .db
            .conn()
            .query_row("SELECT 1 FROM sheets WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// All sheets, oldest first.
    pub fn list(&self) -> Result<Vec<Sheet>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, name, max_rows, max_cols, created_at
             FROM sheets
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], scan_sheet)?;
        let mut sheets = Vec::new();
        for row in rows {
            sheets.push(row?);
        }
        Ok(sheets)
    }

    /// Grow a sheet's extent. Neither dimension may shrink.
    pub fn update_extent(&self, id: &str, max_rows: u32, max_cols: u32) -> Result<(), DbError> {
        if max_rows == 0 || max_cols == 0 {
            return Err(DbError::Validation(format!(
                "sheet extent must be positive, got {max_rows}x{max_cols}"
            )));
        }
        let current = self.get(id)?;
        if max_rows < current.max_rows || max_cols < current.max_cols {
            return Err(DbError::Validation(format!(
                "sheet extent cannot shrink from {}x{} to {max_rows}x{max_cols}",
                current.max_rows, current.max_cols
            )));
        }
        let updated = self.db.conn().execute(
            "UPDATE sheets SET max_rows = ?1, max_cols = ?2 WHERE id = ?3",
            params![max_rows, max_cols, id],
        )?;
        if updated == 0 {
            return Err(DbError::SheetNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn scan_sheet(row: &Row<'_>) -> rusqlite::Result<Sheet> {
    Ok(Sheet {
        id: row.get(0)?,
        name: row.get(1)?,
        max_rows: row.get(2)?,
        max_cols: row.get(3)?,
        created_at: row.get(4)?,
    })
}
