//! Note repository: persistence for the `cell_notes` table.
//!
//! A note is the checklist/comment annotation of one cell. `checked_items` is
//! stored as a JSON array of labels.

use rusqlite::{params, OptionalExtension};

use crate::cell_repository::validate_position;
use crate::sheet_repository::SheetRepository;
use crate::{Db, DbError};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellNote {
    pub sheet_id: String,
    pub row: u32,
    pub col: u32,
    pub checked_items: Vec<String>,
    pub comment: String,
    pub updated_at: String,
}

pub struct NoteRepository<'a> {
    db: &'a Db,
}

impl<'a> NoteRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn get(&self, sheet_id: &str, row: u32, col: u32) -> Result<Option<CellNote>, DbError> {
        let found = self
            .db
            .conn()
            .query_row(
                "SELECT checked_items, comment, updated_at
                 FROM cell_notes
                 WHERE sheet_id = ?1 AND row_num = ?2 AND col_num = ?3",
                params![sheet_id, row, col],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((checked_json, comment, updated_at)) = found else {
            return Ok(None);
        };
        Ok(Some(CellNote {
            sheet_id: sheet_id.to_string(),
            row,
            col,
            checked_items: serde_json::from_str(&checked_json)?,
            comment,
            updated_at,
        }))
    }

    /// Replace the whole note for (sheet, row, col).
    pub fn upsert(&self, note: &CellNote) -> Result<(), DbError> {
        validate_position(note.row, note.col)?;
        if !SheetRepository::new(self.db).exists(&note.sheet_id)? {
            return Err(DbError::SheetNotFound(note.sheet_id.clone()));
        }
        let checked_json = serde_json::to_string(&note.checked_items)?;
        self.db.conn().execute(
            "INSERT INTO cell_notes (sheet_id, row_num, col_num, checked_items, comment, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (sheet_id, row_num, col_num) DO UPDATE SET
                checked_items = excluded.checked_items,
                comment = excluded.comment,
                updated_at = excluded.updated_at",
            params![
                note.sheet_id,
                note.row,
                note.col,
                checked_json,
                note.comment,
                note.updated_at
            ],
        )?;
        Ok(())
    }
}
