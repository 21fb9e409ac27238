//! The single open annotation editor (checklist + comment).
//!
//! At most one annotation is bound at a time. Opening another cell drops the
//! current editor state without saving it; guarding against that is left to
//! the caller.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::SyncError;
use crate::store::RemoteStore;
use crate::types::{AnnotationRecord, CellRef, SheetId};

/// Editor state of the open annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAnnotation {
    sheet_id: SheetId,
    cell: CellRef,
    labels: Vec<String>,
    checked: BTreeSet<String>,
    comment: String,
    loaded_at: Option<DateTime<Utc>>,
    remote_newer: bool,
}

impl OpenAnnotation {
    fn from_record(
        sheet_id: &str,
        cell: CellRef,
        labels: &[String],
        record: Option<AnnotationRecord>,
    ) -> Self {
        let (checked, comment, loaded_at) = match record {
            Some(record) => (
                record
                    .checked_items
                    .into_iter()
                    .filter(|item| labels.contains(item))
                    .collect(),
                record.comment,
                Some(record.updated_at),
            ),
            None => (BTreeSet::new(), String::new(), None),
        };
        Self {
            sheet_id: sheet_id.to_string(),
            cell,
            labels: labels.to_vec(),
            checked,
            comment,
            loaded_at,
            remote_newer: false,
        }
    }

    pub fn sheet_id(&self) -> &str {
        &self.sheet_id
    }

    pub fn cell(&self) -> CellRef {
        self.cell
    }

    /// Configured checklist labels, in display order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn checked(&self) -> &BTreeSet<String> {
        &self.checked
    }

    pub fn is_checked(&self, label: &str) -> bool {
        self.checked.contains(label)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// `updated_at` of the record the editor was loaded from, if one existed.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Whether another party saved this annotation after it was opened.
    pub fn has_remote_update(&self) -> bool {
        self.remote_newer
    }

    pub fn set_checked(&mut self, label: &str, checked: bool) -> Result<(), SyncError> {
        if !self.labels.iter().any(|l| l == label) {
            return Err(SyncError::UnknownLabel {
                label: label.to_string(),
            });
        }
        if checked {
            self.checked.insert(label.to_string());
        } else {
            self.checked.remove(label);
        }
        Ok(())
    }

    /// Flip a label, returning its new state.
    pub fn toggle(&mut self, label: &str) -> Result<bool, SyncError> {
        let next = !self.is_checked(label);
        self.set_checked(label, next)?;
        Ok(next)
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    fn to_record(&self) -> AnnotationRecord {
        AnnotationRecord {
            sheet_id: self.sheet_id.clone(),
            cell: self.cell,
            checked_items: self.checked.clone(),
            comment: self.comment.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Holder of the at-most-one open annotation.
#[derive(Debug, Clone, Default)]
pub struct AnnotationState {
    labels: Vec<String>,
    open: Option<OpenAnnotation>,
}

impl AnnotationState {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels, open: None }
    }

    pub fn current(&self) -> Option<&OpenAnnotation> {
        self.open.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut OpenAnnotation> {
        self.open.as_mut()
    }

    pub fn is_open_for(&self, sheet_id: &str, cell: CellRef) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.sheet_id == sheet_id && open.cell == cell)
    }

    /// Load the annotation for `cell` (or an empty default) and bind it.
    pub async fn open(
        &mut self,
        store: &dyn RemoteStore,
        sheet_id: &str,
        cell: CellRef,
    ) -> Result<&mut OpenAnnotation, SyncError> {
        if let Some(previous) = self.open.take() {
            debug!(
                sheet_id = %previous.sheet_id,
                cell = %previous.cell,
                "discarding unsaved annotation editor"
            );
        }
        let record = store.get_annotation(sheet_id, cell).await?;
        Ok(self
            .open
            .insert(OpenAnnotation::from_record(sheet_id, cell, &self.labels, record)))
    }

    /// Persist the open annotation as a whole-record replacement and unbind
    /// it. On failure the editor stays open with its state intact.
    pub async fn save(&mut self, store: &dyn RemoteStore) -> Result<AnnotationRecord, SyncError> {
        let record = match &self.open {
            Some(open) => open.to_record(),
            None => return Err(SyncError::NoOpenAnnotation),
        };
        store.upsert_annotation(&record).await?;
        debug!(sheet_id = %record.sheet_id, cell = %record.cell, "annotation saved");
        self.open = None;
        Ok(record)
    }

    /// Unbind without persisting.
    pub fn discard(&mut self) -> Option<OpenAnnotation> {
        self.open.take()
    }

    /// Refetch the open annotation, dropping local edits.
    pub async fn reload(&mut self, store: &dyn RemoteStore) -> Result<&mut OpenAnnotation, SyncError> {
        let (sheet_id, cell) = match &self.open {
            Some(open) => (open.sheet_id.clone(), open.cell),
            None => return Err(SyncError::NoOpenAnnotation),
        };
        let record = store.get_annotation(&sheet_id, cell).await?;
        Ok(self
            .open
            .insert(OpenAnnotation::from_record(&sheet_id, cell, &self.labels, record)))
    }

    /// Flag the open editor as stale if it is bound to `cell` and the change
    /// saved at `changed_at` is newer than what the editor loaded. Returns
    /// whether a flag was raised.
    pub fn mark_remote_newer(
        &mut self,
        sheet_id: &str,
        cell: CellRef,
        changed_at: DateTime<Utc>,
    ) -> bool {
        match self.open.as_mut() {
            Some(open) if open.sheet_id == sheet_id && open.cell == cell => {
                if open.loaded_at.is_some_and(|loaded| changed_at <= loaded) {
                    return false;
                }
                open.remote_newer = true;
                true
            }
            _ => false,
        }
    }
}
