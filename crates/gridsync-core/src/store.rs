//! Remote store trait: the persistence and realtime boundary the core depends on.
//!
//! Implementations can be backed by a hosted database with change feeds, the
//! SQLite store in `gridsync-db`, or the in-memory mock for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{AnnotationRecord, CellRecord, CellRef, ChangeEvent, Extent, SheetSummary};

/// The remote store interface.
///
/// Writes are last-write-wins at the storage layer. No ordering is promised
/// between notifications for distinct cells.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List sheets ordered by creation time, oldest first.
    async fn list_sheets(&self) -> Result<Vec<SheetSummary>, StoreError>;

    /// Create a sheet. Fails with `Validation` when `name` is empty.
    async fn create_sheet(&self, name: &str, extent: Extent) -> Result<SheetSummary, StoreError>;

    /// Fetch a sheet's extent. Fails with `NotFound` for unknown ids.
    async fn get_sheet_meta(&self, sheet_id: &str) -> Result<Extent, StoreError>;

    async fn update_sheet_extent(&self, sheet_id: &str, extent: Extent) -> Result<(), StoreError>;

    async fn list_cells(&self, sheet_id: &str) -> Result<Vec<CellRecord>, StoreError>;

    /// Idempotent upsert of one cell value.
    async fn upsert_cell(
        &self,
        sheet_id: &str,
        cell: CellRef,
        value: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_annotation(
        &self,
        sheet_id: &str,
        cell: CellRef,
    ) -> Result<Option<AnnotationRecord>, StoreError>;

    /// Replace the whole annotation record keyed by (sheet, row, col).
    async fn upsert_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError>;

    /// Open a change stream scoped to one sheet.
    async fn subscribe(&self, sheet_id: &str) -> Result<Box<dyn ChangeStream>, StoreError>;
}

/// A lazy, unbounded stream of change events for one sheet.
///
/// Implementations can be backed by:
/// - a database change feed
/// - an in-process broadcast channel
/// - an in-memory sender held by a test
#[async_trait]
pub trait ChangeStream: Send {
    /// Wait for the next change. `None` means the channel was closed by the
    /// store; the consumer may subscribe again.
    async fn next(&mut self) -> Option<ChangeEvent>;

    /// Stop receiving events. After this call `next` returns `None`.
    async fn unsubscribe(&mut self) -> Result<(), StoreError>;
}
