//! Mock remote store for unit testing.
//!
//! Keeps sheets, cells and annotations in memory, records every call, and
//! can be configured to fail or delay individual operations. Change streams
//! are fed either by `emit` (as another editor would) or, when change echo is
//! enabled, by the store's own upserts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::store::{ChangeStream, RemoteStore};
use crate::types::{
    AnnotationChange, AnnotationRecord, CellChange, CellRecord, CellRef, ChangeEvent, Extent,
    SheetSummary,
};

/// A recorded call to the mock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListSheets,
    CreateSheet { name: String, extent: Extent },
    GetSheetMeta(String),
    UpdateSheetExtent { sheet_id: String, extent: Extent },
    ListCells(String),
    UpsertCell {
        sheet_id: String,
        cell: CellRef,
        value: String,
    },
    GetAnnotation { sheet_id: String, cell: CellRef },
    UpsertAnnotation(AnnotationRecord),
    Subscribe(String),
    Unsubscribe(String),
}

struct MockSheet {
    summary: SheetSummary,
    extent: Extent,
}

struct Subscriber {
    sheet_id: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct MockData {
    sheets: Vec<MockSheet>,
    cells: HashMap<(String, CellRef), String>,
    annotations: HashMap<(String, CellRef), AnnotationRecord>,
    subscribers: Vec<Subscriber>,
    next_sheet: u64,
}

/// Mock implementation of `RemoteStore` for testing.
#[derive(Default)]
pub struct MockRemoteStore {
    data: Mutex<MockData>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    echo_changes: bool,
    write_delays: Mutex<VecDeque<Duration>>,
    cell_write_errors: Mutex<VecDeque<StoreError>>,
    annotation_write_error: Mutex<Option<StoreError>>,
    subscribe_error: Mutex<Option<StoreError>>,
    unsubscribe_error: Arc<Mutex<Option<StoreError>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push every successful upsert to matching subscribers, like a
    /// database change feed does.
    pub fn with_change_echo(mut self) -> Self {
        self.echo_changes = true;
        self
    }

    /// Pre-populate a sheet; returns its summary.
    pub fn insert_sheet(&self, name: &str, extent: Extent) -> SheetSummary {
        let mut data = lock(&self.data);
        data.next_sheet += 1;
        let summary = SheetSummary {
            id: format!("sheet-{}", data.next_sheet),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        data.sheets.push(MockSheet {
            summary: summary.clone(),
            extent,
        });
        summary
    }

    /// Pre-populate a cell value without recording a call or notifying.
    pub fn insert_cell(&self, sheet_id: &str, cell: CellRef, value: &str) {
        lock(&self.data)
            .cells
            .insert((sheet_id.to_string(), cell), value.to_string());
    }

    /// Pre-populate an annotation without recording a call or notifying.
    pub fn insert_annotation(&self, record: AnnotationRecord) {
        lock(&self.data)
            .annotations
            .insert((record.sheet_id.clone(), record.cell), record);
    }

    /// Queue a delay for the next cell write (FIFO; writes without a queued
    /// delay complete immediately).
    pub fn push_write_delay(&self, delay: Duration) {
        lock(&self.write_delays).push_back(delay);
    }

    /// Queue an error for the next cell write.
    pub fn push_cell_write_error(&self, err: StoreError) {
        lock(&self.cell_write_errors).push_back(err);
    }

    /// Configure the next annotation upsert to fail.
    pub fn with_annotation_write_error(self, err: StoreError) -> Self {
        *lock(&self.annotation_write_error) = Some(err);
        self
    }

    /// Configure the next subscribe to fail.
    pub fn set_subscribe_error(&self, err: StoreError) {
        *lock(&self.subscribe_error) = Some(err);
    }

    /// Configure the next unsubscribe to fail.
    pub fn set_unsubscribe_error(&self, err: StoreError) {
        *lock(&self.unsubscribe_error) = Some(err);
    }

    /// Deliver an event to subscribers of its sheet.
    pub fn emit(&self, event: ChangeEvent) {
        let mut data = lock(&self.data);
        data.subscribers.retain(|s| !s.tx.is_closed());
        for sub in data.subscribers.iter().filter(|s| s.sheet_id == event.sheet_id()) {
            let _ = sub.tx.send(event.clone());
        }
    }

    /// Deliver an event to every live subscriber regardless of its filter,
    /// simulating a notification that raced a sheet switch.
    pub fn emit_unfiltered(&self, event: ChangeEvent) {
        let mut data = lock(&self.data);
        data.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &data.subscribers {
            let _ = sub.tx.send(event.clone());
        }
    }

    /// Close every open change stream from the store side.
    pub fn close_subscriptions(&self) {
        lock(&self.data).subscribers.clear();
    }

    pub fn live_subscriptions(&self) -> usize {
        let mut data = lock(&self.data);
        data.subscribers.retain(|s| !s.tx.is_closed());
        data.subscribers.len()
    }

    pub fn cell_value(&self, sheet_id: &str, cell: CellRef) -> Option<String> {
        lock(&self.data)
            .cells
            .get(&(sheet_id.to_string(), cell))
            .cloned()
    }

    pub fn annotation(&self, sheet_id: &str, cell: CellRef) -> Option<AnnotationRecord> {
        lock(&self.data)
            .annotations
            .get(&(sheet_id.to_string(), cell))
            .cloned()
    }

    pub fn extent(&self, sheet_id: &str) -> Option<Extent> {
        lock(&self.data)
            .sheets
            .iter()
            .find(|s| s.summary.id == sheet_id)
            .map(|s| s.extent)
    }

    /// Return all recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Recorded cell writes as (cell, value), in issue order.
    pub fn cell_writes(&self) -> Vec<(CellRef, String)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::UpsertCell { cell, value, .. } => Some((*cell, value.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn take_error(slot: &Mutex<Option<StoreError>>) -> Option<StoreError> {
        lock(slot).take()
    }

    fn require_sheet(data: &MockData, sheet_id: &str) -> Result<(), StoreError> {
        if data.sheets.iter().any(|s| s.summary.id == sheet_id) {
            Ok(())
        } else {
            Err(StoreError::not_found("sheet", sheet_id))
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn list_sheets(&self) -> Result<Vec<SheetSummary>, StoreError> {
        self.record(MockCall::ListSheets);
        let data = lock(&self.data);
        let mut sheets: Vec<SheetSummary> = data.sheets.iter().map(|s| s.summary.clone()).collect();
        sheets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sheets)
    }

    async fn create_sheet(&self, name: &str, extent: Extent) -> Result<SheetSummary, StoreError> {
        self.record(MockCall::CreateSheet {
            name: name.to_string(),
            extent,
        });
        if name.trim().is_empty() {
            return Err(StoreError::validation("sheet name is required"));
        }
        Ok(self.insert_sheet(name, extent))
    }

    async fn get_sheet_meta(&self, sheet_id: &str) -> Result<Extent, StoreError> {
        self.record(MockCall::GetSheetMeta(sheet_id.to_string()));
        self.extent(sheet_id)
            .ok_or_else(|| StoreError::not_found("sheet", sheet_id))
    }

    async fn update_sheet_extent(&self, sheet_id: &str, extent: Extent) -> Result<(), StoreError> {
        self.record(MockCall::UpdateSheetExtent {
            sheet_id: sheet_id.to_string(),
            extent,
        });
        let mut data = lock(&self.data);
        match data.sheets.iter_mut().find(|s| s.summary.id == sheet_id) {
            Some(sheet) => {
                sheet.extent = extent;
                Ok(())
            }
            None => Err(StoreError::not_found("sheet", sheet_id)),
        }
    }

    async fn list_cells(&self, sheet_id: &str) -> Result<Vec<CellRecord>, StoreError> {
        self.record(MockCall::ListCells(sheet_id.to_string()));
        let data = lock(&self.data);
        Self::require_sheet(&data, sheet_id)?;
        let mut cells: Vec<CellRecord> = data
            .cells
            .iter()
            .filter(|((sid, _), _)| sid == sheet_id)
            .map(|((_, cell), value)| CellRecord {
                cell: *cell,
                value: value.clone(),
            })
            .collect();
        cells.sort_by_key(|record| record.cell);
        Ok(cells)
    }

    async fn upsert_cell(
        &self,
        sheet_id: &str,
        cell: CellRef,
        value: &str,
        _updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.record(MockCall::UpsertCell {
            sheet_id: sheet_id.to_string(),
            cell,
            value: value.to_string(),
        });

        let delay = lock(&self.write_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let err = lock(&self.cell_write_errors).pop_front();
        if let Some(err) = err {
            return Err(err);
        }

        self.insert_cell(sheet_id, cell, value);
        if self.echo_changes {
            self.emit(ChangeEvent::Cell(CellChange {
                sheet_id: sheet_id.to_string(),
                cell,
                value: value.to_string(),
            }));
        }
        Ok(())
    }

    async fn get_annotation(
        &self,
        sheet_id: &str,
        cell: CellRef,
    ) -> Result<Option<AnnotationRecord>, StoreError> {
        self.record(MockCall::GetAnnotation {
            sheet_id: sheet_id.to_string(),
            cell,
        });
        Ok(self.annotation(sheet_id, cell))
    }

    async fn upsert_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        self.record(MockCall::UpsertAnnotation(record.clone()));
        if let Some(err) = Self::take_error(&self.annotation_write_error) {
            return Err(err);
        }
        self.insert_annotation(record.clone());
        if self.echo_changes {
            self.emit(ChangeEvent::Annotation(AnnotationChange::from(record)));
        }
        Ok(())
    }

    async fn subscribe(&self, sheet_id: &str) -> Result<Box<dyn ChangeStream>, StoreError> {
        self.record(MockCall::Subscribe(sheet_id.to_string()));
        if let Some(err) = Self::take_error(&self.subscribe_error) {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.data).subscribers.push(Subscriber {
            sheet_id: sheet_id.to_string(),
            tx,
        });
        Ok(Box::new(MockChangeStream {
            sheet_id: sheet_id.to_string(),
            rx,
            calls: Arc::clone(&self.calls),
            unsubscribe_error: Arc::clone(&self.unsubscribe_error),
        }))
    }
}

/// Change stream handed out by `MockRemoteStore`.
pub struct MockChangeStream {
    sheet_id: String,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    unsubscribe_error: Arc<Mutex<Option<StoreError>>>,
}

#[async_trait]
impl ChangeStream for MockChangeStream {
    async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        lock(&self.calls).push(MockCall::Unsubscribe(self.sheet_id.clone()));
        self.rx.close();
        match lock(&self.unsubscribe_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
