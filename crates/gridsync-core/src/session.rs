//! The session context: one owner for the active sheet, the cell cache, the
//! debouncer, focus, the realtime bridge, the open annotation and the surface.
//!
//! Every state change happens inside a `&mut SyncSession` method. Background
//! work (debounced writes, the change stream) only produces messages, which
//! `step` applies one at a time in arrival order. Switching sheets resets all
//! per-sheet state before anything of the new sheet is loaded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationState, OpenAnnotation};
use crate::cache::CellCache;
use crate::config::SyncConfig;
use crate::debounce::{EditDebouncer, WriteCompletion};
use crate::error::SyncError;
use crate::focus::FocusTracker;
use crate::realtime::{
    BridgeEvent, BridgeState, DiscardReason, RealtimeBridge, Route, RouteTargets,
};
use crate::store::RemoteStore;
use crate::surface::{GridSurface, SyncStatus};
use crate::types::{AnnotationRecord, CellRef, Extent, SheetId, SheetSummary};

/// The sheet the session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSheet {
    pub id: SheetId,
    pub extent: Extent,
}

/// What a call to `step` applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A debounced write committed; cache holds `value`.
    CellSaved { cell: CellRef, value: String },
    /// A debounced write failed; cache kept its last known-good value.
    CellSaveFailed { cell: CellRef, error: SyncError },
    /// A write for a sheet that is no longer active finished and was dropped.
    StaleWriteDropped { sheet_id: SheetId, cell: CellRef },
    /// A realtime event was routed.
    Remote(Route),
    /// The realtime channel closed; call `resubscribe` to restart it.
    SubscriptionLost { sheet_id: SheetId },
    /// The transient "saved" status expired.
    StatusCleared,
}

enum Wake {
    Write(WriteCompletion),
    Bridge(BridgeEvent),
    StatusDeadline,
}

pub struct SyncSession {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    active: Option<ActiveSheet>,
    cache: CellCache,
    debouncer: EditDebouncer,
    completions: mpsc::UnboundedReceiver<WriteCompletion>,
    focus: FocusTracker,
    bridge: RealtimeBridge,
    annotations: AnnotationState,
    surface: Box<dyn GridSurface>,
    status: SyncStatus,
    status_clear_at: Option<Instant>,
}

impl SyncSession {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        config: SyncConfig,
        surface: Box<dyn GridSurface>,
    ) -> Self {
        let (tx, completions) = mpsc::unbounded_channel();
        let debouncer = EditDebouncer::new(Arc::clone(&store), config.debounce, tx);
        let annotations = AnnotationState::new(config.checklist_labels.clone());
        Self {
            store,
            config,
            active: None,
            cache: CellCache::new(),
            debouncer,
            completions,
            focus: FocusTracker::new(),
            bridge: RealtimeBridge::new(),
            annotations,
            surface,
            status: SyncStatus::Idle,
            status_clear_at: None,
        }
    }

    // -- accessors --

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn active_sheet(&self) -> Option<&ActiveSheet> {
        self.active.as_ref()
    }

    pub fn cache(&self) -> &CellCache {
        &self.cache
    }

    /// Cached value of a cell of the active sheet.
    pub fn cell_value(&self, cell: CellRef) -> &str {
        match &self.active {
            Some(active) => self.cache.get(&active.id, cell),
            None => "",
        }
    }

    pub fn focus(&self) -> &FocusTracker {
        &self.focus
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn surface(&self) -> &dyn GridSurface {
        &*self.surface
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn has_pending_edit(&self, cell: CellRef) -> bool {
        self.debouncer.is_pending(cell)
    }

    // -- sheets --

    pub async fn list_sheets(&self) -> Result<Vec<SheetSummary>, SyncError> {
        Ok(self.store.list_sheets().await?)
    }

    /// Select the first sheet, creating the default one if the store is empty.
    pub async fn bootstrap(&mut self) -> Result<Vec<SheetSummary>, SyncError> {
        let mut sheets = self.store.list_sheets().await?;
        if sheets.is_empty() {
            let name = self.config.default_sheet_name.clone();
            info!(%name, "no sheets found; creating default sheet");
            self.store
                .create_sheet(&name, self.config.default_extent)
                .await?;
            sheets = self.store.list_sheets().await?;
        }
        if let Some(first) = sheets.first() {
            let id = first.id.clone();
            self.select_sheet(&id).await?;
        }
        Ok(sheets)
    }

    /// Create a sheet with the default extent and switch to it.
    pub async fn create_sheet(&mut self, name: &str) -> Result<SheetSummary, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation {
                message: "sheet name is required".into(),
            });
        }
        let sheet = self
            .store
            .create_sheet(name, self.config.default_extent)
            .await?;
        info!(sheet_id = %sheet.id, name, "sheet created");
        self.select_sheet(&sheet.id).await?;
        Ok(sheet)
    }

    /// Switch to `sheet_id`: reset all per-sheet state, load its cells,
    /// rebuild the surface and resubscribe.
    pub async fn select_sheet(&mut self, sheet_id: &str) -> Result<(), SyncError> {
        self.set_status(SyncStatus::Loading);
        let extent = match self.store.get_sheet_meta(sheet_id).await {
            Ok(extent) => extent.or_default_bounds(self.config.default_extent),
            Err(err) => {
                self.set_status(SyncStatus::LoadFailed(err.to_string()));
                return Err(err.into());
            }
        };

        self.reset_sheet_state().await;

        let cells = match self.store.list_cells(sheet_id).await {
            Ok(cells) => cells,
            Err(err) => {
                self.set_status(SyncStatus::LoadFailed(err.to_string()));
                return Err(err.into());
            }
        };
        self.cache.load(sheet_id, cells);
        self.active = Some(ActiveSheet {
            id: sheet_id.to_string(),
            extent,
        });
        self.surface.rebuild(extent, self.cache.sheet_cells(sheet_id));
        info!(%sheet_id, %extent, cells = self.cache.len(), "sheet loaded");

        let subscribed = self.bridge.switch_to(&*self.store, sheet_id).await;
        self.set_status(SyncStatus::Idle);
        subscribed
    }

    async fn reset_sheet_state(&mut self) {
        self.bridge.teardown().await;
        self.debouncer.cancel_all();
        if let Some(dropped) = self.annotations.discard() {
            debug!(cell = %dropped.cell(), "closing annotation editor on sheet switch");
        }
        self.focus.clear_focused();
        self.cache.clear();
        self.active = None;
    }

    /// Re-establish the change stream for the active sheet.
    pub async fn resubscribe(&mut self) -> Result<(), SyncError> {
        let sheet_id = self.require_active()?.id.clone();
        self.bridge.switch_to(&*self.store, &sheet_id).await
    }

    pub async fn add_row(&mut self) -> Result<Extent, SyncError> {
        let extent = self.require_active()?.extent.with_extra_row();
        self.resize(extent).await
    }

    pub async fn add_col(&mut self) -> Result<Extent, SyncError> {
        let extent = self.require_active()?.extent.with_extra_col();
        self.resize(extent).await
    }

    async fn resize(&mut self, extent: Extent) -> Result<Extent, SyncError> {
        let sheet_id = self.require_active()?.id.clone();
        self.store.update_sheet_extent(&sheet_id, extent).await?;
        if let Some(active) = self.active.as_mut() {
            active.extent = extent;
        }
        self.surface.rebuild(extent, self.cache.sheet_cells(&sheet_id));
        debug!(%sheet_id, %extent, "sheet extent grown");
        Ok(extent)
    }

    // -- cells and focus --

    /// Record a keystroke's resulting text for `cell` and (re)arm its write.
    pub fn edit_cell(&mut self, cell: CellRef, value: &str) -> Result<(), SyncError> {
        let sheet_id = self.require_cell(cell)?.id.clone();
        self.surface.render_cell(cell, value);
        self.debouncer.on_local_edit(&sheet_id, cell, value);
        Ok(())
    }

    /// Move input focus to `cell`. The cell that lost focus is reconciled.
    pub fn focus_cell(&mut self, cell: CellRef) -> Result<(), SyncError> {
        self.require_cell(cell)?;
        if let Some(previous) = self.focus.set_focused(cell) {
            self.reconcile(previous);
        }
        Ok(())
    }

    /// Drop focus. Returns the cell that lost it.
    pub fn blur(&mut self) -> Option<CellRef> {
        let previous = self.focus.clear_focused()?;
        self.reconcile(previous);
        Some(previous)
    }

    /// Move focus one row down, staying on the last row.
    pub fn focus_down(&mut self) -> Result<Option<CellRef>, SyncError> {
        let max_rows = self.require_active()?.extent.max_rows;
        match self.focus.below(max_rows) {
            Some(next) => {
                self.focus_cell(next)?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Show the cached value in a cell that just lost focus, unless the user
    /// still has an unsaved edit there.
    fn reconcile(&mut self, cell: CellRef) {
        if self.debouncer.is_pending(cell) {
            return;
        }
        if let Some(active) = &self.active {
            let cached = self.cache.get(&active.id, cell);
            if self.surface.cell_text(cell) != cached {
                debug!(sheet_id = %active.id, %cell, "reconciling cell with cache after focus loss");
                self.surface.render_cell(cell, cached);
            }
        }
    }

    // -- annotations --

    pub async fn open_annotation(&mut self, cell: CellRef) -> Result<&mut OpenAnnotation, SyncError> {
        let sheet_id = self.require_cell(cell)?.id.clone();
        self.annotations
            .open(&*self.store, &sheet_id, cell)
            .await
    }

    pub fn annotation(&self) -> Option<&OpenAnnotation> {
        self.annotations.current()
    }

    pub fn annotation_mut(&mut self) -> Option<&mut OpenAnnotation> {
        self.annotations.current_mut()
    }

    pub async fn save_annotation(&mut self) -> Result<AnnotationRecord, SyncError> {
        match self.annotations.save(&*self.store).await {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(error = %err, "saving annotation failed");
                Err(err)
            }
        }
    }

    pub fn discard_annotation(&mut self) -> Option<OpenAnnotation> {
        self.annotations.discard()
    }

    pub async fn reload_annotation(&mut self) -> Result<&mut OpenAnnotation, SyncError> {
        self.annotations.reload(&*self.store).await
    }

    // -- event loop --

    /// Wait for and apply the next write completion, realtime event or
    /// status expiry.
    pub async fn step(&mut self) -> SessionEvent {
        let clear_at = self.status_clear_at;
        let wake = tokio::select! {
            biased;
            Some(done) = self.completions.recv() => Wake::Write(done),
            event = self.bridge.next_event() => Wake::Bridge(event),
            _ = status_deadline(clear_at) => Wake::StatusDeadline,
        };

        match wake {
            Wake::Write(done) => self.apply_completion(done),
            Wake::Bridge(BridgeEvent::Change(event)) => {
                let route = match self.active.as_ref() {
                    Some(active) => self.bridge.route(
                        &event,
                        RouteTargets {
                            extent: active.extent,
                            cache: &mut self.cache,
                            focus: &self.focus,
                            annotations: &mut self.annotations,
                            surface: &mut *self.surface,
                        },
                    ),
                    None => Route::Discarded {
                        cell: event.cell(),
                        reason: DiscardReason::NoActiveSheet,
                    },
                };
                SessionEvent::Remote(route)
            }
            Wake::Bridge(BridgeEvent::Closed { sheet_id }) => {
                SessionEvent::SubscriptionLost { sheet_id }
            }
            Wake::StatusDeadline => {
                self.set_status(SyncStatus::Idle);
                SessionEvent::StatusCleared
            }
        }
    }

    fn apply_completion(&mut self, done: WriteCompletion) -> SessionEvent {
        let Some(active) = self.active.as_ref().filter(|a| a.id == done.sheet_id) else {
            debug!(sheet_id = %done.sheet_id, cell = %done.cell, "dropping write for inactive sheet");
            return SessionEvent::StaleWriteDropped {
                sheet_id: done.sheet_id,
                cell: done.cell,
            };
        };
        let sheet_id = active.id.clone();
        self.debouncer.settle(done.cell, done.seq);

        match done.result {
            Ok(()) => {
                self.cache.set(&sheet_id, done.cell, done.value.as_str());
                // A newer local edit still owns the cell's text.
                if !self.focus.is_focused(done.cell) && !self.debouncer.is_pending(done.cell) {
                    self.surface.render_cell(done.cell, &done.value);
                }
                self.set_status(SyncStatus::Saved);
                self.status_clear_at = Some(Instant::now() + self.config.status_clear);
                debug!(%sheet_id, cell = %done.cell, "cell saved");
                SessionEvent::CellSaved {
                    cell: done.cell,
                    value: done.value,
                }
            }
            Err(err) => {
                warn!(%sheet_id, cell = %done.cell, error = %err, "cell save failed; cache left at last known value");
                self.set_status(SyncStatus::SaveFailed(err.to_string()));
                SessionEvent::CellSaveFailed {
                    cell: done.cell,
                    error: SyncError::TransientWrite {
                        sheet_id,
                        cell: done.cell,
                        message: err.to_string(),
                    },
                }
            }
        }
    }

    fn set_status(&mut self, status: SyncStatus) {
        self.status_clear_at = None;
        self.surface.show_status(&status);
        self.status = status;
    }

    fn require_active(&self) -> Result<&ActiveSheet, SyncError> {
        self.active.as_ref().ok_or(SyncError::NoActiveSheet)
    }

    fn require_cell(&self, cell: CellRef) -> Result<&ActiveSheet, SyncError> {
        let active = self.require_active()?;
        if !active.extent.contains(cell) {
            return Err(SyncError::OutOfBounds {
                cell,
                extent: active.extent,
            });
        }
        Ok(active)
    }
}

async fn status_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
