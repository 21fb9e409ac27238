//! Realtime bridge: one change subscription per active sheet, and the routing
//! of its events into the cache, the surface and the open annotation.
//!
//! Lifecycle per sheet: `Unsubscribed → Subscribing → Subscribed`. Switching
//! sheets tears the previous subscription down first; teardown failures are
//! logged and swallowed.

use std::fmt;

use tracing::{debug, warn};

use crate::annotation::AnnotationState;
use crate::cache::CellCache;
use crate::error::SyncError;
use crate::focus::FocusTracker;
use crate::store::{ChangeStream, RemoteStore};
use crate::surface::GridSurface;
use crate::types::{CellRef, ChangeEvent, Extent, SheetId};

/// Subscription state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

/// What the bridge produced when polled.
#[derive(Debug)]
pub enum BridgeEvent {
    Change(ChangeEvent),
    /// The store closed the stream. The bridge is `Unsubscribed` again.
    Closed { sheet_id: SheetId },
}

/// Why an event was dropped without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Tagged with a sheet other than the active one.
    StaleSheet,
    OutOfBounds,
    NoActiveSheet,
}

/// Outcome of routing one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Discarded {
        cell: CellRef,
        reason: DiscardReason,
    },
    /// Cache updated; `rendered` is false when the cell had focus.
    CellApplied { cell: CellRef, rendered: bool },
    /// The open editor for this cell was flagged as having a newer remote
    /// version. Its contents were left alone.
    AnnotationFlagged { cell: CellRef },
    /// No editor is open for this cell; nothing is cached for closed ones.
    AnnotationIgnored { cell: CellRef },
}

/// Mutable targets an event may be routed into.
pub struct RouteTargets<'a> {
    pub extent: Extent,
    pub cache: &'a mut CellCache,
    pub focus: &'a FocusTracker,
    pub annotations: &'a mut AnnotationState,
    pub surface: &'a mut dyn GridSurface,
}

pub struct RealtimeBridge {
    state: BridgeState,
    sheet_id: Option<SheetId>,
    stream: Option<Box<dyn ChangeStream>>,
}

impl Default for RealtimeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeBridge {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Unsubscribed,
            sheet_id: None,
            stream: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Sheet whose events are currently accepted.
    pub fn sheet_id(&self) -> Option<&str> {
        self.sheet_id.as_deref()
    }

    /// Tear down any existing subscription and subscribe to `sheet_id`.
    pub async fn switch_to(
        &mut self,
        store: &dyn RemoteStore,
        sheet_id: &str,
    ) -> Result<(), SyncError> {
        self.teardown().await;
        self.sheet_id = Some(sheet_id.to_string());
        self.state = BridgeState::Subscribing;

        match store.subscribe(sheet_id).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = BridgeState::Subscribed;
                debug!(%sheet_id, "realtime subscription established");
                Ok(())
            }
            Err(err) => {
                self.state = BridgeState::Unsubscribed;
                warn!(%sheet_id, error = %err, "realtime subscription failed");
                Err(SyncError::Subscription {
                    sheet_id: sheet_id.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Best-effort unsubscribe. Errors are logged, never returned.
    pub async fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.unsubscribe().await {
                warn!(
                    sheet_id = self.sheet_id.as_deref().unwrap_or_default(),
                    error = %err,
                    "realtime teardown failed; ignoring"
                );
            }
        }
        self.state = BridgeState::Unsubscribed;
    }

    /// Wait for the next event. Pends forever while unsubscribed.
    pub async fn next_event(&mut self) -> BridgeEvent {
        let next = match self.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => return std::future::pending().await,
        };
        match next {
            Some(event) => BridgeEvent::Change(event),
            None => {
                self.stream = None;
                self.state = BridgeState::Unsubscribed;
                let sheet_id = self.sheet_id.clone().unwrap_or_default();
                warn!(%sheet_id, "realtime channel closed by store");
                BridgeEvent::Closed { sheet_id }
            }
        }
    }

    /// Apply one change event with focus-aware suppression.
    pub fn route(&self, event: &ChangeEvent, targets: RouteTargets<'_>) -> Route {
        let cell = event.cell();
        let Some(active) = self.sheet_id.as_deref() else {
            return Route::Discarded {
                cell,
                reason: DiscardReason::NoActiveSheet,
            };
        };
        if event.sheet_id() != active {
            debug!(event_sheet = event.sheet_id(), active_sheet = active, %cell, "dropping event for inactive sheet");
            return Route::Discarded {
                cell,
                reason: DiscardReason::StaleSheet,
            };
        }
        if !targets.extent.contains(cell) {
            debug!(sheet_id = active, %cell, "dropping event outside grid bounds");
            return Route::Discarded {
                cell,
                reason: DiscardReason::OutOfBounds,
            };
        }

        match event {
            ChangeEvent::Cell(change) => {
                targets.cache.set(active, cell, change.value.as_str());
                let rendered = !targets.focus.is_focused(cell);
                if rendered {
                    targets.surface.render_cell(cell, &change.value);
                } else {
                    debug!(sheet_id = active, %cell, "remote value held back from focused cell");
                }
                Route::CellApplied { cell, rendered }
            }
            ChangeEvent::Annotation(change) => {
                if targets
                    .annotations
                    .mark_remote_newer(active, cell, change.updated_at)
                {
                    debug!(sheet_id = active, %cell, "open annotation has a newer remote version");
                    Route::AnnotationFlagged { cell }
                } else {
                    Route::AnnotationIgnored { cell }
                }
            }
        }
    }
}
