//! Per-cell debouncing of local edits into single store writes.
//!
//! Each cell has at most one armed timer. A new edit cancels the armed timer
//! and starts a fresh one carrying the new value, so only the last value of a
//! burst is ever written. When a timer fires its task performs the write and
//! posts a `WriteCompletion` back to the owner, which applies completions in
//! the order they arrive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StoreError;
use crate::store::RemoteStore;
use crate::types::{CellRef, SheetId};

/// Result of one debounced write, delivered after the store call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCompletion {
    pub sheet_id: SheetId,
    pub cell: CellRef,
    pub value: String,
    /// Sequence number of the edit that produced this write.
    pub seq: u64,
    pub result: Result<(), StoreError>,
}

struct PendingEdit {
    seq: u64,
    cancel: CancellationToken,
}

/// Coalesces bursts of edits per cell.
pub struct EditDebouncer {
    store: Arc<dyn RemoteStore>,
    quiet: Duration,
    next_seq: u64,
    pending: HashMap<CellRef, PendingEdit>,
    completions: mpsc::UnboundedSender<WriteCompletion>,
}

impl EditDebouncer {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        quiet: Duration,
        completions: mpsc::UnboundedSender<WriteCompletion>,
    ) -> Self {
        Self {
            store,
            quiet,
            next_seq: 0,
            pending: HashMap::new(),
            completions,
        }
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet
    }

    /// Arm (or re-arm) the timer for `cell` with `value`.
    ///
    /// Returns the sequence number that the eventual completion will carry.
    pub fn on_local_edit(&mut self, sheet_id: &str, cell: CellRef, value: &str) -> u64 {
        if let Some(previous) = self.pending.remove(&cell) {
            // Already-dispatched writes ignore this; they are past the timer.
            previous.cancel.cancel();
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let cancel = CancellationToken::new();
        self.pending.insert(
            cell,
            PendingEdit {
                seq,
                cancel: cancel.clone(),
            },
        );

        let deadline = Instant::now() + self.quiet;
        let store = Arc::clone(&self.store);
        let completions = self.completions.clone();
        let sheet_id = sheet_id.to_string();
        let value = value.to_string();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%sheet_id, %cell, seq, "debounced edit superseded");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            debug!(%sheet_id, %cell, seq, "flushing debounced edit");
            let result = store.upsert_cell(&sheet_id, cell, &value, Utc::now()).await;
            // The receiver is gone only when the session was dropped.
            let _ = completions.send(WriteCompletion {
                sheet_id,
                cell,
                value,
                seq,
                result,
            });
        });

        seq
    }

    /// Whether `cell` has a local edit that has not yet completed.
    pub fn is_pending(&self, cell: CellRef) -> bool {
        self.pending.contains_key(&cell)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget the pending entry for `cell` if `seq` is still the latest edit.
    pub fn settle(&mut self, cell: CellRef, seq: u64) {
        if self.pending.get(&cell).is_some_and(|p| p.seq == seq) {
            self.pending.remove(&cell);
        }
    }

    /// Cancel every armed timer. Writes already dispatched still complete and
    /// must be discarded by the owner.
    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.cancel.cancel();
        }
    }
}

impl Drop for EditDebouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
