#![allow(clippy::expect_used, clippy::unwrap_used)]

//! End-to-end behavior of a sync session against the mock store: debounced
//! saves, focus-aware remote updates, sheet switching and status handling.

use std::sync::Arc;
use std::time::Duration;

use gridsync_core::config::SyncConfig;
use gridsync_core::error::{StoreError, SyncError};
use gridsync_core::mock::{MockCall, MockRemoteStore};
use gridsync_core::realtime::{BridgeState, DiscardReason, Route};
use gridsync_core::session::{SessionEvent, SyncSession};
use gridsync_core::surface::{MemorySurface, SyncStatus};
use gridsync_core::types::{CellChange, CellRef, ChangeEvent, Extent, SheetSummary};
use tokio::time::{sleep, timeout, Instant};

fn new_session(store: &Arc<MockRemoteStore>) -> SyncSession {
    SyncSession::new(
        store.clone(),
        SyncConfig::default(),
        Box::new(MemorySurface::new()),
    )
}

async fn session_on_sheet(extent: Extent) -> (Arc<MockRemoteStore>, SyncSession, SheetSummary) {
    let store = Arc::new(MockRemoteStore::new());
    let sheet = store.insert_sheet("S", extent);
    let mut session = new_session(&store);
    session.select_sheet(&sheet.id).await.unwrap();
    (store, session, sheet)
}

fn cell_change(sheet_id: &str, cell: CellRef, value: &str) -> ChangeEvent {
    ChangeEvent::Cell(CellChange {
        sheet_id: sheet_id.to_string(),
        cell,
        value: value.to_string(),
    })
}

fn position(calls: &[MockCall], wanted: &MockCall) -> usize {
    calls
        .iter()
        .position(|call| call == wanted)
        .unwrap_or_else(|| panic!("call {wanted:?} not recorded in {calls:?}"))
}

// ── Debounced saves ──

#[tokio::test(start_paused = true)]
async fn rapid_edits_produce_one_write_of_the_final_value() {
    let (store, mut session, _sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let cell = CellRef::new(2, 2);

    session.focus_cell(cell).unwrap();
    session.edit_cell(cell, "5").unwrap();
    sleep(Duration::from_millis(200)).await;
    session.edit_cell(cell, "50").unwrap();
    let second_keystroke = Instant::now();

    let event = session.step().await;
    let waited = second_keystroke.elapsed();

    assert_eq!(
        event,
        SessionEvent::CellSaved {
            cell,
            value: "50".into()
        }
    );
    assert!(
        waited >= Duration::from_millis(700) && waited < Duration::from_millis(750),
        "write issued after {waited:?}"
    );
    assert_eq!(store.cell_writes(), vec![(cell, "50".to_string())]);
    assert_eq!(session.cell_value(cell), "50");
    assert_eq!(session.surface().cell_text(cell), "50");
    assert_eq!(session.status(), &SyncStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn saved_status_clears_after_interval() {
    let (_store, mut session, _sheet) = session_on_sheet(Extent::new(3, 3)).await;
    session.edit_cell(CellRef::new(1, 1), "v").unwrap();
    assert!(matches!(session.step().await, SessionEvent::CellSaved { .. }));

    let saved_at = Instant::now();
    assert_eq!(session.step().await, SessionEvent::StatusCleared);
    let shown = saved_at.elapsed();
    assert!(
        shown >= Duration::from_millis(900) && shown < Duration::from_millis(950),
        "status cleared after {shown:?}"
    );
    assert_eq!(session.status(), &SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_write_keeps_last_known_value_and_does_not_retry() {
    let store = Arc::new(MockRemoteStore::new());
    let sheet = store.insert_sheet("S", Extent::new(3, 3));
    let cell = CellRef::new(1, 1);
    store.insert_cell(&sheet.id, cell, "old");
    store.push_cell_write_error(StoreError::unavailable("offline"));
    let mut session = new_session(&store);
    session.select_sheet(&sheet.id).await.unwrap();

    session.edit_cell(cell, "new").unwrap();
    match session.step().await {
        SessionEvent::CellSaveFailed { cell: failed, error } => {
            assert_eq!(failed, cell);
            assert!(matches!(error, SyncError::TransientWrite { .. }));
            assert!(error.is_retryable());
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(session.cell_value(cell), "old");
    assert!(matches!(session.status(), SyncStatus::SaveFailed(_)));
    assert!(!session.has_pending_edit(cell));

    assert!(timeout(Duration::from_secs(5), session.step()).await.is_err());
    assert_eq!(store.cell_writes().len(), 1);

    // The next edit is the retry.
    session.edit_cell(cell, "newer").unwrap();
    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "newer".into()
        }
    );
    assert_eq!(session.cell_value(cell), "newer");
}

#[tokio::test(start_paused = true)]
async fn writes_apply_in_completion_order() {
    let (store, mut session, _sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let cell = CellRef::new(1, 1);
    store.push_write_delay(Duration::from_millis(1_000));

    session.edit_cell(cell, "first").unwrap();
    sleep(Duration::from_millis(750)).await;
    assert!(session.has_pending_edit(cell), "first write is in flight");
    session.edit_cell(cell, "second").unwrap();

    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "second".into()
        }
    );
    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "first".into()
        }
    );
    assert_eq!(session.cell_value(cell), "first");
    assert_eq!(
        store.cell_writes(),
        vec![(cell, "first".to_string()), (cell, "second".to_string())]
    );
}

// ── Focus-aware remote updates ──

#[tokio::test(start_paused = true)]
async fn remote_value_does_not_clobber_focused_cell() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let cell = CellRef::new(1, 1);

    session.focus_cell(cell).unwrap();
    session.edit_cell(cell, "partial").unwrap();
    assert!(matches!(session.step().await, SessionEvent::CellSaved { .. }));

    store.emit(cell_change(&sheet.id, cell, "X"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::CellApplied {
            cell,
            rendered: false
        })
    );
    assert_eq!(session.surface().cell_text(cell), "partial");
    assert_eq!(session.cell_value(cell), "X");

    assert_eq!(session.blur(), Some(cell));
    assert_eq!(session.surface().cell_text(cell), "X");
}

#[tokio::test(start_paused = true)]
async fn blur_with_pending_edit_keeps_local_text() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let cell = CellRef::new(2, 1);

    session.focus_cell(cell).unwrap();
    session.edit_cell(cell, "mine").unwrap();
    store.emit(cell_change(&sheet.id, cell, "theirs"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::CellApplied {
            cell,
            rendered: false
        })
    );

    session.blur();
    assert!(session.has_pending_edit(cell));
    assert_eq!(session.surface().cell_text(cell), "mine");

    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "mine".into()
        }
    );
    assert_eq!(session.cell_value(cell), "mine");
    assert_eq!(session.surface().cell_text(cell), "mine");
}

#[tokio::test(start_paused = true)]
async fn older_write_finishing_late_does_not_repaint_newer_edit() {
    let (store, mut session, _sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let cell = CellRef::new(1, 1);
    store.push_write_delay(Duration::from_millis(500));

    session.focus_cell(cell).unwrap();
    session.edit_cell(cell, "a").unwrap();
    sleep(Duration::from_millis(750)).await;
    session.edit_cell(cell, "ab").unwrap();
    session.blur();

    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "a".into()
        }
    );
    assert_eq!(session.cell_value(cell), "a");
    assert!(session.has_pending_edit(cell));
    assert_eq!(session.surface().cell_text(cell), "ab");

    assert_eq!(
        session.step().await,
        SessionEvent::CellSaved {
            cell,
            value: "ab".into()
        }
    );
    assert!(!session.has_pending_edit(cell));
    assert_eq!(session.surface().cell_text(cell), "ab");
}

#[tokio::test(start_paused = true)]
async fn remote_value_renders_unfocused_cell() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;
    session.focus_cell(CellRef::new(1, 1)).unwrap();

    let other = CellRef::new(3, 2);
    store.emit(cell_change(&sheet.id, other, "fresh"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::CellApplied {
            cell: other,
            rendered: true
        })
    );
    assert_eq!(session.surface().cell_text(other), "fresh");
    assert_eq!(session.cell_value(other), "fresh");
}

#[tokio::test(start_paused = true)]
async fn moving_focus_reconciles_the_cell_left_behind() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let first = CellRef::new(1, 1);

    session.focus_cell(first).unwrap();
    store.emit(cell_change(&sheet.id, first, "X"));
    session.step().await;
    assert_eq!(session.surface().cell_text(first), "");

    session.focus_cell(CellRef::new(1, 2)).unwrap();
    assert_eq!(session.surface().cell_text(first), "X");
    assert!(session.focus().is_focused(CellRef::new(1, 2)));
}

#[tokio::test(start_paused = true)]
async fn events_outside_extent_are_ignored() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;
    let outside = CellRef::new(5, 5);

    store.emit(cell_change(&sheet.id, outside, "far"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::Discarded {
            cell: outside,
            reason: DiscardReason::OutOfBounds
        })
    );
    assert!(session.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn own_write_echo_is_applied_like_any_remote_change() {
    let store = Arc::new(MockRemoteStore::new().with_change_echo());
    let sheet = store.insert_sheet("S", Extent::new(3, 3));
    let mut session = new_session(&store);
    session.select_sheet(&sheet.id).await.unwrap();
    let cell = CellRef::new(1, 3);

    session.edit_cell(cell, "echo").unwrap();
    assert!(matches!(session.step().await, SessionEvent::CellSaved { .. }));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::CellApplied {
            cell,
            rendered: true
        })
    );
    assert_eq!(session.cell_value(cell), "echo");
}

// ── Sheet switching ──

#[tokio::test(start_paused = true)]
async fn switching_sheets_resets_state_and_resubscribes_in_order() {
    let store = Arc::new(MockRemoteStore::new());
    let one = store.insert_sheet("One", Extent::new(3, 3));
    let two = store.insert_sheet("Two", Extent::new(3, 3));
    store.insert_cell(&one.id, CellRef::new(1, 1), "one");
    store.insert_cell(&two.id, CellRef::new(2, 2), "two");

    let mut session = new_session(&store);
    session.select_sheet(&one.id).await.unwrap();
    assert_eq!(session.cell_value(CellRef::new(1, 1)), "one");

    session.focus_cell(CellRef::new(1, 2)).unwrap();
    session.edit_cell(CellRef::new(1, 2), "draft").unwrap();
    session.open_annotation(CellRef::new(1, 1)).await.unwrap();

    session.select_sheet(&two.id).await.unwrap();

    assert_eq!(session.active_sheet().unwrap().id, two.id);
    assert_eq!(session.cell_value(CellRef::new(1, 1)), "");
    assert_eq!(session.cell_value(CellRef::new(2, 2)), "two");
    assert_eq!(session.cache().len(), 1);
    assert_eq!(session.focus().focused(), None);
    assert!(session.annotation().is_none());
    assert_eq!(session.surface().cell_text(CellRef::new(1, 2)), "");
    assert_eq!(session.bridge_state(), BridgeState::Subscribed);

    let calls = store.calls();
    let unsubscribed = position(&calls, &MockCall::Unsubscribe(one.id.clone()));
    let subscribed = position(&calls, &MockCall::Subscribe(two.id.clone()));
    assert!(unsubscribed < subscribed, "teardown must precede resubscribe");
    assert_eq!(store.live_subscriptions(), 1);

    // The cancelled timer of sheet one never fires.
    sleep(Duration::from_secs(2)).await;
    assert!(store.cell_writes().is_empty());

    // A late event tagged with the old sheet is discarded.
    store.emit_unfiltered(cell_change(&one.id, CellRef::new(1, 1), "late"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::Discarded {
            cell: CellRef::new(1, 1),
            reason: DiscardReason::StaleSheet
        })
    );
    assert_eq!(session.cell_value(CellRef::new(1, 1)), "");
}

#[tokio::test(start_paused = true)]
async fn in_flight_write_for_previous_sheet_is_dropped() {
    let store = Arc::new(MockRemoteStore::new());
    let one = store.insert_sheet("One", Extent::new(3, 3));
    let two = store.insert_sheet("Two", Extent::new(3, 3));
    store.push_write_delay(Duration::from_millis(500));
    let cell = CellRef::new(1, 1);

    let mut session = new_session(&store);
    session.select_sheet(&one.id).await.unwrap();
    session.edit_cell(cell, "x").unwrap();
    sleep(Duration::from_millis(750)).await;
    session.select_sheet(&two.id).await.unwrap();

    assert_eq!(
        session.step().await,
        SessionEvent::StaleWriteDropped {
            sheet_id: one.id.clone(),
            cell
        }
    );
    assert_eq!(session.cell_value(cell), "");
    assert_eq!(store.cell_value(&one.id, cell), Some("x".to_string()));
}

#[tokio::test(start_paused = true)]
async fn teardown_failure_is_swallowed() {
    let store = Arc::new(MockRemoteStore::new());
    let one = store.insert_sheet("One", Extent::new(3, 3));
    let two = store.insert_sheet("Two", Extent::new(3, 3));
    let mut session = new_session(&store);
    session.select_sheet(&one.id).await.unwrap();

    store.set_unsubscribe_error(StoreError::SubscriptionClosed {
        message: "socket gone".into(),
    });
    session.select_sheet(&two.id).await.unwrap();
    assert_eq!(session.bridge_state(), BridgeState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_leaves_sheet_loaded_but_unsubscribed() {
    let store = Arc::new(MockRemoteStore::new());
    let sheet = store.insert_sheet("S", Extent::new(3, 3));
    store.insert_cell(&sheet.id, CellRef::new(1, 1), "kept");
    store.set_subscribe_error(StoreError::unavailable("realtime down"));
    let mut session = new_session(&store);

    let err = session.select_sheet(&sheet.id).await.unwrap_err();
    assert!(matches!(err, SyncError::Subscription { .. }));
    assert_eq!(session.bridge_state(), BridgeState::Unsubscribed);
    assert_eq!(session.cell_value(CellRef::new(1, 1)), "kept");

    session.resubscribe().await.unwrap();
    assert_eq!(session.bridge_state(), BridgeState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn lost_subscription_can_be_restarted() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;

    store.close_subscriptions();
    assert_eq!(
        session.step().await,
        SessionEvent::SubscriptionLost {
            sheet_id: sheet.id.clone()
        }
    );
    assert_eq!(session.bridge_state(), BridgeState::Unsubscribed);

    session.resubscribe().await.unwrap();
    store.emit(cell_change(&sheet.id, CellRef::new(2, 2), "back"));
    assert_eq!(
        session.step().await,
        SessionEvent::Remote(Route::CellApplied {
            cell: CellRef::new(2, 2),
            rendered: true
        })
    );
}

#[tokio::test(start_paused = true)]
async fn selecting_unknown_sheet_reports_not_found() {
    let (_store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;

    let err = session.select_sheet("nope").await.unwrap_err();
    assert_eq!(
        err,
        SyncError::NotFound {
            entity: "sheet".into(),
            id: "nope".into()
        }
    );
    assert!(matches!(session.status(), SyncStatus::LoadFailed(_)));
    assert_eq!(session.active_sheet().unwrap().id, sheet.id);
}

// ── Sheet management ──

#[tokio::test(start_paused = true)]
async fn bootstrap_creates_default_sheet_when_store_is_empty() {
    let store = Arc::new(MockRemoteStore::new());
    let mut session = new_session(&store);

    let sheets = session.bootstrap().await.unwrap();
    assert_eq!(sheets.len(), 1);
    assert_eq!(sheets[0].name, "Sheet1");
    let active = session.active_sheet().unwrap();
    assert_eq!(active.id, sheets[0].id);
    assert_eq!(active.extent, Extent::new(100, 100));
    assert!(store.calls().contains(&MockCall::CreateSheet {
        name: "Sheet1".into(),
        extent: Extent::new(100, 100)
    }));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_selects_first_existing_sheet() {
    let store = Arc::new(MockRemoteStore::new());
    let first = store.insert_sheet("First", Extent::new(5, 5));
    store.insert_sheet("Second", Extent::new(5, 5));
    let mut session = new_session(&store);

    let sheets = session.bootstrap().await.unwrap();
    assert_eq!(sheets.len(), 2);
    assert_eq!(session.active_sheet().unwrap().id, first.id);
    assert!(!store
        .calls()
        .iter()
        .any(|call| matches!(call, MockCall::CreateSheet { .. })));
}

#[tokio::test(start_paused = true)]
async fn create_sheet_rejects_blank_name() {
    let store = Arc::new(MockRemoteStore::new());
    let mut session = new_session(&store);

    let err = session.create_sheet("   ").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation { .. }));
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_sheet_switches_to_it() {
    let store = Arc::new(MockRemoteStore::new());
    let mut session = new_session(&store);

    let sheet = session.create_sheet(" Budget ").await.unwrap();
    assert_eq!(sheet.name, "Budget");
    assert_eq!(session.active_sheet().unwrap().id, sheet.id);
    assert_eq!(session.list_sheets().await.unwrap(), vec![sheet]);
}

#[tokio::test(start_paused = true)]
async fn adding_rows_and_columns_grows_and_persists_extent() {
    let (store, mut session, sheet) = session_on_sheet(Extent::new(3, 3)).await;

    assert!(matches!(
        session.edit_cell(CellRef::new(4, 1), "x"),
        Err(SyncError::OutOfBounds { .. })
    ));

    assert_eq!(session.add_row().await.unwrap(), Extent::new(4, 3));
    assert_eq!(session.add_col().await.unwrap(), Extent::new(4, 4));
    assert_eq!(store.extent(&sheet.id), Some(Extent::new(4, 4)));
    assert_eq!(session.active_sheet().unwrap().extent, Extent::new(4, 4));

    session.edit_cell(CellRef::new(4, 4), "corner").unwrap();
    assert_eq!(session.surface().cell_text(CellRef::new(4, 4)), "corner");
}

#[tokio::test(start_paused = true)]
async fn zero_stored_extent_falls_back_to_default() {
    let store = Arc::new(MockRemoteStore::new());
    let sheet = store.insert_sheet("Legacy", Extent::new(0, 0));
    let mut session = new_session(&store);
    session.select_sheet(&sheet.id).await.unwrap();
    assert_eq!(session.active_sheet().unwrap().extent, Extent::new(100, 100));
}

// ── Focus navigation and guards ──

#[tokio::test(start_paused = true)]
async fn focus_down_stops_at_last_row() {
    let (_store, mut session, _sheet) = session_on_sheet(Extent::new(3, 3)).await;

    assert_eq!(session.focus_down().unwrap(), None);
    session.focus_cell(CellRef::new(2, 1)).unwrap();
    assert_eq!(session.focus_down().unwrap(), Some(CellRef::new(3, 1)));
    assert_eq!(session.focus_down().unwrap(), Some(CellRef::new(3, 1)));
    assert!(session.focus().is_focused(CellRef::new(3, 1)));
}

#[tokio::test(start_paused = true)]
async fn operations_require_an_active_sheet() {
    let store = Arc::new(MockRemoteStore::new());
    let mut session = new_session(&store);

    assert_eq!(
        session.edit_cell(CellRef::new(1, 1), "x"),
        Err(SyncError::NoActiveSheet)
    );
    assert_eq!(session.focus_cell(CellRef::new(1, 1)), Err(SyncError::NoActiveSheet));
    assert_eq!(session.add_row().await, Err(SyncError::NoActiveSheet));
    assert!(matches!(
        session.open_annotation(CellRef::new(1, 1)).await,
        Err(SyncError::NoActiveSheet)
    ));
}
