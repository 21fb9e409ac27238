//! gridsync-core: synchronization core for a collaborative cell grid.
//!
//! Provides a transport-agnostic `RemoteStore` trait plus the local pieces
//! that keep a shared grid consistent while several editors type into it:
//! - `CellCache`: local copy of remote cell values
//! - `EditDebouncer`: per-cell coalescing of keystrokes into one write
//! - `FocusTracker`: the cell currently receiving input
//! - `RealtimeBridge`: routes pushed change events with focus-aware suppression
//! - `AnnotationState`: the single open checklist/comment editor
//!
//! `SyncSession` owns all of them and is the only place their state changes.

pub mod annotation;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod focus;
pub mod mock;
pub mod realtime;
pub mod session;
pub mod store;
pub mod surface;
pub mod types;
