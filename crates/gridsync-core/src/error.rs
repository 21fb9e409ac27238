//! Normalized error types for store and synchronization operations.
//!
//! `StoreError` is what a `RemoteStore` implementation reports; `SyncError`
//! is what the session surfaces to its caller. Neither is ever fatal: every
//! failure is scoped to the operation that produced it.

use thiserror::Error;

use crate::types::{CellRef, Extent};

/// Error reported by a `RemoteStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Request validation failed (empty sheet name, bad extent).
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A referenced record does not exist.
    #[error("{entity} {id:?} not found")]
    NotFound { entity: String, id: String },

    /// The store could not be reached or refused the request.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// The realtime channel was closed or could not be (un)subscribed.
    #[error("subscription closed: {message}")]
    SubscriptionClosed { message: String },

    /// Any other backend failure (query, decode).
    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::SubscriptionClosed { .. }
        )
    }
}

/// Error surfaced by the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Bad input from the user; surfaced, never retried.
    #[error("invalid input: {message}")]
    Validation { message: String },

    /// A stale id was referenced; the caller should refresh its sheet list.
    #[error("{entity} {id:?} not found")]
    NotFound { entity: String, id: String },

    /// A debounced cell write failed. The cache keeps its last known-good
    /// value; the next edit is the retry.
    #[error("saving cell {cell} of sheet {sheet_id:?} failed: {message}")]
    TransientWrite {
        sheet_id: String,
        cell: CellRef,
        message: String,
    },

    /// The realtime channel for a sheet could not be established or dropped.
    #[error("realtime subscription for sheet {sheet_id:?} failed: {message}")]
    Subscription { sheet_id: String, message: String },

    /// The store was unreachable for a direct (non-debounced) request.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("no sheet is selected")]
    NoActiveSheet,

    #[error("cell {cell} is outside the sheet extent {extent}")]
    OutOfBounds { cell: CellRef, extent: Extent },

    #[error("no annotation is open")]
    NoOpenAnnotation,

    #[error("checklist label {label:?} is not configured")]
    UnknownLabel { label: String },
}

impl SyncError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientWrite { .. } | Self::Subscription { .. } | Self::Unavailable { .. }
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { message } => Self::Validation { message },
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Unavailable { message }
            | StoreError::SubscriptionClosed { message }
            | StoreError::Backend { message } => Self::Unavailable { message },
        }
    }
}
