//! `RemoteStore` over SQLite with in-process change notifications.
//!
//! Every successful upsert is published on a broadcast channel. Each
//! subscription filters that channel by sheet id, so one store serves many
//! sessions, each on its own sheet.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use gridsync_core::config::SyncConfig;
use gridsync_core::error::StoreError;
use gridsync_core::store::{ChangeStream, RemoteStore};
use gridsync_core::types::{
    AnnotationChange, AnnotationRecord, CellChange, CellRecord, CellRef, ChangeEvent, Extent,
    SheetSummary,
};

use crate::cell_repository::CellRepository;
use crate::note_repository::{CellNote, NoteRepository};
use crate::sheet_repository::{Sheet, SheetRepository};
use crate::{parse_rfc3339, to_rfc3339, Config, Db, DbError};

/// Events buffered per subscriber before the slowest one starts lagging.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub struct SqliteStore {
    db: Arc<Mutex<Db>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Open the database at `config.path` and bring its schema up to date.
    pub fn open(config: Config) -> Result<Self, DbError> {
        let mut db = Db::open(config)?;
        db.migrate_up()?;
        Ok(Self::new(db))
    }

    /// Open the database named by `SyncConfig::database_path`.
    pub fn from_config(config: &SyncConfig) -> Result<Self, DbError> {
        let Some(path) = config.database_path.as_deref() else {
            return Err(DbError::Validation("database_path is not configured".into()));
        };
        Self::open(Config::new(path))
    }

    /// Wrap an already migrated database.
    pub fn new(db: Db) -> Self {
        Self::with_capacity(db, CHANGE_CHANNEL_CAPACITY)
    }

    /// Like `new`, buffering `capacity` change events per subscriber.
    pub fn with_capacity(db: Db, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    /// Number of open change streams.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || f(&lock(&db)))
            .await
            .map_err(|err| StoreError::Backend {
                message: format!("database task failed: {err}"),
            })?;
        result.map_err(StoreError::from)
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error; nobody is watching this store.
        if self.changes.send(event).is_err() {
            debug!("change published with no subscribers");
        }
    }
}

fn lock(db: &Mutex<Db>) -> MutexGuard<'_, Db> {
    match db.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn summary(sheet: Sheet) -> Result<SheetSummary, DbError> {
    Ok(SheetSummary {
        created_at: parse_rfc3339(&sheet.created_at)?,
        id: sheet.id,
        name: sheet.name,
    })
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn list_sheets(&self) -> Result<Vec<SheetSummary>, StoreError> {
        self.with_db(|db| {
            SheetRepository::new(db)
                .list()?
                .into_iter()
                .map(summary)
                .collect()
        })
        .await
    }

    async fn create_sheet(&self, name: &str, extent: Extent) -> Result<SheetSummary, StoreError> {
        let mut sheet = Sheet {
            name: name.to_string(),
            max_rows: extent.max_rows,
            max_cols: extent.max_cols,
            ..Sheet::default()
        };
        let created = self
            .with_db(move |db| {
                SheetRepository::new(db).create(&mut sheet)?;
                summary(sheet)
            })
            .await?;
        debug!(sheet_id = %created.id, name = %created.name, "sheet stored");
        Ok(created)
    }

    async fn get_sheet_meta(&self, sheet_id: &str) -> Result<Extent, StoreError> {
        let sheet_id = sheet_id.to_string();
        self.with_db(move |db| {
            let sheet = SheetRepository::new(db).get(&sheet_id)?;
            Ok(Extent::new(sheet.max_rows, sheet.max_cols))
        })
        .await
    }

    async fn update_sheet_extent(&self, sheet_id: &str, extent: Extent) -> Result<(), StoreError> {
        let sheet_id = sheet_id.to_string();
        self.with_db(move |db| {
            SheetRepository::new(db).update_extent(&sheet_id, extent.max_rows, extent.max_cols)
        })
        .await
    }

    async fn list_cells(&self, sheet_id: &str) -> Result<Vec<CellRecord>, StoreError> {
        let sheet_id = sheet_id.to_string();
        self.with_db(move |db| {
            if !SheetRepository::new(db).exists(&sheet_id)? {
                return Err(DbError::SheetNotFound(sheet_id));
            }
            let cells = CellRepository::new(db).list(&sheet_id)?;
            Ok(cells
                .into_iter()
                .map(|stored| CellRecord {
                    cell: CellRef::new(stored.row, stored.col),
                    value: stored.value,
                })
                .collect())
        })
        .await
    }

    async fn upsert_cell(
        &self,
        sheet_id: &str,
        cell: CellRef,
        value: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let change = CellChange {
            sheet_id: sheet_id.to_string(),
            cell,
            value: value.to_string(),
        };
        let row = change.clone();
        self.with_db(move |db| {
            CellRepository::new(db).upsert(
                &row.sheet_id,
                row.cell.row,
                row.cell.col,
                &row.value,
                &to_rfc3339(updated_at),
            )
        })
        .await?;
        self.publish(ChangeEvent::Cell(change));
        Ok(())
    }

    async fn get_annotation(
        &self,
        sheet_id: &str,
        cell: CellRef,
    ) -> Result<Option<AnnotationRecord>, StoreError> {
        let sheet_id = sheet_id.to_string();
        self.with_db(move |db| {
            let Some(note) = NoteRepository::new(db).get(&sheet_id, cell.row, cell.col)? else {
                return Ok(None);
            };
            Ok(Some(AnnotationRecord {
                updated_at: parse_rfc3339(&note.updated_at)?,
                sheet_id: note.sheet_id,
                cell,
                checked_items: note.checked_items.into_iter().collect::<BTreeSet<_>>(),
                comment: note.comment,
            }))
        })
        .await
    }

    async fn upsert_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        let note = CellNote {
            sheet_id: record.sheet_id.clone(),
            row: record.cell.row,
            col: record.cell.col,
            checked_items: record.checked_items.iter().cloned().collect(),
            comment: record.comment.clone(),
            updated_at: to_rfc3339(record.updated_at),
        };
        let stored_at = self
            .with_db(move |db| {
                NoteRepository::new(db).upsert(&note)?;
                parse_rfc3339(&note.updated_at)
            })
            .await?;
        // Subscribers compare against what a later read returns, so publish
        // the stored precision.
        let mut change = AnnotationChange::from(record);
        change.updated_at = stored_at;
        self.publish(ChangeEvent::Annotation(change));
        Ok(())
    }

    async fn subscribe(&self, sheet_id: &str) -> Result<Box<dyn ChangeStream>, StoreError> {
        debug!(%sheet_id, "change stream opened");
        Ok(Box::new(BroadcastChangeStream {
            sheet_id: sheet_id.to_string(),
            rx: Some(self.changes.subscribe()),
        }))
    }
}

/// One sheet's view of the store's broadcast channel.
pub struct BroadcastChangeStream {
    sheet_id: String,
    rx: Option<broadcast::Receiver<ChangeEvent>>,
}

#[async_trait]
impl ChangeStream for BroadcastChangeStream {
    async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) if event.sheet_id() == self.sheet_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Dropped changes cannot be replayed; end the stream so
                    // the subscriber reloads.
                    warn!(sheet_id = %self.sheet_id, skipped, "change stream lagged; closing");
                    self.rx = None;
                    return None;
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        if self.rx.take().is_some() {
            debug!(sheet_id = %self.sheet_id, "change stream closed");
        }
        Ok(())
    }
}
