//! Analysis history store
//!
//! Append-only record of past verdicts with a capped, newest-first read.
//! Backed by Postgres when `DATABASE_URL` is configured, otherwise kept in
//! process memory.

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Mutex;

use crate::domain::reports;
use crate::models::{HistoryRecord, NewHistoryRecord};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

pub trait HistoryStore: Send + Sync {
    /// Append a record; the store assigns the id and timestamp.
    fn append(
        &self,
        record: NewHistoryRecord,
    ) -> impl Future<Output = Result<HistoryRecord, PersistenceError>> + Send;

    /// Up to `limit` records, newest first.
    fn recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, PersistenceError>> + Send;
}

#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self, PersistenceError> {
        reports::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

impl HistoryStore for PgHistoryStore {
    async fn append(&self, record: NewHistoryRecord) -> Result<HistoryRecord, PersistenceError> {
        let row = reports::insert_report(
            &self.pool,
            &record.file_name,
            &record.label,
            i16::from(record.confidence),
            record.is_synthetic,
        )
        .await?;
        Ok(row.into())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = reports::recent_reports(&self.pool, limit).await?;
        Ok(rows.into_iter().map(HistoryRecord::from).collect())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: Vec<HistoryRecord>,
}

/// Process-local history, lost on restart
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: NewHistoryRecord) -> Result<HistoryRecord, PersistenceError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let stored = HistoryRecord {
            id: state.next_id,
            file_name: record.file_name,
            label: record.label,
            confidence: record.confidence,
            is_synthetic: record.is_synthetic,
            created_at: Utc::now(),
        };
        state.records.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let state = self.lock()?;
        let mut records = state.records.clone();
        drop(state);

        // Ids are handed out under the lock, so they are the append order
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(limit);
        Ok(records)
    }
}

/// History backend chosen at startup
#[derive(Debug)]
pub enum HistoryBackend {
    Postgres(PgHistoryStore),
    Memory(MemoryHistoryStore),
}

impl HistoryBackend {
    /// Connect to Postgres when a URL is given, else fall back to memory.
    pub async fn from_database_url(database_url: Option<&str>) -> Result<Self, PersistenceError> {
        match database_url {
            Some(url) => {
                let store = PgHistoryStore::connect(url).await?;
                log::info!("[history] Using Postgres history store");
                Ok(HistoryBackend::Postgres(store))
            }
            None => {
                log::warn!("[history] DATABASE_URL not set, history is kept in memory");
                Ok(HistoryBackend::Memory(MemoryHistoryStore::new()))
            }
        }
    }
}

impl HistoryStore for HistoryBackend {
    async fn append(&self, record: NewHistoryRecord) -> Result<HistoryRecord, PersistenceError> {
        match self {
            HistoryBackend::Postgres(store) => store.append(record).await,
            HistoryBackend::Memory(store) => store.append(record).await,
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, PersistenceError> {
        match self {
            HistoryBackend::Postgres(store) => store.recent(limit).await,
            HistoryBackend::Memory(store) => store.recent(limit).await,
        }
    }
}
