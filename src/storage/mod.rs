//! Live table, per-station history and their durable record files.

pub mod memtable;
pub mod record_store;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::model::Snapshot;
pub use memtable::MemTable;
pub use record_store::{merge_rows, RecordStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub live_stations: usize,
    pub history_stations: usize,
    pub history_rows: usize,
    pub pending_rows: usize,
}

#[derive(Default)]
struct Tables {
    live: HashMap<String, Snapshot>,
    history: HashMap<String, Vec<Snapshot>>,
    pending: MemTable,
}

/// The only shared mutable state in the service.
///
/// Written by the refresh cycle alone; any number of readers. Every write
/// happens under a single write-lock acquisition, so a reader sees a station
/// either before or after an update, never in between. Durable I/O runs
/// outside the lock.
pub struct Store {
    tables: RwLock<Tables>,
    records: RecordStore,
    // serializes concurrent persist calls (refresh loop vs. shutdown flush)
    persist_lock: Mutex<()>,
}

impl Store {
    pub fn new(records: RecordStore) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            records,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a store over `data_dir`. Failing to create the directory is fatal
    /// for the caller.
    pub fn open(data_dir: PathBuf) -> Result<Self, StorageError> {
        Ok(Self::new(RecordStore::new(data_dir)?))
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Replace each station's live entry and add the row to its history.
    /// Returns the number of rows applied.
    pub async fn update(&self, snapshots: Vec<Snapshot>) -> usize {
        if snapshots.is_empty() {
            return 0;
        }
        let count = snapshots.len();
        let mut t = self.tables.write().await;
        for snap in snapshots {
            let history = t.history.entry(snap.station_id.clone()).or_default();
            insert_ordered(history, snap.clone());
            t.pending.insert(snap.clone());
            t.live.insert(snap.station_id.clone(), snap);
        }
        debug!(rows = count, "Store updated");
        count
    }

    /// Merge rows buffered since the last persist into the record files.
    ///
    /// Returns how many station files were written. With nothing buffered no
    /// file is touched. Rows of stations that fail to write go back into the
    /// buffer for the next attempt; the first such error is returned.
    pub async fn persist(&self) -> Result<usize, StorageError> {
        let _guard = self.persist_lock.lock().await;
        let pending = {
            let mut t = self.tables.write().await;
            t.pending.take()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let mut failed = Vec::new();
        let mut first_err = None;
        for (station_id, rows) in pending {
            match self.flush_station(&station_id, &rows).await {
                Ok(()) => written += 1,
                Err(e) => {
                    error!(station_id = %station_id, error = %e, "Failed to persist station history");
                    failed.push((station_id, rows));
                    first_err.get_or_insert(e);
                }
            }
        }

        if !failed.is_empty() {
            let mut t = self.tables.write().await;
            t.pending.restore(failed);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    async fn flush_station(&self, station_id: &str, rows: &[Snapshot]) -> Result<(), StorageError> {
        let durable = self.records.read_station(station_id).await?;
        let merged = merge_rows(durable, rows.to_vec());
        self.records.write_station(station_id, &merged).await?;
        Ok(())
    }

    /// Rebuild history from the record files. Live is left untouched.
    /// Returns the number of stations loaded.
    pub async fn load(&self) -> Result<usize, StorageError> {
        let durable = self.records.read_all().await?;
        let stations = durable.len();
        let mut rows = 0;
        let mut t = self.tables.write().await;
        for (station_id, loaded) in durable {
            let in_memory = t.history.remove(&station_id).unwrap_or_default();
            let merged = merge_rows(loaded, in_memory);
            rows += merged.len();
            t.history.insert(station_id, merged);
        }
        info!(stations, rows, dir = %self.records.dir().display(), "Loaded station history");
        Ok(stations)
    }

    /// Current live table, ordered by station id.
    pub async fn live_snapshots(&self) -> Vec<Snapshot> {
        let t = self.tables.read().await;
        let mut out: Vec<Snapshot> = t.live.values().cloned().collect();
        out.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        out
    }

    pub async fn live_station(&self, station_id: &str) -> Option<Snapshot> {
        self.tables.read().await.live.get(station_id).cloned()
    }

    /// History of one station, ascending by timestamp.
    pub async fn history(&self, station_id: &str) -> Vec<Snapshot> {
        self.tables
            .read()
            .await
            .history
            .get(station_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Histories of every known station, ordered by station id.
    pub async fn histories(&self) -> Vec<(String, Vec<Snapshot>)> {
        let t = self.tables.read().await;
        let mut out: Vec<(String, Vec<Snapshot>)> = t
            .history
            .iter()
            .map(|(id, rows)| (id.clone(), rows.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub async fn stats(&self) -> StoreStats {
        let t = self.tables.read().await;
        StoreStats {
            live_stations: t.live.len(),
            history_stations: t.history.len(),
            history_rows: t.history.values().map(Vec::len).sum(),
            pending_rows: t.pending.len(),
        }
    }
}

/// Keep `history` ascending with one row per timestamp; a row for an
/// existing timestamp replaces it.
fn insert_ordered(history: &mut Vec<Snapshot>, row: Snapshot) {
    match history.last() {
        None => history.push(row),
        Some(last) if last.timestamp < row.timestamp => history.push(row),
        Some(_) => match history.binary_search_by_key(&row.timestamp, |r| r.timestamp) {
            Ok(i) => history[i] = row,
            Err(i) => history.insert(i, row),
        },
    }
}
