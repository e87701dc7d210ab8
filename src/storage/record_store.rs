use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::StorageError;
use crate::model::Snapshot;

const FILE_PREFIX: &str = "history_";
const FILE_EXT: &str = "csv";

/// Flat per-station record files under one directory.
///
/// Each station lives in `history_<station_id>.csv` with the columns
/// `station_id,station_name,lat,lon,racks,bikes,timestamp`, one row per
/// timestamp, sorted ascending.
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, station_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", FILE_PREFIX, file_safe(station_id), FILE_EXT))
    }

    /// Durable rows for one station; a missing file reads as empty.
    ///
    /// Strict: a row that fails to decode is an error, since the result is
    /// about to be rewritten over the file. Rows of other stations are
    /// dropped.
    pub async fn read_station(&self, station_id: &str) -> Result<Vec<Snapshot>, StorageError> {
        let path = self.path_for(station_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        let mut rows = decode_rows_strict(&path, &data)?;
        rows.retain(|r| r.station_id == station_id);
        Ok(rows)
    }

    /// Replace a station's file with `rows`. The file is written beside the
    /// target and renamed over it, so readers never see a torn file.
    pub async fn write_station(
        &self,
        station_id: &str,
        rows: &[Snapshot],
    ) -> Result<PathBuf, StorageError> {
        let path = self.path_for(station_id);
        let data = encode_rows(&path, rows)?;

        let tmp = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|source| StorageError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(station_id, rows = rows.len(), path = %path.display(), "Wrote station records");
        Ok(path)
    }

    /// List record files currently on disk.
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut res = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        while let Some(entry) = rd.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().into_string().unwrap_or_default();
            if name.starts_with(FILE_PREFIX) && name.ends_with(&format!(".{}", FILE_EXT)) {
                res.push(entry.path());
            }
        }
        res.sort();
        Ok(res)
    }

    /// Every station found on disk, rows merged and sorted by timestamp.
    /// Files that cannot be read are skipped with a warning.
    pub async fn read_all(&self) -> Result<HashMap<String, Vec<Snapshot>>, StorageError> {
        let mut by_station: HashMap<String, Vec<Snapshot>> = HashMap::new();
        for path in self.list_files().await? {
            let data = match tokio::fs::read(&path).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record file");
                    continue;
                }
            };
            for row in decode_rows(&path, &data) {
                by_station.entry(row.station_id.clone()).or_default().push(row);
            }
        }
        Ok(by_station
            .into_iter()
            .map(|(id, rows)| (id, merge_rows(Vec::new(), rows)))
            .collect())
    }
}

/// Union of `older` and `newer`, one row per timestamp, ascending.
/// Where timestamps collide the later row wins (`newer` after `older`, and
/// later positions within each input after earlier ones).
pub fn merge_rows(older: Vec<Snapshot>, newer: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut by_ts: BTreeMap<i64, Snapshot> = BTreeMap::new();
    for row in older.into_iter().chain(newer) {
        by_ts.insert(row.timestamp, row);
    }
    by_ts.into_values().collect()
}

fn encode_rows(path: &Path, rows: &[Snapshot]) -> Result<Vec<u8>, StorageError> {
    let csv_err = |source| StorageError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row).map_err(csv_err)?;
    }
    wtr.into_inner().map_err(|e| StorageError::Io {
        path: path.to_path_buf(),
        source: e.into_error(),
    })
}

fn decode_rows_strict(path: &Path, data: &[u8]) -> Result<Vec<Snapshot>, StorageError> {
    csv::Reader::from_reader(data)
        .deserialize::<Snapshot>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Tolerant decode for loading: malformed rows are skipped with a warning.
fn decode_rows(path: &Path, data: &[u8]) -> Vec<Snapshot> {
    let mut rdr = csv::Reader::from_reader(data);
    let mut out = Vec::new();
    for (line, rec) in rdr.deserialize::<Snapshot>().enumerate() {
        match rec {
            Ok(row) => out.push(row),
            Err(e) => {
                warn!(path = %path.display(), line = line + 2, error = %e, "Skipping malformed record");
            }
        }
    }
    out
}

/// Station ids are external. Bytes outside `[A-Za-z0-9._-]` (and `%`
/// itself) are percent-encoded, so distinct ids never share a file.
fn file_safe(station_id: &str) -> String {
    let mut out = String::with_capacity(station_id.len());
    for b in station_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
