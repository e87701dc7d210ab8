use std::collections::HashMap;

use crate::model::Snapshot;

/// Rows appended since the last successful persist, keyed by station id.
#[derive(Debug, Default)]
pub struct MemTable {
    buffer: HashMap<String, Vec<Snapshot>>,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            buffer: HashMap::new(),
        }
    }

    pub fn insert(&mut self, row: Snapshot) {
        self.buffer.entry(row.station_id.clone()).or_default().push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.values().map(Vec::len).sum()
    }

    /// Hand the whole buffer to a flush, leaving the table empty.
    pub fn take(&mut self) -> HashMap<String, Vec<Snapshot>> {
        std::mem::take(&mut self.buffer)
    }

    /// Put rows from a failed flush back. They go in front of anything
    /// buffered since the take, so later writes still win on merge.
    pub fn restore(&mut self, rows: impl IntoIterator<Item = (String, Vec<Snapshot>)>) {
        for (station_id, mut older) in rows {
            let entry = self.buffer.entry(station_id).or_default();
            older.append(entry);
            *entry = older;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, ts: i64, bikes: u32) -> Snapshot {
        Snapshot {
            station_id: id.into(),
            station_name: id.into(),
            lat: None,
            lon: None,
            racks: 10,
            bikes,
            timestamp: ts,
        }
    }

    #[test]
    fn take_empties_buffer() {
        let mut mt = MemTable::new();
        mt.insert(row("a", 1, 1));
        mt.insert(row("a", 2, 1));
        mt.insert(row("b", 1, 1));
        assert_eq!(mt.len(), 3);

        let taken = mt.take();
        assert_eq!(taken["a"].len(), 2);
        assert!(mt.is_empty());
    }

    #[test]
    fn restore_keeps_newer_rows_last() {
        let mut mt = MemTable::new();
        mt.insert(row("a", 1, 1));
        let taken = mt.take();
        mt.insert(row("a", 1, 9));
        mt.restore(taken);

        let rows = mt.take().remove("a").unwrap();
        assert_eq!(rows.iter().map(|r| r.bikes).collect::<Vec<_>>(), vec![1, 9]);
    }
}
