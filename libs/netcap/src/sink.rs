use parking_lot::Mutex;

use crate::error::SinkError;
use crate::record::NetworkRequestRecord;

/// Receiver of finished request records.
///
/// Batching, persistence and upload belong to the implementation.
pub trait DeliverySink: Send + Sync {
    /// Accept a record.
    ///
    /// # Errors
    /// Returns [`SinkError`] if the record could not be accepted.
    fn record(&self, record: NetworkRequestRecord) -> Result<(), SinkError>;

    /// Accept a record that replaces any earlier record delivered with `key`.
    ///
    /// # Errors
    /// Returns [`SinkError`] if the record could not be accepted.
    fn record_deduplicated(&self, key: &str, record: NetworkRequestRecord) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
struct Entry {
    key: Option<String>,
    record: NetworkRequestRecord,
}

/// Sink that keeps records in memory, in delivery order.
///
/// A deduplicated record replaces the earlier record with the same key in
/// place (last write wins).
#[derive(Debug, Default)]
pub struct InMemorySink {
    entries: Mutex<Vec<Entry>>,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of retained records.
    #[must_use]
    pub fn records(&self) -> Vec<NetworkRequestRecord> {
        self.entries.lock().iter().map(|e| e.record.clone()).collect()
    }

    /// Record retained for a dedup key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<NetworkRequestRecord> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.key.as_deref() == Some(key))
            .map(|e| e.record.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every retained record.
    #[must_use]
    pub fn drain(&self) -> Vec<NetworkRequestRecord> {
        self.entries.lock().drain(..).map(|e| e.record).collect()
    }
}

impl DeliverySink for InMemorySink {
    fn record(&self, record: NetworkRequestRecord) -> Result<(), SinkError> {
        self.entries.lock().push(Entry { key: None, record });
        Ok(())
    }

    fn record_deduplicated(&self, key: &str, record: NetworkRequestRecord) -> Result<(), SinkError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|e| e.key.as_deref() == Some(key)) {
            existing.record = record;
        } else {
            entries.push(Entry {
                key: Some(key.to_owned()),
                record,
            });
        }
        Ok(())
    }
}
