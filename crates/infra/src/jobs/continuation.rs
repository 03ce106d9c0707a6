//! Continuation store: pending continuation handles keyed by `(job id, id_type)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fqdecomp_core::{ContinuationKey, ContinuationRecord};

use crate::error::StoreError;

/// Continuation store abstraction.
///
/// `take` is the only way a record leaves the store. It must be atomic
/// delete-if-exists: of any number of concurrent callers for the same key, exactly
/// one receives the record and the rest receive `None`.
pub trait ContinuationStore: Send + Sync {
    /// Store a new record. Fails if the key is already occupied.
    fn put(&self, record: ContinuationRecord) -> Result<(), StoreError>;

    /// Read without consuming.
    fn get(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError>;

    /// Atomically remove and return the record, if present.
    fn take(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError>;
}

/// In-memory continuation store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryContinuationStore {
    records: Mutex<HashMap<ContinuationKey, ContinuationRecord>>,
}

impl InMemoryContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContinuationStore for InMemoryContinuationStore {
    fn put(&self, record: ContinuationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::poisoned())?;
        if records.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key.to_string()));
        }
        records.insert(record.key, record);
        Ok(())
    }

    fn get(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::poisoned())?;
        Ok(records.get(key).cloned())
    }

    fn take(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::poisoned())?;
        Ok(records.remove(key))
    }
}

impl ContinuationStore for Arc<InMemoryContinuationStore> {
    fn put(&self, record: ContinuationRecord) -> Result<(), StoreError> {
        (**self).put(record)
    }

    fn get(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError> {
        (**self).get(key)
    }

    fn take(&self, key: &ContinuationKey) -> Result<Option<ContinuationRecord>, StoreError> {
        (**self).take(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::time::Duration;

    use super::*;
    use fqdecomp_core::{ContinuationToken, JobId};

    fn record(job_id: JobId) -> ContinuationRecord {
        ContinuationRecord::new(
            job_id,
            ContinuationToken::new("H1").unwrap(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn put_get_take() {
        let store = InMemoryContinuationStore::new();
        let id = JobId::new();
        let key = ContinuationKey::for_job(id);

        store.put(record(id)).unwrap();
        assert!(store.get(&key).unwrap().is_some());

        let taken = store.take(&key).unwrap().unwrap();
        assert_eq!(taken.job_id(), id);

        assert!(store.take(&key).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn second_put_for_same_key_fails() {
        let store = InMemoryContinuationStore::new();
        let id = JobId::new();
        store.put(record(id)).unwrap();
        assert!(matches!(
            store.put(record(id)),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn concurrent_take_has_a_single_winner() {
        let store = InMemoryContinuationStore::arc();
        let id = JobId::new();
        store.put(record(id)).unwrap();

        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.take(&ContinuationKey::for_job(id)).unwrap().is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
