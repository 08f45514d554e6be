//! The persistence trait and an in-memory implementation.

use crate::core::pipeline::ProcessedRecord;
use crate::core::session::SessionSummary;
use crate::core::spatial::Region;
use crate::error::PersistenceError;
use crate::ingress::Sample;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where processed data goes and where regions and history come from.
///
/// Implementations are shared between worker threads, so every method takes
/// `&self`. Summaries must be upserted by `session_id`: the same summary may
/// be delivered more than once.
pub trait PersistencePort: Send + Sync {
    fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError>;

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError>;

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError>;

    /// Most recent samples for a subject (device id), oldest first.
    fn recent_samples(&self, subject_key: &str, limit: usize)
        -> Result<Vec<Sample>, PersistenceError>;
}

pub type SharedPort = Arc<dyn PersistencePort>;

impl<P: PersistencePort + ?Sized> PersistencePort for Arc<P> {
    fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError> {
        (**self).save_record(record)
    }

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        (**self).save_session_summary(summary)
    }

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
        (**self).list_regions()
    }

    fn recent_samples(
        &self,
        subject_key: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, PersistenceError> {
        (**self).recent_samples(subject_key, limit)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<ProcessedRecord>,
    summaries: Vec<SessionSummary>,
}

/// Mutex-guarded store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    regions: Vec<Region>,
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions(regions: Vec<Region>) -> Self {
        Self {
            regions,
            inner: Mutex::default(),
        }
    }

    pub fn records(&self) -> Vec<ProcessedRecord> {
        self.lock().map(|g| g.records.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.lock().map(|g| g.summaries.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, PersistenceError> {
        self.inner
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl PersistencePort for MemoryStore {
    fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError> {
        self.lock()?.records.push(record.clone());
        Ok(())
    }

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        match inner
            .summaries
            .iter_mut()
            .find(|s| s.session_id == summary.session_id)
        {
            Some(existing) => *existing = summary.clone(),
            None => inner.summaries.push(summary.clone()),
        }
        Ok(())
    }

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
        Ok(self.regions.clone())
    }

    fn recent_samples(
        &self,
        subject_key: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, PersistenceError> {
        let inner = self.lock()?;
        let mut samples: Vec<Sample> = inner
            .records
            .iter()
            .rev()
            .filter(|r| r.device_id == subject_key)
            .take(limit)
            .map(ProcessedRecord::to_sample)
            .collect();
        samples.reverse();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::pipeline::IngestionOrchestrator;
    use chrono::{Duration, Utc};

    fn records(n: usize) -> Vec<ProcessedRecord> {
        let mut orchestrator = IngestionOrchestrator::new(Config::default(), Vec::new());
        let start = Utc::now();
        (0..n)
            .filter_map(|i| {
                let sample = Sample::new(
                    "RADAR_1",
                    0.0,
                    2.5,
                    i as f64,
                    start + Duration::seconds(i as i64 * 2),
                );
                orchestrator.process(&sample).ok()?.record().cloned()
            })
            .collect()
    }

    #[test]
    fn test_recent_samples_oldest_first() {
        let store = MemoryStore::new();
        for record in records(5) {
            store.save_record(&record).unwrap();
        }
        let recent = store.recent_samples("RADAR_1", 3).unwrap();
        let speeds: Vec<f64> = recent.iter().map(|s| s.move_speed).collect();
        assert_eq!(speeds, vec![2.0, 3.0, 4.0]);
        assert!(store.recent_samples("RADAR_9", 3).unwrap().is_empty());
    }

    #[test]
    fn test_shared_port_delegates() {
        let store = Arc::new(MemoryStore::with_regions(vec![Region::new(
            1,
            "Snacks",
            (0.0, 1.0),
            (0.0, 1.0),
        )]));
        let port: SharedPort = store.clone();
        assert_eq!(port.list_regions().unwrap().len(), 1);
        port.save_record(&records(1)[0]).unwrap();
        assert_eq!(store.records().len(), 1);
    }
}
