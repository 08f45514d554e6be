//! Atomic ingest counters with optional JSON persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One of the tracked counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Received,
    Rejected,
    Skipped,
    Processed,
    SessionsStarted,
    SessionsCompleted,
    SessionsDiscarded,
    SessionsForceClosed,
    /// Dropped because a device queue was full
    Shed,
    PersistenceFailures,
}

const COUNTERS: usize = 10;

impl Counter {
    fn index(self) -> usize {
        self as usize
    }
}

/// Counters for the current run.
#[derive(Debug)]
pub struct IngestStats {
    counters: [AtomicU64; COUNTERS],
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Stats that survive restarts via a JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous ingest stats");
        }

        stats
    }

    pub fn record(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, count: u64) {
        self.counters[counter.index()].fetch_add(count, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.get(Counter::Received),
            rejected: self.get(Counter::Rejected),
            skipped: self.get(Counter::Skipped),
            processed: self.get(Counter::Processed),
            sessions_started: self.get(Counter::SessionsStarted),
            sessions_completed: self.get(Counter::SessionsCompleted),
            sessions_discarded: self.get(Counter::SessionsDiscarded),
            sessions_force_closed: self.get(Counter::SessionsForceClosed),
            shed: self.get(Counter::Shed),
            persistence_failures: self.get(Counter::PersistenceFailures),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable report for the CLI.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Ingest Statistics:\n\
             - Samples received: {}\n\
             - Samples rejected: {}\n\
             - Samples skipped by gate: {}\n\
             - Samples processed: {}\n\
             - Samples shed (queue full): {}\n\
             \n\
             Sessions:\n\
             - Started: {}\n\
             - Completed: {}\n\
             - Discarded (too short): {}\n\
             - Force-closed: {}\n\
             \n\
             Persistence failures: {}\n\
             Uptime: {} seconds",
            s.received,
            s.rejected,
            s.skipped,
            s.processed,
            s.shed,
            s.sessions_started,
            s.sessions_completed,
            s.sessions_discarded,
            s.sessions_force_closed,
            s.persistence_failures,
            s.uptime_secs
        )
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut persisted = self.snapshot();
        persisted.started_at = Utc::now();
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let s: IngestSnapshot = serde_json::from_str(&content).map_err(std::io::Error::other)?;
        for (counter, value) in [
            (Counter::Received, s.received),
            (Counter::Rejected, s.rejected),
            (Counter::Skipped, s.skipped),
            (Counter::Processed, s.processed),
            (Counter::SessionsStarted, s.sessions_started),
            (Counter::SessionsCompleted, s.sessions_completed),
            (Counter::SessionsDiscarded, s.sessions_discarded),
            (Counter::SessionsForceClosed, s.sessions_force_closed),
            (Counter::Shed, s.shed),
            (Counter::PersistenceFailures, s.persistence_failures),
        ] {
            self.counters[counter.index()].store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters. Also the on-disk format, where
/// `started_at` holds the time of the last save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub processed: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_discarded: u64,
    pub sessions_force_closed: u64,
    pub shed: u64,
    pub persistence_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

pub type SharedIngestStats = Arc<IngestStats>;

pub fn create_shared_stats(persist_path: Option<PathBuf>) -> SharedIngestStats {
    match persist_path {
        Some(path) => Arc::new(IngestStats::with_persistence(path)),
        None => Arc::new(IngestStats::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = IngestStats::new();
        stats.record(Counter::Received);
        stats.record(Counter::Received);
        stats.add(Counter::Skipped, 5);
        stats.record(Counter::SessionsStarted);

        let s = stats.snapshot();
        assert_eq!(s.received, 2);
        assert_eq!(s.skipped, 5);
        assert_eq!(s.sessions_started, 1);
        assert_eq!(s.processed, 0);
    }

    #[test]
    fn test_reset() {
        let stats = IngestStats::new();
        stats.add(Counter::Processed, 100);
        stats.add(Counter::Shed, 3);
        stats.reset();
        assert_eq!(stats.get(Counter::Processed), 0);
        assert_eq!(stats.get(Counter::Shed), 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = IngestStats::new();
        let summary = stats.summary();
        assert!(summary.contains("Samples received"));
        assert!(summary.contains("Force-closed"));
        assert!(summary.contains("Persistence failures"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = std::env::temp_dir().join(format!("presence-stats-{}", uuid::Uuid::new_v4()));
        let path = dir.join("stats.json");

        let stats = IngestStats::with_persistence(path.clone());
        stats.add(Counter::Received, 7);
        stats.add(Counter::SessionsCompleted, 2);
        stats.save().unwrap();

        let reloaded = IngestStats::with_persistence(path);
        assert_eq!(reloaded.get(Counter::Received), 7);
        assert_eq!(reloaded.get(Counter::SessionsCompleted), 2);

        let _ = std::fs::remove_dir_all(dir);
    }
}
