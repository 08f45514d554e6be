//! JSON Lines file store.
//!
//! Layout of the export directory:
//!
//! ```text
//! <dir>/records.jsonl    one ProcessedRecord per line, append-only
//! <dir>/sessions.jsonl   one SessionSummary per line, append-only
//! ```
//!
//! Regions are read from a separate pretty-printed JSON array. Summaries are
//! appended even when a `session_id` repeats; readers keep the last line per
//! id (see [`JsonLinesStore::load_summaries`]).

use crate::core::pipeline::ProcessedRecord;
use crate::core::session::SessionSummary;
use crate::core::spatial::Region;
use crate::error::PersistenceError;
use crate::ingress::Sample;
use crate::persistence::port::PersistencePort;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const RECORDS_FILE: &str = "records.jsonl";
pub const SESSIONS_FILE: &str = "sessions.jsonl";

#[derive(Debug)]
pub struct JsonLinesStore {
    dir: PathBuf,
    regions_path: Option<PathBuf>,
    /// Serializes appends from concurrent workers
    write_lock: Mutex<()>,
}

impl JsonLinesStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            regions_path: None,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_regions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.regions_path = Some(path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.dir.join(SESSIONS_FILE)
    }

    /// All summaries on disk, deduplicated by session id (last write wins).
    pub fn load_summaries(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let mut order = Vec::new();
        let mut latest: HashMap<uuid::Uuid, SessionSummary> = HashMap::new();
        for summary in read_lines::<SessionSummary>(&self.sessions_path())? {
            if latest.insert(summary.session_id, summary.clone()).is_none() {
                order.push(summary.session_id);
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    pub fn load_records(&self) -> Result<Vec<ProcessedRecord>, PersistenceError> {
        read_lines(&self.records_path())
    }

    fn append<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(value)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PersistenceError::Unavailable("store lock poisoned".to_string()))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl PersistencePort for JsonLinesStore {
    fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError> {
        self.append(&self.records_path(), record)
    }

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        self.append(&self.sessions_path(), summary)
    }

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
        let Some(path) = &self.regions_path else {
            return Ok(Vec::new());
        };
        load_regions(path)
    }

    fn recent_samples(
        &self,
        subject_key: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, PersistenceError> {
        let records: Vec<ProcessedRecord> = read_lines(&self.records_path())?;
        let mut samples: Vec<Sample> = records
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

/// Read a region list from a JSON array file.
pub fn load_regions(path: &Path) -> Result<Vec<Region>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read every well-formed line of a JSONL file. A missing file is empty;
/// malformed lines (e.g. a torn final write) are skipped.
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!(path = %path.display(), line = idx + 1, error = %e, "skipping malformed line"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::pipeline::IngestionOrchestrator;
    use chrono::{Duration, Utc};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("presence-jsonl-{}", uuid::Uuid::new_v4()))
    }

    fn completed_session() -> (Vec<ProcessedRecord>, SessionSummary) {
        let mut orchestrator = IngestionOrchestrator::new(Config::default(), Vec::new());
        let start = Utc::now();
        let mut records = Vec::new();
        let mut summary = None;
        for (secs, y, speed) in [(0, 0.5, 2.0), (1, 0.5, 2.0), (3, 0.6, 2.0), (4, 4.0, 80.0)] {
            let sample = Sample::new("RADAR_1", 0.0, y, speed, start + Duration::seconds(secs));
            let outcome = orchestrator.process(&sample).unwrap();
            records.extend(outcome.record().cloned());
            summary = summary.or(outcome.summary().cloned());
        }
        (records, summary.unwrap())
    }

    #[test]
    fn test_append_and_reload() {
        let dir = temp_dir();
        let store = JsonLinesStore::open(&dir).unwrap();
        let (records, summary) = completed_session();

        for record in &records {
            store.save_record(record).unwrap();
        }
        store.save_session_summary(&summary).unwrap();
        // Redelivery of the same summary.
        store.save_session_summary(&summary).unwrap();

        assert_eq!(store.load_records().unwrap(), records);
        assert_eq!(store.load_summaries().unwrap(), vec![summary]);

        let recent = store.recent_samples("RADAR_1", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1], records[3].to_sample());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_regions_file() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let regions_path = dir.join("regions.json");
        let regions = vec![Region::new(3, "Dairy", (0.0, 1.0), (1.0, 2.0)).with_product("SKU-3")];
        std::fs::write(&regions_path, serde_json::to_string_pretty(&regions).unwrap()).unwrap();

        let store = JsonLinesStore::open(&dir).unwrap().with_regions_file(&regions_path);
        assert_eq!(store.list_regions().unwrap(), regions);

        let bare = JsonLinesStore::open(&dir).unwrap();
        assert!(bare.list_regions().unwrap().is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let dir = temp_dir();
        let store = JsonLinesStore::open(&dir).unwrap();
        let (_, summary) = completed_session();
        store.save_session_summary(&summary).unwrap();
        let mut file = OpenOptions::new().append(true).open(store.sessions_path()).unwrap();
        writeln!(file, "{{\"session_id\": ").unwrap();

        assert_eq!(store.load_summaries().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }
}
