//! End-to-end tests for the presence analytics pipeline

use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use presence_analytics_agent::core::{
    AdaptiveSampleGate, EngagementLevel, SamplingReason, SatisfactionScorer, SpatialIndex,
};
use presence_analytics_agent::persistence::PersistencePort;
use presence_analytics_agent::stats::Counter;
use presence_analytics_agent::{
    Config, IngestDispatcher, IngestStats, IngestionOrchestrator, JsonLinesStore, MemoryStore,
    OutcomeSink, PersistenceError, PipelineError, ProcessedRecord, Region, RetryPolicy,
    RetryingStore, Sample, SessionEvent, SessionSummary,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn at(secs: f64, x: f64, y: f64, speed: f64) -> Sample {
    Sample::new(
        "RADAR_1",
        x,
        y,
        speed,
        t0() + Duration::milliseconds((secs * 1000.0) as i64),
    )
}

fn shelf() -> Vec<Region> {
    vec![
        Region::new(1, "Snacks", (-1.0, 0.0), (0.0, 1.0)).with_product("SKU-100"),
        Region::new(2, "Drinks", (0.0, 1.0), (0.0, 1.0)).with_product("SKU-200"),
    ]
}

fn lifecycle() -> Vec<Sample> {
    vec![
        at(0.0, 0.0, 0.5, 5.0).with_vitals(Some(70.0), Some(14.0)),
        at(1.0, 0.0, 0.5, 3.0).with_vitals(Some(72.0), Some(14.0)),
        at(2.0, 0.0, 0.5, 2.0).with_vitals(Some(71.0), Some(15.0)),
        at(6.0, 0.0, 0.5, 2.0).with_vitals(Some(71.0), Some(15.0)),
        at(7.0, 4.0, 4.0, 200.0),
    ]
}

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("presence-{tag}-{}", uuid::Uuid::new_v4()))
}

#[test]
fn test_full_lifecycle_scenario() {
    let mut orchestrator = IngestionOrchestrator::new(Config::default(), shelf());
    let mut events = Vec::new();
    let mut levels = Vec::new();
    let mut summaries = Vec::new();

    for sample in lifecycle() {
        let outcome = orchestrator.process(&sample).unwrap();
        let record = outcome.record().expect("every lifecycle sample passes the gate");
        events.push(record.session_event);
        levels.push(record.engagement_level);
        summaries.extend(outcome.summary().cloned());
    }

    let id = events[1].session_id().expect("session starts on the second sample");
    assert_eq!(events[0], SessionEvent::Pending);
    assert_eq!(events[1], SessionEvent::Started(id));
    assert_eq!(events[4], SessionEvent::Ended(id));
    assert_eq!(levels[3], EngagementLevel::Full);

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.session_id, id);
    assert!((summary.duration_secs - 7.0).abs() < 1e-6);
    assert_eq!(summary.engagement_level, EngagementLevel::Full);
    assert!(summary.is_engaged);
    assert_eq!(summary.sample_count, 5);
    assert!(summary.avg_heart_rate.is_some());
    assert!(summary.avg_satisfaction.is_some());
}

#[test]
fn test_hysteresis_never_restarts_open_session() {
    let mut orchestrator = IngestionOrchestrator::new(Config::default(), shelf());
    orchestrator.process(&at(0.0, 0.0, 1.5, 15.0)).unwrap();
    orchestrator.process(&at(0.5, 0.0, 1.8, 15.0)).unwrap();

    let mut starts = 0;
    let mut t = 1.0;
    for i in 0..20 {
        let y = if i % 2 == 0 { 2.5 } else { 2.8 };
        let outcome = orchestrator.process(&at(t, 0.0, y, 15.0)).unwrap();
        if let Some(record) = outcome.record() {
            if matches!(record.session_event, SessionEvent::Started(_)) {
                starts += 1;
            }
            assert!(!matches!(record.session_event, SessionEvent::Ended(_)));
        }
        t += 0.5;
    }
    assert_eq!(starts, 0);
    let device = orchestrator.device("RADAR_1").unwrap();
    assert_eq!(device.tracker().live_sessions().len(), 1);
}

#[test]
fn test_debounce_single_close_sample() {
    let mut orchestrator = IngestionOrchestrator::new(Config::default(), shelf());
    let first = orchestrator.process(&at(0.0, 0.0, 1.0, 5.0)).unwrap();
    // Speed jump forces the gate open even though no time elapsed.
    let second = orchestrator.process(&at(0.0, 0.0, 4.0, 60.0)).unwrap();

    assert_eq!(first.record().unwrap().session_event, SessionEvent::Pending);
    assert_eq!(second.record().unwrap().session_event, SessionEvent::Idle);
    assert!(second.summary().is_none());
    let device = orchestrator.device("RADAR_1").unwrap();
    assert!(device.tracker().live_sessions().is_empty());
    assert_eq!(device.tracker().pending_count(), 0);
}

#[test]
fn test_gate_forced_sample() {
    let gate = AdaptiveSampleGate::default();
    let mut state = gate.new_state();
    state.last_sample_time = Some(t0());
    state.last_move_speed = 5.0;

    let decision = gate.should_sample(t0(), 50.0, &mut state);
    assert!(decision.should_sample);
    assert_eq!(decision.reason, SamplingReason::AbruptChange);
}

#[test]
fn test_region_fallback_far_point() {
    let index = SpatialIndex::new(shelf(), 0.05);
    let matched = index.attribute(100.0, 100.0).expect("regions exist");
    assert_eq!(matched.region_id, 2);
    assert!(!matched.contained);

    let mut orchestrator = IngestionOrchestrator::new(Config::default(), shelf());
    let outcome = orchestrator.process(&at(0.0, -0.5, 0.5, 2.0)).unwrap();
    let region = outcome.record().unwrap().region.clone().unwrap();
    assert_eq!(region.region_name, "Snacks");
    assert_eq!(region.product_ref.as_deref(), Some("SKU-100"));
    assert!(region.contained);
}

#[test]
fn test_scoring_is_pure_and_decays() {
    let scorer = SatisfactionScorer::default();
    assert_eq!(scorer.score(Some(72.0), Some(14.0)), scorer.score(Some(72.0), Some(14.0)));

    let ideal = scorer.score(Some(70.0), Some(14.0)).score;
    let edge = scorer.score(Some(95.0), Some(14.0)).score;
    assert!(ideal >= edge);
    let missing = scorer.score(None, None);
    assert!(!missing.is_valid);
}

/// Rejects every record write; summaries go through.
struct RecordsDown {
    inner: MemoryStore,
    record_calls: AtomicU32,
}

impl PersistencePort for RecordsDown {
    fn save_record(&self, _: &ProcessedRecord) -> Result<(), PersistenceError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Unavailable("records table offline".into()))
    }

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        self.inner.save_session_summary(summary)
    }

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
        self.inner.list_regions()
    }

    fn recent_samples(&self, key: &str, limit: usize) -> Result<Vec<Sample>, PersistenceError> {
        self.inner.recent_samples(key, limit)
    }
}

#[test]
fn test_persistence_failure_keeps_tracker_state() {
    let store = Arc::new(RetryingStore::new(
        RecordsDown {
            inner: MemoryStore::new(),
            record_calls: AtomicU32::new(0),
        },
        RetryPolicy::immediate(2),
    ));
    let stats = Arc::new(IngestStats::new());
    let sink = OutcomeSink::new(store.clone(), stats.clone());
    let mut orchestrator = IngestionOrchestrator::new(Config::default(), shelf());

    for sample in lifecycle() {
        let outcome = orchestrator.process(&sample).unwrap();
        let err = sink.accept(&outcome).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Persistence(PersistenceError::Unavailable(_))
        ));
        assert!(err.is_retryable());
    }

    // Every record failed (after one retry each), yet the session ran its course.
    assert_eq!(store.inner().record_calls.load(Ordering::SeqCst), 10);
    assert_eq!(stats.get(Counter::PersistenceFailures), 5);
    assert_eq!(stats.get(Counter::SessionsCompleted), 1);
    let summaries = store.inner().inner.summaries();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].is_engaged);
}

#[test]
fn test_worker_pool_writes_jsonl() {
    let dir = temp_dir("pool");
    let store = Arc::new(JsonLinesStore::open(&dir).unwrap());
    let stats = Arc::new(IngestStats::new());
    let sink = OutcomeSink::new(store.clone(), stats.clone());
    let mut dispatcher = IngestDispatcher::new(Config::default(), shelf(), sink);

    let devices = ["RADAR_1", "RADAR_2", "RADAR_3"];
    for sample in lifecycle() {
        for device in devices {
            let mut s = sample.clone();
            s.device_id = device.to_string();
            let line = serde_json::to_string(&s).unwrap();
            dispatcher.dispatch_line(&line).unwrap();
        }
    }
    assert!(dispatcher.dispatch_line("{\"x\": \"left\"}").is_err());
    dispatcher.shutdown();

    let summaries = store.load_summaries().unwrap();
    assert_eq!(summaries.len(), 3);
    let mut seen: Vec<&str> = summaries.iter().map(|s| s.device_id.as_str()).collect();
    seen.sort_unstable();
    assert_eq!(seen, devices.to_vec());
    assert_eq!(store.load_records().unwrap().len(), 15);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 16);
    assert_eq!(snapshot.rejected, 1);
    assert_eq!(snapshot.sessions_completed, 3);

    // A restarted worker primes its history from what was written.
    let recent = store.recent_samples("RADAR_2", 3).unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|s| s.device_id == "RADAR_2"));

    let _ = std::fs::remove_dir_all(dir);
}
