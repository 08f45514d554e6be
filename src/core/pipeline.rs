//! Per-sample composition of the analytics stages.
//!
//! The orchestrator owns no I/O. It takes a validated sample, runs it through
//! gate → smoothing → region lookup → scoring → session tracking, and hands
//! back a [`ProcessedRecord`] plus any summary the tracker emitted. Callers
//! decide what to persist.

use crate::config::{Config, SmoothingConfig};
use crate::core::behavior::{InteractionDepth, InterestLevel};
use crate::core::engagement::{Engagement, EngagementClassifier, EngagementLevel};
use crate::core::sampling::{AdaptiveSampleGate, SamplingState};
use crate::core::satisfaction::{SatisfactionScore, SatisfactionScorer};
use crate::core::session::{PresenceSessionTracker, SessionEvent, SessionSummary};
use crate::core::smoothing::{SmoothedVitals, VitalsSmoother};
use crate::core::spatial::{Region, RegionMatch, SpatialIndex};
use crate::error::ValidationError;
use crate::ingress::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Everything derived from one accepted sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub move_speed: f64,
    pub distance_m: f64,
    pub heart_rate: Option<f64>,
    pub breath_rate: Option<f64>,
    pub smoothed: SmoothedVitals,
    pub satisfaction: SatisfactionScore,
    pub region: Option<RegionMatch>,
    pub interaction: InteractionDepth,
    pub interest: InterestLevel,
    pub engagement_level: EngagementLevel,
    pub engagement_duration_secs: f64,
    pub session_id: Option<Uuid>,
    pub session_event: SessionEvent,
    pub next_interval_ms: u64,
}

impl ProcessedRecord {
    /// The raw reading behind this record.
    pub fn to_sample(&self) -> Sample {
        Sample::new(
            self.device_id.clone(),
            self.x,
            self.y,
            self.move_speed,
            self.timestamp,
        )
        .with_vitals(self.heart_rate, self.breath_rate)
    }
}

/// Result of [`IngestionOrchestrator::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The gate dropped the sample; nothing else ran.
    Skipped { next_interval_ms: u64 },
    Processed {
        record: Box<ProcessedRecord>,
        summary: Option<SessionSummary>,
    },
}

impl ProcessOutcome {
    pub fn record(&self) -> Option<&ProcessedRecord> {
        match self {
            ProcessOutcome::Processed { record, .. } => Some(record),
            ProcessOutcome::Skipped { .. } => None,
        }
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        match self {
            ProcessOutcome::Processed { summary, .. } => summary.as_ref(),
            ProcessOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped { .. })
    }
}

/// Stages that are shared, read-only, across devices.
#[derive(Debug, Clone)]
pub struct SharedStages {
    pub spatial: Arc<SpatialIndex>,
    pub scorer: Arc<SatisfactionScorer>,
    pub classifier: Arc<EngagementClassifier>,
    pub gate: Arc<AdaptiveSampleGate>,
}

impl SharedStages {
    pub fn new(config: &Config, regions: Vec<Region>) -> Self {
        Self {
            spatial: Arc::new(SpatialIndex::new(regions, config.spatial.margin_m)),
            scorer: Arc::new(SatisfactionScorer::new(config.satisfaction.clone())),
            classifier: Arc::new(EngagementClassifier::new(config.engagement.clone())),
            gate: Arc::new(AdaptiveSampleGate::new(config.sampling.clone())),
        }
    }
}

/// Mutable state of one device, owned by exactly one caller at a time.
#[derive(Debug)]
pub struct DevicePipeline {
    device_id: String,
    stages: SharedStages,
    sampling: SamplingState,
    /// One smoother per live session, so subjects never share a window.
    smoothers: HashMap<Uuid, VitalsSmoother>,
    smoothing: SmoothingConfig,
    hesitation_speed: f64,
    tracker: PresenceSessionTracker,
    recent: VecDeque<Sample>,
    history_limit: usize,
}

impl DevicePipeline {
    pub fn new(device_id: impl Into<String>, config: &Config, stages: SharedStages) -> Self {
        let device_id = device_id.into();
        Self {
            sampling: stages.gate.new_state(),
            smoothers: HashMap::new(),
            smoothing: config.smoothing.clone(),
            hesitation_speed: config.behavior.hesitation_speed,
            tracker: PresenceSessionTracker::new(device_id.clone(), config.presence.clone()),
            recent: VecDeque::with_capacity(config.worker.device_history_limit),
            history_limit: config.worker.device_history_limit.max(1),
            device_id,
            stages,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn tracker(&self) -> &PresenceSessionTracker {
        &self.tracker
    }

    pub fn sampling_state(&self) -> &SamplingState {
        &self.sampling
    }

    /// Seed the engagement buffer with samples persisted by an earlier run.
    pub fn prime_history(&mut self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.remember(sample);
        }
    }

    pub fn process(&mut self, sample: &Sample) -> Result<ProcessOutcome, ValidationError> {
        sample.check()?;

        let decision =
            self.stages
                .gate
                .should_sample(sample.timestamp, sample.move_speed, &mut self.sampling);
        if !decision.should_sample {
            return Ok(ProcessOutcome::Skipped {
                next_interval_ms: decision.next_interval_ms,
            });
        }

        let smoothed = match self.tracker.session_for(sample) {
            Some(id) => self
                .smoothers
                .entry(id)
                .or_insert_with(|| VitalsSmoother::new(&self.smoothing))
                .update(sample.heart_rate, sample.breath_rate),
            // Not attributable to a session yet: smoothed against itself only.
            None => VitalsSmoother::new(&self.smoothing).update(sample.heart_rate, sample.breath_rate),
        };
        let satisfaction = if self.smoothing.enabled {
            self.stages
                .scorer
                .score(smoothed.heart_rate, smoothed.breath_rate)
        } else {
            self.stages.scorer.score(sample.heart_rate, sample.breath_rate)
        };
        let region = self.stages.spatial.attribute(sample.x, sample.y);
        let interaction = InteractionDepth::from_speed(sample.move_speed, self.hesitation_speed);

        self.remember(sample.clone());
        let observation = self.tracker.observe(
            sample,
            Some(&satisfaction),
            &self.stages.classifier,
            &self.stages.scorer,
        );

        if let SessionEvent::Ended(id) | SessionEvent::Discarded(id) = observation.event {
            self.smoothers.remove(&id);
        }

        let engagement = match observation.event {
            SessionEvent::Started(_) | SessionEvent::Updated(_) => observation.engagement,
            SessionEvent::Idle | SessionEvent::Pending => self
                .stages
                .classifier
                .classify(self.recent.iter(), sample.timestamp),
            SessionEvent::Ended(_) | SessionEvent::Discarded(_) => Engagement::none(),
        };

        let record = ProcessedRecord {
            device_id: sample.device_id.clone(),
            timestamp: sample.timestamp,
            x: sample.x,
            y: sample.y,
            move_speed: sample.move_speed,
            distance_m: sample.distance_from_origin(),
            heart_rate: sample.heart_rate,
            breath_rate: sample.breath_rate,
            smoothed,
            satisfaction,
            region,
            interaction,
            interest: interaction.interest(),
            engagement_level: engagement.level,
            engagement_duration_secs: engagement.duration_secs,
            session_id: observation.event.session_id(),
            session_event: observation.event,
            next_interval_ms: decision.next_interval_ms,
        };

        Ok(ProcessOutcome::Processed {
            record: Box::new(record),
            summary: observation.summary,
        })
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        let closed = self.tracker.sweep(now, &self.stages.scorer);
        let tracker = &self.tracker;
        self.smoothers.retain(|id, _| tracker.session(*id).is_some());
        closed
    }

    pub fn close_all(&mut self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        self.smoothers.clear();
        self.tracker.close_all(now, &self.stages.scorer)
    }

    /// Sessions that currently hold a smoothing window.
    pub fn smoothed_subjects(&self) -> usize {
        self.smoothers.len()
    }

    fn remember(&mut self, sample: Sample) {
        if self.recent.len() == self.history_limit {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
    }
}

/// Synchronous orchestrator over every device seen so far.
///
/// Used directly for replays and tests; the worker pool runs one
/// [`DevicePipeline`] per thread instead.
#[derive(Debug)]
pub struct IngestionOrchestrator {
    config: Config,
    stages: SharedStages,
    devices: HashMap<String, DevicePipeline>,
}

impl IngestionOrchestrator {
    pub fn new(config: Config, regions: Vec<Region>) -> Self {
        let stages = SharedStages::new(&config, regions);
        Self {
            config,
            stages,
            devices: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stages(&self) -> &SharedStages {
        &self.stages
    }

    pub fn device(&self, device_id: &str) -> Option<&DevicePipeline> {
        self.devices.get(device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Pipeline for a device, created on first use.
    pub fn device_mut(&mut self, device_id: &str) -> &mut DevicePipeline {
        let config = &self.config;
        let stages = &self.stages;
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| DevicePipeline::new(device_id, config, stages.clone()))
    }

    pub fn process(&mut self, sample: &Sample) -> Result<ProcessOutcome, ValidationError> {
        sample.check()?;
        self.device_mut(&sample.device_id).process(sample)
    }

    /// Run the idle sweep over every device.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        self.devices
            .values_mut()
            .flat_map(|device| device.sweep(now))
            .collect()
    }

    pub fn close_all(&mut self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        self.devices
            .values_mut()
            .flat_map(|device| device.close_all(now))
            .collect()
    }
}
