//! Presence session tracking.
//!
//! Turns the sample stream of one sensor into shopper sessions:
//!
//! ```text
//!   ABSENT ──(≤ presence)──▶ TENTATIVE ──(confirmed)──▶ PRESENT ──(≥ absence)──▶ ABSENT
//!                              │                          │   ▲
//!                              └──(broken streak)─────────┘   └── updates
//! ```
//!
//! Several subjects can stand in front of one sensor, so sessions (and
//! tentative candidates) are keyed by position: a sample belongs to the live
//! session whose last known position is closest, within the match distance.
//! The gap between the presence and absence thresholds is a hysteresis band
//! in which nothing starts and nothing ends.

use crate::config::PresenceConfig;
use crate::core::engagement::{Engagement, EngagementClassifier, EngagementLevel};
use crate::core::satisfaction::{SatisfactionClass, SatisfactionScore, SatisfactionScorer};
use crate::ingress::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use uuid::Uuid;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The subject walked past the absence threshold
    Departed,
    /// No sample for longer than the idle grace period
    IdleTimeout,
    /// The session outlived the maximum lifetime
    LifetimeExceeded,
    /// The tracker was shut down
    Shutdown,
}

/// Lifecycle event produced by one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "session_id", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Not attributed to any session
    Idle,
    /// Counted towards a tentative presence
    Pending,
    Started(Uuid),
    Updated(Uuid),
    Ended(Uuid),
    /// Ended too soon to count
    Discarded(Uuid),
}

impl SessionEvent {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            SessionEvent::Started(id)
            | SessionEvent::Updated(id)
            | SessionEvent::Ended(id)
            | SessionEvent::Discarded(id) => Some(*id),
            SessionEvent::Idle | SessionEvent::Pending => None,
        }
    }
}

/// Immutable record of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub avg_heart_rate: Option<f64>,
    pub avg_breath_rate: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub satisfaction_class: Option<SatisfactionClass>,
    pub is_engaged: bool,
    pub engagement_level: EngagementLevel,
    pub engagement_duration_secs: f64,
    pub sample_count: usize,
    pub end_reason: EndReason,
}

/// Live state of one presence episode.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub positions: Vec<(f64, f64)>,
    pub move_speeds: Vec<f64>,
    pub heart_rates: Vec<f64>,
    pub breath_rates: Vec<f64>,
    pub satisfaction_scores: Vec<f64>,
    /// Best level observed so far; never lowered
    pub engagement_level: EngagementLevel,
    pub engagement_start_time: Option<DateTime<Utc>>,
    pub engagement_duration_secs: f64,
    /// Recent samples feeding the engagement window
    history: VecDeque<Sample>,
    history_limit: usize,
}

impl SessionState {
    fn new(start_time: DateTime<Utc>, history_limit: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            start_time,
            last_update: start_time,
            positions: Vec::new(),
            move_speeds: Vec::new(),
            heart_rates: Vec::new(),
            breath_rates: Vec::new(),
            satisfaction_scores: Vec::new(),
            engagement_level: EngagementLevel::None,
            engagement_start_time: None,
            engagement_duration_secs: 0.0,
            history: VecDeque::with_capacity(history_limit),
            history_limit,
        }
    }

    pub fn last_position(&self) -> Option<(f64, f64)> {
        self.positions.last().copied()
    }

    pub fn sample_count(&self) -> usize {
        self.positions.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &Sample> {
        self.history.iter()
    }

    fn record(&mut self, sample: &Sample, satisfaction: Option<&SatisfactionScore>) {
        self.last_update = self.last_update.max(sample.timestamp);
        self.positions.push(sample.position());
        self.move_speeds.push(sample.move_speed);
        if let Some(hr) = sample.heart_rate {
            self.heart_rates.push(hr);
        }
        if let Some(br) = sample.breath_rate {
            self.breath_rates.push(br);
        }
        if let Some(score) = satisfaction.filter(|s| s.is_valid) {
            self.satisfaction_scores.push(score.score);
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(sample.clone());
    }

    /// Fold a window classification into the session's best engagement.
    fn raise_engagement(&mut self, engagement: Engagement, now: DateTime<Utc>) {
        if engagement.level > self.engagement_level {
            self.engagement_level = engagement.level;
            self.engagement_duration_secs = engagement.duration_secs;
            if self.engagement_start_time.is_none() {
                self.engagement_start_time =
                    Some(now - Duration::milliseconds((engagement.duration_secs * 1000.0) as i64));
            }
        } else if engagement.level == self.engagement_level
            && engagement.level > EngagementLevel::None
            && engagement.duration_secs > self.engagement_duration_secs
        {
            self.engagement_duration_secs = engagement.duration_secs;
        }
    }

    fn summarize(
        &self,
        device_id: &str,
        end_time: DateTime<Utc>,
        end_reason: EndReason,
        scorer: &SatisfactionScorer,
    ) -> SessionSummary {
        let avg_satisfaction = mean(&self.satisfaction_scores);
        SessionSummary {
            session_id: self.session_id,
            device_id: device_id.to_string(),
            start_time: self.start_time,
            end_time,
            duration_secs: seconds_between(self.start_time, end_time),
            avg_heart_rate: mean(&self.heart_rates),
            avg_breath_rate: mean(&self.breath_rates),
            avg_satisfaction,
            satisfaction_class: avg_satisfaction.map(|s| scorer.classify(s)),
            is_engaged: self.engagement_level.is_engaged(),
            engagement_level: self.engagement_level,
            engagement_duration_secs: self.engagement_duration_secs,
            sample_count: self.sample_count(),
            end_reason,
        }
    }
}

/// A presence that has not yet been confirmed.
#[derive(Debug, Clone)]
struct Candidate {
    samples: Vec<(Sample, Option<SatisfactionScore>)>,
}

impl Candidate {
    fn last_position(&self) -> Option<(f64, f64)> {
        self.samples.last().map(|(s, _)| s.position())
    }

    fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|(s, _)| s.timestamp)
    }
}

/// What the tracker made of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub event: SessionEvent,
    /// Window classification for the attributed session (none otherwise)
    pub engagement: Engagement,
    /// Best engagement of the attributed session so far
    pub session_engagement: Option<EngagementLevel>,
    /// Emitted when a session ended and was long enough to count
    pub summary: Option<SessionSummary>,
}

impl Observation {
    fn idle(event: SessionEvent) -> Self {
        Self {
            event,
            engagement: Engagement::none(),
            session_engagement: None,
            summary: None,
        }
    }
}

/// Session state machine for the subjects in front of one sensor.
#[derive(Debug)]
pub struct PresenceSessionTracker {
    device_id: String,
    config: PresenceConfig,
    sessions: Vec<SessionState>,
    candidates: Vec<Candidate>,
}

impl PresenceSessionTracker {
    pub fn new(device_id: impl Into<String>, config: PresenceConfig) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            sessions: Vec::new(),
            candidates: Vec::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn live_sessions(&self) -> &[SessionState] {
        &self.sessions
    }

    pub fn session(&self, id: Uuid) -> Option<&SessionState> {
        self.sessions.iter().find(|s| s.session_id == id)
    }

    /// Session the sample would update, if any.
    pub fn session_for(&self, sample: &Sample) -> Option<Uuid> {
        self.match_session(sample)
            .map(|idx| self.sessions[idx].session_id)
    }

    pub fn pending_count(&self) -> usize {
        self.candidates.len()
    }

    /// Feed one sample through the state machine.
    pub fn observe(
        &mut self,
        sample: &Sample,
        satisfaction: Option<&SatisfactionScore>,
        classifier: &EngagementClassifier,
        scorer: &SatisfactionScorer,
    ) -> Observation {
        let distance = sample.distance_from_origin();
        let matched = self.match_session(sample);

        if distance >= self.config.absence_threshold_m {
            // A far sample that matches nobody only ends a session when no
            // other subject could have produced it; the rest is left to the sweep.
            if let Some(idx) = matched.or_else(|| self.sole_fresh_session(sample)) {
                return self.depart(idx, sample, satisfaction, scorer);
            }
            if self.nearest_candidate(sample, Some(self.config.match_distance_m)).is_some() {
                self.cancel_nearest_candidate(sample, Some(self.config.match_distance_m));
            } else if self.candidates.len() == 1 && self.fresh_sessions(sample).next().is_none() {
                self.cancel_nearest_candidate(sample, None);
            }
            return Observation::idle(SessionEvent::Idle);
        }

        if let Some(idx) = matched {
            return self.update(idx, sample, satisfaction, classifier);
        }

        if distance <= self.config.presence_threshold_m {
            return self.confirm(sample, satisfaction, classifier);
        }

        // Hysteresis band with no live session: a pending presence loses its streak.
        self.cancel_nearest_candidate(sample, Some(self.config.match_distance_m));
        Observation::idle(SessionEvent::Idle)
    }

    /// Force-close sessions that went quiet or lived too long, and drop
    /// stale candidates.
    pub fn sweep(&mut self, now: DateTime<Utc>, scorer: &SatisfactionScorer) -> Vec<SessionSummary> {
        let grace = self.idle_grace();
        let lifetime = Duration::milliseconds((self.config.max_session_lifetime_secs * 1000.0) as i64);

        self.candidates
            .retain(|c| c.last_seen().map_or(false, |t| now - t <= grace));

        let mut summaries = Vec::new();
        let mut idx = 0;
        while idx < self.sessions.len() {
            let session = &self.sessions[idx];
            let outcome = if now - session.start_time > lifetime {
                Some((now, EndReason::LifetimeExceeded))
            } else if now - session.last_update > grace {
                Some((session.last_update, EndReason::IdleTimeout))
            } else {
                None
            };

            match outcome {
                Some((end_time, reason)) => {
                    let session = self.sessions.swap_remove(idx);
                    let long_enough = seconds_between(session.start_time, end_time)
                        >= self.config.min_session_secs;
                    if reason == EndReason::LifetimeExceeded || long_enough {
                        tracing::info!(
                            session_id = %session.session_id,
                            device_id = %self.device_id,
                            ?reason,
                            samples = session.sample_count(),
                            "session force-closed"
                        );
                        summaries.push(session.summarize(&self.device_id, end_time, reason, scorer));
                    } else {
                        tracing::debug!(session_id = %session.session_id, "short idle session discarded");
                    }
                }
                None => idx += 1,
            }
        }
        summaries
    }

    /// End every live session, e.g. on shutdown.
    pub fn close_all(&mut self, now: DateTime<Utc>, scorer: &SatisfactionScorer) -> Vec<SessionSummary> {
        self.candidates.clear();
        let min = self.config.min_session_secs;
        let device_id = self.device_id.clone();
        self.sessions
            .drain(..)
            .filter(|s| seconds_between(s.start_time, now.max(s.last_update)) >= min)
            .map(|s| s.summarize(&device_id, now.max(s.last_update), EndReason::Shutdown, scorer))
            .collect()
    }

    fn idle_grace(&self) -> Duration {
        Duration::milliseconds((self.config.idle_grace_secs * 1000.0) as i64)
    }

    /// Indices of sessions updated within the idle grace of the sample.
    fn fresh_sessions<'a>(&'a self, sample: &'a Sample) -> impl Iterator<Item = usize> + 'a {
        let grace = self.idle_grace();
        self.sessions
            .iter()
            .enumerate()
            .filter(move |(_, s)| sample.timestamp - s.last_update <= grace)
            .map(|(i, _)| i)
    }

    /// Live, non-stale session closest to the sample within the match distance.
    fn match_session(&self, sample: &Sample) -> Option<usize> {
        self.fresh_sessions(sample)
            .filter_map(|i| self.sessions[i].last_position().map(|p| (i, sample.distance_to(p))))
            .filter(|(_, d)| *d <= self.config.match_distance_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// The one fresh session, provided nothing else is live or pending.
    fn sole_fresh_session(&self, sample: &Sample) -> Option<usize> {
        if !self.candidates.is_empty() {
            return None;
        }
        let mut fresh = self.fresh_sessions(sample);
        match (fresh.next(), fresh.next()) {
            (Some(idx), None) => Some(idx),
            _ => None,
        }
    }

    fn nearest_candidate(&self, sample: &Sample, within: Option<f64>) -> Option<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.last_position().map(|p| (i, sample.distance_to(p))))
            .filter(|(_, d)| within.map_or(true, |max| *d <= max))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    fn cancel_nearest_candidate(&mut self, sample: &Sample, within: Option<f64>) {
        if let Some(idx) = self.nearest_candidate(sample, within) {
            self.candidates.swap_remove(idx);
            tracing::debug!(device_id = %self.device_id, "tentative presence cancelled");
        }
    }

    fn update(
        &mut self,
        idx: usize,
        sample: &Sample,
        satisfaction: Option<&SatisfactionScore>,
        classifier: &EngagementClassifier,
    ) -> Observation {
        let session = &mut self.sessions[idx];
        session.record(sample, satisfaction);
        let engagement = classifier.classify(session.history(), sample.timestamp);
        session.raise_engagement(engagement, sample.timestamp);

        Observation {
            event: SessionEvent::Updated(session.session_id),
            engagement,
            session_engagement: Some(session.engagement_level),
            summary: None,
        }
    }

    fn confirm(
        &mut self,
        sample: &Sample,
        satisfaction: Option<&SatisfactionScore>,
        classifier: &EngagementClassifier,
    ) -> Observation {
        let idx = match self.nearest_candidate(sample, Some(self.config.match_distance_m)) {
            Some(idx) => {
                self.candidates[idx]
                    .samples
                    .push((sample.clone(), satisfaction.cloned()));
                idx
            }
            None => {
                self.candidates.push(Candidate {
                    samples: vec![(sample.clone(), satisfaction.cloned())],
                });
                self.candidates.len() - 1
            }
        };

        if self.candidates[idx].samples.len() < self.config.confirmations as usize {
            return Observation::idle(SessionEvent::Pending);
        }

        let candidate = self.candidates.swap_remove(idx);
        let start_time = candidate
            .samples
            .first()
            .map(|(s, _)| s.timestamp)
            .unwrap_or(sample.timestamp);

        let mut session = SessionState::new(start_time, self.config.history_limit);
        for (s, score) in &candidate.samples {
            session.record(s, score.as_ref());
        }
        let engagement = classifier.classify(session.history(), sample.timestamp);
        session.raise_engagement(engagement, sample.timestamp);

        tracing::info!(
            session_id = %session.session_id,
            device_id = %self.device_id,
            x = sample.x,
            y = sample.y,
            "session started"
        );

        let observation = Observation {
            event: SessionEvent::Started(session.session_id),
            engagement,
            session_engagement: Some(session.engagement_level),
            summary: None,
        };
        self.sessions.push(session);
        observation
    }

    fn depart(
        &mut self,
        idx: usize,
        sample: &Sample,
        satisfaction: Option<&SatisfactionScore>,
        scorer: &SatisfactionScorer,
    ) -> Observation {
        let mut session = self.sessions.swap_remove(idx);
        session.record(sample, satisfaction);
        let session_engagement = Some(session.engagement_level);

        let end_time = sample.timestamp;
        let duration = seconds_between(session.start_time, end_time);
        if duration < self.config.min_session_secs {
            tracing::debug!(
                session_id = %session.session_id,
                duration_secs = duration,
                "session too short, discarded"
            );
            return Observation {
                event: SessionEvent::Discarded(session.session_id),
                engagement: Engagement::none(),
                session_engagement,
                summary: None,
            };
        }

        let summary = session.summarize(&self.device_id, end_time, EndReason::Departed, scorer);
        tracing::info!(
            session_id = %summary.session_id,
            device_id = %summary.device_id,
            duration_secs = summary.duration_secs,
            engagement = summary.engagement_level.as_u8(),
            samples = summary.sample_count,
            "session ended"
        );

        Observation {
            event: SessionEvent::Ended(session.session_id),
            engagement: Engagement::none(),
            session_engagement,
            summary: Some(summary),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}
