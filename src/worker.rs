//! Per-device worker threads.
//!
//! Samples for one device must be processed in order, samples for different
//! devices need not be. The dispatcher therefore runs one thread per
//! `device_id`, each owning its [`DevicePipeline`] and fed through a bounded
//! channel. A full channel sheds the sample instead of blocking the reader.
//!
//! Workers also run the idle sweep. Replayed data carries old timestamps, so
//! the sweep uses a logical clock: the newest sample timestamp advanced by
//! the wall time elapsed since it arrived.

use crate::config::Config;
use crate::core::pipeline::{DevicePipeline, ProcessOutcome, SharedStages};
use crate::core::session::{SessionEvent, SessionSummary};
use crate::core::spatial::Region;
use crate::error::{DispatchError, PersistenceError, PipelineError};
use crate::ingress::{self, Sample};
use crate::persistence::SharedPort;
use crate::stats::{Counter, SharedIngestStats};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Persists pipeline output and keeps the counters in step.
///
/// Every write is attempted even after one fails, and the first failure is
/// returned. Tracker state is never rolled back because a write failed.
#[derive(Clone)]
pub struct OutcomeSink {
    port: SharedPort,
    stats: SharedIngestStats,
}

impl OutcomeSink {
    pub fn new(port: SharedPort, stats: SharedIngestStats) -> Self {
        Self { port, stats }
    }

    pub fn stats(&self) -> &SharedIngestStats {
        &self.stats
    }

    pub fn port(&self) -> &SharedPort {
        &self.port
    }

    pub fn accept(&self, outcome: &ProcessOutcome) -> Result<(), PipelineError> {
        let ProcessOutcome::Processed { record, summary } = outcome else {
            self.stats.record(Counter::Skipped);
            return Ok(());
        };

        self.stats.record(Counter::Processed);
        match record.session_event {
            SessionEvent::Started(_) => self.stats.record(Counter::SessionsStarted),
            SessionEvent::Discarded(_) => self.stats.record(Counter::SessionsDiscarded),
            _ => {}
        }

        let mut result = self.persist(self.port.save_record(record));
        if let Some(summary) = summary {
            self.stats.record(Counter::SessionsCompleted);
            result = result.and(self.persist(self.port.save_session_summary(summary)));
        }
        result
    }

    /// Summaries produced by a sweep or shutdown rather than a departure.
    pub fn accept_forced(&self, summaries: &[SessionSummary]) -> Result<(), PipelineError> {
        summaries.iter().fold(Ok(()), |result, summary| {
            self.stats.record(Counter::SessionsForceClosed);
            result.and(self.persist(self.port.save_session_summary(summary)))
        })
    }

    fn persist(&self, result: Result<(), PersistenceError>) -> Result<(), PipelineError> {
        result.map_err(|e| {
            self.stats.record(Counter::PersistenceFailures);
            PipelineError::from(e)
        })
    }
}

/// Log a failed write at a level matching whether it may succeed later.
fn report_failure(device_id: &str, err: &PipelineError) {
    if err.is_retryable() {
        tracing::warn!(device_id, error = %err, "write failed, store may recover");
    } else {
        tracing::error!(device_id, error = %err, "write rejected");
    }
}

struct Job {
    sample: Sample,
    arrived: Instant,
}

struct WorkerHandle {
    tx: Sender<Job>,
    handle: JoinHandle<()>,
}

/// Fans samples out to one worker thread per device.
pub struct IngestDispatcher {
    config: Config,
    stages: SharedStages,
    sink: OutcomeSink,
    workers: HashMap<String, WorkerHandle>,
}

impl IngestDispatcher {
    pub fn new(config: Config, regions: Vec<Region>, sink: OutcomeSink) -> Self {
        let stages = SharedStages::new(&config, regions);
        Self {
            config,
            stages,
            sink,
            workers: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Parse a JSON line and dispatch it.
    pub fn dispatch_line(&mut self, line: &str) -> Result<(), DispatchError> {
        self.sink.stats.record(Counter::Received);
        match ingress::parse_line(line, Utc::now(), &self.config.default_device_id) {
            Ok(sample) => self.enqueue(sample),
            Err(e) => {
                self.sink.stats.record(Counter::Rejected);
                Err(e.into())
            }
        }
    }

    pub fn dispatch(&mut self, sample: Sample) -> Result<(), DispatchError> {
        self.sink.stats.record(Counter::Received);
        if let Err(e) = sample.check() {
            self.sink.stats.record(Counter::Rejected);
            return Err(e.into());
        }
        self.enqueue(sample)
    }

    fn enqueue(&mut self, sample: Sample) -> Result<(), DispatchError> {
        let device_id = sample.device_id.clone();
        if !self.workers.contains_key(&device_id) {
            let worker = self.spawn(&device_id)?;
            self.workers.insert(device_id.clone(), worker);
        }
        let Some(worker) = self.workers.get(&device_id) else {
            return Err(DispatchError::WorkerGone(device_id));
        };

        let job = Job {
            sample,
            arrived: Instant::now(),
        };
        match worker.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.sink.stats.record(Counter::Shed);
                tracing::warn!(device_id = %device_id, "device queue full, sample shed");
                Err(DispatchError::QueueFull(device_id))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.workers.remove(&device_id);
                Err(DispatchError::WorkerGone(device_id))
            }
        }
    }

    fn spawn(&self, device_id: &str) -> Result<WorkerHandle, DispatchError> {
        let (tx, rx) = bounded::<Job>(self.config.worker.queue_capacity.max(1));
        let pipeline = DevicePipeline::new(device_id, &self.config, self.stages.clone());
        let sink = self.sink.clone();
        let sweep_interval = self.config.worker.sweep_interval;
        let history_limit = self.config.worker.device_history_limit;

        let handle = thread::Builder::new()
            .name(format!("presence-{device_id}"))
            .spawn(move || {
                run_worker(pipeline, rx, sink, sweep_interval, history_limit);
            })
            .map_err(|e| {
                tracing::error!(device_id, error = %e, "failed to spawn worker");
                DispatchError::WorkerGone(device_id.to_string())
            })?;

        tracing::info!(device_id, "device worker started");
        Ok(WorkerHandle { tx, handle })
    }

    /// Close every queue and wait for workers to drain, close their
    /// sessions and persist the summaries.
    pub fn shutdown(self) {
        for (device_id, worker) in self.workers {
            drop(worker.tx);
            if worker.handle.join().is_err() {
                tracing::error!(device_id = %device_id, "device worker panicked");
            }
        }
    }
}

/// Newest sample time advanced by the wall time since it arrived.
fn logical_now(clock: Option<(DateTime<Utc>, Instant)>) -> DateTime<Utc> {
    match clock {
        Some((timestamp, arrived)) => {
            timestamp + chrono::Duration::from_std(arrived.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
        }
        None => Utc::now(),
    }
}

fn run_worker(
    mut pipeline: DevicePipeline,
    rx: crossbeam_channel::Receiver<Job>,
    sink: OutcomeSink,
    sweep_interval: Duration,
    history_limit: usize,
) {
    match sink.port.recent_samples(pipeline.device_id(), history_limit) {
        Ok(history) => pipeline.prime_history(history),
        Err(e) => tracing::warn!(
            device_id = pipeline.device_id(),
            error = %e,
            "could not load recent samples"
        ),
    }

    let mut clock: Option<(DateTime<Utc>, Instant)> = None;
    let mut last_sweep = Instant::now();
    let device_id = pipeline.device_id().to_string();
    let forced = |summaries: Vec<SessionSummary>| {
        if let Err(e) = sink.accept_forced(&summaries) {
            report_failure(&device_id, &e);
        }
    };

    loop {
        match rx.recv_timeout(sweep_interval) {
            Ok(job) => {
                let newest = clock.map_or(job.sample.timestamp, |(t, _)| t.max(job.sample.timestamp));
                clock = Some((newest, job.arrived));

                // Sessions that went quiet expire before the new sample can touch them.
                if last_sweep.elapsed() >= sweep_interval {
                    forced(pipeline.sweep(logical_now(clock)));
                    last_sweep = Instant::now();
                }

                match pipeline.process(&job.sample) {
                    Ok(outcome) => {
                        if let Err(e) = sink.accept(&outcome) {
                            report_failure(&device_id, &e);
                        }
                    }
                    Err(e) => {
                        sink.stats.record(Counter::Rejected);
                        tracing::warn!(device_id = %device_id, error = %e, "sample rejected");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                forced(pipeline.sweep(logical_now(clock)));
                last_sweep = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let closed = pipeline.close_all(logical_now(clock));
    tracing::info!(device_id = %device_id, sessions = closed.len(), "device worker stopping");
    forced(closed);
}
