//! Bounded exponential backoff around any [`PersistencePort`].

use crate::config::RetryConfig;
use crate::core::pipeline::ProcessedRecord;
use crate::core::session::SessionSummary;
use crate::core::spatial::Region;
use crate::error::PersistenceError;
use crate::ingress::Sample;
use crate::persistence::port::PersistencePort;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Result<T, PersistenceError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "persistence call failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps a store so transient failures are retried before surfacing.
#[derive(Debug)]
pub struct RetryingStore<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: PersistencePort> RetryingStore<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<P: PersistencePort> PersistencePort for RetryingStore<P> {
    fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError> {
        self.policy
            .run("save_record", || self.inner.save_record(record))
    }

    fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        self.policy
            .run("save_session_summary", || self.inner.save_session_summary(summary))
    }

    fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
        self.policy.run("list_regions", || self.inner.list_regions())
    }

    fn recent_samples(
        &self,
        subject_key: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, PersistenceError> {
        self.policy
            .run("recent_samples", || self.inner.recent_samples(subject_key, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::port::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` region lookups with `error`.
    struct Flaky {
        failures: u32,
        error: PersistenceError,
        calls: AtomicU32,
        inner: MemoryStore,
    }

    impl Flaky {
        fn new(failures: u32, error: PersistenceError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                inner: MemoryStore::with_regions(vec![Region::new(1, "A", (0.0, 1.0), (0.0, 1.0))]),
            }
        }
    }

    impl PersistencePort for Flaky {
        fn save_record(&self, record: &ProcessedRecord) -> Result<(), PersistenceError> {
            self.inner.save_record(record)
        }

        fn save_session_summary(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
            self.inner.save_session_summary(summary)
        }

        fn list_regions(&self) -> Result<Vec<Region>, PersistenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            self.inner.list_regions()
        }

        fn recent_samples(&self, key: &str, limit: usize) -> Result<Vec<Sample>, PersistenceError> {
            self.inner.recent_samples(key, limit)
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(8000));
    }

    #[test]
    fn test_transient_failure_retried() {
        let store = RetryingStore::new(
            Flaky::new(2, PersistenceError::Transient("lock wait timeout".into())),
            RetryPolicy::immediate(3),
        );
        assert_eq!(store.list_regions().unwrap().len(), 1);
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_attempts_exhausted() {
        let store = RetryingStore::new(
            Flaky::new(5, PersistenceError::Unavailable("down".into())),
            RetryPolicy::immediate(3),
        );
        let err = store.list_regions().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let store = RetryingStore::new(
            Flaky::new(5, PersistenceError::Rejected("constraint".into())),
            RetryPolicy::immediate(3),
        );
        assert_eq!(
            store.list_regions().unwrap_err(),
            PersistenceError::Rejected("constraint".into())
        );
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }
}
