//! Moving-average smoothing and outlier flags for vital signs.

use crate::config::SmoothingConfig;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Smoothed vitals for one reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothedVitals {
    pub heart_rate: Option<f64>,
    pub breath_rate: Option<f64>,
    pub heart_anomaly: bool,
    pub breath_anomaly: bool,
}

/// Rolling window over one vital.
#[derive(Debug, Clone)]
struct VitalWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl VitalWindow {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Whether `value` sits further than `sigma` population standard
    /// deviations from the current window mean.
    fn is_anomaly(&self, value: f64, sigma: f64) -> bool {
        if self.values.len() < 2 {
            return false;
        }
        let mean = self.values.iter().mean();
        let std_dev = self.values.iter().population_std_dev();
        (value - mean).abs() > sigma * std_dev
    }

    /// Push a reading and return the smoothed value.
    fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        if self.values.len() < 2 {
            value
        } else {
            self.values.iter().mean()
        }
    }
}

/// Smoother for one subject's heart and breath rate.
#[derive(Debug, Clone)]
pub struct VitalsSmoother {
    heart: VitalWindow,
    breath: VitalWindow,
    anomaly_sigma: f64,
}

impl VitalsSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            heart: VitalWindow::new(config.window),
            breath: VitalWindow::new(config.window),
            anomaly_sigma: config.anomaly_sigma,
        }
    }

    /// Flag and smooth one reading. Missing vitals pass through as `None`
    /// and leave their window untouched.
    pub fn update(&mut self, heart_rate: Option<f64>, breath_rate: Option<f64>) -> SmoothedVitals {
        let mut out = SmoothedVitals::default();

        if let Some(hr) = heart_rate {
            out.heart_anomaly = self.heart.is_anomaly(hr, self.anomaly_sigma);
            out.heart_rate = Some(self.heart.push(hr));
        }
        if let Some(br) = breath_rate {
            out.breath_anomaly = self.breath.is_anomaly(br, self.anomaly_sigma);
            out.breath_rate = Some(self.breath.push(br));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother() -> VitalsSmoother {
        VitalsSmoother::new(&SmoothingConfig::default())
    }

    #[test]
    fn test_first_reading_passes_through() {
        let mut s = smoother();
        let out = s.update(Some(72.0), None);
        assert_eq!(out.heart_rate, Some(72.0));
        assert_eq!(out.breath_rate, None);
        assert!(!out.heart_anomaly);
    }

    #[test]
    fn test_moving_average_over_window() {
        let mut s = smoother();
        for hr in [70.0, 72.0, 74.0, 76.0, 78.0] {
            s.update(Some(hr), None);
        }
        // Window of 5 drops the 70.
        let out = s.update(Some(80.0), None);
        assert_eq!(out.heart_rate, Some(76.0));
    }

    #[test]
    fn test_outlier_flagged() {
        let mut s = smoother();
        for hr in [70.0, 71.0, 70.0, 71.0] {
            let out = s.update(Some(hr), Some(14.0));
            assert!(!out.heart_anomaly);
        }
        let out = s.update(Some(130.0), Some(14.0));
        assert!(out.heart_anomaly);
        // A constant window has zero spread, so any change stands out.
        assert!(!out.breath_anomaly);
        let out = s.update(Some(71.0), Some(15.0));
        assert!(out.breath_anomaly);
    }
}
