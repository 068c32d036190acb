//! Running and average statistics meters

use std::collections::BTreeMap;
use std::fmt;

/// Tracks the latest value and the running average of a scalar metric
#[derive(Clone, Debug, Default)]
pub struct AverageMeter {
    /// Most recent value
    pub val: f64,
    /// Sum of all values
    pub sum: f64,
    /// Number of updates
    pub count: usize,
}

impl AverageMeter {
    /// Create a fresh meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        self.val = 0.0;
        self.sum = 0.0;
        self.count = 0;
    }

    /// Record a single observation
    pub fn update(&mut self, val: f64) {
        self.update_n(val, 1);
    }

    /// Record `n` observations of the same value
    pub fn update_n(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
    }

    /// Record the value only if it is >= the current average.
    ///
    /// This is the monotonic-ratchet smoothing used for the test-accuracy
    /// tracker: a run of worse scores never drags the average down.
    /// Returns whether the value was incorporated.
    pub fn update_if_ge_avg(&mut self, val: f64) -> bool {
        if val >= self.avg() {
            self.update(val);
            true
        } else {
            false
        }
    }

    /// Current running average (0.0 before the first update)
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// A set of named [`AverageMeter`]s, updated from per-step metric maps
#[derive(Clone, Debug, Default)]
pub struct MetricMeter {
    meters: BTreeMap<String, AverageMeter>,
}

impl MetricMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one value per named metric
    pub fn update(&mut self, values: &[(String, f64)]) {
        for (name, val) in values {
            self.meters.entry(name.clone()).or_default().update(*val);
        }
    }

    /// Running average of a single metric, if it has been seen
    pub fn avg(&self, name: &str) -> Option<f64> {
        self.meters.get(name).map(AverageMeter::avg)
    }

    /// Iterate over the tracked meters in name order
    pub fn meters(&self) -> impl Iterator<Item = (&str, &AverageMeter)> {
        self.meters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }
}

impl fmt::Display for MetricMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, meter) in &self.meters {
            if !first {
                write!(f, "\t")?;
            }
            write!(f, "{} {:.4} ({:.4})", name, meter.val, meter.avg())?;
            first = false;
        }
        Ok(())
    }
}
