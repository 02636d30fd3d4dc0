// Per-call-site running statistics
//
// Welford's online algorithm for mean/variance, with Chan's pairwise update
// when two call sites are merged. Inputs are integer nanoseconds; only the
// derived moments are floating point.
//
// Streaming and mergeable: the walk folds each call in as it visits it and
// parallel workers combine their sites, so no per-site duration vector is kept.

use serde::Serialize;

/// Running min/max/mean/variance of a series of durations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningStats {
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample
    pub fn push(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let x = value as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Fold another series into this one
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation (0 for fewer than two samples)
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt()
    }
}

/// Duration and self-time statistics of one call site
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallStatistics {
    pub duration: RunningStats,
    pub self_time: RunningStats,
}

impl CallStatistics {
    /// Record one invocation
    pub fn record(&mut self, duration: u64, self_time: u64) {
        self.duration.push(duration);
        self.self_time.push(self_time);
    }

    pub fn merge(&mut self, other: &CallStatistics) {
        self.duration.merge(&other.duration);
        self.self_time.merge(&other.self_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = RunningStats::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.min(), None);
        assert_eq!(stats.max(), None);
        assert_eq!(stats.std_dev(), 0.0);
    }

    #[test]
    fn test_running_moments() {
        let mut stats = RunningStats::new();
        for value in [2, 4, 4, 4, 5, 5, 7, 9] {
            stats.push(value);
        }
        assert_eq!(stats.count(), 8);
        assert_eq!(stats.min(), Some(2));
        assert_eq!(stats.max(), Some(9));
        assert!((stats.mean() - 5.0).abs() < 1e-9);
        assert!((stats.std_dev() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let values = [3u64, 10, 7, 1, 12, 6];
        let mut all = RunningStats::new();
        values.iter().for_each(|v| all.push(*v));

        let mut left = RunningStats::new();
        let mut right = RunningStats::new();
        values[..2].iter().for_each(|v| left.push(*v));
        values[2..].iter().for_each(|v| right.push(*v));
        left.merge(&right);

        assert_eq!(left.count(), all.count());
        assert_eq!(left.min(), all.min());
        assert_eq!(left.max(), all.max());
        assert!((left.mean() - all.mean()).abs() < 1e-9);
        assert!((left.std_dev() - all.std_dev()).abs() < 1e-9);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut empty = RunningStats::new();
        let mut other = RunningStats::new();
        other.push(5);
        empty.merge(&other);
        assert_eq!(empty, other);
    }
}
