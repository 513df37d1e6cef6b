use std::time::Duration;

/// Summary of recorded inter-emission intervals, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingStats {
    pub samples: usize,
    pub average_interval_ns: f64,
    pub jitter_ns: f64,
    pub min_interval_ns: f64,
    pub max_interval_ns: f64,
    /// Mean absolute deviation from the nominal interval.
    pub mean_abs_error_ns: f64,
    pub max_abs_error_ns: f64,
}

/// Bounded window of measured intervals paired with their nominal target.
#[derive(Debug, Clone)]
pub struct IntervalRecorder {
    samples: Vec<(Duration, Duration)>,
    max_samples: usize,
}

impl IntervalRecorder {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples.min(4096)),
            max_samples,
        }
    }

    pub fn record(&mut self, actual: Duration, nominal: Duration) {
        if self.max_samples == 0 {
            return;
        }
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push((actual, nominal));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Signed error (actual - nominal) of each sample, in recording order.
    pub fn errors_ns(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|(actual, nominal)| actual.as_nanos() as f64 - nominal.as_nanos() as f64)
            .collect()
    }

    pub fn stats(&self) -> TimingStats {
        if self.samples.is_empty() {
            return TimingStats::default();
        }
        let n = self.samples.len() as f64;
        let times: Vec<f64> = self
            .samples
            .iter()
            .map(|(actual, _)| actual.as_nanos() as f64)
            .collect();
        let avg = times.iter().sum::<f64>() / n;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let errors = self.errors_ns();
        let mean_abs_error = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let max_abs_error = errors.iter().map(|e| e.abs()).fold(0.0, f64::max);

        TimingStats {
            samples: self.samples.len(),
            average_interval_ns: avg,
            jitter_ns: var.sqrt(),
            min_interval_ns: min,
            max_interval_ns: max,
            mean_abs_error_ns: mean_abs_error,
            max_abs_error_ns: max_abs_error,
        }
    }
}

impl Default for IntervalRecorder {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recorder_has_zeroed_stats() {
        assert_eq!(IntervalRecorder::new(10).stats(), TimingStats::default());
    }

    #[test]
    fn stats_report_error_against_nominal() {
        let mut rec = IntervalRecorder::new(10);
        let nominal = Duration::from_millis(100);
        rec.record(Duration::from_micros(100_200), nominal);
        rec.record(Duration::from_micros(99_800), nominal);
        let stats = rec.stats();
        assert_eq!(stats.samples, 2);
        assert!((stats.average_interval_ns - 100_000_000.0).abs() < 1e-6);
        assert!((stats.mean_abs_error_ns - 200_000.0).abs() < 1e-6);
        assert!((stats.jitter_ns - 200_000.0).abs() < 1e-6);
        assert_eq!(stats.min_interval_ns, 99_800_000.0);
        assert_eq!(stats.max_interval_ns, 100_200_000.0);
    }

    #[test]
    fn window_drops_oldest_samples() {
        let mut rec = IntervalRecorder::new(2);
        for ms in [1, 2, 3] {
            rec.record(Duration::from_millis(ms), Duration::from_millis(ms));
        }
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.stats().min_interval_ns, 2_000_000.0);
    }
}
