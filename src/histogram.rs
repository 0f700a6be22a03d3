//! Rolling histogram (C10): a bounded ring buffer of recent measurements per
//! metric, with on-demand binning and summary statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default ring-buffer capacity (§3).
pub const DEFAULT_MAXLEN: usize = 2000;

/// Summary statistics over the current window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f32,
    pub std: f32,
    pub mode: f32,
    pub min: f32,
    pub max: f32,
}

/// A bounded sliding-window histogram for a single metric (e.g. major axis).
#[derive(Debug)]
pub struct RollingHistogram {
    samples: VecDeque<f32>,
    maxlen: usize,
}

impl RollingHistogram {
    pub fn new(maxlen: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(maxlen),
            maxlen,
        }
    }

    /// Pushes a sample, evicting the oldest one (FIFO) once at capacity.
    pub fn push(&mut self, value: f32) {
        if self.samples.len() == self.maxlen {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Bins the current window into `n_bins` equal-width buckets over
    /// `range`, or `[min(samples), max(samples)]` when `range` is `None`. An
    /// empty window returns zero counts over a single bin `[0, 0]`.
    pub fn bins_and_counts(&self, n_bins: usize, range: Option<(f32, f32)>) -> (Vec<f32>, Vec<usize>) {
        let n_bins = n_bins.max(1);
        if self.samples.is_empty() {
            return (vec![0.0, 0.0], vec![0; 1]);
        }

        let (lo, hi) = range.unwrap_or_else(|| {
            let lo = self.samples.iter().cloned().fold(f32::INFINITY, f32::min);
            let hi = self.samples.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            (lo, hi)
        });

        let span = (hi - lo).max(f32::EPSILON);
        let edges: Vec<f32> = (0..=n_bins).map(|i| lo + span * (i as f32 / n_bins as f32)).collect();
        let mut counts = vec![0usize; n_bins];

        for &sample in &self.samples {
            let mut bin = (((sample - lo) / span) * n_bins as f32).floor() as isize;
            bin = bin.clamp(0, n_bins as isize - 1);
            counts[bin as usize] += 1;
        }

        (edges, counts)
    }

    /// Summary statistics. `std` uses the sample standard deviation
    /// (`N-1` denominator) once `N >= 2`, and is `0` otherwise. `mode` is
    /// the center of the highest-count bin over a 32-bin histogram, ties
    /// broken by the lowest bin index.
    pub fn summary(&self) -> Summary {
        if self.samples.is_empty() {
            return Summary {
                count: 0,
                mean: 0.0,
                std: 0.0,
                mode: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().sum();
        let mean = sum / count as f32;

        let std = if count >= 2 {
            let variance: f32 =
                self.samples.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / (count as f32 - 1.0);
            variance.sqrt()
        } else {
            0.0
        };

        let min = self.samples.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = self.samples.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let (edges, counts) = self.bins_and_counts(32, Some((min, max)));
        let (mode_bin, _) = counts
            .iter()
            .enumerate()
            .max_by_key(|&(idx, &c)| (c, std::cmp::Reverse(idx)))
            .map(|(idx, &c)| (idx, c))
            .unwrap_or((0, 0));
        let bin_width = (edges[1] - edges[0]).max(0.0);
        let mode = edges[mode_bin] + bin_width / 2.0;

        Summary {
            count,
            mean,
            std,
            mode,
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest_once_full() {
        let mut hist = RollingHistogram::new(3);
        hist.push(1.0);
        hist.push(2.0);
        hist.push(3.0);
        hist.push(4.0);
        assert_eq!(hist.count(), 3);
        let summary = hist.summary();
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 4.0);
    }

    #[test]
    fn test_constant_samples_produce_single_mode_zero_std() {
        let mut hist = RollingHistogram::new(2000);
        for _ in 0..3000 {
            hist.push(10.0);
        }
        let summary = hist.summary();
        assert_eq!(summary.count, 2000);
        assert_eq!(summary.mean, 10.0);
        assert_eq!(summary.std, 0.0);
        assert_eq!(summary.mode, 10.0);
    }

    #[test]
    fn test_empty_histogram_summary_is_zeroed() {
        let hist = RollingHistogram::new(100);
        let summary = hist.summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, 0.0);
    }

    #[test]
    fn test_empty_histogram_bins_single_zero_bin() {
        let hist = RollingHistogram::new(100);
        let (edges, counts) = hist.bins_and_counts(10, None);
        assert_eq!(edges, vec![0.0, 0.0]);
        assert_eq!(counts, vec![0]);
    }

    #[test]
    fn test_reset_clears_samples() {
        let mut hist = RollingHistogram::new(10);
        hist.push(1.0);
        hist.reset();
        assert_eq!(hist.count(), 0);
    }

    #[test]
    fn test_count_never_decreases_below_maxlen() {
        let mut hist = RollingHistogram::new(5);
        let mut last_count = 0;
        for i in 0..20 {
            hist.push(i as f32);
            assert!(hist.count() >= last_count || hist.count() == 5);
            last_count = hist.count();
        }
        assert_eq!(hist.count(), 5);
    }
}
