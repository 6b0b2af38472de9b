use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Shortest RR interval accepted by default (200 BPM).
pub const MIN_RR_S: f64 = 0.3;
/// Longest RR interval accepted by default (50 BPM).
pub const MAX_RR_S: f64 = 1.2;
/// Default window capacity: five minutes at roughly one interval per second.
pub const DEFAULT_WINDOW_CAPACITY: usize = 300;

/// A single heart-rate observation delivered by a sensor or simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Seconds on the producer's clock
    pub timestamp: f64,
    /// Instantaneous rate in beats per minute
    pub bpm: f64,
}

impl HeartRateSample {
    pub fn new(timestamp: f64, bpm: f64) -> Self {
        Self { timestamp, bpm }
    }

    /// RR interval implied by the instantaneous rate, `60 / bpm` seconds.
    pub fn rate_interval(&self) -> f64 {
        60.0 / self.bpm
    }
}

/// RR intervals (seconds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
}

/// Bounded FIFO of recent RR intervals. The oldest interval is evicted once
/// the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct RRWindow {
    capacity: usize,
    intervals: VecDeque<f64>,
}

impl RRWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            intervals: VecDeque::with_capacity(capacity.min(DEFAULT_WINDOW_CAPACITY)),
        }
    }

    /// Append an interval, returning the evicted one if the window was full.
    pub fn push(&mut self, rr: f64) -> Option<f64> {
        self.intervals.push_back(rr);
        if self.intervals.len() > self.capacity {
            self.intervals.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.intervals.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.intervals.iter().copied()
    }

    /// Contiguous copy of the window, oldest first.
    pub fn to_series(&self) -> RRSeries {
        RRSeries {
            rr: self.intervals.iter().copied().collect(),
        }
    }
}

impl Default for RRWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
