use super::SampleSource;
use crate::engine::Rejections;
use crate::error::RejectReason;
use crate::io::csv::read_samples_csv;
use crate::signal::HeartRateSample;
use anyhow::Result;
use log::debug;
use std::collections::VecDeque;
use std::path::Path;

/// Filters upstream sensor deliveries down to samples not seen before.
///
/// Sensors hand back overlapping batches (typically "the newest N samples",
/// newest first). Each batch is sorted by timestamp and only samples newer
/// than the newest one already forwarded pass through. Samples with a
/// non-finite timestamp are passed on for the engine to reject and never
/// become the newest.
#[derive(Debug, Clone, Default)]
pub struct BatchFeed {
    newest: Option<f64>,
    dropped: Rejections,
}

impl BatchFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, mut batch: Vec<HeartRateSample>) -> Vec<HeartRateSample> {
        batch.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let mut forwarded = Vec::with_capacity(batch.len());
        for sample in batch {
            match self.newest {
                _ if !sample.timestamp.is_finite() => forwarded.push(sample),
                Some(newest) if sample.timestamp == newest => {
                    self.discard(sample, RejectReason::Duplicate)
                }
                Some(newest) if sample.timestamp < newest => {
                    self.discard(sample, RejectReason::OutOfOrder)
                }
                _ => {
                    self.newest = Some(sample.timestamp);
                    forwarded.push(sample);
                }
            }
        }
        forwarded
    }

    fn discard(&mut self, sample: HeartRateSample, reason: RejectReason) {
        debug!("feed dropped sample t={:.3}: {}", sample.timestamp, reason);
        self.dropped.record(reason);
    }

    pub fn newest(&self) -> Option<f64> {
        self.newest
    }

    pub fn dropped(&self) -> &Rejections {
        &self.dropped
    }
}

/// Replays a recorded `timestamp,bpm` feed as if it arrived live: each poll
/// delivers every pending sample stamped at or before the tick time. Rows
/// with a non-finite timestamp are due on the first poll.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    pending: VecDeque<HeartRateSample>,
    feed: BatchFeed,
}

impl ReplaySource {
    pub fn new(samples: Vec<HeartRateSample>) -> Self {
        Self {
            pending: samples.into(),
            feed: BatchFeed::new(),
        }
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        Ok(Self::new(read_samples_csv(path)?))
    }

    /// Timestamp of the first recorded sample.
    pub fn start_time(&self) -> Option<f64> {
        self.pending
            .iter()
            .map(|s| s.timestamp)
            .filter(|t| t.is_finite())
            .reduce(f64::min)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn feed(&self) -> &BatchFeed {
        &self.feed
    }
}

impl SampleSource for ReplaySource {
    fn poll(&mut self, now: f64) -> Vec<HeartRateSample> {
        let mut batch = Vec::new();
        let mut rest = VecDeque::with_capacity(self.pending.len());
        for sample in self.pending.drain(..) {
            if sample.timestamp <= now || !sample.timestamp.is_finite() {
                batch.push(sample);
            } else {
                rest.push_back(sample);
            }
        }
        self.pending = rest;
        if batch.is_empty() {
            return batch;
        }
        self.feed.accept(batch)
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    fn dropped(&self) -> u64 {
        self.feed.dropped().total
    }
}
