//! Streaming RR-interval derivation and HRV statistics.
//!
//! [`HrvEngine`] is purely reactive: callers push samples with
//! [`HrvEngine::ingest`] and decide when to recompute with
//! [`HrvEngine::refresh`]. Bad samples are counted and dropped, so neither
//! call can fail.

use crate::error::{ConfigError, RejectReason};
use crate::metrics::hrv::{hrv_time, HRVMetrics};
use crate::signal::{HeartRateSample, RRWindow, DEFAULT_WINDOW_CAPACITY, MAX_RR_S, MIN_RR_S};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How an RR interval is obtained from a sample. One policy is used per
/// data source; mixing them yields intervals that are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RrDerivation {
    /// Time between consecutive accepted samples. Use for feeds whose
    /// timestamps mark individual beats.
    ElapsedTime,
    /// `60 / bpm` for every sample. Use for periodic heart-rate readings.
    #[default]
    InstantaneousRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capacity: usize,
    pub min_rr_s: f64,
    pub max_rr_s: f64,
    /// Backward timestamp jitter (seconds) tolerated before a sample counts
    /// as non-monotonic.
    pub backward_tolerance_s: f64,
    pub derivation: RrDerivation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            min_rr_s: MIN_RR_S,
            max_rr_s: MAX_RR_S,
            backward_tolerance_s: 0.05,
            derivation: RrDerivation::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_derivation(derivation: RrDerivation) -> Self {
        Self {
            derivation,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let range_ok = self.min_rr_s.is_finite()
            && self.max_rr_s.is_finite()
            && self.min_rr_s > 0.0
            && self.min_rr_s < self.max_rr_s;
        if !range_ok {
            return Err(ConfigError::InvalidRange {
                min: self.min_rr_s,
                max: self.max_rr_s,
            });
        }
        if !self.backward_tolerance_s.is_finite() || self.backward_tolerance_s < 0.0 {
            return Err(ConfigError::NonPositive {
                name: "backward_tolerance_s",
                value: self.backward_tolerance_s,
            });
        }
        Ok(())
    }
}

/// Result of a single [`HrvEngine::ingest`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// The derived interval (seconds) was appended to the window.
    Accepted(f64),
    /// First sample of an elapsed-time session; it only starts the clock.
    Primed,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Empty,
    Accumulating,
    Ready,
}

/// Diagnostic rejection counters, kept for the lifetime of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejections {
    pub total: u64,
    pub by_reason: HashMap<RejectReason, u64>,
}

impl Rejections {
    pub fn record(&mut self, reason: RejectReason) {
        self.total += 1;
        *self.by_reason.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: RejectReason) -> u64 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct HrvEngine {
    config: EngineConfig,
    window: RRWindow,
    last_timestamp: Option<f64>,
    latest: HRVMetrics,
    rejections: Rejections,
}

impl Default for HrvEngine {
    fn default() -> Self {
        Self::from_valid_config(EngineConfig::default())
    }
}

impl HrvEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: EngineConfig) -> Self {
        Self {
            window: RRWindow::new(config.capacity),
            config,
            last_timestamp: None,
            latest: HRVMetrics::default(),
            rejections: Rejections::default(),
        }
    }

    /// Derive, validate and store one RR interval. Never recomputes statistics.
    pub fn ingest(&mut self, sample: HeartRateSample) -> IngestOutcome {
        match self.derive_interval(&sample) {
            Ok(Some(rr)) => {
                self.last_timestamp = Some(self.advance_clock(sample.timestamp));
                if let Some(evicted) = self.window.push(rr) {
                    debug!("window full, evicted {:.3}s", evicted);
                }
                IngestOutcome::Accepted(rr)
            }
            Ok(None) => {
                self.last_timestamp = Some(sample.timestamp);
                IngestOutcome::Primed
            }
            Err(reason) => {
                // an implausible elapsed interval still marks a valid beat time
                if reason == RejectReason::OutOfRange
                    && self.config.derivation == RrDerivation::ElapsedTime
                {
                    self.last_timestamp = Some(self.advance_clock(sample.timestamp));
                }
                debug!(
                    "rejected sample t={:.3} bpm={:.1}: {}",
                    sample.timestamp, sample.bpm, reason
                );
                self.rejections.record(reason);
                IngestOutcome::Rejected(reason)
            }
        }
    }

    fn derive_interval(&self, sample: &HeartRateSample) -> Result<Option<f64>, RejectReason> {
        if !(sample.bpm.is_finite() && sample.bpm > 0.0) {
            return Err(RejectReason::NonPositiveBpm);
        }
        if !sample.timestamp.is_finite() {
            return Err(RejectReason::InvalidTimestamp);
        }
        if let Some(last) = self.last_timestamp {
            if sample.timestamp < last - self.config.backward_tolerance_s {
                return Err(RejectReason::NonMonotonic);
            }
        }
        let rr = match self.config.derivation {
            RrDerivation::InstantaneousRate => sample.rate_interval(),
            RrDerivation::ElapsedTime => match self.last_timestamp {
                None => return Ok(None),
                Some(last) => {
                    let delta = sample.timestamp - last;
                    if delta <= 0.0 {
                        return Err(RejectReason::NonMonotonic);
                    }
                    delta
                }
            },
        };
        self.check_range(rr).map(Some)
    }

    fn check_range(&self, rr: f64) -> Result<f64, RejectReason> {
        if rr >= self.config.min_rr_s && rr <= self.config.max_rr_s {
            Ok(rr)
        } else {
            Err(RejectReason::OutOfRange)
        }
    }

    /// Store an RR interval (seconds) measured upstream, bypassing derivation.
    /// The range filter and window bound apply as for [`ingest`](Self::ingest);
    /// the derivation clock is untouched.
    pub fn ingest_interval(&mut self, rr: f64) -> IngestOutcome {
        match self.check_range(rr) {
            Ok(rr) => {
                if let Some(evicted) = self.window.push(rr) {
                    debug!("window full, evicted {:.3}s", evicted);
                }
                IngestOutcome::Accepted(rr)
            }
            Err(reason) => {
                debug!("rejected interval {:.3}s: {}", rr, reason);
                self.rejections.record(reason);
                IngestOutcome::Rejected(reason)
            }
        }
    }

    // Small backward jitter is tolerated but never moves the clock backwards.
    fn advance_clock(&self, timestamp: f64) -> f64 {
        match self.last_timestamp {
            Some(last) if last > timestamp => last,
            _ => timestamp,
        }
    }

    /// Recompute statistics over the current window and keep the snapshot.
    pub fn refresh(&mut self) -> HRVMetrics {
        let computed_at = self.last_timestamp.unwrap_or(0.0);
        let rr = self.window.to_series();
        self.latest = hrv_time(&rr.rr, computed_at);
        self.latest
    }

    /// Start a new measurement session. The latest snapshot survives until
    /// the next [`refresh`](Self::refresh).
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_timestamp = None;
    }

    pub fn state(&self) -> EngineState {
        match self.window.len() {
            0 => EngineState::Empty,
            1 => EngineState::Accumulating,
            _ => EngineState::Ready,
        }
    }

    pub fn latest(&self) -> HRVMetrics {
        self.latest
    }

    pub fn window(&self) -> &RRWindow {
        &self.window
    }

    /// Most recently accepted interval, in seconds.
    pub fn last_interval(&self) -> Option<f64> {
        self.window.last()
    }

    pub fn rejections(&self) -> &Rejections {
        &self.rejections
    }
}
