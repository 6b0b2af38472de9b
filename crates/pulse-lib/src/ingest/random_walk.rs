use super::SampleSource;
use crate::error::ConfigError;
use crate::signal::HeartRateSample;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomWalkConfig {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Largest per-tick move of the target, in BPM.
    pub max_step: f64,
    /// Fixed starting rate; drawn uniformly from the bounds when absent.
    pub start_bpm: Option<f64>,
    pub seed: Option<u64>,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            min_bpm: 55.0,
            max_bpm: 100.0,
            max_step: 2.0,
            start_bpm: None,
            seed: None,
        }
    }
}

impl RandomWalkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds_ok = self.min_bpm.is_finite()
            && self.max_bpm.is_finite()
            && self.min_bpm > 0.0
            && self.min_bpm < self.max_bpm;
        if !bounds_ok {
            return Err(ConfigError::InvalidRange {
                min: self.min_bpm,
                max: self.max_bpm,
            });
        }
        if !(self.max_step.is_finite() && self.max_step > 0.0) {
            return Err(ConfigError::NonPositive {
                name: "max_step",
                value: self.max_step,
            });
        }
        Ok(())
    }
}

/// Simulated heart rate for runs without a sensor.
///
/// A hidden target wanders by at most `max_step` per tick inside the bounds
/// and the emitted rate follows it by at most one BPM per tick, so the
/// output drifts smoothly instead of jumping around.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    config: RandomWalkConfig,
    rng: StdRng,
    current: f64,
    target: f64,
}

impl RandomWalk {
    pub fn new(config: RandomWalkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let current = match config.start_bpm {
            Some(bpm) => bpm.clamp(config.min_bpm, config.max_bpm),
            None => rng.gen_range(config.min_bpm..=config.max_bpm).round(),
        };
        Ok(Self {
            config,
            rng,
            current,
            target: current,
        })
    }

    pub fn seeded(seed: u64) -> Self {
        let config = RandomWalkConfig {
            seed: Some(seed),
            ..RandomWalkConfig::default()
        };
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: 75.0,
            target: 75.0,
            config,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Advance one tick and emit the new rate stamped with `now`.
    pub fn tick(&mut self, now: f64) -> HeartRateSample {
        let step = self.config.max_step;
        self.target = (self.target + self.rng.gen_range(-step..=step))
            .clamp(self.config.min_bpm, self.config.max_bpm);
        self.current += (self.target - self.current).clamp(-1.0, 1.0);
        HeartRateSample::new(now, self.current)
    }
}

impl SampleSource for RandomWalk {
    fn poll(&mut self, now: f64) -> Vec<HeartRateSample> {
        vec![self.tick(now)]
    }
}
