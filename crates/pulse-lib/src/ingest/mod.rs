//! Sample producers feeding the HRV engine.

pub mod feed;
pub mod random_walk;

pub use feed::{BatchFeed, ReplaySource};
pub use random_walk::{RandomWalk, RandomWalkConfig};

use crate::signal::HeartRateSample;

/// Something the scheduler polls once per tick. Returned samples are in
/// timestamp order; an empty batch means nothing new is available.
pub trait SampleSource {
    fn poll(&mut self, now: f64) -> Vec<HeartRateSample>;

    /// True once the source can never produce another sample.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Samples discarded before reaching the engine (duplicates, stale rows).
    fn dropped(&self) -> u64 {
        0
    }
}
