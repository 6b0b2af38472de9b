use crate::engine::{EngineState, HrvEngine, IngestOutcome, Rejections};
use crate::metrics::hrv::HRVMetrics;
use crate::signal::HeartRateSample;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

struct Inner {
    engine: HrvEngine,
    subscribers: Vec<Sender<HRVMetrics>>,
}

/// Thread-safe handle to one [`HrvEngine`]. Ingest, refresh and reset are
/// serialized on a single lock; every refresh is re-emitted to subscribers.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Inner>>,
}

impl SharedEngine {
    pub fn new(engine: HrvEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                subscribers: Vec::new(),
            })),
        }
    }

    // Engine state stays consistent even if a holder panicked mid-call.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ingest(&self, sample: HeartRateSample) -> IngestOutcome {
        self.lock().engine.ingest(sample)
    }

    pub fn refresh(&self) -> HRVMetrics {
        let mut inner = self.lock();
        let metrics = inner.engine.refresh();
        inner.subscribers.retain(|tx| tx.send(metrics).is_ok());
        metrics
    }

    pub fn reset(&self) {
        self.lock().engine.reset();
    }

    /// Receive a copy of every snapshot produced by later refreshes.
    pub fn subscribe(&self) -> Receiver<HRVMetrics> {
        let (tx, rx) = unbounded();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn latest(&self) -> HRVMetrics {
        self.lock().engine.latest()
    }

    pub fn state(&self) -> EngineState {
        self.lock().engine.state()
    }

    pub fn rejections(&self) -> Rejections {
        self.lock().engine.rejections().clone()
    }

    pub fn window_len(&self) -> usize {
        self.lock().engine.window().len()
    }

    pub fn last_interval(&self) -> Option<f64> {
        self.lock().engine.last_interval()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl Default for SharedEngine {
    fn default() -> Self {
        Self::new(HrvEngine::default())
    }
}
