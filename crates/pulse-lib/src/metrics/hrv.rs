use serde::{Deserialize, Serialize};

/// Time-domain HRV snapshot. All durations are milliseconds except
/// `computed_at`, which is the stream time (seconds) the snapshot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HRVMetrics {
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    pub mean_rr_ms: f64,
    pub sample_count: usize,
    pub computed_at: f64,
}

impl HRVMetrics {
    /// Zero-valued snapshot reported while fewer than two intervals are known.
    pub fn insufficient(sample_count: usize, computed_at: f64) -> Self {
        Self {
            sample_count,
            computed_at,
            ..Self::default()
        }
    }

    /// Mean heart rate implied by the mean RR interval.
    pub fn mean_bpm(&self) -> Option<f64> {
        if self.mean_rr_ms > 0.0 {
            Some(60_000.0 / self.mean_rr_ms)
        } else {
            None
        }
    }
}

/// Time-domain statistics over RR intervals given in seconds.
///
/// SDNN uses the population variance (divides by N) and RMSSD divides the
/// squared successive differences by N-1. No Bessel correction is applied.
pub fn hrv_time(rr: &[f64], computed_at: f64) -> HRVMetrics {
    let n = rr.len();
    if n < 2 {
        return HRVMetrics::insufficient(n, computed_at);
    }
    let mean = rr.iter().sum::<f64>() / n as f64;
    let sdnn = (rr.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
    let rmssd = {
        let diffs = rr.windows(2).map(|w| (w[1] - w[0]).powi(2));
        (diffs.sum::<f64>() / (n as f64 - 1.0)).sqrt()
    };
    HRVMetrics {
        sdnn_ms: sdnn * 1000.0,
        rmssd_ms: rmssd * 1000.0,
        mean_rr_ms: mean * 1000.0,
        sample_count: n,
        computed_at,
    }
}
