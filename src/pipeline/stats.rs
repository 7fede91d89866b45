use std::time::Duration;

/// Running counters for one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Ticks that did work (stopped ticks excluded)
    pub ticks: u64,
    /// Mask requests handed to the provider
    pub mask_requests: u64,
    pub mask_successes: u64,
    pub mask_failures: u64,
    /// Results that arrived after stop and were dropped
    pub discarded_results: u64,
    /// Ticks skipped by the request divider
    pub decimated_ticks: u64,
    /// Request ticks skipped because a request was still outstanding
    pub busy_ticks: u64,
    pub total_capture_time: Duration,
    pub total_composite_time: Duration,
}

impl PipelineStats {
    pub fn avg_capture_ms(&self) -> f64 {
        average_ms(self.total_capture_time, self.ticks)
    }

    pub fn avg_composite_ms(&self) -> f64 {
        average_ms(self.total_composite_time, self.ticks)
    }

    /// Share of provider responses that failed
    pub fn failure_rate(&self) -> f32 {
        let settled = self.mask_successes + self.mask_failures;
        if settled == 0 {
            0.0
        } else {
            self.mask_failures as f32 / settled as f32
        }
    }

    pub(crate) fn log_summary(&self) {
        tracing::info!(
            "Frame {}: capture={:.1}ms, composite={:.1}ms, masks={}/{} ok, failures={}, skipped={}, busy={}",
            self.ticks,
            self.avg_capture_ms(),
            self.avg_composite_ms(),
            self.mask_successes,
            self.mask_requests,
            self.mask_failures,
            self.decimated_ticks,
            self.busy_ticks
        );
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}
