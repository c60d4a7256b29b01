use ringbuffer::{AllocRingBuffer, RingBuffer};

/// The four host-millisecond timestamps a single round trip produces
/// (spec.md §4.2/§4.3).
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    pub t_frame_out: u64,
    pub t_receiver_in: u64,
    pub t_receiver_out: u64,
    pub t_response_in: u64,
}

/// Metrics derived from one [`FrameTiming`], some of which depend on the
/// estimator's *current* published median (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct TimingReport {
    /// True round-trip time of this frame: `t_response_in - t_frame_out`.
    pub latency_ms: i64,
    /// The raw, unfiltered offset sample this frame contributed.
    pub delta_raw_ms: i64,
    /// `t_receiver_in - (t_frame_out + delta)`.
    pub tx_latency_ms: i64,
    /// `(t_response_in + delta) - t_receiver_out`.
    pub rx_latency_ms: i64,
}

/// Rolling-median estimator of the clock offset `Δ = controller_clock −
/// host_clock`, in milliseconds (spec.md §4.3).
///
/// Tolerant of the heavy-tailed jitter that OS scheduling, USB polling
/// and TCP buffering introduce: a handful of outliers cannot move the
/// median the way they would a mean.
pub struct Estimator {
    window: AllocRingBuffer<i64>,
    capacity: usize,
    median_ms: i64,
}

impl Estimator {
    /// `window_size` must be at least 3 (spec.md §4.3); default is 100.
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 3, "estimator window must hold at least 3 samples");
        Estimator {
            window: AllocRingBuffer::new(window_size),
            capacity: window_size,
            median_ms: 0,
        }
    }

    /// The currently published delta, the median of the window.
    pub fn median_ms(&self) -> i64 {
        self.median_ms
    }

    /// `true` once the window has seen at least `window_size` samples —
    /// before that, the median is a provisional estimate from a partial
    /// window.
    pub fn is_calibrated(&self) -> bool {
        self.window.len() >= self.capacity
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Folds one frame's round-trip timing into the window and returns
    /// the metrics derived from it, including the *post-update* median.
    pub fn record(&mut self, timing: FrameTiming) -> TimingReport {
        let rtt = timing.t_response_in as i64 - timing.t_frame_out as i64;
        let delta_raw = timing.t_receiver_in as i64 - timing.t_frame_out as i64 - rtt / 2;

        self.window.push(delta_raw);
        self.median_ms = median_of(&self.window);

        let delta = self.median_ms;
        TimingReport {
            latency_ms: rtt,
            delta_raw_ms: delta_raw,
            tx_latency_ms: timing.t_receiver_in as i64 - (timing.t_frame_out as i64 + delta),
            rx_latency_ms: (timing.t_response_in as i64 + delta) - timing.t_receiver_out as i64,
        }
    }

    /// Projects a host-domain timestamp into the controller's clock
    /// domain (spec.md §4.2). `0` always maps to `0` — it means "apply
    /// on arrival", not a real instant.
    pub fn rewrite_timestamp(&self, timestamp_host: u64) -> u64 {
        if timestamp_host == 0 {
            return 0;
        }
        (timestamp_host as i64 + self.median_ms).max(0) as u64
    }
}

/// Median of the window's contents, ties broken toward the lower
/// element (spec.md §4.3). `window` is never empty when this is called
/// since `record` always pushes before computing it.
fn median_of(window: &AllocRingBuffer<i64>) -> i64 {
    let mut values: Vec<i64> = window.iter().copied().collect();
    values.sort_unstable();
    // Even-length windows: pick the lower of the two middle elements.
    values[(values.len() - 1) / 2]
}

/// Read-only drift diagnostic: the linear-regression slope of
/// `t_receiver_in` against `t_frame_out` over a measurement run,
/// reported in seconds of drift per day (DESIGN NOTES §9; grounded in
/// `original_source/tools/metrics.py`'s `GetSlope`/`GetDrift`).
///
/// Feed it the same samples handed to [`Estimator::record`]. It never
/// influences `deltaMedian` — this is observability only, for deployments
/// long enough that host and controller clocks visibly run at different
/// *rates*, not just with a fixed offset.
#[derive(Debug, Default)]
pub struct DriftTracker {
    n: usize,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_xx: f64,
}

impl DriftTracker {
    pub fn new() -> Self {
        DriftTracker::default()
    }

    /// `t_frame_out` is the independent variable (host time), `t_receiver_in`
    /// the dependent one (controller time), both milliseconds.
    pub fn record(&mut self, t_frame_out: u64, t_receiver_in: u64) {
        let x = t_frame_out as f64;
        let y = t_receiver_in as f64;
        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_xx += x * x;
    }

    /// Ordinary-least-squares slope of controller-time vs host-time.
    /// `None` until at least two distinct samples have been recorded.
    pub fn slope(&self) -> Option<f64> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let denom = n * self.sum_xx - self.sum_x * self.sum_x;
        if denom == 0.0 {
            return None;
        }
        Some((n * self.sum_xy - self.sum_x * self.sum_y) / denom)
    }

    /// Drift expressed as seconds gained or lost per day of elapsed host
    /// time, derived from [`slope`](Self::slope). A slope of exactly `1.0`
    /// (clocks running at the same rate) reports zero drift.
    pub fn drift_seconds_per_day(&self) -> Option<f64> {
        const MS_PER_DAY: f64 = 86_400_000.0;
        self.slope().map(|slope| (slope - 1.0) * MS_PER_DAY / 1000.0)
    }
}
