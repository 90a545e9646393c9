use std::time::Duration;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::core::config::ThrottleConfig;
use crate::throttle::window::{LinearFit, SlidingWindow};

/// Latency-driven dispatch gate shared by all workers.
///
/// Each completed bulk call feeds its duration into a sliding window. Once the
/// window is full, a least-squares line is fitted over it and the latency of
/// the next call is extrapolated one step past the window. Callers of
/// [`AdaptiveThrottle::gate`] are delayed by
///
/// ```text
/// backoff = factor * pred^2 / limit
/// ```
///
/// so the delay grows superlinearly as the predicted latency approaches the
/// limit. A single slow outlier barely moves the trend; sustained degradation
/// does.
///
/// With a high-water mark `h` configured, a prediction at or above `h * limit`
/// additionally delays callers by at least the predicted latency itself.
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    window: Mutex<SlidingWindow>,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let window = SlidingWindow::new(config.window_size);
        AdaptiveThrottle {
            config,
            window: Mutex::new(window),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Record the duration of a finished bulk call, successful or not.
    pub fn collect(&self, elapsed: Duration) {
        self.window.lock().push(elapsed);
    }

    /// Current trend line, if enough samples were collected.
    pub fn fit(&self) -> Option<LinearFit> {
        self.window.lock().fit()
    }

    /// Samples currently held, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.window.lock().samples().collect()
    }

    /// Delay the next dispatch should wait. Zero until the window is full.
    pub fn backoff(&self) -> Duration {
        let (fit, next_x) = {
            let window = self.window.lock();
            (window.fit(), window.len() as f64)
        };
        let Some(fit) = fit else {
            return Duration::ZERO;
        };

        let pred = fit.predict(next_x);
        let backoff = self.compute_backoff(pred);
        debug!(proc = "throttle", "y = {:.4}x + {:.4}", fit.slope, fit.intercept);
        debug!(proc = "throttle", "pred = {:.4}s, backoff = {:?}", pred, backoff);
        if !backoff.is_zero() {
            warn!(proc = "throttle", "Throttling worker for {:.2}s", backoff.as_secs_f64());
        }
        backoff
    }

    /// Map a predicted call latency (seconds) to a delay.
    pub fn compute_backoff(&self, pred_secs: f64) -> Duration {
        if !pred_secs.is_finite() || pred_secs <= 0.0 {
            return Duration::ZERO;
        }
        let limit = self.config.limit.as_secs_f64();
        let mut backoff = self.config.backoff_factor * pred_secs * pred_secs / limit;

        if let Some(hwm) = self.config.high_water_mark {
            if pred_secs >= hwm * limit {
                backoff = backoff.max(pred_secs);
            }
        }

        if backoff.is_nan() || backoff <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(backoff).unwrap_or(Duration::MAX)
        }
    }

    /// Wait out the current backoff.
    ///
    /// The window lock is released before sleeping so collectors are never
    /// blocked by waiters. Returns the delay that was applied, or `None` if
    /// `cancel` fired first.
    pub async fn gate(&self, cancel: &CancellationToken) -> Option<Duration> {
        let delay = self.backoff();
        if cancel.is_cancelled() {
            return None;
        }
        if delay.is_zero() {
            return Some(delay);
        }
        tokio::select! {
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(delay) => Some(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(limit_secs: u64, window: usize) -> AdaptiveThrottle {
        AdaptiveThrottle::new(ThrottleConfig::new(Duration::from_secs(limit_secs), window, 1.0))
    }

    fn feed(throttle: &AdaptiveThrottle, m: f64, b: f64, n: usize) {
        for i in 0..n {
            throttle.collect(Duration::from_secs_f64(m * i as f64 + b));
        }
    }

    #[test]
    fn zero_until_window_full() {
        let t = throttle(30, 10);
        for i in 0..9 {
            t.collect(Duration::from_secs(20 + i));
            assert_eq!(t.backoff(), Duration::ZERO);
        }
        t.collect(Duration::from_secs(29));
        assert!(t.backoff() > Duration::ZERO);
    }

    #[test]
    fn predicts_one_step_past_window() {
        // y = x + 0 over 0..10 predicts 10s at x = 10 => 10^2 / 30
        let t = throttle(30, 10);
        feed(&t, 1.0, 0.0, 10);
        let expected = 100.0 / 30.0;
        assert!((t.backoff().as_secs_f64() - expected).abs() < 1e-3);
    }

    #[test]
    fn backoff_is_monotonic_and_zero_at_origin() {
        let t = throttle(30, 10);
        assert_eq!(t.compute_backoff(0.0), Duration::ZERO);
        let mut last = Duration::ZERO;
        for step in 0..200 {
            let current = t.compute_backoff(step as f64 * 0.5);
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn falling_trend_never_throttles() {
        // y = -3x + 30 predicts 0 at x = 10
        let t = throttle(30, 10);
        feed(&t, -3.0, 30.0, 10);
        assert_eq!(t.backoff(), Duration::ZERO);
        assert_eq!(t.compute_backoff(-5.0), Duration::ZERO);
    }

    #[test]
    fn factor_scales_delay() {
        let base = throttle(10, 2).compute_backoff(5.0);
        let doubled = AdaptiveThrottle::new(ThrottleConfig::new(Duration::from_secs(10), 2, 2.0))
            .compute_backoff(5.0);
        assert!((doubled.as_secs_f64() - 2.0 * base.as_secs_f64()).abs() < 1e-9);
    }

    #[test]
    fn high_water_mark_floors_delay_at_prediction() {
        let config = ThrottleConfig::new(Duration::from_secs(10), 2, 1.0).with_high_water_mark(0.5);
        let t = AdaptiveThrottle::new(config);
        // below the mark: 4^2 / 10
        assert!((t.compute_backoff(4.0).as_secs_f64() - 1.6).abs() < 1e-9);
        // at the mark: max(2.5, 5)
        assert!((t.compute_backoff(5.0).as_secs_f64() - 5.0).abs() < 1e-9);
        // far above: quadratic term dominates
        assert!((t.compute_backoff(20.0).as_secs_f64() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_latest_samples() {
        let t = throttle(30, 3);
        for i in 0..7 {
            t.collect(Duration::from_secs(i));
        }
        assert_eq!(t.samples(), vec![4.0, 5.0, 6.0]);
    }

    #[tokio::test]
    async fn gate_passes_immediately_when_not_ready() {
        let t = throttle(30, 10);
        let cancel = CancellationToken::new();
        assert_eq!(t.gate(&cancel).await, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn gate_returns_on_cancel() {
        let t = throttle(1, 2);
        t.collect(Duration::from_secs(100));
        t.collect(Duration::from_secs(200));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(t.gate(&cancel).await, None);
    }
}
