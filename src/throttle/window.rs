use std::collections::VecDeque;
use std::time::Duration;
use crate::core::config::MIN_WINDOW_SIZE;

/// Fixed-capacity FIFO of the most recent batch durations, in seconds
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

/// Least-squares trend line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

impl SlidingWindow {
    /// Capacity is clamped to at least `MIN_WINDOW_SIZE`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_WINDOW_SIZE);
        SlidingWindow {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.as_secs_f64());
    }

    /// Samples oldest-first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// OLS fit over `(i, sample[i])`; `None` until the window is full.
    pub fn fit(&self) -> Option<LinearFit> {
        if !self.is_full() || self.samples.len() < 2 {
            return None;
        }

        let n = self.samples.len() as f64;
        let x_avg = (n - 1.0) / 2.0;
        let y_avg = self.samples.iter().sum::<f64>() / n;

        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in self.samples.iter().enumerate() {
            let x_delta = x as f64 - x_avg;
            num += x_delta * (y - y_avg);
            den += x_delta * x_delta;
        }

        let slope = num / den;
        Some(LinearFit {
            slope,
            intercept: y_avg - slope * x_avg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 0.001;

    fn line(m: f64, b: f64, size: usize) -> Vec<Duration> {
        (0..size)
            .map(|i| Duration::from_secs_f64(m * i as f64 + b))
            .collect()
    }

    #[test]
    fn fits_exact_lines() {
        for c in 1..=9 {
            let (m, b) = (c as f64, c as f64);
            let mut window = SlidingWindow::new(25);
            for d in line(m, b, 25) {
                window.push(d);
            }
            let fit = window.fit().expect("window is full");
            assert!((fit.slope - m).abs() / m < TOLERANCE, "slope {} vs {}", fit.slope, m);
            assert!((fit.intercept - b).abs() / b < TOLERANCE, "intercept {} vs {}", fit.intercept, b);

            let mae = window
                .samples()
                .enumerate()
                .map(|(i, y)| (fit.predict(i as f64) - y).abs())
                .sum::<f64>()
                / 25.0;
            assert!(mae < TOLERANCE);
        }
    }

    #[test]
    fn tiny_capacity_is_clamped() {
        for requested in [0, 1] {
            let mut w = SlidingWindow::new(requested);
            assert_eq!(w.capacity(), MIN_WINDOW_SIZE);
            for ms in [10, 20, 30, 40] {
                w.push(Duration::from_millis(ms));
                assert!(w.len() <= w.capacity());
            }
            assert_eq!(w.samples().collect::<Vec<_>>(), vec![0.03, 0.04]);
            assert!(w.fit().is_some());
        }
    }

    #[test]
    fn no_fit_until_full() {
        let mut window = SlidingWindow::new(4);
        for d in line(1.0, 1.0, 3) {
            window.push(d);
            assert!(window.fit().is_none());
        }
        window.push(Duration::from_secs(4));
        assert!(window.fit().is_some());
    }

    #[test]
    fn keeps_last_samples_oldest_first() {
        let mut window = SlidingWindow::new(5);
        for i in 0..12u64 {
            window.push(Duration::from_secs(i));
        }
        assert_eq!(window.len(), 5);
        let kept: Vec<f64> = window.samples().collect();
        assert_eq!(kept, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn flat_line_has_zero_slope() {
        let mut window = SlidingWindow::new(10);
        for _ in 0..10 {
            window.push(Duration::from_secs(3));
        }
        let fit = window.fit().unwrap();
        assert!(fit.slope.abs() < 1e-12);
        assert!((fit.intercept - 3.0).abs() < 1e-12);
    }
}
