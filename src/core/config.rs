use std::time::Duration;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::WriteMode;

/// Workers spawned per CPU when the worker count is left at 0
pub const WORKERS_PER_CPU: usize = 2;

/// Smallest window that gives the trend line a non-zero denominator
pub const MIN_WINDOW_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    pub limit: Duration,                 // Latency considered "too slow"
    pub window_size: usize,              // Samples used for the trend line
    pub backoff_factor: f64,             // Scales the computed delay
    pub high_water_mark: Option<f64>,    // Fraction of `limit`, see AdaptiveThrottle
}

impl ThrottleConfig {
    pub fn new(limit: Duration, window_size: usize, backoff_factor: f64) -> Self {
        ThrottleConfig {
            limit,
            window_size: window_size.max(MIN_WINDOW_SIZE),
            backoff_factor,
            high_water_mark: None,
        }
    }

    pub fn with_high_water_mark(mut self, fraction: f64) -> Self {
        self.high_water_mark = Some(fraction);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < MIN_WINDOW_SIZE {
            return Err(invalid(format!(
                "throttle window size must be at least {}, got {}",
                MIN_WINDOW_SIZE, self.window_size
            )));
        }
        if self.limit.is_zero() {
            return Err(invalid("throttle limit must be non-zero".to_string()));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(invalid(format!(
                "throttle backoff factor must be a finite non-negative number, got {}",
                self.backoff_factor
            )));
        }
        if let Some(hwm) = self.high_water_mark {
            if !(hwm > 0.0 && hwm <= 1.0) {
                return Err(invalid(format!(
                    "throttle high-water mark must be in (0, 1], got {}",
                    hwm
                )));
            }
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            limit: Duration::from_secs(30),
            window_size: 10,
            backoff_factor: 1.0,
            high_water_mark: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub batch_size: usize,
    pub workers: usize,                  // 0 = WORKERS_PER_CPU x cores
    pub max_retries: usize,
    pub request_timeout: Duration,       // Per bulk call
    pub queue_full_wait: Duration,       // Producer poll interval on a full queue
    pub id_field: String,
    pub write_mode: WriteMode,
    pub throttle: ThrottleConfig,
}

impl IndexConfig {
    /// Worker count with the CPU-based default applied.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            WORKERS_PER_CPU * num_cpus::get()
        } else {
            self.workers
        }
    }

    /// Capacity of the batch queue between producer and workers
    pub fn queue_capacity(&self) -> usize {
        self.effective_workers() * 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch size must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request timeout must be non-zero".to_string()));
        }
        if self.queue_full_wait.is_zero() {
            return Err(invalid("queue-full wait time must be non-zero".to_string()));
        }
        if self.id_field.is_empty() {
            return Err(invalid("document id field must not be empty".to_string()));
        }
        self.throttle.validate()
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let request_timeout = Duration::from_secs(60);
        IndexConfig {
            batch_size: 100,
            workers: 0,
            max_retries: 3,
            request_timeout,
            queue_full_wait: Duration::from_secs(10),
            id_field: "_id".to_string(),
            write_mode: WriteMode::Index,
            throttle: ThrottleConfig::new(request_timeout, 50, 1.0),
        }
    }
}

fn invalid(context: String) -> Error {
    Error::new(ErrorKind::InvalidArgument, context)
}
