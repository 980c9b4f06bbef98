//! Bounded retry with exponential backoff
//!
//! Shared by authentication and page fetching. The operation runs on the
//! calling thread and the policy sleeps between attempts, so it belongs on
//! a blocking thread, never directly on an async executor.

use std::time::Duration;

/// Classifies an error as worth retrying
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following one
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op`, retrying transient failures.
    ///
    /// `on_retry` is called with the error, the 1-based retry number and the
    /// delay before that retry is made. Fatal errors and the last transient
    /// error are returned as-is.
    pub fn run<T, E, F, H>(&self, mut op: F, mut on_retry: H) -> Result<T, E>
    where
        E: Transient,
        F: FnMut() -> Result<T, E>,
        H: FnMut(&E, u32, Duration),
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    on_retry(&err, retry, delay);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES, Self::DEFAULT_BASE_DELAY)
    }
}
