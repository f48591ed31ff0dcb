use std::time::{Duration, Instant};

use crate::error::FetchError;

/// Overall retry budget for the patch download path.
pub const DOWNLOAD_BUDGET: Duration = Duration::from_secs(300);
/// Overall retry budget for the synchronous compute path.
pub const COMPUTE_BUDGET: Duration = Duration::from_secs(120);

/// Exponential backoff with an overall time budget per element.
///
/// The budget bounds how long one element may keep a worker busy. A sample
/// that stays unfetchable costs at most its own budget and is then dropped
/// by the caller, it never stalls the job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub budget: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy::download()
    }
}

impl RetryPolicy {
    pub fn download() -> RetryPolicy {
        RetryPolicy {
            budget: DOWNLOAD_BUDGET,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    pub fn compute() -> RetryPolicy {
        RetryPolicy {
            budget: COMPUTE_BUDGET,
            ..RetryPolicy::download()
        }
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the next backoff would overrun the budget. `on_backoff` fires
    /// before every sleep with the attempt number, the pending delay and
    /// the error that triggered it.
    pub fn run<T>(
        &self,
        retryable: impl Fn(&FetchError) -> bool,
        mut on_backoff: impl FnMut(u32, Duration, &FetchError),
        mut op: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let start = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempts = 1u32;

        loop {
            let error = match op() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !retryable(&error) {
                return Err(error);
            }
            if start.elapsed() + backoff > self.budget {
                return Err(FetchError::BudgetExhausted {
                    attempts,
                    elapsed: start.elapsed(),
                    source: Box::new(error),
                });
            }

            on_backoff(attempts, backoff, &error);
            std::thread::sleep(backoff);
            attempts += 1;
            backoff = (backoff * self.multiplier).min(self.max_backoff);
        }
    }
}
