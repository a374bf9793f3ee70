//! Bounded retry with deterministic exponential backoff.
use std::time::Duration;

/// Upper bound on the retry budget accepted by the transport.
pub const MAX_RETRIES: u32 = 5;

/// Factor the backoff grows by after every retry.
pub const BACKOFF_MULTIPLIER: u32 = 10;

/// Outcome of a single attempt.
#[derive(Debug)]
pub struct Attempt<T, E> {
    /// Result of the attempt. Returned to the caller if this is the last attempt.
    pub result: Result<T, E>,
    /// Whether the failure is transient and the operation is worth repeating.
    pub should_retry: bool,
}

impl<T, E> Attempt<T, E> {
    /// The attempt is terminal, whatever its result.
    pub fn done(result: Result<T, E>) -> Attempt<T, E> {
        Attempt {
            result,
            should_retry: false,
        }
    }

    /// The attempt failed transiently. `result` is returned if the budget is exhausted.
    pub fn retry(result: Result<T, E>) -> Attempt<T, E> {
        Attempt {
            result,
            should_retry: true,
        }
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper {
    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run `op` until it returns a terminal [`Attempt`] or `retries` retries have been spent.
///
/// Sleeps `backoff`, `backoff * 10`, `backoff * 100`, ... between attempts, so at most
/// `retries + 1` attempts are made.
pub fn retry<T, E>(
    mut retries: u32,
    mut backoff: Duration,
    sleeper: &dyn Sleeper,
    mut op: impl FnMut() -> Attempt<T, E>,
) -> Result<T, E> {
    loop {
        let attempt = op();
        if !attempt.should_retry || retries == 0 {
            return attempt.result;
        }

        retries -= 1;
        log::debug!(target: "statsig", remaining_retries = retries; "retrying after {:?}", backoff);
        sleeper.sleep(backoff);
        backoff = backoff.saturating_mul(BACKOFF_MULTIPLIER);
    }
}
