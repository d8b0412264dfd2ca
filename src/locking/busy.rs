//! Busy-retry policy. When a lock attempt hits contention, the connection's
//! policy decides whether to give up immediately, sleep and retry within a
//! time budget, or consult a user callback.

use std::time::Duration;

/// What a connection does when a lock request hits contention.
///
/// Setting any variant replaces the previous one: timeout and handler are a
/// single slot, last set wins.
pub enum BusyPolicy {
    /// Fail immediately with a contention error.
    Fail,
    /// Sleep and retry until the budget is exhausted.
    Timeout(Duration),
    /// Ask the callback; it receives the retry count so far and returns
    /// `true` to retry (after the scheduled delay) or `false` to give up.
    Handler(Box<dyn FnMut(u32) -> bool + Send>),
}

impl Default for BusyPolicy {
    fn default() -> Self {
        BusyPolicy::Fail
    }
}

impl std::fmt::Debug for BusyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyPolicy::Fail => f.write_str("BusyPolicy::Fail"),
            BusyPolicy::Timeout(d) => write!(f, "BusyPolicy::Timeout({:?})", d),
            BusyPolicy::Handler(_) => f.write_str("BusyPolicy::Handler(..)"),
        }
    }
}

/// Backoff schedule: short sleeps at first, settling at 100ms.
const DELAYS_MS: [u64; 12] = [1, 2, 5, 10, 15, 20, 25, 25, 25, 50, 50, 100];

/// Delay before retry number `attempt` (0-based).
pub fn retry_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(DELAYS_MS.len() - 1);
    Duration::from_millis(DELAYS_MS[idx])
}

/// Total sleep accumulated through retry `attempt` inclusive.
pub fn elapsed_after(attempt: u32) -> Duration {
    (0..=attempt).map(retry_delay).sum()
}

impl BusyPolicy {
    /// Decides the next step after a contended attempt. Returns the delay
    /// to sleep before retrying, or `None` to give up now.
    pub fn next_retry(&mut self, attempt: u32) -> Option<Duration> {
        match self {
            BusyPolicy::Fail => None,
            BusyPolicy::Timeout(budget) => {
                let delay = retry_delay(attempt);
                if elapsed_after(attempt) > *budget {
                    None
                } else {
                    Some(delay)
                }
            }
            BusyPolicy::Handler(callback) => {
                if callback(attempt) {
                    Some(retry_delay(attempt))
                } else {
                    None
                }
            }
        }
    }
}
