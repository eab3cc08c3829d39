//! Rate limit information.

/// Remaining requests below which callers wait for the reset.
pub(crate) const MIN_REMAINING_THRESHOLD: u32 = 10;

/// Rate limit information for a specific resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests remaining in the current window.
    pub remaining: u32,

    /// Unix timestamp when the rate limit resets.
    pub reset: u64,

    /// Total requests allowed per window.
    pub limit: u32,
}

impl RateLimitInfo {
    /// Returns true when the remaining quota is below the safety threshold.
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.remaining < MIN_REMAINING_THRESHOLD
    }

    /// Seconds to wait before the next call, if any.
    ///
    /// `None` when quota remains or the reset time already passed.
    #[must_use]
    pub fn wait_secs(&self, now: u64) -> Option<u64> {
        if !self.is_low() || self.reset <= now {
            return None;
        }
        Some(self.reset - now)
    }
}
