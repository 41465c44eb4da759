//! Fixed-window ingest rate limiting, per integration

use parking_lot::Mutex;
use std::collections::HashMap;

/// Window length in seconds
const WINDOW_SECS: i64 = 60;

/// Per-integration fixed-window counter. In-process state, reset on
/// restart; the limit bounds abuse, it is not an SLA.
pub struct RateLimiter {
    limit: u32,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request. Err carries the seconds until the window resets.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = chrono::Utc::now().timestamp();
        let window = now / WINDOW_SECS;

        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_insert((window, 0));
        if entry.0 != window {
            *entry = (window, 0);
        }
        if entry.1 >= self.limit {
            let retry_after = (entry.0 + 1) * WINDOW_SECS - now;
            return Err(retry_after.max(1) as u64);
        }
        entry.1 += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.check("int-1").is_ok());
        assert!(limiter.check("int-1").is_ok());
        assert!(limiter.check("int-1").is_ok());
        let retry_after = limiter.check("int-1").unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
        // Other integrations are unaffected.
        assert!(limiter.check("int-2").is_ok());
    }
}
