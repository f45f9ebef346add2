//! Per-key log rate limiting
//!
//! A misbehaving source can deliver a bad frame on every tick. The throttler
//! lets the first warning through and counts the ones suppressed until the
//! interval elapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message key is logged
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Returns `Some(n)` when the message should be logged, where `n` is the
    /// number of messages suppressed since the last one; `None` when throttled.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                state.last_logged = now;
                state.suppressed = 0;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, e.g. when its source goes away
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use crtc::utils::LogThrottler;
/// use crtc::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "remote", "Dropping frame: {}", "zero width");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert_eq!(throttler.check("remote"), Some(0));
        assert_eq!(throttler.check("remote"), None);
        assert_eq!(throttler.check("remote"), None);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(throttler.check("remote"), Some(2));
        assert_eq!(throttler.check("remote"), None);
    }

    #[test]
    fn test_independent_keys() {
        let throttler = LogThrottler::default();

        assert_eq!(throttler.check("remote"), Some(0));
        assert_eq!(throttler.check("local"), Some(0));
        assert_eq!(throttler.check("remote"), None);

        throttler.clear("remote");
        assert_eq!(throttler.check("remote"), Some(0));
        assert_eq!(throttler.check("local"), None);
    }
}
