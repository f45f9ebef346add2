//! Small helpers shared across modules

pub mod throttle;

pub use throttle::LogThrottler;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric string, used for transaction ids
pub fn rand_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
