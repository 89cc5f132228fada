//! Time-related operations.
//!
//! `sleep` and `timeout` are driven by Tokio's timer, which means tests can
//! pause and advance the clock (`#[tokio::test(start_paused = true)]`) to
//! observe backoff delays without waiting for them.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{timeout, Duration};
//!
//! async fn example() {
//!     let outcome = timeout(Duration::from_secs(1), async { 42 }).await;
//!     assert_eq!(outcome.ok(), Some(42));
//! }
//! ```

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};
pub use tokio::time::{error::Elapsed, interval, sleep, timeout, Instant, Interval};

/// Returns the current wall-clock time as milliseconds since UNIX_EPOCH.
///
/// Clocks set before the epoch report `0` rather than failing.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
