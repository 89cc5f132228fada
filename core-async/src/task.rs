//! Task spawning.
//!
//! Background work in the request layer (the connectivity pump, queue replay
//! after reconnect) is spawned here so it never blocks the caller that
//! triggered it.

pub use tokio::task::{yield_now, JoinError, JoinHandle};

/// Spawns a future onto the current runtime.
///
/// # Arguments
///
/// * `future` - The async computation to run
///
/// # Returns
///
/// A `JoinHandle` that can be awaited for the result or aborted.
///
/// # Examples
///
/// ```rust
/// use core_async::task::spawn;
///
/// # async fn example() {
/// let handle = spawn(async { 7 });
/// assert_eq!(handle.await.unwrap(), 7);
/// # }
/// ```
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}
