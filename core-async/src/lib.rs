//! Async runtime facade for the Grove request layer.
//!
//! Every `core-*` crate spawns tasks, sleeps and applies timeouts through this
//! crate instead of naming Tokio directly, so the runtime choice lives in one
//! place.
//!
//! # Modules
//!
//! - `task`: Task spawning
//! - `time`: Sleep, timeouts, monotonic instants
//! - `sync`: Async-aware channels and locks
//! - `runtime`: Handles and `block_on` for synchronous edges
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
