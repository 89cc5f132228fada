//! Runtime handles and a blocking entry point for synchronous callers.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs `future` to completion on a fresh current-thread runtime.
///
/// Meant for synchronous edges (log forwarding outside a runtime, FFI
/// shims). Calling it from inside a runtime panics, so check
/// [`Handle::try_current`] first.
///
/// # Errors
///
/// Returns the I/O error raised while building the runtime.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
