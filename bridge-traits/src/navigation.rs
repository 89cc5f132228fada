//! Navigation Abstraction

/// UI navigation hooks the request layer may trigger.
///
/// The request layer debounces calls itself, so implementations can navigate
/// unconditionally.
pub trait Navigator: Send + Sync {
    /// Replace the current screen stack with the login screen.
    fn redirect_to_login(&self);
}
