//! Debounced redirect to the login screen.

use bridge_traits::navigation::Navigator;
use core_async::time::{Duration, Instant};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectState {
    Idle,
    Redirecting { since: Instant },
}

/// Coalesces login redirects.
///
/// The first [`trigger`](Self::trigger) navigates and opens a window of
/// `debounce`; triggers inside the window are absorbed. The window closes
/// lazily on the next trigger after it has elapsed, so no timer task is
/// needed.
pub struct LoginRedirect {
    state: Mutex<RedirectState>,
    debounce: Duration,
    navigator: Option<Arc<dyn Navigator>>,
    event_bus: EventBus,
}

impl LoginRedirect {
    pub fn new(
        navigator: Option<Arc<dyn Navigator>>,
        debounce: Duration,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(RedirectState::Idle),
            debounce,
            navigator,
            event_bus,
        }
    }

    /// Navigate to login unless a redirect happened within the window.
    ///
    /// Returns `true` if this call performed the redirect.
    pub fn trigger(&self, reason: &str) -> bool {
        {
            let mut state = lock(&self.state);
            if let RedirectState::Redirecting { since } = *state {
                if since.elapsed() < self.debounce {
                    debug!(reason, "Login redirect already in progress");
                    return false;
                }
            }
            *state = RedirectState::Redirecting {
                since: Instant::now(),
            };
        }

        info!(reason, "Redirecting to login");
        match &self.navigator {
            Some(navigator) => navigator.redirect_to_login(),
            None => debug!("No navigator registered; login redirect is event-only"),
        }
        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::LoginRequired {
                reason: reason.to_string(),
            }));
        true
    }

    /// Whether a redirect window is currently open.
    pub fn is_redirecting(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            RedirectState::Redirecting { since } if since.elapsed() < self.debounce => true,
            RedirectState::Redirecting { .. } => {
                *state = RedirectState::Idle;
                false
            }
            RedirectState::Idle => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
