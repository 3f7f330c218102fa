//! Terminal-failure redirect hook
//!
//! The client never navigates itself. When a refresh fails for good it
//! clears the session and hands the login route to a `RedirectHandler`; the
//! embedding shell decides what "navigate" means.

use tracing::warn;

pub trait RedirectHandler: Send + Sync {
    fn redirect(&self, route: &str);
}

impl<F> RedirectHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect(&self, route: &str) {
        self(route)
    }
}

/// Default handler: nothing to navigate, so just say where we would go.
pub fn log_redirect(route: &str) {
    warn!(route, "session expired, sign-in required");
}
