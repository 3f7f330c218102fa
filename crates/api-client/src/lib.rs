//! Authenticated HTTP client for the clinic dashboard backend
//!
//! Every call goes through `ApiClient::dispatch`, which attaches the current
//! bearer token, classifies the response, and transparently handles an
//! expired access token:
//!
//! 1. a 401 triggers a single-flight exchange of the refresh token
//! 2. the original request is retried exactly once with the new token
//! 3. if the refresh is refused, the session is cleared and the
//!    `RedirectHandler` is sent to the sign-in route
//!
//! Concurrent 401s share one exchange. The session itself lives in
//! `session_store::SessionStore`.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod redirect;
pub(crate) mod refresh;
pub mod request;

#[cfg(test)]
mod mock;

pub use client::ApiClient;
pub use config::ClientConfig;
pub use envelope::{ParsedBody, decode_envelope};
pub use error::{ApiError, Result};
pub use redirect::{RedirectHandler, log_redirect};
pub use request::{RequestOptions, resolve_url};
