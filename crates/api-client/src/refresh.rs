//! Token refresh: response shape, outcome, single-flight gate
//!
//! The exchange itself is driven by `ApiClient::refresh_outcome`, which holds
//! the gate for the whole read-session → POST → write-session sequence. With
//! refresh-token rotation a second concurrent use of the same refresh token
//! is rejected by the backend, so callers that queued behind an in-flight
//! refresh reuse its result instead of sending their own.

use common::Secret;
use serde::Deserialize;

use crate::error::ApiError;

/// Response body of the token exchange endpoint.
///
/// `{ "status": bool, "data": { "accessToken": "...", "refreshToken": "..." } }`
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: Option<RefreshedTokens>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl RefreshResponse {
    /// New `(access, refresh)` pair, or `None` if the backend refused.
    ///
    /// A backend that does not rotate refresh tokens omits `refreshToken`;
    /// the prior one is reused.
    pub(crate) fn into_pair(self, prior_refresh: &Secret<String>) -> Option<(String, String)> {
        if !self.status {
            return None;
        }
        let data = self.data?;
        let access = data.access_token.filter(|t| !t.is_empty())?;
        let refresh = data
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| prior_refresh.expose().clone());
        Some((access, refresh))
    }
}

/// How a refresh attempt ended.
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    /// A usable access token, either freshly exchanged or produced by a
    /// refresh that completed while this caller waited.
    Refreshed(Secret<String>),
    /// The session cannot be refreshed: no refresh token, or the backend
    /// answered without a valid token pair. Terminal.
    Rejected,
    /// The exchange never got a usable answer (transport failure, timeout,
    /// 5xx). The refresh token is not marked as rejected.
    Unavailable(ApiError),
}

impl RefreshOutcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed(_) => "refreshed",
            RefreshOutcome::Rejected => "rejected",
            RefreshOutcome::Unavailable(_) => "unavailable",
        }
    }
}

/// State guarded by the single-flight mutex.
#[derive(Debug, Default)]
pub(crate) struct RefreshGate {
    /// Last refresh token the backend refused. Never sent twice.
    rejected: Option<Secret<String>>,
}

impl RefreshGate {
    pub(crate) fn was_rejected(&self, refresh: &Secret<String>) -> bool {
        self.rejected.as_ref() == Some(refresh)
    }

    pub(crate) fn mark_rejected(&mut self, refresh: Secret<String>) {
        self.rejected = Some(refresh);
    }
}
