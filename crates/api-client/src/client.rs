//! Authenticated request dispatch
//!
//! `ApiClient` is the context object every screen calls through. It attaches
//! the session's bearer token, sends the request once, and on a 401 runs the
//! refresh procedure and retries exactly once more. Per call:
//!
//! ```text
//! PENDING -> SENT -> OK | UNAUTHORIZED
//! UNAUTHORIZED -> REFRESHING -> RETRIED_OK | RETRIED_FAIL | EXPIRED
//! ```
//!
//! `EXPIRED` clears the session and fires the redirect handler, whether the
//! backend refused the refresh token or could not be reached at all.

use std::sync::Arc;
use std::time::Instant;

use common::Secret;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use session_store::{LoginGrant, Session, SessionStore, UserIdentity};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClientConfig;
use crate::envelope::{ParsedBody, classify_failure, decode_envelope, parse_success};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::redirect::{RedirectHandler, log_redirect};
use crate::refresh::{RefreshGate, RefreshOutcome, RefreshResponse};
use crate::request::{RequestOptions, resolve_url};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// `data` of a successful login envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    user: Option<UserIdentity>,
    #[serde(default)]
    profile_completed: bool,
}

pub struct ApiClient {
    http: reqwest::Client,
    session: Arc<SessionStore>,
    config: ClientConfig,
    refresh_gate: Mutex<RefreshGate>,
    redirect: Arc<dyn RedirectHandler>,
}

impl ApiClient {
    /// Build a client over `session`.
    ///
    /// A missing base URL is not fatal, but it is logged at error level:
    /// every relative endpoint will fail until it is configured.
    pub fn new(config: ClientConfig, session: Arc<SessionStore>) -> Self {
        if config.base_url().is_none() {
            error!("API base URL is not configured; relative endpoints cannot be reached");
        }
        Self {
            http: reqwest::Client::new(),
            session,
            config,
            refresh_gate: Mutex::new(RefreshGate::default()),
            redirect: Arc::new(log_redirect),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_redirect(mut self, handler: impl RedirectHandler + 'static) -> Self {
        self.redirect = Arc::new(handler);
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn resolve(&self, endpoint: &str) -> String {
        resolve_url(self.config.base_url(), endpoint)
    }

    /// Send a request, refreshing and retrying once on 401.
    pub async fn dispatch(&self, endpoint: &str, options: RequestOptions) -> Result<ParsedBody> {
        let request_id = new_request_id();
        self.dispatch_inner(endpoint, options, &request_id).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %options.method, endpoint = %endpoint))]
    async fn dispatch_inner(
        &self,
        endpoint: &str,
        options: RequestOptions,
        request_id: &str,
    ) -> Result<ParsedBody> {
        let url = self.resolve(endpoint);
        let token = if options.skip_auth {
            None
        } else {
            self.session.access_token()
        };

        let response = self
            .execute(&url, &options, token.as_ref(), request_id)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || !options.refreshable() {
            return read_body(response).await;
        }

        debug!("unauthorized, attempting token refresh");
        match self.refresh_outcome(token.as_ref()).await {
            RefreshOutcome::Refreshed(fresh) => {
                let retried = self
                    .execute(&url, &options, Some(&fresh), request_id)
                    .await?;
                if retried.status() == StatusCode::UNAUTHORIZED {
                    warn!("retry after refresh still unauthorized");
                }
                read_body(retried).await
            }
            RefreshOutcome::Unavailable(err) => {
                warn!(error = %err, "token refresh unavailable, ending session");
                Err(self.expire_session())
            }
            RefreshOutcome::Rejected => Err(self.expire_session()),
        }
    }

    /// Dispatch and unwrap the `{status, data, message}` envelope into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        match self.dispatch(endpoint, options).await? {
            ParsedBody::Json(value) => decode_envelope(value),
            ParsedBody::Text(_) => Err(ApiError::Decode(
                "expected a JSON envelope, got a non-JSON body".into(),
            )),
        }
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Never fails: any problem is logged and reported as `None`. Deciding
    /// what that means for the user is the caller's job.
    pub async fn refresh(&self) -> Option<Secret<String>> {
        let current = self.session.access_token();
        match self.refresh_outcome(current.as_ref()).await {
            RefreshOutcome::Refreshed(token) => Some(token),
            RefreshOutcome::Rejected | RefreshOutcome::Unavailable(_) => None,
        }
    }

    /// Single-flight refresh.
    ///
    /// `stale` is the access token the caller saw rejected. If the session
    /// already holds a different one when the gate is acquired, another
    /// caller refreshed in the meantime and that token is reused.
    async fn refresh_outcome(&self, stale: Option<&Secret<String>>) -> RefreshOutcome {
        let mut gate = self.refresh_gate.lock().await;

        let session = self.session.snapshot();
        if let Some(current) = session.access_token()
            && Some(current) != stale
        {
            debug!("access token already rotated by a concurrent refresh");
            metrics::record_refresh("coalesced");
            return RefreshOutcome::Refreshed(current.clone());
        }

        let Some(refresh_token) = session.refresh_token().cloned() else {
            debug!("no refresh token in session, cannot refresh");
            metrics::record_refresh("rejected");
            return RefreshOutcome::Rejected;
        };

        if gate.was_rejected(&refresh_token) {
            debug!("refresh token was already rejected, not resending");
            metrics::record_refresh("rejected");
            return RefreshOutcome::Rejected;
        }

        let outcome = self.exchange(&refresh_token).await;
        metrics::record_refresh(outcome.label());
        if matches!(outcome, RefreshOutcome::Rejected) {
            gate.mark_rejected(refresh_token);
        }
        outcome
    }

    /// POST the refresh token to the exchange endpoint and store the result.
    async fn exchange(&self, refresh_token: &Secret<String>) -> RefreshOutcome {
        let request_id = new_request_id();
        let url = self.resolve(&self.config.refresh_path);
        let options = RequestOptions::post(serde_json::json!({
            "refreshToken": refresh_token.expose(),
        }))
        .skip_auth()
        .skip_refresh()
        .timeout(self.config.refresh_timeout());

        let body = match self.execute(&url, &options, None, &request_id).await {
            Ok(response) => read_body(response).await,
            Err(e) => Err(e),
        };

        let value = match body {
            Ok(ParsedBody::Json(value)) => value,
            Ok(ParsedBody::Text(_)) => {
                warn!("token refresh returned a non-JSON body");
                return RefreshOutcome::Rejected;
            }
            Err(e) if e.is_retryable() || e.status().is_some_and(|s| s >= 500) => {
                warn!(error = %e, "token refresh unavailable");
                return RefreshOutcome::Unavailable(e);
            }
            Err(e) => {
                warn!(error = %e, "token refresh rejected");
                return RefreshOutcome::Rejected;
            }
        };

        let pair = match serde_json::from_value::<RefreshResponse>(value) {
            Ok(response) => response.into_pair(refresh_token),
            Err(e) => {
                warn!(error = %e, "token refresh response did not parse");
                None
            }
        };
        let Some((access, refresh)) = pair else {
            warn!("token refresh returned no access token");
            return RefreshOutcome::Rejected;
        };

        if self
            .session
            .rotate_tokens(refresh_token, access.clone(), refresh)
        {
            info!("access token refreshed");
            return RefreshOutcome::Refreshed(Secret::new(access));
        }

        // Logged out or re-logged-in while the exchange was in flight
        match self.session.access_token() {
            Some(current) => RefreshOutcome::Refreshed(current),
            None => RefreshOutcome::Rejected,
        }
    }

    /// Clear the session after a failed refresh and fire the redirect.
    ///
    /// Only the caller that actually cleared an authenticated session
    /// redirects, so concurrent expiries navigate once.
    fn expire_session(&self) -> ApiError {
        metrics::record_session_expired();
        if self.session.logout() {
            warn!(route = %self.config.login_route, "session expired, redirecting to sign-in");
            self.redirect.redirect(&self.config.login_route);
        } else {
            debug!("session already cleared");
        }
        ApiError::SessionExpired
    }

    /// Sign in with email and password and establish the session.
    pub async fn login(
        &self,
        email: &str,
        password: &Secret<String>,
        remember_me: bool,
    ) -> Result<Session> {
        let options = RequestOptions::post(serde_json::json!({
            "email": email,
            "password": password.expose(),
        }))
        .skip_auth()
        .skip_refresh();

        let data: LoginData = self.request(&self.config.login_path, options).await?;
        if data.access_token.is_empty() || data.refresh_token.is_empty() {
            return Err(ApiError::Decode(
                "login response did not carry a token pair".into(),
            ));
        }

        self.session.login(LoginGrant {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            user: data.user,
            profile_completed: data.profile_completed,
            remember_me,
        });
        Ok(self.session.snapshot())
    }

    /// Best-effort server logout, then unconditional local clear.
    pub async fn logout(&self) {
        if let Some(refresh) = self.session.refresh_token() {
            let options = RequestOptions::post(serde_json::json!({
                "refreshToken": refresh.expose(),
            }))
            .skip_refresh();
            if let Err(e) = self.dispatch(&self.config.logout_path, options).await {
                warn!(error = %e, "logout endpoint failed, clearing local session anyway");
            }
        }
        self.session.logout();
    }

    async fn execute(
        &self,
        url: &str,
        options: &RequestOptions,
        token: Option<&Secret<String>>,
        request_id: &str,
    ) -> Result<reqwest::Response> {
        let headers = build_headers(options, token, request_id)?;
        let mut request = self
            .http
            .request(options.method.clone(), url)
            .headers(headers)
            .timeout(options.timeout.unwrap_or(self.config.request_timeout()));
        if let Some(body) = &options.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ApiError::InvalidRequest(format!("serializing body: {e}")))?;
            request = request.body(bytes);
        }

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                metrics::record_request(
                    options.method.as_str(),
                    status.as_u16(),
                    started.elapsed().as_secs_f64(),
                );
                debug!(status = status.as_u16(), "response received");
                Ok(response)
            }
            Err(e) => {
                let error_type = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "other"
                };
                metrics::record_transport_error(error_type);
                warn!(error = %e, error_type, "request failed before a response");
                Err(ApiError::Transport {
                    message: e.to_string(),
                    timeout: e.is_timeout(),
                })
            }
        }
    }
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Content type, request id, caller headers, and the bearer token if any.
///
/// With no token the Authorization header is left off entirely.
fn build_headers(
    options: &RequestOptions,
    token: Option<&Secret<String>>,
    request_id: &str,
) -> Result<HeaderMap> {
    let mut headers = options.headers.clone();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(request_id)
            .map_err(|e| ApiError::InvalidRequest(format!("request id: {e}")))?,
    );
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|e| ApiError::InvalidRequest(format!("invalid token value: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// Classify the response and parse its body.
async fn read_body(response: reqwest::Response) -> Result<ParsedBody> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let text = response.text().await.map_err(|e| ApiError::Transport {
        message: format!("reading response body: {e}"),
        timeout: e.is_timeout(),
    })?;

    if !status.is_success() {
        return Err(classify_failure(status, text));
    }
    parse_success(content_type.as_deref(), text)
}
