//! In-process backend for client tests.
//!
//! Serves the handful of routes the client tests exercise on 127.0.0.1:0
//! and counts how often each one was hit.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// How `/auth/refresh` answers.
#[derive(Debug, Clone)]
pub enum RefreshReply {
    Rotated(String, String),
    AccessOnly(String),
    Refused,
    Status(u16),
}

impl RefreshReply {
    pub fn rotated(access: &str, refresh: &str) -> Self {
        Self::Rotated(access.into(), refresh.into())
    }

    pub fn access_only(access: &str) -> Self {
        Self::AccessOnly(access.into())
    }

    pub fn refused() -> Self {
        Self::Refused
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code)
    }
}

pub struct MockState {
    valid_token: String,
    refresh_reply: RefreshReply,
    refresh_delay: Mutex<Duration>,
    fail_logout: Mutex<bool>,
    pub patient_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    patient_auth: Mutex<Option<String>>,
    request_id: Mutex<Option<String>>,
    refresh_auth: Mutex<Option<String>>,
    refresh_body: Mutex<Option<Value>>,
    login_auth: Mutex<Option<String>>,
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<MockState>,
}

impl Deref for MockBackend {
    type Target = MockState;

    fn deref(&self) -> &MockState {
        &self.state
    }
}

impl MockBackend {
    /// `valid_token` is the only bearer `/patients` accepts.
    pub async fn start(valid_token: &str, refresh_reply: RefreshReply) -> Self {
        let state = Arc::new(MockState {
            valid_token: valid_token.to_string(),
            refresh_reply,
            refresh_delay: Mutex::new(Duration::ZERO),
            fail_logout: Mutex::new(false),
            patient_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            patient_auth: Mutex::new(None),
            request_id: Mutex::new(None),
            refresh_auth: Mutex::new(None),
            refresh_body: Mutex::new(None),
            login_auth: Mutex::new(None),
        });

        let app = axum::Router::new()
            .route("/patients", get(patients))
            .route("/missing-patient", get(missing_patient))
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .route("/auth/logout", post(logout))
            .route("/bad-gateway", get(bad_gateway))
            .route("/validation", post(validation))
            .route("/report.csv", get(report))
            .route("/slow", get(slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn with_refresh_delay(self, delay: Duration) -> Self {
        *self.state.refresh_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_failing_logout(self) -> Self {
        *self.state.fail_logout.lock().unwrap() = true;
        self
    }

    pub fn last_patient_auth(&self) -> Option<String> {
        self.state.patient_auth.lock().unwrap().clone()
    }

    pub fn last_request_id(&self) -> Option<String> {
        self.state.request_id.lock().unwrap().clone()
    }

    pub fn last_refresh_auth(&self) -> Option<String> {
        self.state.refresh_auth.lock().unwrap().clone()
    }

    pub fn last_refresh_body(&self) -> Option<Value> {
        self.state.refresh_body.lock().unwrap().clone()
    }

    pub fn last_login_auth(&self) -> Option<String> {
        self.state.login_auth.lock().unwrap().clone()
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn json_reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn patients(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.patient_calls.fetch_add(1, Ordering::SeqCst);
    let auth = header_value(&headers, header::AUTHORIZATION);
    *state.patient_auth.lock().unwrap() = auth.clone();
    *state.request_id.lock().unwrap() =
        header_value(&headers, header::HeaderName::from_static("x-request-id"));

    if auth.as_deref() == Some(format!("Bearer {}", state.valid_token).as_str()) {
        json_reply(
            StatusCode::OK,
            json!({"status": true, "data": [{"id": 1, "name": "Ada Lovelace"}]}),
        )
    } else {
        json_reply(
            StatusCode::UNAUTHORIZED,
            json!({"status": false, "code": "TOKEN_EXPIRED", "message": "Access token expired"}),
        )
    }
}

async fn missing_patient() -> Response {
    json_reply(
        StatusCode::OK,
        json!({"status": false, "message": "Patient not found"}),
    )
}

async fn refresh(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    *state.refresh_auth.lock().unwrap() = header_value(&headers, header::AUTHORIZATION);
    *state.refresh_body.lock().unwrap() = Some(body);

    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    match &state.refresh_reply {
        RefreshReply::Rotated(access, refresh) => json_reply(
            StatusCode::OK,
            json!({"status": true, "data": {"accessToken": access, "refreshToken": refresh}}),
        ),
        RefreshReply::AccessOnly(access) => json_reply(
            StatusCode::OK,
            json!({"status": true, "data": {"accessToken": access}}),
        ),
        RefreshReply::Refused => json_reply(
            StatusCode::OK,
            json!({"status": false, "message": "Invalid refresh token"}),
        ),
        RefreshReply::Status(code) => json_reply(
            StatusCode::from_u16(*code).unwrap(),
            json!({"status": false, "message": "refresh failed"}),
        ),
    }
}

async fn login(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    *state.login_auth.lock().unwrap() = header_value(&headers, header::AUTHORIZATION);
    if body["password"] != "hunter2" {
        return json_reply(
            StatusCode::UNAUTHORIZED,
            json!({"status": false, "code": "INVALID_CREDENTIALS", "message": "Invalid email or password"}),
        );
    }
    json_reply(
        StatusCode::OK,
        json!({
            "status": true,
            "data": {
                "accessToken": "login-a",
                "refreshToken": "login-r",
                "user": {"id": "d1", "name": "Dr. Grey", "email": body["email"], "role": "doctor"},
                "profileCompleted": false
            }
        }),
    )
}

async fn logout(State(state): State<Arc<MockState>>) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if *state.fail_logout.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
    }
    json_reply(StatusCode::OK, json!({"status": true}))
}

async fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "text/html")],
        "<html><body>502 Bad Gateway</body></html>",
    )
        .into_response()
}

async fn validation() -> Response {
    json_reply(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({"code": "VALIDATION_FAILED", "message": "email is required"}),
    )
}

async fn report() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv")],
        "id,name\n1,Ada Lovelace\n",
    )
        .into_response()
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    json_reply(StatusCode::OK, json!({"status": true}))
}
