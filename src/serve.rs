//! HTTP transport for the message bus.
//!
//! Endpoints:
//! - `GET /` ping.
//! - `POST /bus` takes an [`Envelope`] and answers with a [`BusReply`].
//! - `POST /headers` reports the headers of an outgoing page request.
//! - `POST /tabs/{tab_id}/reset` after a navigation or tab close.
//! - `POST /private/end` when the last private window closes.
//! - `GET /logs` lists the persistent exchange logs.
//!
//! Every endpoint but the ping checks `X-Secret-Key` when a secret is set.
//! [`HttpBus`] is the matching client side.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::Backend;
use crate::bus::{Bus, BusReply, Envelope, Message, Sender};
use crate::config::ServeConfig;
use crate::error::{Error, Result};

/// Pending exchanges older than this are dropped.
const STALE_SESSION_AGE: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct ServeState {
    backend: Arc<Backend>,
    secret: Option<String>,
}

/// Body of `POST /headers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHeaders {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// The routes, without binding.
pub fn router(backend: Arc<Backend>, secret: Option<String>) -> Router {
    Router::new()
        .route("/", get(ping))
        .route("/bus", post(bus))
        .route("/headers", post(request_headers))
        .route("/tabs/:tab_id/reset", post(reset_tab))
        .route("/private/end", post(end_private))
        .route("/logs", get(logs))
        .with_state(ServeState { backend, secret })
}

/// Serve `backend` on the configured address until the listener fails.
pub async fn run(backend: Arc<Backend>, config: &ServeConfig) -> Result<()> {
    let app = router(backend.clone(), config.secret.clone());

    let sweeper = backend.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STALE_SESSION_AGE / 4);
        loop {
            interval.tick().await;
            let evicted = sweeper.evict_stale(STALE_SESSION_AGE).await;
            if evicted > 0 {
                info!("Evicted {} stale sessions", evicted);
            }
        }
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("Server bind error: {}", e)))?;
    info!("Serving bus on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| Error::Other(format!("Server error: {}", e)))?;
    Ok(())
}

async fn ping() -> Response {
    json_response(
        StatusCode::OK,
        Json(json!({
            "status": 200,
            "message": "Pong!"
        })),
    )
}

async fn bus(State(state): State<ServeState>, headers: HeaderMap, Json(envelope): Json<Envelope>) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    let body = state.backend.dispatch(&envelope).await;
    json_response(
        StatusCode::OK,
        Json(BusReply {
            request_id: envelope.request_id,
            body,
        }),
    )
}

async fn request_headers(
    State(state): State<ServeState>,
    headers: HeaderMap,
    Json(request): Json<RequestHeaders>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    let pairs: Vec<(String, String)> = request.headers.into_iter().collect();
    state
        .backend
        .record_request_headers(&request.method, &request.url, &pairs)
        .await;
    ok()
}

async fn reset_tab(
    AxumPath(tab_id): AxumPath<u64>,
    State(state): State<ServeState>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    state.backend.reset_tab(tab_id).await;
    ok()
}

async fn end_private(State(state): State<ServeState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.backend.end_private_session().await {
        Ok(()) => ok(),
        Err(e) => internal_error(e),
    }
}

async fn logs(State(state): State<ServeState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.backend.records().await {
        Ok(records) => json_response(
            StatusCode::OK,
            Json(json!({
                "status": 200,
                "message": "Success",
                "data": records
            })),
        ),
        Err(e) => internal_error(e),
    }
}

fn ok() -> Response {
    json_response(
        StatusCode::OK,
        Json(json!({
            "status": 200,
            "message": "Success"
        })),
    )
}

fn internal_error(e: Error) -> Response {
    error!("Request failed: {}", e);
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": 500,
            "message": e.to_string()
        })),
    )
}

fn authorize(state: &ServeState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = state.secret.as_deref() else {
        return Ok(());
    };
    match headers.get("X-Secret-Key").and_then(|v| v.to_str().ok()) {
        None => Err(json_response(
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": 401,
                "message": "Secret Key is Empty."
            })),
        )),
        Some(secret) if secret != expected => Err(json_response(
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": 401,
                "message": "Secret Key is Invalid, the Key is case-sensitive."
            })),
        )),
        Some(_) => Ok(()),
    }
}

fn json_response(status: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;
    response.headers_mut().insert(
        "Server",
        HeaderValue::from_static(concat!("emebridge serve v", env!("CARGO_PKG_VERSION"))),
    );
    response
}

/// Page-side bus speaking to a remote `serve` instance.
#[derive(Debug, Clone)]
pub struct HttpBus {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
    sender: Sender,
}

impl HttpBus {
    pub fn new(base_url: &str, secret: Option<String>, sender: Sender) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            sender,
        }
    }
}

#[async_trait]
impl Bus for HttpBus {
    async fn request(&self, message: Message) -> Result<Option<String>> {
        let envelope = Envelope::new(self.sender.clone(), message);
        let mut request = self.client.post(format!("{}/bus", self.base_url)).json(&envelope);
        if let Some(secret) = &self.secret {
            request = request.header("X-Secret-Key", secret);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message");
            return Err(Error::Bus(format!("[{}] {}", status.as_u16(), message)));
        }
        let reply: BusReply = response.json().await?;
        if reply.request_id != envelope.request_id {
            return Err(Error::Bus(format!(
                "Reply {} does not match request {}",
                reply.request_id, envelope.request_id
            )));
        }
        Ok(reply.body)
    }
}
