//! HTTP surface for clients.
//!
//! ## Endpoints
//!
//! - `POST /listen`: handle a typed utterance `{"text": "..."}`
//! - `POST /listen-voice`: capture one spoken command and handle it
//! - `GET /health`: liveness and listening state
//! - `GET /tabs`: controlled browser tabs

use crate::assistant::{Assistant, Outcome};
use crate::config::ServerConfig;
use crate::error::{ErrorCode, VocalError};
use crate::router::Reply;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Body of `POST /listen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenRequest {
    #[serde(default)]
    pub text: String,
}

/// Body returned by both listen endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenResponse {
    pub request_id: String,
    /// Transcript, for voice requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default)]
    pub can_retry: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl ListenResponse {
    fn from_outcome(outcome: Outcome) -> Self {
        let Outcome { heard, reply } = outcome;
        Self {
            request_id: Uuid::new_v4().to_string(),
            text: heard,
            can_retry: reply.code.is_some_and(ErrorCode::can_retry),
            code: reply.code,
            partial: reply.partial,
            reply: reply.text,
        }
    }
}

/// Status for a reply. A parse failure still carries a spoken answer, so it
/// is delivered as 200.
fn reply_status(reply: &Reply) -> StatusCode {
    match reply.code {
        None | Some(ErrorCode::ParseError) => StatusCode::OK,
        Some(code) => status_for(code),
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// HTTP server over a shared [`Assistant`].
pub struct VocalServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl VocalServer {
    /// Bind `{host}:{port}` (port `0` picks one) and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn start(assistant: Arc<Assistant>, config: &ServerConfig) -> crate::Result<Self> {
        let app = router(assistant);

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            VocalError::Io(std::io::Error::new(
                e.kind(),
                format!("server bind to {bind_addr} failed: {e}"),
            ))
        })?;
        let addr = listener.local_addr()?;

        info!("vocal server listening on http://{addr}");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("vocal server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for VocalServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The route table, without binding.
pub fn router(assistant: Arc<Assistant>) -> Router {
    Router::new()
        .route("/listen", post(handle_listen))
        .route("/listen-voice", post(handle_listen_voice))
        .route("/health", get(handle_health))
        .route("/tabs", get(handle_tabs))
        .with_state(assistant)
}

async fn handle_listen(
    State(assistant): State<Arc<Assistant>>,
    Json(req): Json<ListenRequest>,
) -> (StatusCode, Json<ListenResponse>) {
    let outcome = assistant.handle_text(&req.text).await;
    let status = reply_status(&outcome.reply);
    let body = ListenResponse::from_outcome(outcome);
    info!(request_id = %body.request_id, %status, "listen");
    (status, Json(body))
}

async fn handle_listen_voice(
    State(assistant): State<Arc<Assistant>>,
) -> (StatusCode, Json<ListenResponse>) {
    let outcome = assistant.handle_voice().await;
    let status = reply_status(&outcome.reply);
    let body = ListenResponse::from_outcome(outcome);
    info!(request_id = %body.request_id, %status, "listen-voice");
    (status, Json(body))
}

async fn handle_health(State(assistant): State<Arc<Assistant>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "listening": assistant.gate().state().to_string(),
    }))
}

async fn handle_tabs(State(assistant): State<Arc<Assistant>>) -> (StatusCode, Json<Value>) {
    match assistant.tab_context().await {
        Ok(ctx) => (
            StatusCode::OK,
            Json(json!({
                "titles": ctx.titles,
                "active_index": ctx.active_index,
            })),
        ),
        Err(e) => {
            let reply = Reply::from_error(&e);
            let code = reply.code.unwrap_or(ErrorCode::BrowserError);
            (
                status_for(code),
                Json(json!({ "error": reply.text, "code": code })),
            )
        }
    }
}
