//! The JSON HTTP boundary.
//!
//! Every request carries the whole visible history, so the server keeps no
//! conversation state between requests.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use toolchat_core::conversation::Conversation;
use toolchat_core::{CancellationToken, Error, Orchestrator};
use toolchat_model::{ModelMessage, Role};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

/// One entry of the posted history.
#[derive(Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: String,
    /// Text of the message.
    pub content: String,
}

/// Body of `POST /api/get_response`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// An error answered to the HTTP client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Error::BackendUnavailable { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Creates the router serving the assistant.
///
/// Turns in flight are cancelled when `shutdown` is cancelled.
pub fn router(
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) -> Router {
    let state = AppState {
        orchestrator,
        shutdown,
    };
    Router::new()
        .route("/api/get_response", post(get_response))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the assistant on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{addr}");
    }
    let app = router(orchestrator, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn get_response(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatMessage>, ApiError> {
    let Json(request) = payload?;
    let mut conversation = seed_conversation(request.messages)?;
    debug!("answering a conversation of {} messages", conversation.len());

    let cancel = state.shutdown.child_token();
    let outcome = state
        .orchestrator
        .run_turn(&mut conversation, &cancel)
        .await
        .inspect_err(|err| error!("turn failed: {err}"))?;

    Ok(Json(ChatMessage {
        role: Role::Assistant.to_string(),
        content: outcome.text,
    }))
}

fn seed_conversation(
    messages: Vec<ChatMessage>,
) -> Result<Conversation, ApiError> {
    let mut history = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role.as_str() {
            "user" => history.push(ModelMessage::User(msg.content)),
            "assistant" => history.push(ModelMessage::assistant_text(msg.content)),
            "system" => {}
            other => {
                return Err(ApiError::bad_request(format!(
                    "unsupported role: {other}"
                )));
            }
        }
    }
    if !history.iter().any(|msg| msg.role() == Role::User) {
        return Err(ApiError::bad_request("no user message to answer"));
    }
    Ok(Conversation::with_history(history))
}
