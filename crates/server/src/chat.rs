//! Conversation and record endpoints.
//!
//! - `POST /chat/new`: start a session, returns its id
//! - `POST /chat/{session_id}/new`: store a message without a bot turn
//! - `POST /chat/{session_id}/bot/new`: run one bot turn
//! - `GET  /chat/get-all-messages/{session_id}`: messages, oldest first
//! - `GET  /chat/get-num-messages/{session_id}/{sender}`
//! - `POST /session/save`: write one session attribute
//! - `POST /vehicle/save`: write one vehicle attribute
//! - `GET  /session/{session_id}`: session, phase and vehicles

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use intake_agent::{AgentRuntime, SessionSnapshot};
use intake_core::{
    ApplicationError, InterfaceError, Message, Sender, Session, SessionId, Vehicle, VehicleId,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
}

impl ChatState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    pub content: String,
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    Sender::User.as_str().to_string()
}

#[derive(Debug, Deserialize)]
pub struct SessionSaveRequest {
    pub session_id: i64,
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct VehicleSaveRequest {
    pub vehicle_id: i64,
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    pub message_id: i64,
    pub session_id: i64,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.id.0,
            session_id: message.session_id.0,
            sender: message.sender,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/chat/new", post(create_chat))
        .route("/chat/{session_id}/new", post(add_message))
        .route("/chat/{session_id}/bot/new", post(add_bot_message))
        .route("/chat/get-all-messages/{session_id}", get(list_messages))
        .route("/chat/get-num-messages/{session_id}/{sender}", get(count_messages))
        .route("/session/save", post(save_session))
        .route("/session/{session_id}", get(session_snapshot))
        .route("/vehicle/save", post(save_vehicle))
        .with_state(ChatState::new(runtime))
}

async fn create_chat(State(state): State<ChatState>, headers: HeaderMap) -> ApiResult<i64> {
    let correlation_id = correlation_id(&headers);
    let session = state.runtime.create_session().await.map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(session.id.0))
}

async fn add_message(
    Path(session_id): Path<i64>,
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(request): Json<NewMessageRequest>,
) -> ApiResult<MessageResponse> {
    let correlation_id = correlation_id(&headers);
    let sender = parse_sender(&request.sender, &correlation_id)?;
    let message = state
        .runtime
        .append_message(SessionId(session_id), sender, &request.content)
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(message.into()))
}

async fn add_bot_message(
    Path(session_id): Path<i64>,
    State(state): State<ChatState>,
    headers: HeaderMap,
) -> ApiResult<MessageResponse> {
    let correlation_id = correlation_id(&headers);
    info!(
        event_name = "chat.bot_turn.requested",
        correlation_id = %correlation_id,
        session_id,
        "bot turn requested"
    );
    let message = state
        .runtime
        .generate_bot_message(SessionId(session_id), &correlation_id)
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(message.into()))
}

async fn list_messages(
    Path(session_id): Path<i64>,
    State(state): State<ChatState>,
    headers: HeaderMap,
) -> ApiResult<Vec<MessageResponse>> {
    let correlation_id = correlation_id(&headers);
    let messages = state
        .runtime
        .list_messages(SessionId(session_id))
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

async fn count_messages(
    Path((session_id, sender)): Path<(i64, String)>,
    State(state): State<ChatState>,
    headers: HeaderMap,
) -> ApiResult<i64> {
    let correlation_id = correlation_id(&headers);
    let sender = parse_sender(&sender, &correlation_id)?;
    let count = state
        .runtime
        .count_messages(SessionId(session_id), sender)
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(count))
}

async fn save_session(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(request): Json<SessionSaveRequest>,
) -> ApiResult<Session> {
    let correlation_id = correlation_id(&headers);
    let session = state
        .runtime
        .save_session_field(SessionId(request.session_id), &request.attribute, &request.value)
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(session))
}

async fn save_vehicle(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(request): Json<VehicleSaveRequest>,
) -> ApiResult<Vehicle> {
    let correlation_id = correlation_id(&headers);
    let vehicle = state
        .runtime
        .save_vehicle_field(VehicleId(request.vehicle_id), &request.attribute, &request.value)
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(vehicle))
}

async fn session_snapshot(
    Path(session_id): Path<i64>,
    State(state): State<ChatState>,
    headers: HeaderMap,
) -> ApiResult<SessionSnapshot> {
    let correlation_id = correlation_id(&headers);
    let snapshot = state
        .runtime
        .session_snapshot(SessionId(session_id))
        .await
        .map_err(|e| reject(e, &correlation_id))?;
    Ok(Json(snapshot))
}

/// Caller-supplied correlation id, or a fresh one.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn parse_sender(raw: &str, correlation_id: &str) -> Result<Sender, (StatusCode, Json<ApiError>)> {
    raw.parse::<Sender>().map_err(|e| reject(ApplicationError::from(e), correlation_id))
}

fn reject(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let (status, detail) = match &interface {
        InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message),
        InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message),
        InterfaceError::ServiceUnavailable { message, .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, message)
        }
        InterfaceError::Internal { message, .. } => (StatusCode::INTERNAL_SERVER_ERROR, message),
    };

    if status.is_server_error() {
        error!(
            event_name = "chat.request.failed",
            correlation_id,
            status = status.as_u16(),
            error = %detail,
            "request failed"
        );
    } else {
        warn!(
            event_name = "chat.request.rejected",
            correlation_id,
            status = status.as_u16(),
            error = %detail,
            "request rejected"
        );
    }

    (
        status,
        Json(ApiError {
            error: interface.user_message().to_string(),
            detail: detail.clone(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
