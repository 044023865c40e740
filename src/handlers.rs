//! HTTP and WebSocket handlers for the Courier server

use crate::error::{ChatError, ChatResult};
use crate::models::{
    AuthRequest, AuthResponse, ClientEvent, ConversationDetailResponse, ConversationsQuery,
    ConversationsResponse, HealthResponse, NotificationsQuery, NotificationsResponse,
    RegisterRequest, RegisterResponse,
};
use crate::rooms::{conversation_room, user_room};
use crate::state::SharedState;
use crate::validation::{clamp_limit, clamp_page};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Build the application router. Shared by the binary and the tests.
pub fn router(state: SharedState) -> Router {
    Router::new()
        // REST endpoints
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/auth", post(auth_handler))
        // Conversation endpoints
        .route("/messages", get(list_conversations_handler))
        .route("/messages/:id", get(get_conversation_handler))
        // Notification endpoints
        .route("/notifications", get(list_notifications_handler))
        .route("/notifications/read", post(mark_all_notifications_read_handler))
        .route("/notifications/:id/read", post(mark_notification_read_handler))
        .route("/notifications/:id", delete(delete_notification_handler))
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Add shared state
        .with_state(state)
        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_methods(Any)
                        .allow_headers(Any)
                        .allow_origin(Any),
                ),
        )
}

/// Health check endpoint
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime(),
    })
}

/// User registration endpoint
pub async fn register_handler(
    State(state): State<SharedState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ChatError> {
    let (user, token) = state.register_user(request.display_name).await?;
    info!("Registered user {}", user.id);
    Ok(Json(RegisterResponse { user, token }))
}

/// Credential check endpoint
pub async fn auth_handler(
    State(state): State<SharedState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ChatError> {
    let user = state.authenticate(&request.token).await?;
    Ok(Json(AuthResponse { user }))
}

// ── Conversation endpoints ──

/// List the requester's conversations with previews and unread counts
pub async fn list_conversations_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<ConversationsQuery>,
) -> Result<Json<ConversationsResponse>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    let page = clamp_page(query.page);
    let limit = clamp_limit(query.limit);
    let keyword = query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty());

    let (total, conversations) = state.list_conversations(user_id, keyword, page, limit).await?;
    Ok(Json(ConversationsResponse { total, page, limit, conversations }))
}

/// Fetch a conversation's full history, marking incoming messages read
pub async fn get_conversation_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationDetailResponse>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    let (conversation, messages) = state.conversation_history(user_id, conversation_id).await?;
    Ok(Json(ConversationDetailResponse { conversation, messages }))
}

// ── Notification endpoints ──

/// List the requester's notifications, newest first
pub async fn list_notifications_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<NotificationsResponse>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    let page = clamp_page(query.page);
    let limit = clamp_limit(query.limit);
    let (total, unread, notifications) = state.list_notifications(user_id, page, limit).await?;
    Ok(Json(NotificationsResponse { total, unread, page, limit, notifications }))
}

/// Mark all of the requester's notifications read
pub async fn mark_all_notifications_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    let updated = state.mark_all_notifications_read(user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// Mark a single notification read
pub async fn mark_notification_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    let notification = state.mark_notification_read(user_id, notification_id).await?;
    Ok(Json(json!({ "status": "read", "notification": notification })))
}

/// Delete a single notification
pub async fn delete_notification_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user_id = extract_user(&state, &headers).await?;
    state.delete_notification(user_id, notification_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// Helper to resolve the requester from the `Authorization: Bearer` header
async fn extract_user(state: &SharedState, headers: &HeaderMap) -> ChatResult<Uuid> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ChatError::Unauthenticated)?;
    state
        .resolve_identity(token)
        .await
        .ok_or(ChatError::Unauthenticated)
}

// ── WebSocket ──

/// WebSocket upgrade handler. The credential is checked before the upgrade
/// completes, so an unauthenticated client is refused with a plain 401.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<SharedState>,
) -> Response {
    let user_id = match params.get("token") {
        Some(token) => match state.resolve_identity(token).await {
            Some(user_id) => user_id,
            None => return ChatError::Unauthenticated.into_response(),
        },
        None => return ChatError::Unauthenticated.into_response(),
    };

    info!("WebSocket connection established for user {}", user_id);
    ws.on_upgrade(move |socket| connection_loop(socket, user_id, state))
}

async fn connection_loop(socket: WebSocket, user_id: Uuid, state: SharedState) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut outbound = state.rooms.register(connection_id).await;

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(incoming) = receiver.next().await {
        match incoming {
            Ok(Message::Text(raw)) => {
                // Events are handled inline, so a send issued just before a
                // disconnect still runs to completion.
                if let Err(err) = handle_client_event(&raw, connection_id, user_id, &state).await {
                    debug!("Rejected event from user {}: {}", user_id, err);
                    state
                        .rooms
                        .send_to_connection(connection_id, "error", json!({ "error": err.to_string() }))
                        .await;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed for user {}", user_id);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!("WebSocket error for user {}: {}", user_id, err);
                break;
            }
        }
    }

    state.rooms.disconnect(connection_id).await;
    writer_task.abort();
    info!("WebSocket handler terminated for user {}", user_id);
}

async fn handle_client_event(
    raw: &str,
    connection_id: Uuid,
    user_id: Uuid,
    state: &SharedState,
) -> ChatResult<()> {
    let event: ClientEvent =
        serde_json::from_str(raw).map_err(|err| ChatError::InvalidEvent(err.to_string()))?;

    match event {
        ClientEvent::Join { conversation_id } => {
            // Every join subscribes the personal room; a conversation room
            // needs an existence and membership check first.
            state.rooms.join(&user_room(user_id), connection_id).await;

            let mut joined = vec![user_room(user_id)];
            if let Some(conversation_id) = conversation_id {
                let conversation = state
                    .db
                    .get_conversation(conversation_id)
                    .await?
                    .ok_or(ChatError::ConversationNotFound)?;
                if !conversation.is_participant(user_id) {
                    return Err(ChatError::NotParticipant);
                }
                state
                    .rooms
                    .join(&conversation_room(conversation_id), connection_id)
                    .await;
                joined.push(conversation_room(conversation_id));
            }

            debug!("User {} joined rooms {:?}", user_id, joined);
            state
                .rooms
                .send_to_connection(connection_id, "joined", json!({ "rooms": joined }))
                .await;
        }

        ClientEvent::Leave { conversation_id } => {
            state
                .rooms
                .leave(&conversation_room(conversation_id), connection_id)
                .await;
            state
                .rooms
                .send_to_connection(connection_id, "left", json!({ "conversation_id": conversation_id }))
                .await;
        }

        ClientEvent::Send { receiver_id, text, conversation_id } => {
            let message = state
                .send_message(user_id, receiver_id, &text, conversation_id)
                .await?;
            info!("User {} sent message {} to {}", user_id, message.id, receiver_id);
            state
                .rooms
                .send_to_connection(connection_id, "ack", json!({ "status": "sent", "message": message }))
                .await;
        }
    }

    Ok(())
}
