use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use application::{
    ChatInfoDto, CreateChatRequest, FriendPresenceDto, OnlineUser, PublicChatDto,
    SendMessageRequest,
};
use domain::{ChatId, Message, UserId};

use crate::{error::ApiError, observability, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct CreateChatPayload {
    name: String,
    usernames: Vec<String>,
    #[serde(default)]
    is_public: bool,
}

#[derive(Debug, Serialize)]
struct CreateChatResponse {
    chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
struct PublicChatsQuery {
    #[serde(default)]
    search: String,
}

#[derive(Debug, Deserialize)]
struct AddMemberPayload {
    username: String,
}

#[derive(Debug, Serialize)]
struct AddMemberResponse {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    text: String,
}

#[derive(Debug, Serialize)]
struct OnlineUsersResponse {
    online_users: Vec<OnlineUser>,
    online_count: usize,
}

#[derive(Debug, Deserialize)]
struct DirectChatPayload {
    user_id: UserId,
    username: String,
}

#[derive(Debug, Serialize)]
struct DirectChatResponse {
    chat_id: ChatId,
    created: bool,
}

#[derive(Debug, Deserialize)]
struct FriendsPresencePayload {
    user_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn(observability::metrics_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chats", post(create_chat).get(my_chats))
        .route("/chats/public", get(public_chats))
        .route("/chats/{chat_id}", delete(delete_chat))
        .route("/chats/{chat_id}/join", post(join_chat))
        .route("/chats/{chat_id}/members", post(add_member))
        .route("/chats/{chat_id}/members/{user_id}", delete(remove_member))
        .route("/chats/{chat_id}/messages", post(send_message))
        .route("/chats/{chat_id}/online", get(online_users))
        .route("/chats/{chat_id}/ws", get(websocket_upgrade))
        .route("/direct-chats", post(direct_chat))
        .route("/presence/heartbeat", post(heartbeat))
        .route("/presence/friends", post(friends_presence))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<CreateChatResponse>), ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat_id = state
        .chat_service
        .create_chat(CreateChatRequest {
            creator_id: user.user_id,
            creator_username: user.username,
            name: payload.name,
            usernames: payload.usernames,
            is_public: payload.is_public,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id })))
}

async fn my_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatInfoDto>>, ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    let chats = state.chat_service.my_chats(user.user_id).await?;
    Ok(Json(chats))
}

async fn public_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PublicChatsQuery>,
) -> Result<Json<Vec<PublicChatDto>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let chats = state.chat_service.public_chats(&query.search).await?;
    Ok(Json(chats))
}

async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
) -> Result<StatusCode, ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    state.chat_service.delete_chat(chat_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
) -> Result<StatusCode, ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    state
        .chat_service
        .join_chat(chat_id, user.user_id, &user.username)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
    Json(payload): Json<AddMemberPayload>,
) -> Result<(StatusCode, Json<AddMemberResponse>), ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    let user_id = state
        .chat_service
        .add_member(chat_id, user.user_id, &payload.username)
        .await?;
    Ok((StatusCode::CREATED, Json(AddMemberResponse { user_id })))
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((chat_id, target)): Path<(ChatId, UserId)>,
) -> Result<StatusCode, ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    state
        .chat_service
        .remove_member(chat_id, user.user_id, target)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    let message = state
        .chat_service
        .send_message(SendMessageRequest {
            chat_id,
            user_id: user.user_id,
            from_username: user.username,
            text: payload.text,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let online_users = state.chat_service.online_users(chat_id).await;
    Ok(Json(OnlineUsersResponse {
        online_count: online_users.len(),
        online_users,
    }))
}

async fn direct_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DirectChatPayload>,
) -> Result<(StatusCode, Json<DirectChatResponse>), ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    let direct = state
        .chat_service
        .get_or_create_direct_chat(
            user.user_id,
            &user.username,
            payload.user_id,
            &payload.username,
        )
        .await?;

    let status = if direct.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(DirectChatResponse {
            chat_id: direct.chat_id,
            created: direct.created,
        }),
    ))
}

async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = state.jwt_service.extract_user_from_headers(&headers)?;
    state.presence_service.heartbeat(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn friends_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FriendsPresencePayload>,
) -> Result<Json<Vec<FriendPresenceDto>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let presence = state
        .presence_service
        .friends_presence(payload.user_ids)
        .await?;
    Ok(Json(presence))
}

/// 浏览器无法给 WebSocket 设置请求头，token 通过查询参数传入
async fn websocket_upgrade(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = state.jwt_service.verify_token(&query.token)?;
    ws_connection::upgrade(ws, state, user, chat_id).await
}
