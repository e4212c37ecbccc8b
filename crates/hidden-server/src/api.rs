use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use hidden_chat::{search_conversations, ChatError, ChatOrchestrator};
use hidden_shared::{ChatId, Conversation, Message, MessageId, PaymentType, User, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Header carrying the identity-provider subject id of the caller.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatOrchestrator,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/users", get(list_users))
        .route("/users/me", put(update_profile))
        .route("/users/me/presence", post(ping_presence))
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/stream", get(stream_chats))
        .route("/chats/:id", delete(delete_chat))
        .route("/chats/:id/messages", get(list_messages).post(send_message))
        .route("/chats/:id/messages/stream", get(stream_messages))
        .route("/chats/:id/offers", post(send_offer))
        .route("/chats/:id/offers/:message_id", post(respond_to_offer));

    let router = if state.config.cors_permissive {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    };

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// The caller, as named by the `x-user-id` header.
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ServerError::Unauthenticated)?;
        Ok(CurrentUser(UserId::from(id)))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    #[serde(flatten)]
    user: User,
    is_online: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRequest {
    display_name: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    participants: Vec<UserId>,
    annonce_id: Option<String>,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Deserialize)]
struct SendTextRequest {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendOfferRequest {
    amount: f64,
    payment_type: PaymentType,
}

#[derive(Deserialize)]
struct OfferAnswer {
    accept: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<User>, ServerError> {
    let directory = state.chat.directory();
    directory
        .upsert_profile(&user, req.display_name.as_deref(), req.avatar.as_deref())
        .await?;
    let profile = directory
        .get(&user)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user {user}")))?;
    Ok(Json(profile))
}

/// Presence ping: refresh the caller's `lastSeen`.
async fn ping_presence(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, ServerError> {
    state.chat.directory().touch(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<UserView>>, ServerError> {
    let directory = state.chat.directory();
    let now = Utc::now();
    let window = state.chat.settings().online_window;
    let users = directory
        .snapshot()
        .await?
        .into_iter()
        .map(|user| UserView {
            is_online: user.is_online_at(now, window),
            user,
        })
        .collect();
    Ok(Json(users))
}

async fn list_chats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Conversation>>, ServerError> {
    let mut feed = state.chat.conversations_for(&user);
    let conversations = feed.next().await.transpose()?.unwrap_or_default();

    let Some(term) = params.q.filter(|q| !q.trim().is_empty()) else {
        return Ok(Json(conversations));
    };
    let users = state.chat.directory().snapshot().await?;
    let matches = search_conversations(&conversations, &users, &user, &term)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(matches))
}

async fn stream_chats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(user = %user, "Conversation stream opened");
    let stream = state
        .chat
        .conversations_for(&user)
        .into_stream()
        .map(|item| Ok(to_event("conversations", item)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn create_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ServerError> {
    let chat_id = state
        .chat
        .create_conversation(&user, &req.participants, req.annonce_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id: chat_id.to_string(),
        }),
    ))
}

async fn delete_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.chat.soft_delete(&ChatId(chat_id), &user).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let mut session = state.chat.open(&user, &ChatId(chat_id)).await?;
    let messages = match session.next_messages().await {
        Some(item) => item?.to_vec(),
        None => Vec::new(),
    };
    Ok(Json(messages))
}

async fn stream_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let session = state.chat.open(&user, &ChatId(chat_id)).await?;
    info!(user = %user, chat = %session.chat_id(), "Message stream opened");

    let stream = futures::stream::unfold(session, |mut session| async move {
        let item = session.next_messages().await?.map(|m| m.to_vec());
        Some((Ok(to_event("messages", item)), session))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ServerError> {
    let session = state.chat.open(&user, &ChatId(chat_id)).await?;
    let id = session.send_text(&req.text).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.to_string() })))
}

async fn send_offer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<SendOfferRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ServerError> {
    let session = state.chat.open(&user, &ChatId(chat_id)).await?;
    let id = session.send_offer(req.amount, req.payment_type).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.to_string() })))
}

async fn respond_to_offer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(answer): Json<OfferAnswer>,
) -> Result<Json<Message>, ServerError> {
    let chat_id = ChatId(chat_id);
    let message_id = MessageId(message_id);
    let session = state.chat.open(&user, &chat_id).await?;
    session.respond_to_offer(&message_id, answer.accept).await?;
    let message = state.chat.messages().get(&chat_id, &message_id).await?;
    Ok(Json(message))
}

/// One SSE frame: the full list as JSON, or the failure as an `error` event.
fn to_event<T: Serialize>(name: &str, item: Result<T, ChatError>) -> Event {
    match item {
        Ok(value) => match Event::default().event(name).json_data(value) {
            Ok(event) => event,
            Err(e) => Event::default().event("error").data(e.to_string()),
        },
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
