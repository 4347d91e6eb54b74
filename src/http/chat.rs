use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::chat::{self, ChatContext, ChatError, MediaDescriptor};
use crate::models::chat::{ChatMessageView, CounterpartView};
use crate::state::AppState;

use super::HttpError;
use super::auth::verify_init_data;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", get(fetch_messages).post(send_message))
        .route("/unread-count", get(unread_count))
        .route("/upload-url", post(upload_url))
}

/// Verifies the caller and resolves the conversation pair. Every chat
/// operation is additionally gated by the client's subscription; a
/// lapsed tariff closes the room for both sides without leaking its
/// contents.
async fn authorize(
    state: &AppState,
    init_data: Option<&str>,
    client_id: Option<i64>,
) -> Result<ChatContext, HttpError> {
    let principal = verify_init_data(state, init_data)?;
    let tg_id = super::auth::require_tg_id(&principal)?;
    let ctx = chat::resolve_context(&state.database, tg_id, client_id).await?;
    if !ctx.chat_allowed() {
        return Err(ChatError::NotAllowed.into());
    }
    Ok(ctx)
}

async fn fetch_messages(
    Query(params): Query<FetchQuery>,
    State(state): State<AppState>,
) -> Result<Json<MessagesResponse>, HttpError> {
    let ctx = authorize(&state, params.init_data.as_deref(), params.client_id).await?;

    // markRead defaults on; the web client passes `markRead=0` for
    // background polls that must not consume receipts.
    let mark_read = params.mark_read.as_deref() != Some("0");
    let include_last = matches!(
        params.include_last.as_deref().map(str::to_ascii_lowercase),
        Some(ref v) if v == "true" || v == "1"
    );

    let messages = chat::fetch_since(
        &state.database,
        &ctx.thread,
        ctx.requester_id,
        params.after_id,
        include_last,
        mark_read,
    )
    .await?;

    let views = messages
        .iter()
        .map(|m| ChatMessageView::build(m, ctx.requester_id, &state.storage))
        .collect();

    Ok(Json(MessagesResponse {
        ok: true,
        thread_id: ctx.thread.id,
        counterpart: CounterpartView {
            id: ctx.counterpart_id(),
            name: ctx.counterpart_name(),
        },
        messages: views,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    Json(payload): Json<SendRequest>,
) -> Result<Json<SendResponse>, HttpError> {
    let ctx = authorize(&state, payload.init_data.as_deref(), payload.client_id).await?;

    let text = payload
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let media = match payload.media_key {
        Some(key) => Some(MediaDescriptor {
            key,
            mime: payload.media_type.unwrap_or_default(),
            name: payload.media_name,
            size: payload.media_size.unwrap_or(0),
        }),
        None => None,
    };

    let stored = chat::send(
        &state.database,
        &ctx.thread,
        ctx.requester_id,
        text,
        media,
        state.storage.max_upload_bytes(),
    )
    .await?;

    Ok(Json(SendResponse {
        ok: true,
        message: ChatMessageView::build(&stored, ctx.requester_id, &state.storage),
    }))
}

async fn unread_count(
    Query(params): Query<FetchQuery>,
    State(state): State<AppState>,
) -> Result<Json<UnreadResponse>, HttpError> {
    let ctx = authorize(&state, params.init_data.as_deref(), params.client_id).await?;
    let count = chat::unread_count(&state.database, ctx.thread.id, ctx.requester_id).await?;
    Ok(Json(UnreadResponse {
        ok: true,
        unread_count: count,
    }))
}

async fn upload_url(
    State(state): State<AppState>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, HttpError> {
    let ctx = authorize(&state, payload.init_data.as_deref(), payload.client_id).await?;

    let target = state.storage.request_upload(
        ctx.thread.id,
        payload.file_name.as_deref(),
        payload.content_type.as_deref().unwrap_or_default(),
        payload.size.unwrap_or(0),
    )?;

    Ok(Json(UploadResponse {
        ok: true,
        upload_url: target.upload_url,
        object_key: target.object_key,
        max_bytes: target.max_bytes,
    }))
}

#[derive(Debug, Deserialize)]
struct FetchQuery {
    #[serde(rename = "initData")]
    init_data: Option<String>,
    #[serde(rename = "clientId")]
    client_id: Option<i64>,
    #[serde(rename = "afterId")]
    after_id: Option<i64>,
    #[serde(rename = "markRead")]
    mark_read: Option<String>,
    #[serde(rename = "includeLast")]
    include_last: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(rename = "initData")]
    init_data: Option<String>,
    #[serde(rename = "clientId")]
    client_id: Option<i64>,
    text: Option<String>,
    #[serde(rename = "mediaKey")]
    media_key: Option<String>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    #[serde(rename = "mediaName")]
    media_name: Option<String>,
    #[serde(rename = "mediaSize")]
    media_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(rename = "initData")]
    init_data: Option<String>,
    #[serde(rename = "clientId")]
    client_id: Option<i64>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    ok: bool,
    #[serde(rename = "threadId")]
    thread_id: i64,
    counterpart: CounterpartView,
    messages: Vec<ChatMessageView>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    ok: bool,
    message: ChatMessageView,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    ok: bool,
    #[serde(rename = "unreadCount")]
    unread_count: u64,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    ok: bool,
    #[serde(rename = "uploadUrl")]
    upload_url: String,
    #[serde(rename = "objectKey")]
    object_key: String,
    #[serde(rename = "maxBytes")]
    max_bytes: i64,
}
