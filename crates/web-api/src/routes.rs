use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use application::{
    AttachmentRef, CreateDialogOptions, ReadMarked, SendMessageRequest, ServerEvent, StoredBlob,
};
use domain::{
    CastingId, Dialog, DialogId, Message, MessageId, MessageType, Participant, UserId,
};

use crate::{auth::AuthUser, error::ApiError, state::AppState, ws_connection};

const FILE_NAME_HEADER: &str = "x-file-name";

#[derive(Debug, Deserialize)]
struct CreateDialogPayload {
    participant_ids: Vec<UserId>,
    #[serde(flatten)]
    options: CreateDialogOptions,
}

#[derive(Debug, Deserialize)]
struct DirectDialogQuery {
    casting_id: Option<CastingId>,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    #[serde(rename = "type", default = "default_message_type")]
    message_type: MessageType,
    #[serde(default)]
    content: String,
    reply_to_id: Option<MessageId>,
    forward_from_id: Option<MessageId>,
    #[serde(default)]
    attachments: Vec<AttachmentRef>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Deserialize)]
struct MutePayload {
    muted: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<MessageId>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    users: usize,
    sessions: usize,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    dialog_id: DialogId,
    unread: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_connection::websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/dialogs", post(create_dialog))
        .route("/dialogs/direct/{peer_id}", post(open_direct_dialog))
        .route(
            "/dialogs/{dialog_id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/dialogs/{dialog_id}/leave", post(leave_dialog))
        .route("/dialogs/{dialog_id}/read", post(mark_all_read))
        .route("/dialogs/{dialog_id}/mute", post(set_muted))
        .route("/dialogs/{dialog_id}/unread", get(unread_count))
        .route("/uploads", post(upload))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let snapshot = state
        .registry
        .snapshot()
        .await
        .map_err(|_| ApiError::service_unavailable("connection registry is not running"))?;

    Ok(Json(HealthResponse {
        status: "ok",
        users: snapshot.users,
        sessions: snapshot.sessions,
    }))
}

/// 新对话直接推给每个成员的全部会话
async fn notify_dialog_created(state: &AppState, dialog: &Dialog) {
    let participants = match state.chat_service.active_participants(dialog.id).await {
        Ok(participants) => participants,
        Err(err) => {
            tracing::error!(dialog_id = %dialog.id, error = %err, "无法解析新对话的成员");
            return;
        }
    };

    for user_id in participants {
        if let Err(err) = state
            .registry
            .send_to_user(user_id, ServerEvent::DialogCreated(dialog.clone()))
            .await
        {
            tracing::error!(dialog_id = %dialog.id, user_id = %user_id, error = %err, "推送新对话失败");
            return;
        }
    }
}

async fn create_dialog(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateDialogPayload>,
) -> Result<(StatusCode, Json<Dialog>), ApiError> {
    let dialog = state
        .chat_service
        .create_dialog(user_id, payload.participant_ids, payload.options)
        .await?;

    notify_dialog_created(&state, &dialog).await;
    Ok((StatusCode::CREATED, Json(dialog)))
}

async fn open_direct_dialog(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(peer_id): Path<UserId>,
    Query(query): Query<DirectDialogQuery>,
) -> Result<(StatusCode, Json<Dialog>), ApiError> {
    let (dialog, created) = state
        .chat_service
        .open_direct_dialog(user_id, peer_id, query.casting_id)
        .await?;

    if created {
        notify_dialog_created(&state, &dialog).await;
        Ok((StatusCode::CREATED, Json(dialog)))
    } else {
        Ok((StatusCode::OK, Json(dialog)))
    }
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .chat_service
        .list_messages(user_id, dialog_id, query.limit, query.before)
        .await?;

    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .chat_service
        .send_message(
            user_id,
            SendMessageRequest {
                dialog_id,
                message_type: payload.message_type,
                content: payload.content,
                reply_to_id: payload.reply_to_id,
                forward_from_id: payload.forward_from_id,
                attachments: payload.attachments,
            },
        )
        .await?;

    // 与实时通道一致：已保存的消息不因广播失败而报错
    if let Err(err) = state
        .registry
        .broadcast_to_dialog(dialog_id, ServerEvent::NewMessage(message.clone()), None)
        .await
    {
        tracing::error!(dialog_id = %dialog_id, message_id = %message.id, error = %err, "消息已保存，但广播失败");
    }

    Ok((StatusCode::CREATED, Json(message)))
}

async fn leave_dialog(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
) -> Result<StatusCode, ApiError> {
    let left = state.chat_service.leave_dialog(user_id, dialog_id).await?;

    if let Err(err) = state
        .registry
        .broadcast_to_dialog(dialog_id, ServerEvent::ParticipantLeft(left), None)
        .await
    {
        tracing::error!(dialog_id = %dialog_id, user_id = %user_id, error = %err, "广播成员退出失败");
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
) -> Result<Json<ReadMarked>, ApiError> {
    let marked = state
        .chat_service
        .mark_all_as_read(user_id, dialog_id)
        .await?;

    if !marked.is_empty() {
        if let Err(err) = state
            .registry
            .broadcast_to_dialog(dialog_id, ServerEvent::MessagesRead(marked.clone()), None)
            .await
        {
            tracing::error!(dialog_id = %dialog_id, user_id = %user_id, error = %err, "广播已读回执失败");
        }
    }

    Ok(Json(marked))
}

async fn set_muted(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
    Json(payload): Json<MutePayload>,
) -> Result<Json<Participant>, ApiError> {
    let participant = state
        .chat_service
        .set_muted(user_id, dialog_id, payload.muted)
        .await?;
    Ok(Json(participant))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(dialog_id): Path<DialogId>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let unread = state.chat_service.unread_count(user_id, dialog_id).await?;
    Ok(Json(UnreadResponse { dialog_id, unread }))
}

async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StoredBlob>), ApiError> {
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("x-file-name header is required"))?;
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");

    let blob = state
        .blob_storage
        .put(user_id, file_name, mime_type, body.to_vec())
        .await?;

    tracing::info!(user_id = %user_id, url = %blob.url, size = blob.size, "附件已上传");
    Ok((StatusCode::CREATED, Json(blob)))
}
