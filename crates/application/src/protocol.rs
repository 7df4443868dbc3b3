//! 实时连接的线协议
//!
//! 所有帧都是 JSON 文本：`{ "action": "<name>", "data": <payload> }`。
//! 入站动作解码为 [`ClientAction`]，出站事件为 [`ServerEvent`]；
//! 错误帧 `{ "error": "<code>" }` 只回给出错的会话。

use domain::{Dialog, DialogId, Message, MessageId, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ApplicationError, ErrorKind};
use crate::services::{
    AttachmentRef, ParticipantLeft, ReactionUpdate, ReadMarked, SendMessageRequest, TypingUpdate,
};

/// 客户端动作
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    SendMessage(SendMessagePayload),
    TypingStart(DialogRef),
    TypingStop(DialogRef),
    MarkAsRead(ReadTarget),
    AddReaction(AddReactionPayload),
    Ping,
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::SendMessage(_) => "send_message",
            ClientAction::TypingStart(_) => "typing_start",
            ClientAction::TypingStop(_) => "typing_stop",
            ClientAction::MarkAsRead(_) => "mark_as_read",
            ClientAction::AddReaction(_) => "add_reaction",
            ClientAction::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessagePayload {
    pub dialog_id: DialogId,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub forward_from_id: Option<MessageId>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

impl From<SendMessagePayload> for SendMessageRequest {
    fn from(payload: SendMessagePayload) -> Self {
        SendMessageRequest {
            dialog_id: payload.dialog_id,
            message_type: payload.message_type,
            content: payload.content,
            reply_to_id: payload.reply_to_id,
            forward_from_id: payload.forward_from_id,
            attachments: payload.attachments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DialogRef {
    pub dialog_id: DialogId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct MarkAsReadPayload {
    #[serde(default)]
    dialog_id: Option<DialogId>,
    #[serde(default)]
    message_id: Option<MessageId>,
}

/// `mark_as_read` 既可以标记整个对话，也可以只标记一条消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    Dialog(DialogId),
    Message(MessageId),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddReactionPayload {
    pub message_id: MessageId,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    action: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl DecodeError {
    pub fn to_frame(&self) -> ErrorFrame {
        match self {
            DecodeError::InvalidPayload(_) => ErrorFrame::new(ErrorCode::InvalidPayload),
            DecodeError::UnknownAction(_) => ErrorFrame::new(ErrorCode::UnknownAction),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|err| DecodeError::InvalidPayload(err.to_string()))
}

/// 解码一帧入站文本
pub fn decode(text: &str) -> Result<ClientAction, DecodeError> {
    let envelope: RawEnvelope =
        serde_json::from_str(text).map_err(|err| DecodeError::InvalidPayload(err.to_string()))?;

    let action = match envelope.action.as_str() {
        "send_message" => ClientAction::SendMessage(payload(envelope.data)?),
        "typing_start" => ClientAction::TypingStart(payload(envelope.data)?),
        "typing_stop" => ClientAction::TypingStop(payload(envelope.data)?),
        "mark_as_read" => {
            let request: MarkAsReadPayload = payload(envelope.data)?;
            // 同时给出时以单条消息为准
            match (request.message_id, request.dialog_id) {
                (Some(message_id), _) => ClientAction::MarkAsRead(ReadTarget::Message(message_id)),
                (None, Some(dialog_id)) => ClientAction::MarkAsRead(ReadTarget::Dialog(dialog_id)),
                (None, None) => {
                    return Err(DecodeError::InvalidPayload(
                        "dialog_id or message_id is required".to_string(),
                    ))
                }
            }
        }
        "add_reaction" => ClientAction::AddReaction(payload(envelope.data)?),
        "ping" => ClientAction::Ping,
        _ => return Err(DecodeError::UnknownAction(envelope.action)),
    };

    Ok(action)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// 服务端推送的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Message),
    UserTyping(TypingUpdate),
    MessagesRead(ReadMarked),
    ReactionUpdated(ReactionUpdate),
    DialogCreated(Dialog),
    ParticipantLeft(ParticipantLeft),
    Pong(Empty),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPayload,
    FailedToSend,
    UnknownAction,
    AccessDenied,
    NotFound,
    InvalidArgument,
    InternalError,
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidArgument => ErrorCode::InvalidArgument,
            ErrorKind::AccessDenied => ErrorCode::AccessDenied,
            ErrorKind::NotFound => ErrorCode::NotFound,
            ErrorKind::Internal => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ErrorFrame {
    pub fn new(error: ErrorCode) -> Self {
        Self {
            error,
            reason: None,
        }
    }

    /// 发送消息失败统一报告为 `failed_to_send`，具体分类放在 reason 里
    pub fn failed_to_send(err: &ApplicationError) -> Self {
        Self {
            error: ErrorCode::FailedToSend,
            reason: Some(reason_for(err)),
        }
    }

    pub fn from_error(err: &ApplicationError) -> Self {
        Self {
            error: ErrorCode::from(err.kind()),
            reason: Some(reason_for(err)),
        }
    }
}

fn reason_for(err: &ApplicationError) -> String {
    match err.kind() {
        // 内部错误的细节只进日志
        ErrorKind::Internal => "internal_error".to_string(),
        ErrorKind::InvalidArgument | ErrorKind::AccessDenied | ErrorKind::NotFound => {
            err.to_string()
        }
    }
}

/// 写入出站队列的一帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Error(ErrorFrame),
}

impl From<ServerEvent> for OutboundFrame {
    fn from(event: ServerEvent) -> Self {
        OutboundFrame::Event(event)
    }
}

impl From<ErrorFrame> for OutboundFrame {
    fn from(frame: ErrorFrame) -> Self {
        OutboundFrame::Error(frame)
    }
}
