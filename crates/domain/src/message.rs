use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AttachmentId, DialogId, MessageContent, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
    /// 系统消息只能由服务端生成
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "video" => Some(MessageType::Video),
            "file" => Some(MessageType::File),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

/// 消息附件，与所属消息在同一事务中创建。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub uploader_id: UserId,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub dialog_id: DialogId,
    pub sender_id: UserId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reply_to_id: Option<MessageId>,
    pub forward_from_id: Option<MessageId>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MessageId,
        dialog_id: DialogId,
        sender_id: UserId,
        message_type: MessageType,
        content: MessageContent,
        reply_to_id: Option<MessageId>,
        forward_from_id: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            dialog_id,
            sender_id,
            message_type,
            content,
            reply_to_id,
            forward_from_id,
            created_at,
            attachments: Vec::new(),
        }
    }

    /// 挂载附件，附件的 message_id 必须指向本消息
    pub fn attach(&mut self, attachment: Attachment) -> Result<(), DomainError> {
        if attachment.message_id != self.id {
            return Err(DomainError::invalid_argument(
                "attachments",
                "attachment belongs to another message",
            ));
        }
        self.attachments.push(attachment);
        Ok(())
    }

    /// 正文为空且没有附件的消息没有意义
    pub fn ensure_not_empty(&self) -> Result<(), DomainError> {
        if self.content.is_blank() && self.attachments.is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        Ok(())
    }
}
