use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Attachment, AttachmentId, CastingId, Dialog, DialogId, DialogRepository, DomainError, Emoji,
    Message, MessageContent, MessageId, MessageRepository, MessageType, OutgoingMessage,
    Participant, ParticipantRepository, ParticipantRole, Reaction, ReactionChange,
    ReactionRepository, ReadReceipt, ReadReceiptRepository, RepositoryError, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock, error::ApplicationError, registry::ParticipantDirectory, storage::BlobStorage,
};

/// 单条消息允许携带的附件数量上限
pub const MAX_ATTACHMENTS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateDialogOptions {
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub casting_id: Option<CastingId>,
}

/// 对已上传文件的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    /// 不填时使用存储中记录的文件名
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    pub dialog_id: DialogId,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub forward_from_id: Option<MessageId>,
    pub attachments: Vec<AttachmentRef>,
}

impl SendMessageRequest {
    pub fn text(dialog_id: DialogId, content: impl Into<String>) -> Self {
        Self {
            dialog_id,
            message_type: MessageType::Text,
            content: content.into(),
            reply_to_id: None,
            forward_from_id: None,
            attachments: Vec::new(),
        }
    }
}

/// 标记已读的结果，`message_ids` 只包含本次新写入回执的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMarked {
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub message_ids: Vec<MessageId>,
    pub read_at: Timestamp,
}

impl ReadMarked {
    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUpdate {
    pub user_id: UserId,
    pub dialog_id: DialogId,
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionUpdate {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub emoji: Emoji,
    pub change: ReactionChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLeft {
    pub dialog_id: DialogId,
    pub user_id: UserId,
}

/// 业务参数，来自配置文件的 `chat` 段
#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    pub typing_ttl: chrono::Duration,
    pub history_page_limit: u32,
}

impl From<&config::ChatConfig> for ChatSettings {
    fn from(value: &config::ChatConfig) -> Self {
        let ttl_secs = i64::try_from(value.typing_ttl_secs).unwrap_or(i64::MAX);
        Self {
            typing_ttl: chrono::Duration::try_seconds(ttl_secs)
                .unwrap_or_else(|| chrono::Duration::seconds(5)),
            history_page_limit: value.history_page_limit,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&config::ChatConfig::default())
    }
}

pub struct ChatServiceDependencies {
    pub dialog_repository: Arc<dyn DialogRepository>,
    pub participant_repository: Arc<dyn ParticipantRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub receipt_repository: Arc<dyn ReadReceiptRepository>,
    pub reaction_repository: Arc<dyn ReactionRepository>,
    pub blob_storage: Arc<dyn BlobStorage>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 聊天领域服务
///
/// 唯一允许修改聊天持久化状态的组件。所有成员与存在性检查都在写入之前完成，
/// 失败时返回带分类的错误，由调用方（读循环或 HTTP 处理器）决定如何呈现。
/// 成员写入只作用于未退出的记录；读取之后、写入之前被并发退出时按无权限处理
fn membership_lost(action: &'static str) -> impl FnOnce(RepositoryError) -> ApplicationError {
    move |err| match err {
        RepositoryError::NotFound => DomainError::access_denied(action).into(),
        other => other.into(),
    }
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn settings(&self) -> ChatSettings {
        self.deps.settings
    }

    // 对话存在性 → 成员资格，顺序固定
    async fn require_active(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        action: &str,
    ) -> Result<(Dialog, Participant), ApplicationError> {
        let dialog = self
            .deps
            .dialog_repository
            .find_by_id(dialog_id)
            .await?
            .ok_or(DomainError::DialogNotFound)?;

        let participant = self
            .deps
            .participant_repository
            .find(dialog_id, user_id)
            .await?
            .filter(Participant::is_active)
            .ok_or_else(|| DomainError::access_denied(action))?;

        Ok((dialog, participant))
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound.into())
    }

    pub async fn create_dialog(
        &self,
        creator_id: UserId,
        participant_ids: Vec<UserId>,
        options: CreateDialogOptions,
    ) -> Result<Dialog, ApplicationError> {
        let others: BTreeSet<UserId> = participant_ids
            .into_iter()
            .filter(|id| *id != creator_id)
            .collect();
        if others.is_empty() {
            return Err(DomainError::invalid_argument(
                "participant_ids",
                "at least one other participant is required",
            )
            .into());
        }

        let now = self.deps.clock.now();
        let dialog_id = DialogId::generate();
        let dialog = if options.is_group || others.len() > 1 {
            Dialog::new_group(
                dialog_id,
                options.title,
                options.image_url,
                options.casting_id,
                now,
            )
        } else {
            Dialog::new_direct(dialog_id, options.casting_id, now)
        };

        let mut participants = Vec::with_capacity(others.len() + 1);
        participants.push(Participant::new(
            dialog_id,
            creator_id,
            ParticipantRole::Admin,
            now,
        ));
        participants.extend(
            others
                .into_iter()
                .map(|user_id| Participant::new(dialog_id, user_id, ParticipantRole::Member, now)),
        );

        let created = self
            .deps
            .dialog_repository
            .create_with_participants(dialog, participants)
            .await?;

        tracing::info!(
            dialog_id = %created.id,
            creator_id = %creator_id,
            is_group = created.is_group,
            "对话已创建"
        );
        Ok(created)
    }

    /// 返回两人之间已有的一对一对话，不存在则创建；第二个返回值表示是否新建
    pub async fn open_direct_dialog(
        &self,
        user_id: UserId,
        peer_id: UserId,
        casting_id: Option<CastingId>,
    ) -> Result<(Dialog, bool), ApplicationError> {
        if user_id == peer_id {
            return Err(
                DomainError::invalid_argument("peer_id", "cannot open a dialog with yourself")
                    .into(),
            );
        }

        if let Some(existing) = self
            .deps
            .dialog_repository
            .find_direct(user_id, peer_id)
            .await?
        {
            return Ok((existing, false));
        }

        let options = CreateDialogOptions {
            casting_id,
            ..CreateDialogOptions::default()
        };
        let dialog = self.create_dialog(user_id, vec![peer_id], options).await?;
        Ok((dialog, true))
    }

    pub async fn send_message(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let (dialog, _) = self
            .require_active(request.dialog_id, sender_id, "send_message")
            .await?;

        if request.message_type == MessageType::System {
            return Err(DomainError::invalid_argument(
                "type",
                "system messages are generated by the server",
            )
            .into());
        }
        if request.attachments.len() > MAX_ATTACHMENTS {
            return Err(DomainError::invalid_argument("attachments", "too many attachments").into());
        }
        let content = MessageContent::new(request.content)?;

        if let Some(reply_to_id) = request.reply_to_id {
            let target = self.find_message(reply_to_id).await?;
            if target.dialog_id != dialog.id {
                return Err(DomainError::invalid_argument(
                    "reply_to_id",
                    "message belongs to another dialog",
                )
                .into());
            }
        }

        if let Some(forward_from_id) = request.forward_from_id {
            let source = self.find_message(forward_from_id).await?;
            // 只能转发自己仍能看到的消息
            self.require_active(source.dialog_id, sender_id, "forward_message")
                .await?;
        }

        let now = self.deps.clock.now();
        let mut message = Message::new(
            MessageId::generate(),
            dialog.id,
            sender_id,
            request.message_type,
            content,
            request.reply_to_id,
            request.forward_from_id,
            now,
        );

        for reference in request.attachments {
            let blob = self
                .deps
                .blob_storage
                .stat(&reference.url)
                .await?
                .ok_or_else(|| DomainError::attachment_not_found(&reference.url))?;

            message.attach(Attachment {
                id: AttachmentId::generate(),
                message_id: message.id,
                uploader_id: sender_id,
                file_name: reference.file_name.unwrap_or(blob.file_name),
                mime_type: blob.mime_type,
                size: blob.size,
                url: blob.url,
                created_at: now,
            })?;
        }
        message.ensure_not_empty()?;

        let sender_receipt = ReadReceipt::new(message.id, sender_id, now);
        let stored = self
            .deps
            .message_repository
            .persist_outgoing(OutgoingMessage {
                message,
                sender_receipt,
            })
            .await?;

        tracing::debug!(
            dialog_id = %stored.dialog_id,
            message_id = %stored.id,
            sender_id = %sender_id,
            attachments = stored.attachments.len(),
            "消息已保存"
        );
        Ok(stored)
    }

    /// 标记单条消息已读，重复标记不产生新回执
    pub async fn mark_as_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<ReadMarked, ApplicationError> {
        let message = self.find_message(message_id).await?;
        self.require_active(message.dialog_id, user_id, "mark_as_read")
            .await?;

        let now = self.deps.clock.now();
        let created = self
            .deps
            .receipt_repository
            .insert_if_absent(ReadReceipt::new(message_id, user_id, now))
            .await?;

        Ok(ReadMarked {
            dialog_id: message.dialog_id,
            user_id,
            message_ids: if created { vec![message_id] } else { Vec::new() },
            read_at: now,
        })
    }

    /// 标记对话中全部消息已读，同时刷新 `last_seen_at`
    pub async fn mark_all_as_read(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
    ) -> Result<ReadMarked, ApplicationError> {
        self.require_active(dialog_id, user_id, "mark_as_read")
            .await?;

        let now = self.deps.clock.now();
        self.deps
            .participant_repository
            .touch_seen(dialog_id, user_id, now)
            .await
            .map_err(membership_lost("mark_as_read"))?;
        let message_ids = self
            .deps
            .receipt_repository
            .insert_missing(dialog_id, user_id, now)
            .await?;

        Ok(ReadMarked {
            dialog_id,
            user_id,
            message_ids,
            read_at: now,
        })
    }

    pub async fn set_typing(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
        typing: bool,
    ) -> Result<TypingUpdate, ApplicationError> {
        self.require_active(dialog_id, user_id, "typing").await?;

        let until = typing.then(|| self.deps.clock.now() + self.deps.settings.typing_ttl);
        self.deps
            .participant_repository
            .set_typing_until(dialog_id, user_id, until)
            .await
            .map_err(membership_lost("typing"))?;

        Ok(TypingUpdate {
            user_id,
            dialog_id,
            typing,
        })
    }

    pub async fn leave_dialog(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
    ) -> Result<ParticipantLeft, ApplicationError> {
        self.require_active(dialog_id, user_id, "leave_dialog")
            .await?;

        self.deps
            .participant_repository
            .mark_left(dialog_id, user_id, self.deps.clock.now())
            .await
            .map_err(membership_lost("leave_dialog"))?;

        tracing::info!(dialog_id = %dialog_id, user_id = %user_id, "成员已退出对话");
        Ok(ParticipantLeft { dialog_id, user_id })
    }

    pub async fn set_muted(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
        muted: bool,
    ) -> Result<Participant, ApplicationError> {
        self.require_active(dialog_id, user_id, "mute").await?;
        self.deps
            .participant_repository
            .set_muted(dialog_id, user_id, muted)
            .await
            .map_err(membership_lost("mute"))
    }

    /// 同一表情再次点击即撤销，不同表情则替换
    pub async fn toggle_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ReactionUpdate, ApplicationError> {
        let emoji = Emoji::parse(emoji)?;
        let message = self.find_message(message_id).await?;
        self.require_active(message.dialog_id, user_id, "add_reaction")
            .await?;

        let existing = self
            .deps
            .reaction_repository
            .find(message_id, user_id)
            .await?;
        let change = ReactionChange::resolve(existing.as_ref(), &emoji);

        match change {
            ReactionChange::Removed => {
                self.deps
                    .reaction_repository
                    .remove(message_id, user_id)
                    .await?;
            }
            ReactionChange::Added | ReactionChange::Replaced { .. } => {
                self.deps
                    .reaction_repository
                    .upsert(Reaction {
                        message_id,
                        user_id,
                        emoji: emoji.clone(),
                        created_at: self.deps.clock.now(),
                    })
                    .await?;
            }
        }

        Ok(ReactionUpdate {
            message_id,
            dialog_id: message.dialog_id,
            user_id,
            emoji,
            change,
        })
    }

    /// 历史消息分页，按时间倒序
    pub async fn list_messages(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.require_active(dialog_id, user_id, "list_messages")
            .await?;

        let max = self.deps.settings.history_page_limit;
        let limit = limit.unwrap_or(max).clamp(1, max);

        Ok(self
            .deps
            .message_repository
            .list_recent(dialog_id, limit, before)
            .await?)
    }

    pub async fn unread_count(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
    ) -> Result<u64, ApplicationError> {
        self.require_active(dialog_id, user_id, "unread_count")
            .await?;
        Ok(self
            .deps
            .receipt_repository
            .count_unread(dialog_id, user_id)
            .await?)
    }

    /// 对话当前未退出的成员，每次都从存储读取
    pub async fn active_participants(
        &self,
        dialog_id: DialogId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let participants = self
            .deps
            .participant_repository
            .list_active(dialog_id)
            .await?;
        Ok(participants
            .into_iter()
            .map(|participant| participant.user_id)
            .collect())
    }
}

#[async_trait]
impl ParticipantDirectory for ChatService {
    async fn active_participants(
        &self,
        dialog_id: DialogId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        ChatService::active_participants(self, dialog_id).await
    }
}
