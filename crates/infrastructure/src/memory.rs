//! 内存存储
//!
//! 本地运行和测试使用。所有表放在同一把读写锁后面；多行写入在写锁内先完成
//! 全部校验，再一次性落表，任何一步失败都不会留下部分数据。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{
    Attachment, AttachmentId, Dialog, DialogId, DialogRepository, Message, MessageId,
    MessageRepository, OutgoingMessage, Participant, ParticipantRepository, Reaction,
    ReactionRepository, ReadReceipt, ReadReceiptRepository, RepositoryError, RepositoryResult,
    Timestamp, UserId,
};
use tokio::sync::RwLock;

/// 多行写入中可以注入故障的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    InsertDialog,
    InsertParticipants,
    InsertMessage,
    InsertAttachments,
    AdvanceLastMessage,
    InsertSenderReceipt,
}

#[derive(Debug, Default)]
struct Tables {
    dialogs: HashMap<DialogId, Dialog>,
    participants: HashMap<(DialogId, UserId), Participant>,
    // 消息本体不含附件，附件单独成表
    messages: HashMap<MessageId, Message>,
    attachments: HashMap<AttachmentId, Attachment>,
    reactions: HashMap<(MessageId, UserId), Reaction>,
    receipts: HashMap<(MessageId, UserId), ReadReceipt>,
}

impl Tables {
    fn hydrate(&self, message: &Message) -> Message {
        let mut hydrated = message.clone();
        let mut attachments: Vec<Attachment> = self
            .attachments
            .values()
            .filter(|attachment| attachment.message_id == message.id)
            .cloned()
            .collect();
        attachments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        hydrated.attachments = attachments;
        hydrated
    }

    fn is_active(&self, dialog_id: DialogId, user_id: UserId) -> bool {
        self.participants
            .get(&(dialog_id, user_id))
            .is_some_and(Participant::is_active)
    }

    fn dialog_messages(&self, dialog_id: DialogId) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self
            .messages
            .values()
            .filter(|message| message.dialog_id == dialog_id)
            .collect();
        // 新 → 旧
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages
    }
}

/// 同时实现全部仓储接口的内存存储
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    tables: Arc<RwLock<Tables>>,
    failure: Arc<Mutex<Option<FailurePoint>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让下一次经过该步骤的写入失败（只生效一次）
    pub fn fail_at(&self, point: FailurePoint) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(point);
        }
    }

    fn checkpoint(&self, point: FailurePoint) -> RepositoryResult<()> {
        let mut failure = self
            .failure
            .lock()
            .map_err(|_| RepositoryError::storage("failure injection lock poisoned"))?;
        if *failure == Some(point) {
            *failure = None;
            return Err(RepositoryError::storage(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }

    /// 在写锁内修改一个未退出的成员，已退出的记录保持不变
    async fn update_active(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        apply: impl FnOnce(&mut Participant) + Send,
    ) -> RepositoryResult<Participant> {
        let mut tables = self.tables.write().await;
        let participant = tables
            .participants
            .get_mut(&(dialog_id, user_id))
            .filter(|participant| participant.is_active())
            .ok_or(RepositoryError::NotFound)?;
        apply(participant);
        Ok(participant.clone())
    }

    pub async fn message_count(&self, dialog_id: DialogId) -> usize {
        self.tables
            .read()
            .await
            .messages
            .values()
            .filter(|message| message.dialog_id == dialog_id)
            .count()
    }

    pub async fn attachment_count(&self) -> usize {
        self.tables.read().await.attachments.len()
    }

    pub async fn receipt_count(&self, message_id: MessageId) -> usize {
        self.tables
            .read()
            .await
            .receipts
            .keys()
            .filter(|(id, _)| *id == message_id)
            .count()
    }
}

#[async_trait]
impl DialogRepository for MemoryChatStore {
    async fn create_with_participants(
        &self,
        dialog: Dialog,
        participants: Vec<Participant>,
    ) -> RepositoryResult<Dialog> {
        let mut tables = self.tables.write().await;

        self.checkpoint(FailurePoint::InsertDialog)?;
        if tables.dialogs.contains_key(&dialog.id) {
            return Err(RepositoryError::Conflict);
        }

        self.checkpoint(FailurePoint::InsertParticipants)?;
        let mut keys = HashSet::with_capacity(participants.len());
        for participant in &participants {
            if participant.dialog_id != dialog.id {
                return Err(RepositoryError::storage(
                    "participant references another dialog",
                ));
            }
            let key = (participant.dialog_id, participant.user_id);
            if tables.participants.contains_key(&key) || !keys.insert(key) {
                return Err(RepositoryError::Conflict);
            }
        }

        tables.dialogs.insert(dialog.id, dialog.clone());
        tables.participants.extend(
            participants
                .into_iter()
                .map(|participant| ((participant.dialog_id, participant.user_id), participant)),
        );
        Ok(dialog)
    }

    async fn find_by_id(&self, id: DialogId) -> RepositoryResult<Option<Dialog>> {
        Ok(self.tables.read().await.dialogs.get(&id).cloned())
    }

    async fn find_direct(
        &self,
        first: UserId,
        second: UserId,
    ) -> RepositoryResult<Option<Dialog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .dialogs
            .values()
            .filter(|dialog| !dialog.is_group)
            .filter(|dialog| tables.is_active(dialog.id, first) && tables.is_active(dialog.id, second))
            .max_by_key(|dialog| dialog.updated_at)
            .cloned())
    }
}

#[async_trait]
impl ParticipantRepository for MemoryChatStore {
    async fn find(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .get(&(dialog_id, user_id))
            .cloned())
    }

    async fn list_active(&self, dialog_id: DialogId) -> RepositoryResult<Vec<Participant>> {
        let tables = self.tables.read().await;
        let mut active: Vec<Participant> = tables
            .participants
            .values()
            .filter(|participant| participant.dialog_id == dialog_id && participant.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.user_id.cmp(&b.user_id)));
        Ok(active)
    }

    async fn set_typing_until(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        until: Option<Timestamp>,
    ) -> RepositoryResult<Participant> {
        self.update_active(dialog_id, user_id, |participant| match until {
            Some(until) => participant.start_typing(until),
            None => participant.stop_typing(),
        })
        .await
    }

    async fn touch_seen(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        self.update_active(dialog_id, user_id, |participant| participant.touch_seen(at))
            .await
    }

    async fn set_muted(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        muted: bool,
    ) -> RepositoryResult<Participant> {
        self.update_active(dialog_id, user_id, |participant| participant.is_muted = muted)
            .await
    }

    async fn mark_left(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        self.update_active(dialog_id, user_id, |participant| participant.leave(at))
            .await
    }
}

#[async_trait]
impl MessageRepository for MemoryChatStore {
    async fn persist_outgoing(&self, outgoing: OutgoingMessage) -> RepositoryResult<Message> {
        let OutgoingMessage {
            mut message,
            sender_receipt,
        } = outgoing;
        let attachments = std::mem::take(&mut message.attachments);

        let mut tables = self.tables.write().await;

        self.checkpoint(FailurePoint::InsertMessage)?;
        if !tables.dialogs.contains_key(&message.dialog_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }

        self.checkpoint(FailurePoint::InsertAttachments)?;
        let mut attachment_ids = HashSet::with_capacity(attachments.len());
        for attachment in &attachments {
            if tables.attachments.contains_key(&attachment.id) || !attachment_ids.insert(attachment.id)
            {
                return Err(RepositoryError::Conflict);
            }
        }

        self.checkpoint(FailurePoint::AdvanceLastMessage)?;
        self.checkpoint(FailurePoint::InsertSenderReceipt)?;

        // 校验全部通过，之后的写入不会再失败
        tables.messages.insert(message.id, message.clone());
        tables.attachments.extend(
            attachments
                .into_iter()
                .map(|attachment| (attachment.id, attachment)),
        );
        if let Some(dialog) = tables.dialogs.get_mut(&message.dialog_id) {
            dialog.advance_last_message(message.id, message.created_at);
        }
        tables
            .receipts
            .entry((sender_receipt.message_id, sender_receipt.user_id))
            .or_insert(sender_receipt);

        Ok(tables.hydrate(&message))
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(&id).map(|message| tables.hydrate(message)))
    }

    async fn list_recent(
        &self,
        dialog_id: DialogId,
        limit: u32,
        before: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let cursor = match before {
            Some(id) => Some(
                tables
                    .messages
                    .get(&id)
                    .map(|message| (message.created_at, message.id))
                    .ok_or(RepositoryError::NotFound)?,
            ),
            None => None,
        };

        Ok(tables
            .dialog_messages(dialog_id)
            .into_iter()
            .filter(|message| match cursor {
                Some(cursor) => (message.created_at, message.id) < cursor,
                None => true,
            })
            .take(limit as usize)
            .map(|message| tables.hydrate(message))
            .collect())
    }
}

#[async_trait]
impl ReadReceiptRepository for MemoryChatStore {
    async fn insert_if_absent(&self, receipt: ReadReceipt) -> RepositoryResult<bool> {
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&receipt.message_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (receipt.message_id, receipt.user_id);
        if tables.receipts.contains_key(&key) {
            return Ok(false);
        }
        tables.receipts.insert(key, receipt);
        Ok(true)
    }

    async fn insert_missing(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<Vec<MessageId>> {
        let mut tables = self.tables.write().await;
        let mut unread: Vec<(Timestamp, MessageId)> = tables
            .dialog_messages(dialog_id)
            .into_iter()
            .filter(|message| !tables.receipts.contains_key(&(message.id, user_id)))
            .map(|message| (message.created_at, message.id))
            .collect();
        unread.sort();

        let marked: Vec<MessageId> = unread.into_iter().map(|(_, id)| id).collect();
        for message_id in &marked {
            tables.receipts.insert(
                (*message_id, user_id),
                ReadReceipt::new(*message_id, user_id, read_at),
            );
        }
        Ok(marked)
    }

    async fn count_unread(&self, dialog_id: DialogId, user_id: UserId) -> RepositoryResult<u64> {
        let tables = self.tables.read().await;
        let unread = tables
            .dialog_messages(dialog_id)
            .into_iter()
            .filter(|message| !tables.receipts.contains_key(&(message.id, user_id)))
            .count();
        Ok(unread as u64)
    }
}

#[async_trait]
impl ReactionRepository for MemoryChatStore {
    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Reaction>> {
        Ok(self
            .tables
            .read()
            .await
            .reactions
            .get(&(message_id, user_id))
            .cloned())
    }

    async fn upsert(&self, reaction: Reaction) -> RepositoryResult<Reaction> {
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&reaction.message_id) {
            return Err(RepositoryError::NotFound);
        }
        tables
            .reactions
            .insert((reaction.message_id, reaction.user_id), reaction.clone());
        Ok(reaction)
    }

    async fn remove(&self, message_id: MessageId, user_id: UserId) -> RepositoryResult<()> {
        self.tables
            .write()
            .await
            .reactions
            .remove(&(message_id, user_id));
        Ok(())
    }
}
