//! Repository接口定义
//!
//! 聊天核心只依赖这些契约，具体存储（内存 / PostgreSQL）在基础设施层实现。
//! 需要原子性的多行写入（对话+成员、消息+附件+指针+回执）各自是一个方法，
//! 由实现方用一个事务完成。

use async_trait::async_trait;

use crate::dialog::Dialog;
use crate::errors::RepositoryResult;
use crate::message::Message;
use crate::participant::Participant;
use crate::reaction::Reaction;
use crate::read_receipt::ReadReceipt;
use crate::value_objects::{DialogId, MessageId, Timestamp, UserId};

/// 一次发送消息需要原子落库的全部内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// 消息本体，附件已挂载在 `attachments` 上
    pub message: Message,
    /// 发送者自己的已读回执
    pub sender_receipt: ReadReceipt,
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait DialogRepository: Send + Sync {
    /// 在一个事务中创建对话及其全部成员
    async fn create_with_participants(
        &self,
        dialog: Dialog,
        participants: Vec<Participant>,
    ) -> RepositoryResult<Dialog>;

    async fn find_by_id(&self, id: DialogId) -> RepositoryResult<Option<Dialog>>;

    /// 查找两个用户之间的一对一对话，双方都必须仍是成员
    async fn find_direct(&self, first: UserId, second: UserId)
        -> RepositoryResult<Option<Dialog>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn find(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>>;

    /// 当前未退出的成员，每次调用都读取最新状态
    async fn list_active(&self, dialog_id: DialogId) -> RepositoryResult<Vec<Participant>>;

    // 以下写入只改各自的列，并且只作用于未退出的成员；
    // 成员不存在或已经退出时返回 NotFound

    async fn set_typing_until(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        until: Option<Timestamp>,
    ) -> RepositoryResult<Participant>;

    async fn touch_seen(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant>;

    async fn set_muted(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        muted: bool,
    ) -> RepositoryResult<Participant>;

    /// 软退出，同时清除输入状态
    async fn mark_left(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 原子写入：消息、附件、对话最后消息指针、发送者已读回执
    async fn persist_outgoing(&self, outgoing: OutgoingMessage) -> RepositoryResult<Message>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 按时间倒序分页
    async fn list_recent(
        &self,
        dialog_id: DialogId,
        limit: u32,
        before: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ReadReceiptRepository: Send + Sync {
    /// 首次阅读时写入，已存在则不做任何事；返回是否新建
    async fn insert_if_absent(&self, receipt: ReadReceipt) -> RepositoryResult<bool>;

    /// 为对话中该用户尚未读过的全部消息写入回执，返回新标记的消息
    async fn insert_missing(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<Vec<MessageId>>;

    async fn count_unread(&self, dialog_id: DialogId, user_id: UserId) -> RepositoryResult<u64>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ReactionRepository: Send + Sync {
    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Reaction>>;

    /// 按 (消息, 用户) 唯一写入，已存在则覆盖表情
    async fn upsert(&self, reaction: Reaction) -> RepositoryResult<Reaction>;

    async fn remove(&self, message_id: MessageId, user_id: UserId) -> RepositoryResult<()>;
}
