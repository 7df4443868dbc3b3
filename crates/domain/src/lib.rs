//! 聊天核心领域模型
//!
//! 包含对话、成员、消息、附件、回应、已读回执等实体，
//! 以及持久化层需要实现的 Repository 契约。

pub mod dialog;
pub mod errors;
pub mod message;
pub mod participant;
pub mod reaction;
pub mod read_receipt;
pub mod repository;
pub mod value_objects;

// 重新导出常用类型
pub use dialog::Dialog;
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use message::{Attachment, Message, MessageType};
pub use participant::{Participant, ParticipantRole};
pub use reaction::{Reaction, ReactionChange};
pub use read_receipt::ReadReceipt;
pub use repository::{
    DialogRepository, MessageRepository, OutgoingMessage, ParticipantRepository,
    ReactionRepository, ReadReceiptRepository,
};
pub use value_objects::{
    AttachmentId, CastingId, DialogId, Emoji, MessageContent, MessageId, Timestamp, UserId,
};

#[cfg(feature = "testing")]
pub use repository::{
    MockDialogRepository, MockMessageRepository, MockParticipantRepository,
    MockReactionRepository, MockReadReceiptRepository,
};
