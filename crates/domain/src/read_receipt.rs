use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, Timestamp, UserId};

/// 已读回执，每个 (消息, 用户) 至多一条，首次阅读时写入。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}

impl ReadReceipt {
    pub fn new(message_id: MessageId, user_id: UserId, read_at: Timestamp) -> Self {
        Self {
            message_id,
            user_id,
            read_at,
        }
    }
}
