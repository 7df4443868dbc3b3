use serde::{Deserialize, Serialize};

use crate::value_objects::{Emoji, MessageId, Timestamp, UserId};

/// 表情回应：每个用户对每条消息最多一个。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: Emoji,
    pub created_at: Timestamp,
}

/// 切换回应后的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionChange {
    Added,
    /// 替换了之前不同的表情
    Replaced { previous: Emoji },
    /// 再次点击同一表情即撤销
    Removed,
}

impl ReactionChange {
    /// 根据已有回应决定本次切换的效果
    pub fn resolve(existing: Option<&Reaction>, requested: &Emoji) -> Self {
        match existing {
            None => ReactionChange::Added,
            Some(current) if &current.emoji == requested => ReactionChange::Removed,
            Some(current) => ReactionChange::Replaced {
                previous: current.emoji.clone(),
            },
        }
    }
}
