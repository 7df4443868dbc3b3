use serde::{Deserialize, Serialize};

use crate::value_objects::{CastingId, DialogId, MessageId, Timestamp};

/// 对话（一对一或群组）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: DialogId,
    pub is_group: bool,
    pub title: Option<String>,
    pub image_url: Option<String>,
    /// 对话源自的试镜
    pub casting_id: Option<CastingId>,
    pub last_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Dialog {
    pub fn new_direct(id: DialogId, casting_id: Option<CastingId>, now: Timestamp) -> Self {
        Self {
            id,
            is_group: false,
            title: None,
            image_url: None,
            casting_id,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_group(
        id: DialogId,
        title: Option<String>,
        image_url: Option<String>,
        casting_id: Option<CastingId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            is_group: true,
            title,
            image_url,
            casting_id,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 推进最后一条消息指针；`updated_at` 只增不减
    pub fn advance_last_message(&mut self, message_id: MessageId, at: Timestamp) {
        self.last_message_id = Some(message_id);
        self.updated_at = self.updated_at.max(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn late_commit_does_not_move_updated_at_backwards() {
        let now = Utc::now();
        let mut dialog = Dialog::new_direct(DialogId::generate(), None, now);

        let newer = MessageId::generate();
        dialog.advance_last_message(newer, now + Duration::seconds(10));
        let older = MessageId::generate();
        dialog.advance_last_message(older, now + Duration::seconds(5));

        assert_eq!(dialog.last_message_id, Some(older));
        assert_eq!(dialog.updated_at, now + Duration::seconds(10));
    }
}
