use serde::{Deserialize, Serialize};

use crate::value_objects::{DialogId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Member,
    Admin,
    Owner,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Member => "member",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member" => Some(ParticipantRole::Member),
            "admin" => Some(ParticipantRole::Admin),
            "owner" => Some(ParticipantRole::Owner),
            _ => None,
        }
    }
}

/// 用户在对话中的成员记录，带角色与在线元数据。
///
/// `left_at` 不为空表示软退出：记录保留，但不再允许发送消息，也不再接收广播。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: Timestamp,
    pub last_seen_at: Option<Timestamp>,
    pub is_muted: bool,
    pub typing_until: Option<Timestamp>,
    pub left_at: Option<Timestamp>,
}

impl Participant {
    pub fn new(
        dialog_id: DialogId,
        user_id: UserId,
        role: ParticipantRole,
        joined_at: Timestamp,
    ) -> Self {
        Self {
            dialog_id,
            user_id,
            role,
            joined_at,
            last_seen_at: None,
            is_muted: false,
            typing_until: None,
            left_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }

    pub fn start_typing(&mut self, until: Timestamp) {
        self.typing_until = Some(until);
    }

    pub fn stop_typing(&mut self) {
        self.typing_until = None;
    }

    pub fn touch_seen(&mut self, at: Timestamp) {
        self.last_seen_at = Some(at);
    }

    pub fn leave(&mut self, at: Timestamp) {
        self.left_at = Some(at);
        self.typing_until = None;
    }
}
