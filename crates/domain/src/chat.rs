use serde::{Deserialize, Serialize};

use crate::value_objects::{ChatId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(MemberRole::Owner),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
    pub role: MemberRole,
}

/// 持久化的聊天（群聊或私聊）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub is_direct: bool,
    pub is_public: bool,
    pub creator_id: UserId,
    pub members: Vec<ChatMember>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Chat {
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_creator(&self, user_id: UserId) -> bool {
        self.creator_id == user_id
    }

    pub fn usernames(&self) -> Vec<String> {
        self.members.iter().map(|m| m.username.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMember {
    pub user_id: UserId,
    pub username: String,
    pub role: MemberRole,
}

/// 创建聊天时写入仓储的数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub name: String,
    pub is_direct: bool,
    pub is_public: bool,
    pub creator_id: UserId,
    pub members: Vec<NewChatMember>,
}

/// 公开聊天列表项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicChat {
    pub id: ChatId,
    pub name: String,
    pub member_count: i64,
    pub creator_name: String,
    pub created_at: Timestamp,
}
