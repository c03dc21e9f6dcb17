use domain::{Chat, ChatId, PublicChat, Timestamp, UserId, UserPresence};
use serde::{Deserialize, Serialize};

/// 在线用户（来自房间内的订阅者快照）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    OnlineUsers,
}

/// 穿过房间边界、推送到订阅者投递队列的消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        from: String,
        text: String,
        created_at: Timestamp,
    },
    OnlineUsers {
        online_users: Vec<OnlineUser>,
        created_at: Timestamp,
    },
}

impl OutboundMessage {
    pub fn text(from: impl Into<String>, text: impl Into<String>, created_at: Timestamp) -> Self {
        Self::Text {
            from: from.into(),
            text: text.into(),
            created_at,
        }
    }

    pub fn online_users(online_users: Vec<OnlineUser>, created_at: Timestamp) -> Self {
        Self::OnlineUsers {
            online_users,
            created_at,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            OutboundMessage::Text { .. } => MessageKind::Text,
            OutboundMessage::OnlineUsers { .. } => MessageKind::OnlineUsers,
        }
    }

    pub fn created_at(&self) -> Timestamp {
        match self {
            OutboundMessage::Text { created_at, .. }
            | OutboundMessage::OnlineUsers { created_at, .. } => *created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfoDto {
    pub id: ChatId,
    pub name: String,
    pub is_direct: bool,
    pub usernames: Vec<String>,
    pub created_at: Timestamp,
}

impl From<&Chat> for ChatInfoDto {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id,
            name: chat.name.clone(),
            is_direct: chat.is_direct,
            usernames: chat.usernames(),
            created_at: chat.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicChatDto {
    pub id: ChatId,
    pub name: String,
    pub member_count: i64,
    pub creator_name: String,
    pub created_at: Timestamp,
}

impl From<PublicChat> for PublicChatDto {
    fn from(chat: PublicChat) -> Self {
        Self {
            id: chat.id,
            name: chat.name,
            member_count: chat.member_count,
            creator_name: chat.creator_name,
            created_at: chat.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendPresenceDto {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_at: Option<Timestamp>,
}

impl From<UserPresence> for FriendPresenceDto {
    fn from(presence: UserPresence) -> Self {
        Self {
            user_id: presence.user_id,
            is_online: presence.is_online,
            last_seen_at: presence.last_seen_at,
        }
    }
}
