use serde::{Deserialize, Serialize};

use crate::value_objects::{ChatId, MessageId, Timestamp, UserId};

/// 已持久化的聊天消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub from_username: String,
    pub text: String,
    pub created_at: Timestamp,
}

/// 待持久化的消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub from_username: String,
    pub text: String,
    pub created_at: Timestamp,
}
