use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 全局（跨聊天）的在线状态，来源于带 TTL 的心跳。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_at: Option<Timestamp>,
}
