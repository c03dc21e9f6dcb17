use std::collections::HashMap;
use std::sync::Arc;

use domain::ChatId;
use tokio::sync::RwLock;

use crate::room::chat_room::ChatRoom;
use crate::room::subscriber::{DeliveryQueue, Subscriber};

/// 进程内的房间注册表：chat_id 到运行时房间的映射
///
/// 加锁顺序固定为先注册表后房间。注册表锁只在查找、创建、删除时持有，
/// 广播期间从不持有。
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ChatId, Arc<ChatRoom>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_room(&self, chat_id: ChatId) -> Option<Arc<ChatRoom>> {
        self.rooms.read().await.get(&chat_id).cloned()
    }

    /// 双重检查的创建：读锁探测，缺失时取写锁再次探测后插入
    pub async fn get_or_create_room(&self, chat_id: ChatId) -> Arc<ChatRoom> {
        if let Some(room) = self.get_room(chat_id).await {
            return room;
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(chat_id)
            .or_insert_with(|| {
                tracing::debug!(chat_id = %chat_id, "chat room created");
                Arc::new(ChatRoom::new(chat_id))
            })
            .clone()
    }

    /// 取得（或创建）房间并安装订阅者
    ///
    /// 安装期间持有注册表锁，[`RoomRegistry::delete_room_if_empty`] 不会在
    /// 查找与安装之间删掉这个房间。返回被替换的旧队列（如果有）。
    pub async fn attach(
        &self,
        chat_id: ChatId,
        subscriber: Subscriber,
    ) -> (Arc<ChatRoom>, Option<DeliveryQueue>) {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&chat_id) {
                let previous = room.add_subscriber(subscriber).await;
                return (room.clone(), previous);
            }
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(chat_id)
            .or_insert_with(|| {
                tracing::debug!(chat_id = %chat_id, "chat room created");
                Arc::new(ChatRoom::new(chat_id))
            })
            .clone();
        let previous = room.add_subscriber(subscriber).await;
        (room, previous)
    }

    /// 在写锁下再次确认房间为空后才删除，返回是否真的删除了
    pub async fn delete_room_if_empty(&self, chat_id: ChatId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(&chat_id) else {
            return false;
        };
        if !room.is_empty().await {
            return false;
        }
        rooms.remove(&chat_id);
        tracing::debug!(chat_id = %chat_id, "empty chat room removed");
        true
    }

    /// 无条件移除房间（聊天被删除时使用）
    pub async fn remove_room(&self, chat_id: ChatId) -> Option<Arc<ChatRoom>> {
        self.rooms.write().await.remove(&chat_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::UserId;

    #[tokio::test]
    async fn concurrent_first_connects_share_one_room() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create_room(ChatId::new(3)).await
            }));
        }

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        assert_eq!(registry.room_count().await, 1);
        assert!(rooms.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn delete_only_removes_empty_rooms() {
        let registry = RoomRegistry::new();
        let (sub, _feed) = Subscriber::new(ChatId::new(3), UserId::new(1), "a", Utc::now(), 4);
        let (room, _) = registry.attach(ChatId::new(3), sub).await;

        assert!(!registry.delete_room_if_empty(ChatId::new(3)).await);

        room.remove_subscriber(UserId::new(1)).await;
        assert!(registry.delete_room_if_empty(ChatId::new(3)).await);
        assert!(registry.get_room(ChatId::new(3)).await.is_none());
        assert!(!registry.delete_room_if_empty(ChatId::new(3)).await);
    }

    #[tokio::test]
    async fn room_is_recreated_fresh_after_deletion() {
        let registry = RoomRegistry::new();
        let (sub, _feed) = Subscriber::new(ChatId::new(3), UserId::new(1), "a", Utc::now(), 4);
        let (old_room, _) = registry.attach(ChatId::new(3), sub).await;
        old_room.remove_subscriber(UserId::new(1)).await;
        registry.delete_room_if_empty(ChatId::new(3)).await;

        let new_room = registry.get_or_create_room(ChatId::new(3)).await;
        assert!(!Arc::ptr_eq(&old_room, &new_room));
        assert!(new_room.is_empty().await);
    }
}
