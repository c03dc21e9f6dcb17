use std::collections::HashMap;

use domain::{ChatId, Timestamp, UserId};
use tokio::sync::RwLock;

use crate::dto::{OnlineUser, OutboundMessage};
use crate::room::subscriber::{CloseReason, DeliveryOutcome, DeliveryQueue, SessionId, Subscriber};

/// 一次广播的投递统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// 单个聊天的运行时房间：当前在线的订阅者以及广播原语
///
/// 每个用户在房间内最多只有一个订阅者。所有修改与扇出都持有本房间的写锁，
/// 因此同一房间内每个订阅者看到的消息顺序一致；不同房间之间互不争用。
#[derive(Debug)]
pub struct ChatRoom {
    chat_id: ChatId,
    subscribers: RwLock<HashMap<UserId, Subscriber>>,
}

impl ChatRoom {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// 安装订阅者；同一用户已有订阅者时替换之，并把旧的投递队列交还调用方关闭
    pub async fn add_subscriber(&self, subscriber: Subscriber) -> Option<DeliveryQueue> {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .insert(subscriber.user_id, subscriber)
            .map(Subscriber::into_queue)
    }

    /// 移除订阅者，返回其投递队列（不存在时为 `None`）以及房间此刻是否为空
    pub async fn remove_subscriber(&self, user_id: UserId) -> (Option<DeliveryQueue>, bool) {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&user_id).map(Subscriber::into_queue);
        (removed, subscribers.is_empty())
    }

    /// 仅当当前订阅者仍属于 `session_id` 这次连接时才移除
    pub async fn remove_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> (Option<DeliveryQueue>, bool) {
        let mut subscribers = self.subscribers.write().await;
        let matches = subscribers
            .get(&user_id)
            .is_some_and(|sub| sub.session_id == session_id);
        let removed = if matches {
            subscribers.remove(&user_id).map(Subscriber::into_queue)
        } else {
            None
        };
        (removed, subscribers.is_empty())
    }

    /// 向每个订阅者做非阻塞投递，队列已满的订阅者丢弃这条消息
    pub async fn broadcast_message(&self, message: OutboundMessage) -> BroadcastOutcome {
        let subscribers = self.subscribers.write().await;
        self.fan_out(&subscribers, &message)
    }

    /// 把当前在线名单作为一条 ONLINE_USERS 消息广播给所有订阅者
    pub async fn broadcast_online_users(&self, now: Timestamp) -> BroadcastOutcome {
        let subscribers = self.subscribers.write().await;
        let message = OutboundMessage::online_users(Self::snapshot(&subscribers), now);
        self.fan_out(&subscribers, &message)
    }

    fn fan_out(
        &self,
        subscribers: &HashMap<UserId, Subscriber>,
        message: &OutboundMessage,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        for subscriber in subscribers.values() {
            match subscriber.queue().try_deliver(message.clone()) {
                DeliveryOutcome::Delivered => outcome.delivered += 1,
                DeliveryOutcome::Dropped => {
                    outcome.dropped += 1;
                    tracing::debug!(
                        chat_id = %self.chat_id,
                        user_id = %subscriber.user_id,
                        session_id = %subscriber.session_id,
                        dropped_total = subscriber.queue().dropped_messages(),
                        "subscriber queue full, message dropped"
                    );
                }
                DeliveryOutcome::Closed => {
                    tracing::trace!(
                        chat_id = %self.chat_id,
                        user_id = %subscriber.user_id,
                        "subscriber queue already closed"
                    );
                }
            }
        }
        outcome
    }

    fn snapshot(subscribers: &HashMap<UserId, Subscriber>) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = subscribers
            .values()
            .map(|sub| OnlineUser {
                user_id: sub.user_id,
                username: sub.username.clone(),
            })
            .collect();
        users.sort_by_key(|user| user.user_id);
        users
    }

    pub async fn online_users(&self) -> Vec<OnlineUser> {
        let subscribers = self.subscribers.read().await;
        Self::snapshot(&subscribers)
    }

    pub async fn online_users_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_user_online(&self, user_id: UserId) -> bool {
        self.subscribers.read().await.contains_key(&user_id)
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    /// 清空房间并以 `reason` 关闭所有订阅者的队列，返回被关闭的数量
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<Subscriber> = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.drain().map(|(_, sub)| sub).collect()
        };
        drained
            .iter()
            .filter(|sub| sub.queue().close(reason))
            .count()
    }
}
