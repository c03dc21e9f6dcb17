use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use domain::{
    ChatId, ChatRepository, DomainError, Message, MessageText, NewMessage, UserId,
};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    directory::UserDirectory,
    dto::{OnlineUser, OutboundMessage},
    error::ApplicationError,
    room::{ChatRoom, CloseReason, DeliveryQueue, MessageFeed, RoomRegistry, SessionId, Subscriber},
};

/// 历史加载失败时推送给订阅者的系统消息
pub const SYSTEM_SENDER: &str = "system";
pub const HISTORY_UNAVAILABLE: &str = "Failed to load chat history";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    /// 每个订阅者投递队列的容量
    pub subscriber_queue_capacity: usize,
    /// 连接时回放的历史消息条数
    pub history_limit: i64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 100,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub from_username: String,
    pub text: String,
}

pub struct ChatServiceDependencies {
    pub chat_repository: Arc<dyn ChatRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 聊天服务：实时连接生命周期、消息管道与聊天管理
pub struct ChatService {
    pub(super) deps: ChatServiceDependencies,
    rooms: Arc<RoomRegistry>,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self {
            deps,
            rooms: Arc::new(RoomRegistry::new()),
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// 订阅聊天的实时消息
    ///
    /// 返回的 [`MessageFeed`] 由调用方持续读取直到关闭；调用方退出时
    /// 必须且只能调用一次 [`ChatService::disconnect_session`]。
    pub async fn connect(
        &self,
        cancel: CancellationToken,
        user_id: UserId,
        username: impl Into<String>,
        chat_id: ChatId,
    ) -> Result<MessageFeed, ApplicationError> {
        tracing::info!(chat_id = %chat_id, user_id = %user_id, "connecting to chat");

        self.ensure_member(chat_id, user_id).await?;

        let (subscriber, feed) = Subscriber::new(
            chat_id,
            user_id,
            username,
            self.deps.clock.now(),
            self.deps.settings.subscriber_queue_capacity,
        );
        let session_id = subscriber.session_id;
        let queue = subscriber.queue().clone();

        let (room, previous) = self.rooms.attach(chat_id, subscriber).await;
        if let Some(previous) = previous {
            previous.close(CloseReason::Superseded);
            tracing::info!(
                chat_id = %chat_id,
                user_id = %user_id,
                "previous session superseded by reconnect"
            );
        }

        // 校验与挂载之间可能有删除聊天或移除成员完成，挂载后再确认一次
        if let Err(err) = self.ensure_member(chat_id, user_id).await {
            let reason = match &err {
                ApplicationError::Domain(DomainError::ChatNotFound) => CloseReason::ChatDeleted,
                ApplicationError::Domain(DomainError::NotChatMember) => CloseReason::Removed,
                _ => CloseReason::Disconnected,
            };
            let (removed, empty) = room.remove_session(user_id, session_id).await;
            self.finish_removal(&room, user_id, removed, empty, reason)
                .await;
            queue.close(reason);
            tracing::warn!(
                chat_id = %chat_id,
                user_id = %user_id,
                reason = reason.as_str(),
                "membership revoked while connecting"
            );
            return Err(err);
        }

        self.spawn_history_replay(cancel, chat_id, session_id, queue);
        self.spawn_roster_broadcast(room);

        tracing::info!(
            chat_id = %chat_id,
            user_id = %user_id,
            session_id = %session_id,
            "subscriber connected"
        );
        Ok(feed)
    }

    async fn ensure_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApplicationError> {
        if !self.deps.chat_repository.chat_exists(chat_id).await? {
            tracing::warn!(chat_id = %chat_id, "chat not found");
            return Err(DomainError::ChatNotFound.into());
        }
        if !self
            .deps
            .chat_repository
            .is_user_in_chat(chat_id, user_id)
            .await?
        {
            tracing::warn!(chat_id = %chat_id, user_id = %user_id, "user is not a chat member");
            return Err(DomainError::NotChatMember.into());
        }
        Ok(())
    }

    /// 断开用户在该聊天中的实时连接，重复调用为空操作
    pub async fn disconnect(&self, chat_id: ChatId, user_id: UserId) {
        let Some(room) = self.rooms.get_room(chat_id).await else {
            return;
        };
        let (queue, empty) = room.remove_subscriber(user_id).await;
        self.finish_removal(&room, user_id, queue, empty, CloseReason::Disconnected)
            .await;
    }

    /// 连接任务退出时调用：只有当前订阅者仍属于这次会话时才移除
    pub async fn disconnect_session(&self, chat_id: ChatId, user_id: UserId, session_id: SessionId) {
        let Some(room) = self.rooms.get_room(chat_id).await else {
            return;
        };
        let (queue, empty) = room.remove_session(user_id, session_id).await;
        if queue.is_none() {
            tracing::debug!(
                chat_id = %chat_id,
                user_id = %user_id,
                session_id = %session_id,
                "session already replaced or removed"
            );
        }
        self.finish_removal(&room, user_id, queue, empty, CloseReason::Disconnected)
            .await;
    }

    /// 把某个用户踢出实时房间（成员被移除时）
    pub(super) async fn evict(&self, chat_id: ChatId, user_id: UserId, reason: CloseReason) {
        let Some(room) = self.rooms.get_room(chat_id).await else {
            return;
        };
        let (queue, empty) = room.remove_subscriber(user_id).await;
        self.finish_removal(&room, user_id, queue, empty, reason).await;
    }

    /// 拆除整个房间（聊天被删除时）
    pub(super) async fn close_room(&self, chat_id: ChatId, reason: CloseReason) -> usize {
        let Some(room) = self.rooms.remove_room(chat_id).await else {
            return 0;
        };
        let closed = room.close_all(reason).await;
        tracing::info!(chat_id = %chat_id, closed, reason = reason.as_str(), "chat room closed");
        closed
    }

    async fn finish_removal(
        &self,
        room: &ChatRoom,
        user_id: UserId,
        queue: Option<DeliveryQueue>,
        empty: bool,
        reason: CloseReason,
    ) {
        let chat_id = room.chat_id();
        let removed = queue.is_some();
        if let Some(queue) = queue {
            queue.close(reason);
            tracing::info!(
                chat_id = %chat_id,
                user_id = %user_id,
                reason = reason.as_str(),
                dropped_messages = queue.dropped_messages(),
                "subscriber disconnected"
            );
        }

        if empty {
            self.rooms.delete_room_if_empty(chat_id).await;
        } else if removed {
            room.broadcast_online_users(self.deps.clock.now()).await;
        }
    }

    /// 持久化消息后广播给当前在线的订阅者
    ///
    /// 持久化失败时直接返回错误，不做广播；没有房间时跳过广播。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let SendMessageRequest {
            chat_id,
            user_id,
            from_username,
            text,
        } = request;

        let text = MessageText::new(text)?;
        if from_username.trim().is_empty() {
            return Err(DomainError::invalid_argument("from_username", "must not be empty").into());
        }
        if !self
            .deps
            .chat_repository
            .is_user_in_chat(chat_id, user_id)
            .await?
        {
            return Err(DomainError::NotChatMember.into());
        }

        let stored = self
            .deps
            .chat_repository
            .send_message(NewMessage {
                chat_id,
                user_id,
                from_username,
                text: text.into_inner(),
                created_at: self.deps.clock.now(),
            })
            .await
            .map_err(|err| {
                tracing::error!(chat_id = %chat_id, user_id = %user_id, error = %err, "failed to persist message");
                err
            })?;

        match self.rooms.get_room(chat_id).await {
            Some(room) => {
                let outcome = room
                    .broadcast_message(OutboundMessage::text(
                        stored.from_username.clone(),
                        stored.text.clone(),
                        stored.created_at,
                    ))
                    .await;
                tracing::debug!(
                    chat_id = %chat_id,
                    message_id = %stored.id,
                    delivered = outcome.delivered,
                    dropped = outcome.dropped,
                    "message broadcast"
                );
            }
            None => {
                tracing::debug!(chat_id = %chat_id, message_id = %stored.id, "no live subscribers, broadcast skipped");
            }
        }

        Ok(stored)
    }

    pub async fn online_users(&self, chat_id: ChatId) -> Vec<OnlineUser> {
        match self.rooms.get_room(chat_id).await {
            Some(room) => room.online_users().await,
            None => Vec::new(),
        }
    }

    pub async fn online_count(&self, chat_id: ChatId) -> usize {
        match self.rooms.get_room(chat_id).await {
            Some(room) => room.online_users_count().await,
            None => 0,
        }
    }

    pub async fn is_user_online(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.rooms.get_room(chat_id).await {
            Some(room) => room.is_user_online(user_id).await,
            None => false,
        }
    }

    fn spawn_history_replay(
        &self,
        cancel: CancellationToken,
        chat_id: ChatId,
        session_id: SessionId,
        queue: DeliveryQueue,
    ) {
        let repository = self.deps.chat_repository.clone();
        let clock = self.deps.clock.clone();
        let limit = self.deps.settings.history_limit;

        tokio::spawn(async move {
            let replay = replay_history(repository, clock, queue, cancel, chat_id, session_id, limit);
            if let Err(panic) = AssertUnwindSafe(replay).catch_unwind().await {
                tracing::error!(
                    chat_id = %chat_id,
                    session_id = %session_id,
                    panic = panic_message(panic.as_ref()),
                    "panic in history replay"
                );
            }
        });
    }

    fn spawn_roster_broadcast(&self, room: Arc<ChatRoom>) {
        let now = self.deps.clock.now();
        tokio::spawn(async move {
            let outcome = room.broadcast_online_users(now).await;
            tracing::debug!(
                chat_id = %room.chat_id(),
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "online users broadcast"
            );
        });
    }
}

async fn replay_history(
    repository: Arc<dyn ChatRepository>,
    clock: Arc<dyn Clock>,
    queue: DeliveryQueue,
    cancel: CancellationToken,
    chat_id: ChatId,
    session_id: SessionId,
    limit: i64,
) {
    tracing::debug!(chat_id = %chat_id, session_id = %session_id, "loading chat history");

    let loaded = tokio::select! {
        _ = cancel.cancelled() => return,
        loaded = repository.recent_messages(chat_id, limit) => loaded,
    };

    let messages = match loaded {
        Ok(messages) => messages,
        Err(err) => {
            tracing::error!(chat_id = %chat_id, session_id = %session_id, error = %err, "failed to load chat history");
            let notice = OutboundMessage::text(SYSTEM_SENDER, HISTORY_UNAVAILABLE, clock.now());
            queue.deliver(notice, &cancel).await;
            return;
        }
    };

    if messages.is_empty() {
        tracing::debug!(chat_id = %chat_id, "no messages in chat history");
        return;
    }

    for message in messages {
        let item = OutboundMessage::text(message.from_username, message.text, message.created_at);
        if !queue.deliver(item, &cancel).await {
            tracing::debug!(chat_id = %chat_id, session_id = %session_id, "history replay interrupted");
            return;
        }
    }

    tracing::debug!(chat_id = %chat_id, session_id = %session_id, "history sent");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
