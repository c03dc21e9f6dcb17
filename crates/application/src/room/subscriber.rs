use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use domain::{ChatId, Timestamp, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dto::OutboundMessage;

/// 单次连接会话的标识，用来区分同一用户的新旧连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 投递队列被关闭的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 连接正常断开
    Disconnected,
    /// 同一用户在同一聊天中建立了新连接
    Superseded,
    /// 用户被移出聊天
    Removed,
    /// 聊天被删除
    ChatDeleted,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Superseded => "superseded",
            CloseReason::Removed => "removed",
            CloseReason::ChatDeleted => "chat_deleted",
        }
    }
}

/// 非阻塞投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// 队列已满，消息被丢弃
    Dropped,
    /// 队列已关闭或接收端已不存在
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    closed: CancellationToken,
    reason: OnceLock<CloseReason>,
    dropped: AtomicU64,
}

/// 订阅者投递队列的写入端
///
/// 有界 FIFO，写入方（房间广播、历史回放）从不无限期阻塞。
/// 关闭只发生一次：第一个调用 [`DeliveryQueue::close`] 的一方决定关闭原因。
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<OutboundMessage>,
    state: Arc<QueueState>,
}

impl DeliveryQueue {
    /// 创建容量为 `capacity` 的队列，返回写入端与接收端
    pub fn bounded(
        capacity: usize,
        session_id: SessionId,
        chat_id: ChatId,
        user_id: UserId,
    ) -> (Self, MessageFeed) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let state = Arc::new(QueueState::default());
        let feed = MessageFeed {
            session_id,
            chat_id,
            user_id,
            receiver,
            state: state.clone(),
        };
        (Self { sender, state }, feed)
    }

    /// 不等待的投递，队列满时丢弃并计数
    pub fn try_deliver(&self, message: OutboundMessage) -> DeliveryOutcome {
        if self.is_closed() {
            return DeliveryOutcome::Closed;
        }
        match self.sender.try_send(message) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }

    /// 等待队列出现空位后投递；连接取消或队列关闭时立即放弃
    ///
    /// 返回 `true` 表示消息已入队。
    pub async fn deliver(&self, message: OutboundMessage, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.state.closed.cancelled() => false,
            sent = self.sender.send(message) => sent.is_ok(),
        }
    }

    /// 关闭队列，返回本次调用是否真正执行了关闭
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = self.state.reason.set(reason).is_ok();
        self.state.closed.cancel();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason.get().copied()
    }

    /// 因队列已满而丢弃的消息数
    pub fn dropped_messages(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

/// 订阅者投递队列的读取端，交给负责网络发送的连接任务
///
/// [`MessageFeed::recv`] 在队列关闭后返回 `None`，尚未读取的消息随之丢弃。
#[derive(Debug)]
pub struct MessageFeed {
    session_id: SessionId,
    chat_id: ChatId,
    user_id: UserId,
    receiver: mpsc::Receiver<OutboundMessage>,
    state: Arc<QueueState>,
}

impl MessageFeed {
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        tokio::select! {
            biased;
            _ = self.state.closed.cancelled() => None,
            message = self.receiver.recv() => message,
        }
    }

    /// 非阻塞读取，主要用于测试
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        if self.is_closed() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason.get().copied()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

/// 一个已连接到某个聊天的客户端
#[derive(Debug)]
pub struct Subscriber {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub joined_at: Timestamp,
    queue: DeliveryQueue,
}

impl Subscriber {
    pub fn new(
        chat_id: ChatId,
        user_id: UserId,
        username: impl Into<String>,
        joined_at: Timestamp,
        capacity: usize,
    ) -> (Self, MessageFeed) {
        let session_id = SessionId::new();
        let (queue, feed) = DeliveryQueue::bounded(capacity, session_id, chat_id, user_id);
        let subscriber = Self {
            session_id,
            user_id,
            username: username.into(),
            joined_at,
            queue,
        };
        (subscriber, feed)
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn into_queue(self) -> DeliveryQueue {
        self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn text(n: usize) -> OutboundMessage {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        OutboundMessage::text("system", format!("m{n}"), at)
    }

    fn queue(capacity: usize) -> (DeliveryQueue, MessageFeed) {
        DeliveryQueue::bounded(capacity, SessionId::new(), ChatId::new(1), UserId::new(1))
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (queue, mut feed) = queue(2);

        assert_eq!(queue.try_deliver(text(0)), DeliveryOutcome::Delivered);
        assert_eq!(queue.try_deliver(text(1)), DeliveryOutcome::Delivered);
        assert_eq!(queue.try_deliver(text(2)), DeliveryOutcome::Dropped);
        assert_eq!(feed.dropped_messages(), 1);

        assert_eq!(feed.recv().await, Some(text(0)));
        assert_eq!(feed.recv().await, Some(text(1)));
        assert_eq!(feed.try_recv(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_first_reason_wins() {
        let (queue, mut feed) = queue(4);
        queue.try_deliver(text(0));

        assert!(queue.close(CloseReason::Superseded));
        assert!(!queue.close(CloseReason::Disconnected));

        assert!(feed.is_closed());
        assert_eq!(feed.close_reason(), Some(CloseReason::Superseded));
        assert_eq!(feed.recv().await, None);
        assert_eq!(queue.try_deliver(text(1)), DeliveryOutcome::Closed);
    }

    #[tokio::test]
    async fn deliver_gives_up_on_cancellation() {
        let (queue, _feed) = queue(1);
        let cancel = CancellationToken::new();

        assert!(queue.deliver(text(0), &cancel).await);
        cancel.cancel();
        assert!(!queue.deliver(text(1), &cancel).await);
    }

    #[tokio::test]
    async fn deliver_gives_up_when_queue_closes() {
        let (queue, _feed) = queue(1);
        let cancel = CancellationToken::new();
        assert!(queue.deliver(text(0), &cancel).await);

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.deliver(text(1), &cancel).await })
        };
        queue.close(CloseReason::Disconnected);

        assert!(!waiter.await.unwrap());
    }
}
