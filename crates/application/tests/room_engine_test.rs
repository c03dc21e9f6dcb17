//! 实时房间引擎集成测试
//!
//! 使用内存仓储驱动完整的连接、广播、断开流程。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::memory::{InMemoryChatRepository, StaticUserDirectory};
use application::{
    ApplicationError, ChatService, ChatServiceDependencies, ChatSettings, CloseReason,
    CreateChatRequest, DirectoryUser, MessageFeed, OutboundMessage, SendMessageRequest,
    SystemClock,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Chat, ChatId, ChatRepository, DomainError, Message, NewChat, NewMessage, PublicChat,
    RepositoryError, UserId,
};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

struct TestServices {
    service: Arc<ChatService>,
    repository: Arc<InMemoryChatRepository>,
}

impl TestServices {
    fn new(settings: ChatSettings) -> Self {
        let repository = Arc::new(InMemoryChatRepository::new());
        Self::with_repository(settings, repository.clone(), repository)
    }

    /// 服务通过 `chat_repository` 访问存储，`repository` 是其背后的内存仓储
    fn with_repository(
        settings: ChatSettings,
        chat_repository: Arc<dyn ChatRepository>,
        repository: Arc<InMemoryChatRepository>,
    ) -> Self {
        let directory = StaticUserDirectory::new(vec![
            DirectoryUser {
                id: ALICE,
                username: "A".into(),
            },
            DirectoryUser {
                id: BOB,
                username: "B".into(),
            },
        ]);
        let service = Arc::new(ChatService::new(ChatServiceDependencies {
            chat_repository,
            user_directory: Arc::new(directory),
            clock: Arc::new(SystemClock),
            settings,
        }));
        Self {
            service,
            repository,
        }
    }

    async fn chat_with_both(&self) -> ChatId {
        self.service
            .create_chat(CreateChatRequest {
                creator_id: ALICE,
                creator_username: "A".into(),
                name: "seven".into(),
                usernames: vec!["B".into()],
                is_public: false,
            })
            .await
            .expect("create chat")
    }

    async fn connect(&self, user_id: UserId, name: &str, chat_id: ChatId) -> MessageFeed {
        self.service
            .connect(CancellationToken::new(), user_id, name, chat_id)
            .await
            .expect("connect")
    }
}

async fn next(feed: &mut MessageFeed) -> OutboundMessage {
    timeout(Duration::from_secs(1), feed.recv())
        .await
        .expect("message in time")
        .expect("feed still open")
}

/// 跳过消息直到拿到一份包含 `expected` 个用户的在线名单
async fn roster_of(feed: &mut MessageFeed, expected: usize) -> Vec<String> {
    loop {
        if let OutboundMessage::OnlineUsers { online_users, .. } = next(feed).await {
            if online_users.len() == expected {
                return online_users.into_iter().map(|u| u.username).collect();
            }
        }
    }
}

async fn next_text(feed: &mut MessageFeed) -> (String, String) {
    loop {
        if let OutboundMessage::Text { from, text, .. } = next(feed).await {
            return (from, text);
        }
    }
}

#[tokio::test]
async fn two_users_chat_then_leave() {
    let services = TestServices::new(ChatSettings::default());
    let chat_id = services.chat_with_both().await;
    let service = &services.service;

    let mut a = services.connect(ALICE, "A", chat_id).await;
    assert_eq!(service.online_count(chat_id).await, 1);
    assert_eq!(roster_of(&mut a, 1).await, vec!["A"]);

    let mut b = services.connect(BOB, "B", chat_id).await;
    assert_eq!(service.online_count(chat_id).await, 2);
    assert_eq!(roster_of(&mut a, 2).await, vec!["A", "B"]);
    assert_eq!(roster_of(&mut b, 2).await, vec!["A", "B"]);

    service
        .send_message(SendMessageRequest {
            chat_id,
            user_id: ALICE,
            from_username: "A".into(),
            text: "hi".into(),
        })
        .await
        .unwrap();
    assert_eq!(next_text(&mut a).await, ("A".to_string(), "hi".to_string()));
    assert_eq!(next_text(&mut b).await, ("A".to_string(), "hi".to_string()));

    service.disconnect(chat_id, BOB).await;
    assert_eq!(b.close_reason(), Some(CloseReason::Disconnected));
    assert_eq!(service.online_count(chat_id).await, 1);
    assert_eq!(roster_of(&mut a, 1).await, vec!["A"]);

    service.disconnect(chat_id, ALICE).await;
    assert!(a.is_closed());
    assert_eq!(service.rooms().room_count().await, 0);
    assert!(service.online_users(chat_id).await.is_empty());

    // 重复断开是空操作
    service.disconnect(chat_id, ALICE).await;
    assert_eq!(service.rooms().room_count().await, 0);
}

#[tokio::test]
async fn reconnect_closes_only_previous_feed() {
    let services = TestServices::new(ChatSettings::default());
    let chat_id = services.chat_with_both().await;
    let service = &services.service;

    let first = services.connect(ALICE, "A", chat_id).await;
    let mut second = services.connect(ALICE, "A", chat_id).await;

    assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
    assert!(!second.is_closed());
    assert_eq!(service.online_count(chat_id).await, 1);

    // 旧连接任务退出时不能拆掉新连接
    service
        .disconnect_session(chat_id, ALICE, first.session_id())
        .await;
    assert!(!second.is_closed());
    assert!(service.is_user_online(chat_id, ALICE).await);
    assert_eq!(roster_of(&mut second, 1).await, vec!["A"]);

    service
        .disconnect_session(chat_id, ALICE, second.session_id())
        .await;
    assert!(second.is_closed());
    assert_eq!(service.rooms().room_count().await, 0);
}

#[tokio::test]
async fn concurrent_reconnects_leave_single_subscriber() {
    let services = TestServices::new(ChatSettings::default());
    let chat_id = services.chat_with_both().await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = services.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .connect(CancellationToken::new(), ALICE, "A", chat_id)
                .await
        }));
    }

    let mut feeds = Vec::new();
    for handle in handles {
        feeds.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(services.service.online_count(chat_id).await, 1);
    assert_eq!(feeds.iter().filter(|feed| !feed.is_closed()).count(), 1);
    assert!(feeds
        .iter()
        .filter(|feed| feed.is_closed())
        .all(|feed| feed.close_reason() == Some(CloseReason::Superseded)));
}

#[tokio::test]
async fn slow_consumers_do_not_block_sender() {
    let services = TestServices::new(ChatSettings {
        subscriber_queue_capacity: 2,
        history_limit: 50,
    });
    let chat_id = services.chat_with_both().await;
    let service = &services.service;

    let a = services.connect(ALICE, "A", chat_id).await;
    let b = services.connect(BOB, "B", chat_id).await;

    for i in 0..20 {
        timeout(
            Duration::from_secs(1),
            service.send_message(SendMessageRequest {
                chat_id,
                user_id: ALICE,
                from_username: "A".into(),
                text: format!("flood {i}"),
            }),
        )
        .await
        .expect("send never blocks on full queues")
        .unwrap();
    }

    assert!(a.dropped_messages() > 0);
    assert!(b.dropped_messages() > 0);
    assert!(!a.is_closed());
}

#[tokio::test]
async fn empty_room_is_recreated_fresh() {
    let services = TestServices::new(ChatSettings::default());
    let chat_id = services.chat_with_both().await;
    let service = &services.service;

    let _a = services.connect(ALICE, "A", chat_id).await;
    let old_room = service.rooms().get_room(chat_id).await.unwrap();
    service.disconnect(chat_id, ALICE).await;
    assert!(service.rooms().get_room(chat_id).await.is_none());

    let _b = services.connect(BOB, "B", chat_id).await;
    let new_room = service.rooms().get_room(chat_id).await.unwrap();
    assert!(!Arc::ptr_eq(&old_room, &new_room));
    assert_eq!(new_room.online_users_count().await, 1);
    assert!(!new_room.is_user_online(ALICE).await);
}

#[tokio::test]
async fn history_is_replayed_before_later_messages() {
    let services = TestServices::new(ChatSettings {
        subscriber_queue_capacity: 100,
        history_limit: 3,
    });
    let chat_id = services.chat_with_both().await;

    for i in 0..5 {
        services
            .repository
            .send_message(NewMessage {
                chat_id,
                user_id: BOB,
                from_username: "B".into(),
                text: format!("old {i}"),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let mut a = services.connect(ALICE, "A", chat_id).await;
    for expected in ["old 2", "old 3", "old 4"] {
        assert_eq!(next_text(&mut a).await.1, expected);
    }
}

#[tokio::test]
async fn online_count_tracks_outstanding_connections() {
    let services = TestServices::new(ChatSettings::default());
    let chat_id = services.chat_with_both().await;
    let service = &services.service;

    let _a = services.connect(ALICE, "A", chat_id).await;
    let _b = services.connect(BOB, "B", chat_id).await;
    assert_eq!(service.online_count(chat_id).await, 2);

    service.disconnect(chat_id, ALICE).await;
    assert_eq!(service.online_count(chat_id).await, 1);
    assert!(!service.is_user_online(chat_id, ALICE).await);
    assert!(service.is_user_online(chat_id, BOB).await);

    let online = service.online_users(chat_id).await;
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, BOB);
}

#[tokio::test]
async fn connect_to_unknown_chat_is_not_found() {
    let services = TestServices::new(ChatSettings::default());

    let err = services
        .service
        .connect(CancellationToken::new(), ALICE, "A", ChatId::new(999))
        .await
        .unwrap_err();

    assert!(matches!(err, ApplicationError::Domain(DomainError::ChatNotFound)));
    assert_eq!(services.service.rooms().room_count().await, 0);
}

/// 在第一次成员校验返回后暂停，直到测试放行
struct GatedRepository {
    inner: Arc<InMemoryChatRepository>,
    armed: AtomicBool,
    paused: Notify,
    release: Notify,
}

impl GatedRepository {
    fn new(inner: Arc<InMemoryChatRepository>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            paused: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ChatRepository for GatedRepository {
    async fn create(&self, chat: NewChat) -> Result<ChatId, RepositoryError> {
        self.inner.create(chat).await
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), RepositoryError> {
        self.inner.delete(chat_id).await
    }

    async fn chat_exists(&self, chat_id: ChatId) -> Result<bool, RepositoryError> {
        self.inner.chat_exists(chat_id).await
    }

    async fn is_user_in_chat(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let member = self.inner.is_user_in_chat(chat_id, user_id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.release.notified().await;
        }
        member
    }

    async fn chat_info(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        self.inner.chat_info(chat_id).await
    }

    async fn add_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    ) -> Result<(), RepositoryError> {
        self.inner.add_member(chat_id, user_id, username).await
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), RepositoryError> {
        self.inner.remove_member(chat_id, user_id).await
    }

    async fn user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        self.inner.user_chats(user_id).await
    }

    async fn public_chats(&self, search: String) -> Result<Vec<PublicChat>, RepositoryError> {
        self.inner.public_chats(search).await
    }

    async fn find_direct_chat(
        &self,
        first: UserId,
        second: UserId,
    ) -> Result<Option<ChatId>, RepositoryError> {
        self.inner.find_direct_chat(first, second).await
    }

    async fn create_direct_chat(
        &self,
        first: UserId,
        first_username: String,
        second: UserId,
        second_username: String,
    ) -> Result<ChatId, RepositoryError> {
        self.inner
            .create_direct_chat(first, first_username, second, second_username)
            .await
    }

    async fn send_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        self.inner.send_message(message).await
    }

    async fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.inner.recent_messages(chat_id, limit).await
    }
}

fn gated_services() -> (TestServices, Arc<GatedRepository>) {
    let repository = Arc::new(InMemoryChatRepository::new());
    let gated = Arc::new(GatedRepository::new(repository.clone()));
    let services = TestServices::with_repository(ChatSettings::default(), gated.clone(), repository);
    (services, gated)
}

#[tokio::test]
async fn chat_deleted_while_connecting_leaves_no_live_room() {
    let (services, gate) = gated_services();
    let chat_id = services.chat_with_both().await;
    let service = services.service.clone();

    gate.armed.store(true, Ordering::SeqCst);
    let connecting = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .connect(CancellationToken::new(), BOB, "B", chat_id)
                .await
        }
    });
    gate.paused.notified().await;

    service.delete_chat(chat_id, ALICE).await.unwrap();
    gate.release.notify_one();

    let result = connecting.await.unwrap();
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::ChatNotFound))
    ));
    assert!(!services.repository.chat_exists(chat_id).await.unwrap());
    assert_eq!(service.rooms().room_count().await, 0);
    assert_eq!(service.online_count(chat_id).await, 0);
}

#[tokio::test]
async fn member_removed_while_connecting_gets_no_feed() {
    let (services, gate) = gated_services();
    let chat_id = services.chat_with_both().await;
    let service = services.service.clone();
    let mut a = services.connect(ALICE, "A", chat_id).await;
    assert_eq!(roster_of(&mut a, 1).await, vec!["A"]);

    gate.armed.store(true, Ordering::SeqCst);
    let connecting = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .connect(CancellationToken::new(), BOB, "B", chat_id)
                .await
        }
    });
    gate.paused.notified().await;

    service.remove_member(chat_id, ALICE, BOB).await.unwrap();
    gate.release.notify_one();

    let result = connecting.await.unwrap();
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::NotChatMember))
    ));
    assert!(!service.is_user_online(chat_id, BOB).await);
    assert_eq!(service.online_count(chat_id).await, 1);

    service
        .send_message(SendMessageRequest {
            chat_id,
            user_id: ALICE,
            from_username: "A".into(),
            text: "still here".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut a).await,
        ("A".to_string(), "still here".to_string())
    );
}
