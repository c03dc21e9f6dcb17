#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{InMemoryChatRepository, InMemoryPresenceRepository, StaticUserDirectory},
    ChatService, ChatServiceDependencies, ChatSettings, DirectoryUser, PresenceService,
    PresenceServiceDependencies, SystemClock,
};
use domain::UserId;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use tokio_util::sync::CancellationToken;
use web_api::{init_metrics, router, AppState, JwtConfig, JwtService};

pub const ALICE: (i64, &str) = (1, "alice");
pub const BOB: (i64, &str) = (2, "bob");
pub const CAROL: (i64, &str) = (3, "carol");

/// 绑定在临时端口上的测试服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub jwt: Arc<JwtService>,
    pub client: reqwest::Client,
    /// 与 `AppState::shutdown` 相同的令牌，取消后所有 WebSocket 会话退出
    pub sessions: CancellationToken,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, chat_id: i64, token: &str) -> String {
        format!("ws://{}/api/v1/chats/{}/ws?token={}", self.addr, chat_id, token)
    }

    pub fn token(&self, user: (i64, &str)) -> String {
        self.jwt
            .generate_token(UserId::new(user.0), user.1, "user")
            .expect("token")
    }

    pub fn bearer(&self, user: (i64, &str)) -> String {
        format!("Bearer {}", self.token(user))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server() -> TestServer {
    let directory = StaticUserDirectory::new(
        [ALICE, BOB, CAROL]
            .into_iter()
            .map(|(id, name)| DirectoryUser {
                id: UserId::new(id),
                username: name.to_string(),
            })
            .collect(),
    );

    let chat_service = ChatService::new(ChatServiceDependencies {
        chat_repository: Arc::new(InMemoryChatRepository::new()),
        user_directory: Arc::new(directory),
        clock: Arc::new(SystemClock),
        settings: ChatSettings::default(),
    });
    let presence_service = PresenceService::new(PresenceServiceDependencies {
        presence_repository: Arc::new(InMemoryPresenceRepository::default()),
    });
    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret-key-0123456789".to_string(),
        expiration_hours: 1,
    }));

    init_metrics();
    let sessions = CancellationToken::new();
    let state = AppState::new(
        Arc::new(chat_service),
        Arc::new(presence_service),
        jwt.clone(),
        sessions.clone(),
    );
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        jwt,
        client: reqwest::Client::new(),
        sessions,
        shutdown: Some(shutdown_tx),
    }
}
