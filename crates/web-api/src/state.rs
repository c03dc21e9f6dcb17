use std::sync::Arc;

use application::{ChatService, PresenceService};
use tokio_util::sync::CancellationToken;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub presence_service: Arc<PresenceService>,
    pub jwt_service: Arc<JwtService>,
    /// 服务关闭信号，每个 WebSocket 会话持有它的子令牌
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        presence_service: Arc<PresenceService>,
        jwt_service: Arc<JwtService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            chat_service,
            presence_service,
            jwt_service,
            shutdown,
        }
    }
}
