use std::sync::Arc;

use application::{
    ChatService, CloseReason, MessageFeed, OnlineUser, OutboundMessage, SendMessageRequest,
    SessionId,
};
use axum::extract::ws::{
    close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade,
};
use axum::response::Response;
use domain::{ChatId, Timestamp, UserId};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// 推送给客户端的事件
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent<'a> {
    Message {
        from: &'a str,
        text: &'a str,
        created_at: Timestamp,
    },
    OnlineUsers {
        online_users: &'a [OnlineUser],
        online_count: usize,
        created_at: Timestamp,
    },
    Error {
        code: &'static str,
        message: &'a str,
    },
}

impl<'a> From<&'a OutboundMessage> for WsEvent<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        match message {
            OutboundMessage::Text {
                from,
                text,
                created_at,
            } => WsEvent::Message {
                from,
                text,
                created_at: *created_at,
            },
            OutboundMessage::OnlineUsers {
                online_users,
                created_at,
            } => WsEvent::OnlineUsers {
                online_users,
                online_count: online_users.len(),
                created_at: *created_at,
            },
        }
    }
}

/// 客户端发来的文本帧
#[derive(Debug, Deserialize)]
struct ClientFrame {
    text: String,
}

/// 会话释放守卫
///
/// 正常路径由 `release` 调用 `disconnect_session`；升级失败等情况下守卫被直接丢弃，
/// 在 `Drop` 中补做一次，保证每个会话只释放一次。
struct SessionGuard {
    chat_service: Arc<ChatService>,
    chat_id: ChatId,
    user_id: UserId,
    session_id: SessionId,
    cancel: CancellationToken,
    released: bool,
}

impl SessionGuard {
    async fn release(mut self) {
        self.released = true;
        self.cancel.cancel();
        self.chat_service
            .disconnect_session(self.chat_id, self.user_id, self.session_id)
            .await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.cancel.cancel();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(chat_id = %self.chat_id, user_id = %self.user_id, "no runtime to release websocket session");
            return;
        };
        let chat_service = self.chat_service.clone();
        let (chat_id, user_id, session_id) = (self.chat_id, self.user_id, self.session_id);
        handle.spawn(async move {
            chat_service
                .disconnect_session(chat_id, user_id, session_id)
                .await;
        });
    }
}

/// 先完成 Connect 校验（失败时返回 HTTP 错误），再升级为 WebSocket
pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    user: AuthUser,
    chat_id: ChatId,
) -> Result<Response, ApiError> {
    let cancel = state.shutdown.child_token();
    let feed = state
        .chat_service
        .connect(cancel.clone(), user.user_id, user.username.clone(), chat_id)
        .await?;

    let guard = SessionGuard {
        chat_service: state.chat_service.clone(),
        chat_id,
        user_id: user.user_id,
        session_id: feed.session_id(),
        cancel,
        released: false,
    };

    Ok(ws
        .on_failed_upgrade(move |err| {
            tracing::warn!(chat_id = %chat_id, error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| {
            WebSocketConnection {
                socket,
                state,
                user,
                feed,
                guard,
            }
            .run()
        }))
}

/// 单个 WebSocket 连接：把 MessageFeed 转发给客户端，并把客户端文本帧送入消息管道
struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user: AuthUser,
    feed: MessageFeed,
    guard: SessionGuard,
}

impl WebSocketConnection {
    async fn run(self) {
        let WebSocketConnection {
            socket,
            state,
            user,
            mut feed,
            guard,
        } = self;
        let chat_id = feed.chat_id();
        let session_id = feed.session_id();
        let cancel = guard.cancel.clone();
        let (mut sender, mut incoming) = socket.split();

        tracing::info!(chat_id = %chat_id, user_id = %user.user_id, session_id = %session_id, "websocket session started");

        let mut close_reason = None;
        let mut shutting_down = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    shutting_down = true;
                    break;
                }
                outbound = feed.recv() => match outbound {
                    Some(message) => {
                        if send_event(&mut sender, &WsEvent::from(&message)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        close_reason = feed.close_reason();
                        break;
                    }
                },
                frame = incoming.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(err) = handle_client_text(&state, &user, chat_id, text.as_str()).await {
                            let event = WsEvent::Error { code: err.code(), message: err.message() };
                            if send_event(&mut sender, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(chat_id = %chat_id, user_id = %user.user_id, error = %err, "websocket read failed");
                        break;
                    }
                },
            }
        }

        let ended = if shutting_down {
            SERVER_SHUTDOWN
        } else {
            close_reason.map(|reason| reason.as_str()).unwrap_or("client_closed")
        };
        if let Some(frame) = close_frame(shutting_down, close_reason) {
            let _ = sender.send(WsMessage::Close(Some(frame))).await;
        }

        guard.release().await;
        tracing::info!(
            chat_id = %chat_id,
            user_id = %user.user_id,
            session_id = %session_id,
            reason = ended,
            "websocket session ended"
        );
    }
}

/// 服务关闭时发给客户端的关闭原因
const SERVER_SHUTDOWN: &str = "server_shutdown";

/// 客户端主动断开时不回关闭帧
fn close_frame(shutting_down: bool, reason: Option<CloseReason>) -> Option<CloseFrame> {
    if shutting_down {
        return Some(CloseFrame {
            code: close_code::AWAY,
            reason: SERVER_SHUTDOWN.into(),
        });
    }
    reason
        .filter(|reason| *reason != CloseReason::Disconnected)
        .map(|reason| CloseFrame {
            code: close_code::NORMAL,
            reason: reason.as_str().into(),
        })
}

async fn send_event<S>(sender: &mut S, event: &WsEvent<'_>) -> Result<(), ()>
where
    S: Sink<WsMessage> + Unpin,
{
    let payload = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return Ok(());
        }
    };
    sender
        .send(WsMessage::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn handle_client_text(
    state: &AppState,
    user: &AuthUser,
    chat_id: ChatId,
    text: &str,
) -> Result<(), ApiError> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|err| ApiError::bad_request(format!("invalid frame: {err}")))?;

    state
        .chat_service
        .send_message(SendMessageRequest {
            chat_id,
            user_id: user.user_id,
            from_username: user.username.clone(),
            text: frame.text,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn roster_event_carries_online_count() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = OutboundMessage::online_users(
            vec![
                OnlineUser {
                    user_id: UserId::new(1),
                    username: "A".into(),
                },
                OnlineUser {
                    user_id: UserId::new(2),
                    username: "B".into(),
                },
            ],
            at,
        );

        let value = serde_json::to_value(WsEvent::from(&message)).unwrap();
        assert_eq!(value["type"], "online_users");
        assert_eq!(value["online_count"], 2);
        assert_eq!(value["online_users"][1], json!({ "user_id": 2, "username": "B" }));
    }

    #[test]
    fn shutdown_close_frame_takes_precedence() {
        let frame = close_frame(true, Some(CloseReason::Removed)).unwrap();
        assert_eq!(frame.code, close_code::AWAY);
        assert_eq!(frame.reason.as_str(), SERVER_SHUTDOWN);

        let frame = close_frame(false, Some(CloseReason::Superseded)).unwrap();
        assert_eq!(frame.code, close_code::NORMAL);
        assert_eq!(frame.reason.as_str(), "superseded");

        assert!(close_frame(false, Some(CloseReason::Disconnected)).is_none());
        assert!(close_frame(false, None).is_none());
    }

    #[test]
    fn text_event_is_tagged_as_message() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = OutboundMessage::text("A", "hello", at);

        let value = serde_json::to_value(WsEvent::from(&message)).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["from"], "A");
        assert_eq!(value["text"], "hello");
    }
}
