//! 应用层实现。
//!
//! 实时房间引擎（订阅者、房间、注册表）与围绕它的用例服务：
//! 连接生命周期、消息管道、聊天管理以及全局在线状态。

pub mod clock;
pub mod directory;
pub mod dto;
pub mod error;
pub mod memory;
pub mod room;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use directory::{DirectoryError, DirectoryUser, UserDirectory, UserLookup};
pub use dto::{ChatInfoDto, FriendPresenceDto, MessageKind, OnlineUser, OutboundMessage, PublicChatDto};
pub use error::ApplicationError;
pub use room::{
    BroadcastOutcome, ChatRoom, CloseReason, DeliveryOutcome, DeliveryQueue, MessageFeed,
    RoomRegistry, SessionId, Subscriber,
};
pub use services::{
    ChatService, ChatServiceDependencies, ChatSettings, CreateChatRequest, DirectChat,
    PresenceService, PresenceServiceDependencies, SendMessageRequest, HISTORY_UNAVAILABLE,
    SYSTEM_SENDER,
};
