//! 实时房间引擎
//!
//! 订阅者、单聊天房间以及进程级房间注册表。房间只是"当前在线连接"的运行时缓存，
//! 与持久化的聊天互相独立。

pub mod chat_room;
pub mod registry;
pub mod subscriber;

pub use chat_room::{BroadcastOutcome, ChatRoom};
pub use registry::RoomRegistry;
pub use subscriber::{
    CloseReason, DeliveryOutcome, DeliveryQueue, MessageFeed, SessionId, Subscriber,
};
