mod chat_management;
mod chat_service;
mod presence_service;

pub use chat_management::{CreateChatRequest, DirectChat};
pub use chat_service::{
    ChatService, ChatServiceDependencies, ChatSettings, SendMessageRequest, HISTORY_UNAVAILABLE,
    SYSTEM_SENDER,
};
pub use presence_service::{PresenceService, PresenceServiceDependencies};
