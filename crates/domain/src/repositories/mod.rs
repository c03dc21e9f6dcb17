//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，内层定义接口，外层实现接口。

pub mod chat_repository;
pub mod presence_repository;

pub use chat_repository::ChatRepository;
pub use presence_repository::PresenceRepository;

#[cfg(feature = "testing")]
pub use chat_repository::MockChatRepository;
#[cfg(feature = "testing")]
pub use presence_repository::MockPresenceRepository;
