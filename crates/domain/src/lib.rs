//! 聊天系统核心领域模型
//!
//! 包含聊天、成员、消息、在线状态等持久化实体，以及仓储接口与错误类型。

pub mod chat;
pub mod errors;
pub mod message;
pub mod presence;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use chat::*;
pub use errors::*;
pub use message::*;
pub use presence::*;
pub use repositories::*;
pub use value_objects::*;
