//! 基础设施层实现。
//!
//! 提供 PostgreSQL 聊天仓储、Redis 在线状态、认证服务用户目录等适配器，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod directory;
pub mod migrations;
pub mod presence;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use directory::HttpUserDirectory;
pub use migrations::MIGRATOR;
pub use presence::RedisPresenceRepository;
pub use repository::{create_pg_pool, PgChatRepository};
