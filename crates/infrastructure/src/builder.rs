use std::sync::Arc;
use std::time::Duration;

use application::{
    memory::{InMemoryChatRepository, InMemoryPresenceRepository, StaticUserDirectory},
    DirectoryError, UserDirectory,
};
use domain::{ChatRepository, PresenceRepository};
use thiserror::Error;

use crate::{
    directory::HttpUserDirectory,
    migrations::MIGRATOR,
    presence::RedisPresenceRepository,
    repository::{create_pg_pool, PgChatRepository},
};

/// 适配器选择：URL 为空时退回内存实现
#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
    pub redis_url: String,
    pub auth_base_url: String,
    pub auth_timeout: Duration,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 5,
            run_migrations: true,
            redis_url: String::new(),
            auth_base_url: String::new(),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("user directory error: {0}")]
    Directory(#[from] DirectoryError),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub chat_repository: Arc<dyn ChatRepository>,
    pub presence_repository: Arc<dyn PresenceRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
}

impl Infrastructure {
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let chat_repository: Arc<dyn ChatRepository> = if config.database_url.is_empty() {
            tracing::warn!("database url not configured, using in-memory chat repository");
            Arc::new(InMemoryChatRepository::new())
        } else {
            let pool = create_pg_pool(&config.database_url, config.max_connections).await?;
            if config.run_migrations {
                MIGRATOR.run(&pool).await?;
                tracing::info!("database migrations applied");
            }
            Arc::new(PgChatRepository::new(pool))
        };

        let presence_repository: Arc<dyn PresenceRepository> = if config.redis_url.is_empty() {
            tracing::warn!("redis url not configured, using in-memory presence");
            Arc::new(InMemoryPresenceRepository::default())
        } else {
            Arc::new(RedisPresenceRepository::connect(&config.redis_url).await?)
        };

        let user_directory: Arc<dyn UserDirectory> = if config.auth_base_url.is_empty() {
            tracing::warn!("auth service url not configured, user directory is empty");
            Arc::new(StaticUserDirectory::default())
        } else {
            Arc::new(HttpUserDirectory::new(
                &config.auth_base_url,
                config.auth_timeout,
            )?)
        };

        Ok(Self {
            chat_repository,
            presence_repository,
            user_directory,
        })
    }
}
