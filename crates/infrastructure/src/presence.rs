//! Redis 实现的全局在线状态
//!
//! `presence:user:{id}` 是带 60 秒 TTL 的在线标记，心跳不断刷新它；
//! `lastseen:user:{id}` 记录最近一次心跳的 unix 秒数，保留 30 天。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{PresenceRepository, RepositoryError, UserId, UserPresence};
use redis::aio::ConnectionManager;

const PRESENCE_PREFIX: &str = "presence:user:";
const LAST_SEEN_PREFIX: &str = "lastseen:user:";
const ONLINE_TTL_SECS: u64 = 60;
const LAST_SEEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

fn map_redis_err(err: redis::RedisError) -> RepositoryError {
    RepositoryError::storage(format!("Redis operation failed: {err}"))
}

fn presence_key(user_id: UserId) -> String {
    format!("{PRESENCE_PREFIX}{user_id}")
}

fn last_seen_key(user_id: UserId) -> String {
    format!("{LAST_SEEN_PREFIX}{user_id}")
}

#[derive(Clone)]
pub struct RedisPresenceRepository {
    connection: ConnectionManager,
}

impl RedisPresenceRepository {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }

    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PresenceRepository for RedisPresenceRepository {
    async fn set_online(&self, user_id: UserId) -> Result<(), RepositoryError> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp();

        let _: () = redis::pipe()
            .set_ex(presence_key(user_id), "1", ONLINE_TTL_SECS)
            .ignore()
            .set_ex(last_seen_key(user_id), now, LAST_SEEN_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        tracing::debug!(user_id = %user_id, "presence heartbeat recorded");
        Ok(())
    }

    async fn get_presence(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<UserPresence>, RepositoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for &user_id in &user_ids {
            pipe.exists(presence_key(user_id)).get(last_seen_key(user_id));
        }

        let replies: Vec<(bool, Option<i64>)> = {
            let flat: Vec<redis::Value> = pipe.query_async(&mut conn).await.map_err(map_redis_err)?;
            flat.chunks(2)
                .map(|pair| {
                    let online = pair
                        .first()
                        .and_then(|v| redis::from_redis_value::<bool>(v).ok())
                        .unwrap_or(false);
                    let last_seen = pair
                        .get(1)
                        .and_then(|v| redis::from_redis_value::<Option<i64>>(v).ok())
                        .flatten();
                    (online, last_seen)
                })
                .collect()
        };

        Ok(user_ids
            .into_iter()
            .zip(replies)
            .map(|(user_id, (is_online, last_seen))| UserPresence {
                user_id,
                is_online,
                last_seen_at: last_seen.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            })
            .collect())
    }
}
