//! 全局在线状态存储接口

use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::presence::UserPresence;
use crate::value_objects::UserId;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    /// 记录一次心跳：刷新在线标记的 TTL 并更新最后在线时间
    async fn set_online(&self, user_id: UserId) -> Result<(), RepositoryError>;

    /// 批量查询在线状态，结果顺序与输入一致
    async fn get_presence(&self, user_ids: Vec<UserId>)
        -> Result<Vec<UserPresence>, RepositoryError>;
}
