use std::sync::Arc;

use domain::{PresenceRepository, UserId};

use crate::{dto::FriendPresenceDto, error::ApplicationError};

pub struct PresenceServiceDependencies {
    pub presence_repository: Arc<dyn PresenceRepository>,
}

/// 全局在线状态：心跳与好友在线查询
pub struct PresenceService {
    deps: PresenceServiceDependencies,
}

impl PresenceService {
    pub fn new(deps: PresenceServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn heartbeat(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.deps
            .presence_repository
            .set_online(user_id)
            .await
            .map_err(|err| {
                tracing::error!(user_id = %user_id, error = %err, "failed to set online");
                err.into()
            })
    }

    pub async fn friends_presence(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<FriendPresenceDto>, ApplicationError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let presences = self
            .deps
            .presence_repository
            .get_presence(user_ids)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "failed to get presence");
                err
            })?;
        Ok(presences.into_iter().map(FriendPresenceDto::from).collect())
    }
}
