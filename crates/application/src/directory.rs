//! 认证服务用户目录端口

use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub username: String,
}

/// 一次批量用户名查询的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLookup {
    pub found: Vec<DirectoryUser>,
    pub not_found: Vec<String>,
}

impl UserLookup {
    pub fn find(&self, username: &str) -> Option<&DirectoryUser> {
        self.found.iter().find(|user| user.username == username)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
    #[error("user directory returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// 按用户名解析用户身份
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn check_users_exist(&self, usernames: &[String]) -> Result<UserLookup, DirectoryError>;
}
