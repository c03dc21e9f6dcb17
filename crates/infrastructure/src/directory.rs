//! 通过 HTTP 调用认证服务的用户目录

use std::time::Duration;

use application::{DirectoryError, DirectoryUser, UserDirectory, UserLookup};
use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct CheckUsersRequest<'a> {
    usernames: &'a [String],
}

#[derive(Debug, Deserialize)]
struct FoundUser {
    id: i64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct CheckUsersResponse {
    #[serde(default)]
    found_users: Vec<FoundUser>,
    #[serde(default)]
    not_found_users: Vec<String>,
}

#[derive(Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/users/check", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn check_users_exist(&self, usernames: &[String]) -> Result<UserLookup, DirectoryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CheckUsersRequest { usernames })
            .send()
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, endpoint = %self.endpoint, "auth service rejected user check");
            return Err(DirectoryError::Unavailable(format!("auth service returned {status}")));
        }

        let body: CheckUsersResponse = response
            .json()
            .await
            .map_err(|err| DirectoryError::InvalidResponse(err.to_string()))?;

        Ok(UserLookup {
            found: body
                .found_users
                .into_iter()
                .map(|user| DirectoryUser {
                    id: UserId::new(user.id),
                    username: user.username,
                })
                .collect(),
            not_found: body.not_found_users,
        })
    }
}
