//! JWT 认证模块
//!
//! 校验认证服务签发的 HS256 token，测试与工具场景下也可以签发。

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    #[serde(default)]
    pub role: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 已认证的调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
    pub role: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: UserId::new(claims.sub),
            username: claims.username,
            role: claims.role,
        }
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(
        &self,
        user_id: UserId,
        username: &str,
        role: &str,
    ) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: user_id.value(),
            username: username.to_string(),
            role: role.to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<AuthUser, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| AuthUser::from(token_data.claims))
            .map_err(|err| ApiError::unauthorized(format!("invalid token: {err}")))
    }

    /// 从 Authorization 头中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("invalid authorization header format"))?;

        self.verify_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};

    fn service(secret: &str) -> JwtService {
        JwtService::new(JwtConfig {
            secret: secret.to_string(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let jwt = service("unit-test-secret-that-is-long-enough");
        let token = jwt.generate_token(UserId::new(42), "alice", "user").unwrap();

        let user = jwt.verify_token(&token).unwrap();
        assert_eq!(user.user_id, UserId::new(42));
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, "user");
    }

    #[test]
    fn token_signed_with_other_secret_is_unauthorized() {
        let token = service("first-secret-that-is-long-enough-xx")
            .generate_token(UserId::new(1), "alice", "user")
            .unwrap();

        let err = service("second-secret-that-is-long-enough-x")
            .verify_token(&token)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn header_without_bearer_prefix_is_rejected() {
        let jwt = service("unit-test-secret-that-is-long-enough");
        let mut headers = HeaderMap::new();
        assert_eq!(
            jwt.extract_user_from_headers(&headers).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(
            jwt.extract_user_from_headers(&headers).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
