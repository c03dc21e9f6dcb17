//! 统一配置中心
//!
//! 分层加载：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> 环境变量（`APP_` 前缀，
//! `__` 分隔嵌套字段），加载后用 `validator` 校验。
//! 数据库或 Redis 地址留空时使用内存实现。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 开发用默认密钥，仅用于本地运行
pub const DEV_JWT_SECRET: &str = "local-development-jwt-secret-change-before-deploy";

fn validate_optional_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.contains("://") {
        Ok(())
    } else {
        Err(ValidationError::new("url"))
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置，`url` 为空表示使用内存仓储
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(custom(function = "validate_optional_url"))]
    pub url: String,
    #[validate(range(min = 1, max = 200))]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Redis 配置，`url` 为空表示使用内存在线状态
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct RedisConfig {
    #[validate(custom(function = "validate_optional_url"))]
    pub url: String,
}

/// JWT 配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

/// 实时房间引擎参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    #[validate(range(min = 1, max = 10000))]
    pub subscriber_queue_capacity: usize,
    #[validate(range(min = 0, max = 1000))]
    pub history_limit: i64,
}

/// 认证服务（用户目录）配置，`base_url` 为空时用户目录为空
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthServiceConfig {
    #[validate(custom(function = "validate_optional_url"))]
    pub base_url: String,
    #[validate(range(min = 1, max = 120))]
    pub timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    #[validate(nested)]
    pub auth: AuthServiceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                run_migrations: true,
            },
            redis: RedisConfig::default(),
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.into(),
                expiration_hours: 24,
            },
            chat: ChatConfig {
                subscriber_queue_capacity: 100,
                history_limit: 50,
            },
            auth: AuthServiceConfig {
                base_url: String::new(),
                timeout_seconds: 5,
            },
        }
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

impl AppConfig {
    /// 默认值 -> 可选文件 -> 环境变量
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut copy = self.clone();
        copy.jwt.secret = "[REDACTED]".into();
        copy.database.url = redact_credentials(&copy.database.url);
        copy.redis.url = redact_credentials(&copy.redis.url);
        format!("{copy:?}")
    }
}

/// 去掉 URL 中 `scheme://user:pass@` 的凭据部分
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[REDACTED]@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_empty());
        assert_eq!(config.chat.subscriber_queue_capacity, 100);
        assert_eq!(config.chat.history_limit, 50);
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_SERVER__PORT", "9000");
            jail.set_env("APP_CHAT__SUBSCRIBER_QUEUE_CAPACITY", "16");
            jail.set_env("APP_DATABASE__URL", "postgres://chat:secret@db:5432/chat");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.chat.subscriber_queue_capacity, 16);
            assert_eq!(config.database.url, "postgres://chat:secret@db:5432/chat");
            Ok(())
        });
    }

    #[test]
    fn config_file_is_layered_below_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.toml",
                r#"
                [server]
                host = "0.0.0.0"
                port = 7000

                [chat]
                subscriber_queue_capacity = 32
                history_limit = 10
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "app.toml");
            jail.set_env("APP_SERVER__PORT", "7001");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 7001);
            assert_eq!(config.chat.history_limit, 10);
            Ok(())
        });
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_JWT__SECRET", "short");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = AppConfig::default();
        config.chat.subscriber_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_url_is_rejected() {
        let mut config = AppConfig::default();
        config.redis.url = "not a url".into();
        assert!(config.validate().is_err());
        config.redis.url = "redis://cache:6379".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sanitize_hides_credentials() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://chat:hunter2@db:5432/chat".into();
        let text = config.sanitize();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains(DEV_JWT_SECRET));
        assert!(text.contains("db:5432/chat"));
    }
}
