//! 主应用程序入口
//!
//! 加载配置、装配基础设施与应用服务，启动 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    ChatService, ChatServiceDependencies, ChatSettings, PresenceService,
    PresenceServiceDependencies, SystemClock,
};
use axum::http::HeaderValue;
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use web_api::{init_metrics, router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if !init_metrics() {
        tracing::warn!("request metrics disabled");
    }

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");
    if config.uses_dev_secret() {
        tracing::warn!("using built-in development JWT secret, set APP_JWT__SECRET in production");
    }

    let infrastructure = Infrastructure::connect(InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        run_migrations: config.database.run_migrations,
        redis_url: config.redis.url.clone(),
        auth_base_url: config.auth.base_url.clone(),
        auth_timeout: Duration::from_secs(config.auth.timeout_seconds),
    })
    .await
    .context("failed to connect infrastructure")?;

    let chat_service = ChatService::new(ChatServiceDependencies {
        chat_repository: infrastructure.chat_repository,
        user_directory: infrastructure.user_directory,
        clock: Arc::new(SystemClock),
        settings: ChatSettings {
            subscriber_queue_capacity: config.chat.subscriber_queue_capacity,
            history_limit: config.chat.history_limit,
        },
    });
    let presence_service = PresenceService::new(PresenceServiceDependencies {
        presence_repository: infrastructure.presence_repository,
    });
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::new(chat_service),
        Arc::new(presence_service),
        jwt_service,
        shutdown.clone(),
    );

    let app = router(state).layer(cors_layer(&config.server.cors_origins));
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    tracing::info!(address = %bind_address, "chat server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // 通知所有 WebSocket 会话发送关闭帧并退出
            shutdown.cancel();
        })
        .await?;

    tracing::info!("chat server stopped");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
