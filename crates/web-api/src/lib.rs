//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务，
//! 并在 `/metrics` 暴露请求指标。

mod auth;
mod error;
mod observability;
mod routes;
mod state;
mod ws_connection;

pub use auth::{AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use observability::init_metrics;
pub use routes::router;
pub use state::AppState;
