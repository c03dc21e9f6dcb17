//! HTTP 请求指标
//!
//! 请求计数（按方法、路由、状态码）、耗时直方图与进行中请求数，
//! 由全局 Prometheus recorder 收集，通过 `/metrics` 暴露。

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const HTTP_REQUESTS_TOTAL: &str = "chat_server_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "chat_server_http_request_duration_seconds";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "chat_server_http_requests_in_flight";

const DURATION_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// 不计入指标的路径
const SKIPPED_PATHS: [&str; 2] = ["/health", "/metrics"];

static METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// 安装全局 recorder，重复调用返回同一个结果
pub fn init_metrics() -> bool {
    METRICS_HANDLE
        .get_or_init(|| match install_recorder() {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(error = %err, "failed to install metrics recorder");
                None
            }
        })
        .is_some()
}

fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &DURATION_BUCKETS,
        )?
        .install_recorder()
}

pub(crate) fn render_metrics() -> Option<String> {
    METRICS_HANDLE
        .get()
        .and_then(Option::as_ref)
        .map(PrometheusHandle::render)
}

struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// 路由模板作为标签；未匹配任何路由的请求统一记为 `not_found`
fn route_label(req: &Request<Body>) -> Option<String> {
    if SKIPPED_PATHS.contains(&req.uri().path()) {
        return None;
    }
    Some(
        req.extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| "not_found".to_string()),
    )
}

pub(crate) async fn metrics_layer(req: Request<Body>, next: Next) -> Response {
    let Some(route) = route_label(&req) else {
        return next.run(req).await;
    };

    let method = req.method().as_str().to_string();
    let start = Instant::now();
    let _in_flight = InFlightGuard::enter();
    let response = next.run(req).await;
    register_http_request(&method, &route, response.status(), start.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn health_and_metrics_paths_are_not_measured() {
        assert_eq!(route_label(&request("/health")), None);
        assert_eq!(route_label(&request("/metrics")), None);
    }

    #[test]
    fn unmatched_paths_share_one_label() {
        assert_eq!(
            route_label(&request("/api/v1/chats/42/unknown")).as_deref(),
            Some("not_found")
        );
    }
}
