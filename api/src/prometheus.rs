use crate::consts::{METRIC_HTTP_REQUESTS_DURATION, METRIC_HTTP_REQUESTS_TOTAL};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;
use volo_http::context::ServerContext;
use volo_http::http::{StatusCode, Uri};
use volo_http::request::ServerRequest;
use volo_http::response::ServerResponse;
use volo_http::server::middleware::Next;
use volo_http::server::IntoResponse;

const EXPONENTIAL_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// 安装全局的 prometheus recorder, 进程内只能调用一次
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(METRIC_HTTP_REQUESTS_DURATION.to_string()),
            EXPONENTIAL_SECONDS,
        )
        .context("set buckets for metric failed")?
        .install_recorder()
        .context("install prometheus recorder failed")
}

/// 记录请求数和耗时
pub async fn track_metrics(
    uri: Uri,
    cx: &mut ServerContext,
    req: ServerRequest,
    next: Next,
) -> Result<ServerResponse, StatusCode> {
    let start = Instant::now();
    let path = uri.path().to_string();
    let method = req.method().to_string();

    let response = next.run(cx, req).await.into_response();

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let labels = [("method", method), ("path", path), ("status", status)];

    metrics::counter!(METRIC_HTTP_REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(METRIC_HTTP_REQUESTS_DURATION, &labels).record(latency);

    Ok(response)
}
