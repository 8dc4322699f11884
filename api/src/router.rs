use crate::prometheus::track_metrics;
use crate::rate_limiter::do_rate_limiter;
use crate::{controller, ServiceContext};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::ready;
use volo_http::{
    response::Response,
    server::{
        middleware,
        route::{get, post},
        IntoResponse,
    },
    utils::Extension,
    Router,
};

/// 构建路由, metrics_handle 为空时不暴露 /metrics
pub fn build_router(cxt: ServiceContext, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new();
    if let Some(handle) = metrics_handle {
        router = router.route("/metrics", get(move || ready(handle.render())));
    }

    router
        .route("/ping", get(controller::limiter_controller::ping))
        .route(
            "/limiter/stats",
            get(controller::limiter_controller::get_stats),
        )
        .route(
            "/item/query-one",
            get(controller::item_controller::get_item),
        )
        .route(
            "/item/checkout",
            post(controller::item_controller::checkout_item),
        )
        .layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(do_rate_limiter))
        .layer(middleware::map_response(headers_map_response))
        .layer(Extension(cxt))
}

async fn headers_map_response(response: Response) -> impl IntoResponse {
    (
        [
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Headers", "*"),
            ("Access-Control-Allow-Method", "*"),
        ],
        response,
    )
}
