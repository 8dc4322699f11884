use crate::controller::R;
use crate::ServiceContext;
use common::rate_limiter::{LimiterStats, RateLimiter};
use serde::Serialize;
use std::collections::BTreeMap;
use volo_http::utils::Extension;

#[derive(Debug, Serialize)]
pub struct LimiterStatsView {
    pub default: LimiterStats,
    pub checkout: LimiterStats,
    pub endpoints: BTreeMap<String, LimiterStats>,
}

/// 限流器运行状态
pub async fn get_stats(Extension(ctx): Extension<ServiceContext>) -> R<LimiterStatsView> {
    R::ok(LimiterStatsView {
        default: ctx.default_gate.limiter().stats(),
        checkout: ctx.checkout_gate.limiter().stats(),
        endpoints: ctx.endpoint_limiters.stats().into_iter().collect(),
    })
}

pub async fn ping() -> &'static str {
    "pong"
}
