use crate::consts::{
    HEADER_FORWARDED_FOR, HEADER_RETRY_AFTER, HEADER_USER_ID, METRIC_RATE_LIMITER_ACTIVE_CLIENTS,
    METRIC_RATE_LIMITER_DECISIONS,
};
use crate::controller::json_response;
use crate::ServiceContext;
use common::gate::{CallerIdentity, Gate, Rejection};
use common::rate_limiter::{Decision, RateLimiter};
use volo::context::Context;
use volo::net::Address;
use volo_http::context::ServerContext;
use volo_http::http::{HeaderMap, StatusCode, Uri};
use volo_http::request::ServerRequest;
use volo_http::response::ServerResponse;
use volo_http::server::middleware::Next;
use volo_http::server::IntoResponse;
use volo_http::utils::Extension;

/// 连接对端地址, 只取ip, 端口每个连接都不一样
fn peer_address(cx: &ServerContext) -> Option<String> {
    match cx.rpc_info().caller().address()? {
        Address::Ip(sa) => Some(sa.ip().to_string()),
        other => Some(other.to_string()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 解析调用方身份: 经过代理时以 x-forwarded-for 的第一跳为准
pub fn caller_identity(headers: &HeaderMap, peer: Option<String>) -> CallerIdentity {
    let forwarded = header_str(headers, HEADER_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let principal = header_str(headers, HEADER_USER_ID).map(|v| v.trim().to_string());
    CallerIdentity::new(forwarded.or(peer), principal)
}

/// 被限流时的响应: 429 + Retry-After
pub fn rejection_response(rejection: &Rejection) -> ServerResponse {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &[(HEADER_RETRY_AFTER, rejection.retry_after.to_string())],
        rejection,
    )
}

fn record_decision(decision: Decision) {
    metrics::counter!(METRIC_RATE_LIMITER_DECISIONS, "decision" => decision.as_str()).increment(1);
}

/// 先过全局限流, 再过接口限流, 两者使用同一个客户端key
pub fn admit(
    ctx: &ServiceContext,
    caller: &CallerIdentity,
    path: &str,
    method: &str,
) -> Result<(), Rejection> {
    ctx.default_gate.admit(caller)?;

    if let Some(l) = ctx.endpoint_limiters.get(path, method) {
        Gate::new(l, ctx.default_gate.strategy())
            .with_retry_after(ctx.retry_after)
            .admit(caller)?;
    }
    Ok(())
}

pub async fn do_rate_limiter(
    uri: Uri,
    Extension(ctx): Extension<ServiceContext>,
    cx: &mut ServerContext,
    mut req: ServerRequest,
    next: Next,
) -> Result<ServerResponse, StatusCode> {
    let caller = caller_identity(req.headers(), peer_address(cx));
    req.extensions_mut().insert(caller.clone());
    if !ctx.limiter_enabled {
        return Ok(next.run(cx, req).await.into_response());
    }

    let method = req.method().as_str().to_lowercase();
    let ret = admit(&ctx, &caller, uri.path(), method.as_str());

    metrics::gauge!(METRIC_RATE_LIMITER_ACTIVE_CLIENTS)
        .set(ctx.default_gate.limiter().stats().active_clients as f64);

    if let Err(rejection) = ret {
        record_decision(Decision::Denied);
        tracing::debug!("{} {} rate limited for {:?}", method, uri.path(), caller);
        return Ok(rejection_response(&rejection));
    }
    record_decision(Decision::Allowed);

    Ok(next.run(cx, req).await.into_response())
}
