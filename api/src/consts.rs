/// 鉴权层写入的登录用户id
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

pub const METRIC_HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const METRIC_HTTP_REQUESTS_DURATION: &str = "http_requests_duration_seconds";
pub const METRIC_RATE_LIMITER_DECISIONS: &str = "rate_limiter_decisions_total";
pub const METRIC_RATE_LIMITER_ACTIVE_CLIENTS: &str = "rate_limiter_active_clients";
