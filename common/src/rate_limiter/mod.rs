pub mod endpoint_rate_limiter;
pub mod memory_rate_limiter;

use serde::{Deserialize, Serialize};

/// 每个桶位粗略占用的内存(字节): key字符串 + 两个f64 + HashMap开销
pub const BUCKET_COST_BYTES: usize = 128;

/// 限流器配置, 构建后不可变
///
/// * rate: 每 `per` 秒补充的令牌数
/// * per: 补充周期, 单位为秒
/// * burst: 桶的最大容量
/// * cleanup_interval: 清理空闲桶位的周期, 单位为秒
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub rate: f64,
    pub per: f64,
    pub burst: f64,
    pub cleanup_interval: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            per: 1.0,
            burst: 20.0,
            cleanup_interval: 3600.0,
        }
    }
}

impl RateLimiterConfig {
    pub fn new(rate: f64, per: f64, burst: f64, cleanup_interval: f64) -> Self {
        Self {
            rate,
            per,
            burst,
            cleanup_interval,
        }
    }

    /// 每秒补充的令牌数, per 非法时不补充
    pub fn refill_per_sec(&self) -> f64 {
        if self.per > 0.0 && self.per.is_finite() {
            self.rate / self.per
        } else {
            0.0
        }
    }

    /// 负数或非有限值一律按0处理; burst=0 即永远拒绝, rate=0 即永不补充。
    /// cleanup_interval 例外: 为0时每次请求都会清掉自己的桶位, 限流失效, 因此退回默认值
    pub(crate) fn sanitized(self) -> Self {
        fn clamp_interval(v: f64) -> f64 {
            if v.is_finite() && v > 0.0 {
                v
            } else {
                let d = RateLimiterConfig::default().cleanup_interval;
                tracing::warn!("rate limiter cleanup_interval cannot be {}, force set to {}", v, d);
                d
            }
        }
        fn clamp(name: &str, v: f64) -> f64 {
            if v.is_finite() && v >= 0.0 {
                v
            } else {
                tracing::warn!("rate limiter {} cannot be {}, force set to 0", name, v);
                0.0
            }
        }
        Self {
            rate: clamp("rate", self.rate),
            per: clamp("per", self.per),
            burst: clamp("burst", self.burst),
            cleanup_interval: clamp_interval(self.cleanup_interval),
        }
    }
}

/// 准入检查结果; 拒绝不是错误, 是限流的正常结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Denied => "denied",
        }
    }
}

/// 限流器运行状态快照, 允许轻微过期
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LimiterStats {
    pub active_clients: usize,
    pub memory_usage_estimate: usize,
    pub last_cleanup_time: f64,
    pub cleanup_interval: f64,
}

pub trait RateLimiter: Send + Sync {
    /// 为 key 尝试获取一个令牌, 不会阻塞等待
    fn try_acquire(&self, key: &str) -> Decision;
    fn get_config(&self) -> &RateLimiterConfig;
    fn stats(&self) -> LimiterStats;
}

/// 当前秒级时间戳(带小数)
#[inline]
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
