//! 准入网关: 解析客户端key, 做限流判断, 通过才执行被保护的操作
//!
//! 被限流不是错误, 调用方拿到的是一个结构化的 [`Rejection`], 被保护操作自身的返回值原样透传。

use crate::rate_limiter::{Decision, RateLimiter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 300;
/// 取不到任何客户端标识时使用的兜底key
pub const ANONYMOUS_KEY: &str = "anonymous";

/// 客户端key的解析策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// 按网络地址
    #[default]
    ByAddress,
    /// 按登录用户, 没有用户时退回网络地址
    ByPrincipal,
}

/// 调用方身份, 由传输层和鉴权层提供
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub address: Option<String>,
    pub principal: Option<String>,
}

impl CallerIdentity {
    pub fn new(address: Option<String>, principal: Option<String>) -> Self {
        // 空字符串视为没有
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            address: non_empty(address),
            principal: non_empty(principal),
        }
    }

    pub fn from_address(address: impl Into<String>) -> Self {
        Self::new(Some(address.into()), None)
    }
}

impl KeyStrategy {
    pub fn resolve(&self, caller: &CallerIdentity) -> String {
        if let (KeyStrategy::ByPrincipal, Some(p)) = (self, &caller.principal) {
            return format!("user:{}", p);
        }
        match &caller.address {
            Some(addr) => format!("ip:{}", addr),
            None => ANONYMOUS_KEY.to_string(),
        }
    }
}

/// 限流拒绝结果, 由传输层转换成 429
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: &'static str,
    pub message: String,
    pub retry_after: u64,
}

impl Rejection {
    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: RATE_LIMIT_EXCEEDED,
            message: "Rate limit exceeded. Please try again later.".to_string(),
            retry_after,
        }
    }
}

#[derive(Clone)]
pub struct Gate {
    limiter: Arc<dyn RateLimiter>,
    strategy: KeyStrategy,
    retry_after: u64,
}

impl Gate {
    pub fn new(limiter: Arc<dyn RateLimiter>, strategy: KeyStrategy) -> Self {
        Self {
            limiter,
            strategy,
            retry_after: DEFAULT_RETRY_AFTER_SECS,
        }
    }

    pub fn with_retry_after(mut self, retry_after: u64) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// 只做准入判断
    pub fn admit(&self, caller: &CallerIdentity) -> Result<(), Rejection> {
        let key = self.strategy.resolve(caller);
        match self.limiter.try_acquire(&key) {
            Decision::Allowed => Ok(()),
            Decision::Denied => {
                tracing::debug!("rate limit denied for {}", key);
                Err(Rejection::rate_limited(self.retry_after))
            }
        }
    }

    /// 把一个操作包装成受限流保护的操作, 保留它的名字和说明
    pub fn protect<F>(&self, name: &'static str, doc: &'static str, op: F) -> Protected<F> {
        Protected {
            gate: self.clone(),
            name,
            doc,
            op,
        }
    }
}

/// 受保护的操作
///
/// 参数原样传给内部操作; 内部操作返回 future 时, 被拒绝的请求不会创建这个 future。
pub struct Protected<F> {
    gate: Gate,
    name: &'static str,
    doc: &'static str,
    op: F,
}

impl<F> Protected<F> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn doc(&self) -> &'static str {
        self.doc
    }

    pub fn call<A, R>(&self, caller: &CallerIdentity, args: A) -> Result<R, Rejection>
    where
        F: Fn(A) -> R,
    {
        self.gate.admit(caller)?;
        Ok((self.op)(args))
    }
}

#[cfg(test)]
mod gate_test {
    use super::*;
    use crate::rate_limiter::memory_rate_limiter::MemoryRateLimiter;
    use crate::rate_limiter::RateLimiterConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(burst: f64, strategy: KeyStrategy) -> (Arc<MemoryRateLimiter>, Gate) {
        let l = Arc::new(MemoryRateLimiter::new(RateLimiterConfig::new(
            0.0, 1.0, burst, 3600.0,
        )));
        let g = Gate::new(l.clone(), strategy);
        (l, g)
    }

    #[test]
    fn test_resolve_key() {
        let both = CallerIdentity::new(Some("10.0.0.1".into()), Some("42".into()));
        let addr_only = CallerIdentity::from_address("10.0.0.1");
        let none = CallerIdentity::new(Some("".into()), Some("  ".into()));

        assert_eq!(KeyStrategy::ByAddress.resolve(&both), "ip:10.0.0.1");
        assert_eq!(KeyStrategy::ByPrincipal.resolve(&both), "user:42");
        assert_eq!(KeyStrategy::ByPrincipal.resolve(&addr_only), "ip:10.0.0.1");
        assert_eq!(KeyStrategy::ByPrincipal.resolve(&none), ANONYMOUS_KEY);
        assert_eq!(KeyStrategy::ByAddress.resolve(&none), ANONYMOUS_KEY);
    }

    #[test]
    fn test_denied_does_not_run_op() {
        let (_l, g) = gate(1.0, KeyStrategy::ByAddress);
        let caller = CallerIdentity::from_address("10.0.0.1");
        let runs = AtomicUsize::new(0);
        let op = g.protect("count", "", |n: usize| runs.fetch_add(1, Ordering::SeqCst) + n);

        assert_eq!(op.call(&caller, 100), Ok(100));
        assert_eq!(
            op.call(&caller, 100),
            Err(Rejection::rate_limited(DEFAULT_RETRY_AFTER_SECS))
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_op_result_passes_through() {
        let (_l, g) = gate(5.0, KeyStrategy::ByAddress);
        let caller = CallerIdentity::from_address("10.0.0.1");
        let op = g.protect("fail", "", |msg: &str| -> Result<u32, String> { Err(msg.to_string()) });
        assert_eq!(op.call(&caller, "boom"), Ok(Err("boom".to_string())));
    }

    #[test]
    fn test_rejection_fields() {
        let (_l, g) = gate(0.0, KeyStrategy::ByAddress);
        let g = g.with_retry_after(60);
        let rej = g.admit(&CallerIdentity::default()).unwrap_err();
        assert_eq!(rej.code, RATE_LIMIT_EXCEEDED);
        assert_eq!(rej.retry_after, 60);
        assert!(!rej.message.is_empty());
    }

    #[test]
    fn test_principal_and_address_buckets_are_separate() {
        let (l, g) = gate(1.0, KeyStrategy::ByPrincipal);
        let user = CallerIdentity::new(Some("10.0.0.1".into()), Some("7".into()));
        let anon = CallerIdentity::from_address("10.0.0.1");
        assert!(g.admit(&user).is_ok());
        assert!(g.admit(&user).is_err());
        assert!(g.admit(&anon).is_ok());
        assert_eq!(l.tokens("user:7"), Some(0.0));
        assert_eq!(l.tokens("ip:10.0.0.1"), Some(0.0));
    }

    #[test]
    fn test_protected_keeps_metadata_and_args() {
        let (_l, g) = gate(2.0, KeyStrategy::ByAddress);
        let add = g.protect("add", "Adds two numbers.", |(a, b): (i32, i32)| a + b);
        assert_eq!(add.name(), "add");
        assert_eq!(add.doc(), "Adds two numbers.");

        let caller = CallerIdentity::from_address("10.0.0.2");
        assert_eq!(add.call(&caller, (1, 2)), Ok(3));
        assert_eq!(add.call(&caller, (3, 4)), Ok(7));
        assert!(add.call(&caller, (5, 6)).is_err());
    }

    #[tokio::test]
    async fn test_protected_async_op() {
        let (_l, g) = gate(1.0, KeyStrategy::ByAddress);
        let double = g.protect("double", "", |x: u64| async move { x * 2 });
        let caller = CallerIdentity::from_address("10.0.0.4");
        let fut = double.call(&caller, 21).unwrap();
        assert_eq!(fut.await, 42);

        // 被拒绝时不会创建 future
        let created = AtomicUsize::new(0);
        let tracked = g.protect("tracked", "", |x: u64| {
            created.fetch_add(1, Ordering::SeqCst);
            async move { x }
        });
        assert!(tracked.call(&caller, 1).is_err());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }
}
