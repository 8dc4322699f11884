pub mod app_config;
pub mod consts;
pub mod prometheus;
pub mod router;

pub mod controller;
pub mod inventory;
pub mod rate_limiter;

use app_config::RateLimitSection;
use common::gate::Gate;
use common::rate_limiter::endpoint_rate_limiter::EndpointLimiters;
use common::rate_limiter::memory_rate_limiter::MemoryRateLimiter;
use common::rate_limiter::RateLimiter;
use inventory::Inventory;
use std::sync::Arc;

/// 这个结构体里面放每个请求都要用到的共享组件, 进程启动时构建一次
#[derive(Clone)]
pub struct ServiceContext {
    pub limiter_enabled: bool,
    pub retry_after: u64,
    /// 全局限流
    pub default_gate: Gate,
    /// 借出接口额外的限流
    pub checkout_gate: Gate,
    pub endpoint_limiters: Arc<EndpointLimiters>,
    pub inventory: Arc<Inventory>,
}

impl ServiceContext {
    pub fn new(section: &RateLimitSection, inventory: Inventory) -> Self {
        let default_limiter = Arc::new(MemoryRateLimiter::new(section.default.clone()));
        let checkout_limiter = Arc::new(MemoryRateLimiter::new(section.checkout.clone()));
        let endpoint_limiters = EndpointLimiters::new(
            section.url_rate.as_slice(),
            section.default.cleanup_interval,
        );
        Self {
            limiter_enabled: section.enabled,
            retry_after: section.retry_after,
            default_gate: Gate::new(default_limiter, section.key_strategy)
                .with_retry_after(section.retry_after),
            checkout_gate: Gate::new(checkout_limiter, section.key_strategy)
                .with_retry_after(section.retry_after),
            endpoint_limiters: Arc::new(endpoint_limiters),
            inventory: Arc::new(inventory),
        }
    }

    /// 重新加载接口限流配置; 全局和借出限流器在启动后不可变, 修改它们需要重启
    pub fn reload(&self, section: &RateLimitSection) {
        if *self.default_gate.limiter().get_config() != section.default {
            tracing::warn!("rate_limiter.default changed, restart to apply");
        }
        self.endpoint_limiters.reset(
            section.url_rate.as_slice(),
            section.default.cleanup_interval,
        );
        tracing::info!(
            "reload endpoint rate limiters, {} active",
            self.endpoint_limiters.len()
        );
    }
}
