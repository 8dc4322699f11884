//! 基于内存的限流组件-令牌桶算法实现
//!
//! 所有桶位共用一把互斥锁: 查找、创建、补充、扣减和清理都在锁内完成,
//! 因此同一个key上的并发请求不会出现丢失更新。
//! 令牌数内部是浮点数, 只有准入判断 (tokens >= 1) 是整数语义。

use crate::rate_limiter::{
    now_secs, Decision, LimiterStats, RateLimiter, RateLimiterConfig, BUCKET_COST_BYTES,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 单个客户端的令牌桶位
#[derive(Clone, Debug, PartialEq)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
}

impl Bucket {
    /// 新桶位直接给满容量, 避免冷启动被拒
    fn full(burst: f64, now: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
        }
    }

    /// 按流逝时间补充令牌, 时钟回拨时按0处理
    fn refill(&mut self, config: &RateLimiterConfig, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        let tokens_to_add = elapsed * config.refill_per_sec();
        self.tokens = (self.tokens + tokens_to_add).min(config.burst);
        self.last_refill = now;
    }
}

#[derive(Default)]
struct BucketStore {
    buckets: HashMap<String, Bucket>,
    last_cleanup: f64,
}

impl BucketStore {
    /// 删除 last_refill 早于 now - 2*cleanup_interval 的桶位, 返回删除数量
    fn evict_stale(&mut self, cleanup_interval: f64, now: f64) -> usize {
        let cutoff = now - 2.0 * cleanup_interval;
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.last_refill >= cutoff);
        self.last_cleanup = now;
        before - self.buckets.len()
    }
}

pub struct MemoryRateLimiter {
    config: RateLimiterConfig,
    store: Mutex<BucketStore>,
    // 以下两个字段只在锁内写, 读统计时不加锁
    active_clients: AtomicUsize,
    last_cleanup_bits: AtomicU64,
}

impl MemoryRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let config = config.sanitized();
        let now = now_secs();
        tracing::info!(
            "new memory rate limiter: rate={} per={}s burst={} cleanup_interval={}s",
            config.rate,
            config.per,
            config.burst,
            config.cleanup_interval
        );
        Self {
            config,
            store: Mutex::new(BucketStore {
                buckets: HashMap::new(),
                last_cleanup: now,
            }),
            active_clients: AtomicUsize::new(0),
            last_cleanup_bits: AtomicU64::new(now.to_bits()),
        }
    }

    /// 锁中毒时继续使用内部数据, 桶位的每次修改都是完整的
    fn lock_store(&self) -> MutexGuard<'_, BucketStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_stats(&self, store: &BucketStore) {
        self.active_clients
            .store(store.buckets.len(), Ordering::Release);
        self.last_cleanup_bits
            .store(store.last_cleanup.to_bits(), Ordering::Release);
    }

    /// 到达清理周期才扫描, 没有流量时不做任何清理
    fn maybe_cleanup(&self, store: &mut BucketStore, now: f64) {
        if now - store.last_cleanup < self.config.cleanup_interval {
            return;
        }
        let evicted = store.evict_stale(self.config.cleanup_interval, now);
        if evicted > 0 {
            tracing::info!(
                "rate limiter cleanup evicted {} buckets, {} remaining",
                evicted,
                store.buckets.len()
            );
        }
    }

    pub(crate) fn try_acquire_at(&self, key: &str, now: f64) -> Decision {
        let mut store = self.lock_store();
        self.maybe_cleanup(&mut store, now);

        let burst = self.config.burst;
        let bucket = store
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(burst, now));
        bucket.refill(&self.config, now);

        let decision = if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            Decision::Denied
        };
        self.publish_stats(&store);
        decision
    }

    /// 立即执行一次清理, 返回删除的桶位数量
    pub fn cleanup_now(&self) -> usize {
        self.cleanup_at(now_secs())
    }

    pub(crate) fn cleanup_at(&self, now: f64) -> usize {
        let mut store = self.lock_store();
        let evicted = store.evict_stale(self.config.cleanup_interval, now);
        self.publish_stats(&store);
        evicted
    }

    /// 当前剩余令牌数, 不触发补充
    #[cfg(test)]
    pub(crate) fn tokens(&self, key: &str) -> Option<f64> {
        self.lock_store().buckets.get(key).map(|b| b.tokens)
    }

    #[cfg(test)]
    fn insert_bucket(&self, key: &str, tokens: f64, last_refill: f64) {
        let mut store = self.lock_store();
        store.buckets.insert(
            key.to_string(),
            Bucket {
                tokens,
                last_refill,
            },
        );
        self.publish_stats(&store);
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn try_acquire(&self, key: &str) -> Decision {
        self.try_acquire_at(key, now_secs())
    }

    fn get_config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn stats(&self) -> LimiterStats {
        let active_clients = self.active_clients.load(Ordering::Acquire);
        LimiterStats {
            active_clients,
            memory_usage_estimate: active_clients * BUCKET_COST_BYTES,
            last_cleanup_time: f64::from_bits(self.last_cleanup_bits.load(Ordering::Acquire)),
            cleanup_interval: self.config.cleanup_interval,
        }
    }
}
