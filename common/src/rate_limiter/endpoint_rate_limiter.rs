//! 按接口配置的限流器表, key 为 `url:method`
//!
//! 个别开销大的接口可以配置比全局限流器更严格的限流规则。

use crate::rate_limiter::memory_rate_limiter::MemoryRateLimiter;
use crate::rate_limiter::{LimiterStats, RateLimiter, RateLimiterConfig};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 单个接口的限流配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UrlRate {
    pub url: String,
    pub method: Vec<String>,
    pub rate: f64,
    #[serde(default = "default_per")]
    pub per: f64,
    pub burst: f64,
}

fn default_per() -> f64 {
    1.0
}

impl UrlRate {
    fn limiter_config(&self, cleanup_interval: f64) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate, self.per, self.burst, cleanup_interval)
    }
}

pub fn endpoint_key(url: &str, method: &str) -> String {
    format!("{}:{}", url, method.to_lowercase())
}

#[derive(Default)]
pub struct EndpointLimiters {
    limiters: DashMap<String, Arc<MemoryRateLimiter>>,
}

impl EndpointLimiters {
    pub fn new(url_rate: &[UrlRate], cleanup_interval: f64) -> Self {
        let ret = Self::default();
        ret.reset(url_rate, cleanup_interval);
        ret
    }

    /// 重建限流器表: 配置没变的保留原有桶位状态, 配置变了的重建, 不再配置的删除
    pub fn reset(&self, url_rate: &[UrlRate], cleanup_interval: f64) {
        let mut valid_keys: Vec<String> = vec![];
        for urc in url_rate {
            // 和限流器里保存的一样先做清洗, 否则被修正过的配置永远不相等
            let config = urc.limiter_config(cleanup_interval).sanitized();
            for m in &urc.method {
                let key = endpoint_key(&urc.url, m);
                valid_keys.push(key.clone());

                if let Some(l) = self.limiters.get(&key) {
                    if *l.get_config() == config {
                        tracing::info!("reset_limiter skip for {}", key);
                        continue;
                    }
                }
                self.limiters
                    .insert(key.clone(), Arc::new(MemoryRateLimiter::new(config.clone())));
                tracing::info!("reset rate limiter for {}: {}/{}s", key, urc.rate, urc.per);
            }
        }
        self.limiters.retain(|k, _| valid_keys.contains(k));
    }

    pub fn get(&self, url: &str, method: &str) -> Option<Arc<MemoryRateLimiter>> {
        self.limiters
            .get(&endpoint_key(url, method))
            .map(|l| l.value().clone())
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// 各接口限流器的统计快照, 按key排序
    pub fn stats(&self) -> Vec<(String, LimiterStats)> {
        let mut ret: Vec<_> = self
            .limiters
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect();
        ret.sort_by(|a, b| a.0.cmp(&b.0));
        ret
    }
}

#[cfg(test)]
mod endpoint_rate_limiter_test {
    use super::*;
    use crate::rate_limiter::Decision;

    fn url_rate(url: &str, method: &[&str], rate: f64, burst: f64) -> UrlRate {
        UrlRate {
            url: url.to_string(),
            method: method.iter().map(|m| m.to_string()).collect(),
            rate,
            per: 1.0,
            burst,
        }
    }

    #[test]
    fn test_lookup_is_method_case_insensitive() {
        let table = EndpointLimiters::new(&[url_rate("/item/checkout", &["POST"], 1.0, 2.0)], 60.0);
        assert_eq!(table.len(), 1);
        assert!(table.get("/item/checkout", "post").is_some());
        assert!(table.get("/item/checkout", "POST").is_some());
        assert!(table.get("/item/checkout", "GET").is_none());
        assert!(table.get("/item/query-one", "GET").is_none());
    }

    #[test]
    fn test_reset_keeps_unchanged_state() {
        let rates = vec![
            url_rate("/a", &["get"], 1.0, 1.0),
            url_rate("/b", &["get", "post"], 1.0, 1.0),
        ];
        let table = EndpointLimiters::new(&rates, 60.0);
        assert_eq!(table.len(), 3);

        let a = table.get("/a", "get").unwrap();
        assert_eq!(a.try_acquire("ip:1.1.1.1"), Decision::Allowed);

        // /a 未变化, /b 修改了容量, post 被移除
        let rates = vec![
            url_rate("/a", &["get"], 1.0, 1.0),
            url_rate("/b", &["get"], 1.0, 5.0),
        ];
        table.reset(&rates, 60.0);
        assert_eq!(table.len(), 2);
        assert!(Arc::ptr_eq(&a, &table.get("/a", "get").unwrap()));
        assert_eq!(
            table.get("/a", "get").unwrap().try_acquire("ip:1.1.1.1"),
            Decision::Denied
        );
        assert_eq!(table.get("/b", "get").unwrap().get_config().burst, 5.0);
        assert!(table.get("/b", "post").is_none());
    }

    #[test]
    fn test_reset_keeps_clamped_config() {
        let rates = vec![url_rate("/a", &["get"], -1.0, 2.0)];
        let table = EndpointLimiters::new(&rates, 60.0);
        let a = table.get("/a", "get").unwrap();
        assert_eq!(a.get_config().rate, 0.0);
        a.try_acquire("k");

        table.reset(&rates, 60.0);
        let again = table.get("/a", "get").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.tokens("k"), Some(1.0));
    }

    #[test]
    fn test_stats_sorted() {
        let table = EndpointLimiters::new(
            &[
                url_rate("/z", &["get"], 1.0, 1.0),
                url_rate("/a", &["get"], 1.0, 1.0),
            ],
            60.0,
        );
        table.get("/z", "get").unwrap().try_acquire("k");
        let stats = table.stats();
        assert_eq!(stats[0].0, "/a:get");
        assert_eq!(stats[0].1.active_clients, 0);
        assert_eq!(stats[1].0, "/z:get");
        assert_eq!(stats[1].1.active_clients, 1);
    }
}
