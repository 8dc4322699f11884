use anyhow::{anyhow, Context, Result};
use common::gate::{KeyStrategy, DEFAULT_RETRY_AFTER_SECS};
use common::rate_limiter::endpoint_rate_limiter::UrlRate;
use common::rate_limiter::RateLimiterConfig;
use serde::Deserialize;

/// 服务配置, 从yaml文件加载
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    /// 请求超时, 单位为秒
    pub timeout: Option<u64>,
    pub log_level: String,
    /// 是否暴露 /metrics
    pub metrics: bool,
    pub rate_limiter: RateLimitSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout: Some(10),
            log_level: "info".to_string(),
            metrics: true,
            rate_limiter: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub key_strategy: KeyStrategy,
    pub retry_after: u64,
    /// 全局默认限流器, 限制比较宽松
    pub default: RateLimiterConfig,
    /// 单独配置的接口限流, 比全局的更严格
    pub url_rate: Vec<UrlRate>,
    /// 借还物品接口在全局限流之外额外的限流
    pub checkout: RateLimiterConfig,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            key_strategy: KeyStrategy::ByAddress,
            retry_after: DEFAULT_RETRY_AFTER_SECS,
            default: RateLimiterConfig::new(100.0, 1.0, 200.0, 3600.0),
            url_rate: vec![],
            checkout: RateLimiterConfig::new(1.0, 6.0, 5.0, 3600.0),
        }
    }
}

impl AppConfig {
    pub fn load_yaml(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {} failed", path))?;
        Self::from_yaml(content.as_str()).with_context(|| format!("load config {} failed", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yml::from_str(content).context("serde_yml::from_str error")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        let rl = &self.rate_limiter;
        // url_rate 的清理周期沿用 default 的
        let limiters = [
            ("rate_limiter.default", &rl.default),
            ("rate_limiter.checkout", &rl.checkout),
        ];
        for (name, c) in limiters {
            check_positive(name, "per", c.per)?;
            check_positive(name, "cleanup_interval", c.cleanup_interval)?;
        }
        for urc in &rl.url_rate {
            check_positive(urc.url.as_str(), "per", urc.per)?;
            if urc.method.is_empty() {
                return Err(anyhow!("url_rate {} has no method", urc.url));
            }
        }
        Ok(())
    }
}

fn check_positive(name: &str, field: &str, secs: f64) -> Result<()> {
    if secs > 0.0 && secs.is_finite() {
        Ok(())
    } else {
        Err(anyhow!(
            "{}: {} must be a positive number of seconds, got {}",
            name,
            field,
            secs
        ))
    }
}

#[cfg(test)]
mod app_config_test {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::from_yaml("port: 9000").unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.timeout, Some(10));
        assert!(c.rate_limiter.enabled);
        assert_eq!(c.rate_limiter.key_strategy, KeyStrategy::ByAddress);
        assert_eq!(c.rate_limiter.retry_after, 300);
        assert_eq!(c.rate_limiter.default.rate, 100.0);
        assert_eq!(c.rate_limiter.default.burst, 200.0);
        assert!(c.rate_limiter.url_rate.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
port: 8081
log_level: debug
metrics: false
rate_limiter:
  key_strategy: by_principal
  retry_after: 60
  default:
    rate: 50
    burst: 80
  url_rate:
    - url: /item/checkout
      method: [POST]
      rate: 1
      per: 10
      burst: 2
"#;
        let c = AppConfig::from_yaml(yaml).unwrap();
        assert!(!c.metrics);
        assert_eq!(c.log_level, "debug");
        let rl = c.rate_limiter;
        assert_eq!(rl.key_strategy, KeyStrategy::ByPrincipal);
        assert_eq!(rl.retry_after, 60);
        assert_eq!(rl.default.rate, 50.0);
        assert_eq!(rl.default.per, 1.0);
        assert_eq!(rl.default.cleanup_interval, 3600.0);
        assert_eq!(rl.url_rate.len(), 1);
        assert_eq!(rl.url_rate[0].per, 10.0);
        assert_eq!(rl.url_rate[0].method, vec!["POST".to_string()]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(AppConfig::from_yaml("port: 0").is_err());
        assert!(AppConfig::from_yaml("rate_limiter:\n  default:\n    per: 0").is_err());
        let yaml = "rate_limiter:\n  url_rate:\n    - url: /a\n      method: []\n      rate: 1\n      burst: 1";
        assert!(AppConfig::from_yaml(yaml).is_err());
        assert!(AppConfig::from_yaml("port: [").is_err());
    }

    #[test]
    fn test_invalid_cleanup_interval() {
        for yaml in [
            "rate_limiter:\n  default:\n    cleanup_interval: 0",
            "rate_limiter:\n  default:\n    cleanup_interval: -1",
            "rate_limiter:\n  default:\n    cleanup_interval: .nan",
            "rate_limiter:\n  checkout:\n    cleanup_interval: .inf",
        ] {
            let err = AppConfig::from_yaml(yaml).unwrap_err();
            assert!(format!("{:#}", err).contains("cleanup_interval"), "{}", yaml);
        }
        assert!(AppConfig::from_yaml("rate_limiter:\n  default:\n    cleanup_interval: 60").is_ok());
    }
}
