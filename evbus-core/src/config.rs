//! 事件总线配置
//!
//! 既可通过 `EventBusConfig::builder()` 构建，也可从 JSON 读取；
//! 缺省字段使用默认值，读取后统一经过 `validate` 校验。
//!
use crate::error::{EventBusError, EventBusResult as Result};
use bon::Builder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 100;
pub const DEFAULT_HANDLER_CACHE_CAPACITY: usize = 128;
pub const DEFAULT_QUEUE_POOL_SIZE: usize = 32;
pub const DEFAULT_MAX_CONCURRENT_ASYNC: usize = 10;

/// 事件总线配置
#[derive(Builder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// 每个事件类型保留的历史条数
    #[builder(default = DEFAULT_MAX_HISTORY_SIZE)]
    pub max_history_size: usize,
    #[builder(default = true)]
    pub history_enabled: bool,
    /// 处理器快照缓存容量（事件类型数）
    #[builder(default = DEFAULT_HANDLER_CACHE_CAPACITY)]
    pub handler_cache_capacity: usize,
    /// 队列池预热的槽位数
    #[builder(default = DEFAULT_QUEUE_POOL_SIZE)]
    pub queue_pool_size: usize,
    /// 线程安全总线上同时运行的异步分发上限
    #[builder(default = DEFAULT_MAX_CONCURRENT_ASYNC)]
    pub max_concurrent_async: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            history_enabled: true,
            handler_cache_capacity: DEFAULT_HANDLER_CACHE_CAPACITY,
            queue_pool_size: DEFAULT_QUEUE_POOL_SIZE,
            max_concurrent_async: DEFAULT_MAX_CONCURRENT_ASYNC,
        }
    }
}

impl EventBusConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history_size == 0 {
            return Err(EventBusError::invalid_argument(
                "max_history_size must be positive",
            ));
        }
        if self.handler_cache_capacity == 0 {
            return Err(EventBusError::invalid_argument(
                "handler_cache_capacity must be positive",
            ));
        }
        if self.max_concurrent_async == 0 {
            return Err(EventBusError::invalid_argument(
                "max_concurrent_async must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_default_agree() {
        assert_eq!(EventBusConfig::builder().build(), EventBusConfig::default());
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = EventBusConfig::from_json(r#"{ "max_history_size": 5 }"#).unwrap();
        assert_eq!(config.max_history_size, 5);
        assert_eq!(config.max_concurrent_async, DEFAULT_MAX_CONCURRENT_ASYNC);
        assert!(config.history_enabled);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = EventBusConfig::builder().max_concurrent_async(0).build();
        assert!(matches!(
            config.validate(),
            Err(EventBusError::InvalidArgument { .. })
        ));
        assert!(matches!(
            EventBusConfig::from_json(r#"{ "handler_cache_capacity": 0 }"#),
            Err(EventBusError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            EventBusConfig::from_json("{ not json"),
            Err(EventBusError::Config { .. })
        ));
    }
}
