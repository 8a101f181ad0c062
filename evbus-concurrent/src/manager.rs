//! 命名事件总线管理器
//!
//! 由应用根对象创建并持有，按名称管理多个 `ThreadSafeEventBus`；不提供全局实例。
//!
use crate::thread_safe::ThreadSafeEventBus;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use evbus_core::{EventBusConfig, EventBusError, EventBusResult as Result};

pub struct EventBusManager {
    default_config: EventBusConfig,
    buses: DashMap<String, ThreadSafeEventBus>,
}

impl Default for EventBusManager {
    fn default() -> Self {
        Self {
            default_config: EventBusConfig::default(),
            buses: DashMap::new(),
        }
    }
}

impl EventBusManager {
    /// `default_config` 用于 `get_or_create` 新建的总线
    pub fn new(default_config: EventBusConfig) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            buses: DashMap::new(),
        })
    }

    pub fn default_config(&self) -> &EventBusConfig {
        &self.default_config
    }

    /// 以指定配置新建；名称已存在时返回 `BusAlreadyExists`
    pub fn create(
        &self,
        name: impl Into<String>,
        config: EventBusConfig,
    ) -> Result<ThreadSafeEventBus> {
        match self.buses.entry(name.into()) {
            Entry::Occupied(e) => Err(EventBusError::BusAlreadyExists {
                name: e.key().clone(),
            }),
            Entry::Vacant(e) => {
                let bus = ThreadSafeEventBus::with_config(config)?;
                tracing::debug!(name = %e.key(), "event bus created");
                e.insert(bus.clone());
                Ok(bus)
            }
        }
    }

    pub fn get_or_create(&self, name: impl Into<String>) -> Result<ThreadSafeEventBus> {
        let entry = self
            .buses
            .entry(name.into())
            .or_try_insert_with(|| ThreadSafeEventBus::with_config(self.default_config.clone()))?;
        Ok(entry.value().clone())
    }

    pub fn get(&self, name: &str) -> Option<ThreadSafeEventBus> {
        self.buses.get(name).map(|b| b.value().clone())
    }

    /// 移除并 dispose；不存在时返回 false
    pub fn remove(&self, name: &str) -> bool {
        match self.buses.remove(name) {
            Some((_, bus)) => {
                bus.dispose();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buses.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// dispose 并移除全部总线，返回数量
    pub fn dispose_all(&self) -> usize {
        self.names()
            .into_iter()
            .filter(|name| self.remove(name))
            .count()
    }
}
