//! 处理器注册表（HandlerRegistry）
//!
//! 按事件类型标签保存处理器、过滤器、拦截器与订阅 ID 映射：
//! - 处理器按 `(priority, 订阅顺序)` 有序插入，相同优先级保持订阅先后；
//! - `handlers::<E>()` 返回活跃处理器快照，并通过 LRU 缓存记忆；
//!   任一类型的变更只失效该类型的缓存条目，`clear()` 才整体清空；
//! - 过滤器与拦截器以写时复制的 `Arc<Vec<_>>` 保存，发布时直接共享快照。
//!
//! 注册表本身不加锁（变更需要 `&mut self`），并发场景由外层读写锁保护。
//!
use crate::cache::LruCache;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, Priority};
use crate::filter::EventFilter;
use crate::handler::{AsyncEventHandler, EventHandler, HandlerEntry, HandlerRef, SubscriptionId};
use crate::interceptor::EventInterceptor;
use serde::Serialize;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

type CachedHandlers = Arc<dyn Any + Send + Sync>;

/// 已排序的拦截器条目
pub struct InterceptorEntry<E: Event> {
    priority: Priority,
    sequence: u64,
    interceptor: Arc<dyn EventInterceptor<E>>,
}

impl<E: Event> Clone for InterceptorEntry<E> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            sequence: self.sequence,
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<E: Event> InterceptorEntry<E> {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn interceptor(&self) -> &Arc<dyn EventInterceptor<E>> {
        &self.interceptor
    }
}

pub type FilterList<E> = Arc<Vec<Arc<dyn EventFilter<E>>>>;
pub type InterceptorList<E> = Arc<Vec<InterceptorEntry<E>>>;
pub type HandlerList<E> = Arc<Vec<HandlerEntry<E>>>;

struct TypeSlot<E: Event> {
    handlers: Vec<HandlerEntry<E>>,
    filters: FilterList<E>,
    interceptors: InterceptorList<E>,
}

impl<E: Event> Default for TypeSlot<E> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            filters: Arc::new(Vec::new()),
            interceptors: Arc::new(Vec::new()),
        }
    }
}

#[derive(Clone, Copy, Default)]
struct SlotCounts {
    handlers: usize,
    active: usize,
    filters: usize,
    interceptors: usize,
}

/// 类型擦除后的按类型存储，支持按订阅 ID 删除与统计
trait ErasedSlot: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn rust_type(&self) -> &'static str;
    fn remove_subscription(&mut self, id: SubscriptionId) -> bool;
    fn counts(&self) -> SlotCounts;
}

impl<E: Event> ErasedSlot for TypeSlot<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn rust_type(&self) -> &'static str {
        type_name::<E>()
    }

    fn remove_subscription(&mut self, id: SubscriptionId) -> bool {
        match self.handlers.iter().position(|h| h.subscription_id() == id) {
            Some(position) => {
                self.handlers.remove(position);
                true
            }
            None => false,
        }
    }

    fn counts(&self) -> SlotCounts {
        SlotCounts {
            handlers: self.handlers.len(),
            active: self
                .handlers
                .iter()
                .filter(|h| h.handler().is_active())
                .count(),
            filters: self.filters.len(),
            interceptors: self.interceptors.len(),
        }
    }
}

/// 注册表统计（只读诊断信息）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    pub event_types: usize,
    pub handlers: usize,
    pub active_handlers: usize,
    pub filters: usize,
    pub interceptors: usize,
    pub cached_types: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl fmt::Display for RegistryStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event_types={}, handlers={} (active={}), filters={}, interceptors={}, cached_types={} (hits={}, misses={})",
            self.event_types,
            self.handlers,
            self.active_handlers,
            self.filters,
            self.interceptors,
            self.cached_types,
            self.cache_hits,
            self.cache_misses,
        )
    }
}

pub struct HandlerRegistry {
    slots: HashMap<&'static str, Box<dyn ErasedSlot>>,
    subscriptions: HashMap<SubscriptionId, &'static str>,
    next_subscription: u64,
    sequence: u64,
    cache: Mutex<LruCache<&'static str, CachedHandlers>>,
}

impl HandlerRegistry {
    pub fn new(cache_capacity: NonZeroUsize) -> Self {
        Self {
            slots: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription: 0,
            sequence: 0,
            cache: Mutex::new(LruCache::with_capacity(cache_capacity)),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<&'static str, CachedHandlers>> {
        // 持锁期间只做查找与写入
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn invalidate_type(&self, event_type: &'static str) {
        self.cache().remove(&event_type);
    }

    fn slot<E: Event>(&self) -> Result<Option<&TypeSlot<E>>> {
        let Some(slot) = self.slots.get(E::TYPE) else {
            return Ok(None);
        };
        let found = slot.rust_type();
        slot.as_any()
            .downcast_ref::<TypeSlot<E>>()
            .map(Some)
            .ok_or(EventBusError::TypeMismatch {
                event_type: E::TYPE,
                expected: type_name::<E>(),
                found,
            })
    }

    fn slot_mut<E: Event>(&mut self) -> Result<&mut TypeSlot<E>> {
        let slot = self
            .slots
            .entry(E::TYPE)
            .or_insert_with(|| Box::new(TypeSlot::<E>::default()));
        let found = slot.rust_type();
        slot.as_any_mut()
            .downcast_mut::<TypeSlot<E>>()
            .ok_or(EventBusError::TypeMismatch {
                event_type: E::TYPE,
                expected: type_name::<E>(),
                found,
            })
    }

    fn existing_slot_mut<E: Event>(&mut self) -> Option<&mut TypeSlot<E>> {
        self.slots
            .get_mut(E::TYPE)?
            .as_any_mut()
            .downcast_mut::<TypeSlot<E>>()
    }

    fn next_ids(&mut self) -> (SubscriptionId, u64) {
        self.next_subscription += 1;
        self.sequence += 1;
        (SubscriptionId::new(self.next_subscription), self.sequence)
    }

    pub fn register<E: Event>(
        &mut self,
        handler: Arc<dyn EventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.register_ref(HandlerRef::Sync(handler), priority)
    }

    pub fn register_async<E: Event>(
        &mut self,
        handler: Arc<dyn AsyncEventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.register_ref(HandlerRef::Async(handler), priority)
    }

    pub fn register_ref<E: Event>(
        &mut self,
        handler: HandlerRef<E>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        // 先校验类型标签，避免冲突时白白消耗 ID
        self.slot_mut::<E>()?;
        let (id, sequence) = self.next_ids();
        let entry = HandlerEntry::new(id, priority, sequence, handler);

        let slot = self.slot_mut::<E>()?;
        let key = entry.order_key();
        let position = slot.handlers.partition_point(|h| h.order_key() <= key);
        slot.handlers.insert(position, entry);

        self.subscriptions.insert(id, E::TYPE);
        self.invalidate_type(E::TYPE);
        Ok(id)
    }

    /// 按订阅 ID 移除；不存在时返回 false
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let Some(event_type) = self.subscriptions.remove(&id) else {
            return false;
        };
        let removed = self
            .slots
            .get_mut(event_type)
            .map(|slot| slot.remove_subscription(id))
            .unwrap_or(false);
        self.invalidate_type(event_type);
        removed
    }

    /// 按处理器实例移除第一条匹配的订阅
    pub fn unregister_handler<E: Event>(&mut self, handler: &HandlerRef<E>) -> bool {
        let Some(slot) = self.existing_slot_mut::<E>() else {
            return false;
        };
        let Some(position) = slot
            .handlers
            .iter()
            .position(|h| h.handler().same_instance(handler))
        else {
            return false;
        };
        let id = slot.handlers.remove(position).subscription_id();
        self.subscriptions.remove(&id);
        self.invalidate_type(E::TYPE);
        true
    }

    /// 移除某类型的全部处理器（保留过滤器与拦截器），返回移除数量
    pub fn unregister_all<E: Event>(&mut self) -> usize {
        let Some(slot) = self.existing_slot_mut::<E>() else {
            return 0;
        };
        let removed = std::mem::take(&mut slot.handlers);
        for entry in &removed {
            self.subscriptions.remove(&entry.subscription_id());
        }
        self.invalidate_type(E::TYPE);
        removed.len()
    }

    /// 活跃处理器的有序快照
    pub fn handlers<E: Event>(&self) -> Result<HandlerList<E>> {
        let cached = self.cache().get(&E::TYPE).cloned();
        if let Some(list) = cached.and_then(|hit| hit.downcast::<Vec<HandlerEntry<E>>>().ok()) {
            return Ok(list);
        }

        // `is_active` 是用户代码，构建快照时不持有缓存锁
        let snapshot: Vec<HandlerEntry<E>> = match self.slot::<E>()? {
            Some(slot) => slot
                .handlers
                .iter()
                .filter(|h| h.handler().is_active())
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let snapshot = Arc::new(snapshot);
        self.cache().put(E::TYPE, snapshot.clone() as CachedHandlers);
        Ok(snapshot)
    }

    /// 丢弃某类型的缓存快照（例如处理器的 `is_active` 发生变化后）
    pub fn invalidate<E: Event>(&self) {
        self.invalidate_type(E::TYPE);
    }

    pub fn add_filter<E: Event>(&mut self, filter: Arc<dyn EventFilter<E>>) -> Result<()> {
        let slot = self.slot_mut::<E>()?;
        Arc::make_mut(&mut slot.filters).push(filter);
        Ok(())
    }

    pub fn remove_filter<E: Event>(&mut self, filter: &Arc<dyn EventFilter<E>>) -> bool {
        let Some(slot) = self.existing_slot_mut::<E>() else {
            return false;
        };
        match slot.filters.iter().position(|f| Arc::ptr_eq(f, filter)) {
            Some(position) => {
                Arc::make_mut(&mut slot.filters).remove(position);
                true
            }
            None => false,
        }
    }

    pub fn filters<E: Event>(&self) -> Result<FilterList<E>> {
        Ok(self
            .slot::<E>()?
            .map(|slot| slot.filters.clone())
            .unwrap_or_default())
    }

    pub fn add_interceptor<E: Event>(
        &mut self,
        interceptor: Arc<dyn EventInterceptor<E>>,
    ) -> Result<()> {
        self.slot_mut::<E>()?;
        self.sequence += 1;
        let entry = InterceptorEntry {
            priority: interceptor.priority(),
            sequence: self.sequence,
            interceptor,
        };
        let slot = self.slot_mut::<E>()?;
        let key = (entry.priority, entry.sequence);
        let list = Arc::make_mut(&mut slot.interceptors);
        let position = list.partition_point(|i| (i.priority, i.sequence) <= key);
        list.insert(position, entry);
        Ok(())
    }

    pub fn remove_interceptor<E: Event>(
        &mut self,
        interceptor: &Arc<dyn EventInterceptor<E>>,
    ) -> bool {
        let Some(slot) = self.existing_slot_mut::<E>() else {
            return false;
        };
        match slot
            .interceptors
            .iter()
            .position(|i| Arc::ptr_eq(&i.interceptor, interceptor))
        {
            Some(position) => {
                Arc::make_mut(&mut slot.interceptors).remove(position);
                true
            }
            None => false,
        }
    }

    pub fn interceptors<E: Event>(&self) -> Result<InterceptorList<E>> {
        Ok(self
            .slot::<E>()?
            .map(|slot| slot.interceptors.clone())
            .unwrap_or_default())
    }

    /// 订阅数（包含被软禁用的处理器）
    pub fn subscriber_count<E: Event>(&self) -> usize {
        match self.slot::<E>() {
            Ok(Some(slot)) => slot.handlers.len(),
            _ => 0,
        }
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.slots.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// 清空全部注册信息与缓存；订阅 ID 计数不回退
    pub fn clear(&mut self) {
        self.slots.clear();
        self.subscriptions.clear();
        self.cache().clear();
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let counts = self
            .slots
            .values()
            .map(|slot| slot.counts())
            .fold(SlotCounts::default(), |acc, c| SlotCounts {
                handlers: acc.handlers + c.handlers,
                active: acc.active + c.active,
                filters: acc.filters + c.filters,
                interceptors: acc.interceptors + c.interceptors,
            });
        let cache = self.cache();
        RegistryStatistics {
            event_types: self.slots.len(),
            handlers: counts.handlers,
            active_handlers: counts.active,
            filters: counts.filters,
            interceptors: counts.interceptors,
            cached_types: cache.len(),
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
        }
    }
}
