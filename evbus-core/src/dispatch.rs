//! 分发引擎（EventBus）
//!
//! 一次发布的流程：
//! 1. `published` 计数；
//! 2. 依次执行过滤器，任一拒绝即结束为 `Filtered`；
//! 3. 取该类型活跃处理器的有序快照（注册表缓存）；
//! 4. 逐个处理器：先检查取消标记，再执行拦截器 before → 处理器 → after / exception；
//! 5. `Delivered` 与 `Cancelled` 写入历史。
//!
//! 注册表只在构建 `DispatchPlan` 时被借用，计划本身不借用总线，
//! 因此处理器运行期间可以安全地在别处修改注册表或再次发布。
//!
use crate::config::EventBusConfig;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::{Event, Priority};
use crate::filter::EventFilter;
use crate::handler::{
    AsyncEventHandler, EventHandler, FnHandler, HandlerInfo, HandlerRef, SubscriptionId,
};
use crate::history::HistoryStore;
use crate::interceptor::EventInterceptor;
use crate::pool::PoolStatistics;
use crate::queue::{EventQueue, PreparedDispatch, QueueItem, QueueStatistics, QueueTicket};
use crate::registry::{
    FilterList, HandlerList, HandlerRegistry, InterceptorList, RegistryStatistics,
};
use crate::scheduler::{self, QueueDispatch, QueueDrainReport, QueueWorkerHandle};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 一次分发的终态；处理器失败走 `Err(EventBusError::DispatchFailed)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DispatchOutcome {
    Delivered,
    Filtered,
    Cancelled,
}

impl DispatchOutcome {
    /// 事件是否被某个处理器消费（取消传播）
    pub fn is_consumed(&self) -> bool {
        matches!(self, DispatchOutcome::Cancelled)
    }
}

/// 计数器快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub published: u64,
    pub processed: u64,
    pub failed: u64,
    pub filtered: u64,
    pub cancelled: u64,
}

/// 计划与总线共享的可变状态：计数器与历史
pub struct DispatchState {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
    cancelled: AtomicU64,
    history_enabled: AtomicBool,
    history: Mutex<HistoryStore>,
}

impl DispatchState {
    fn new(config: &EventBusConfig) -> Self {
        Self {
            published: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            history_enabled: AtomicBool::new(config.history_enabled),
            history: Mutex::new(HistoryStore::new(config.max_history_size)),
        }
    }

    fn history(&self) -> MutexGuard<'_, HistoryStore> {
        // 只克隆事件，不调用处理器
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record<E: Event>(&self, event: &E) {
        if self.history_enabled.load(Ordering::Relaxed) {
            self.history().record(event);
        }
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            published: self.published.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// 后台分发中未能进入处理流程的失败（例如总线已关闭）
    pub fn note_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled.load(Ordering::Relaxed)
    }

    pub fn set_history_enabled(&self, enabled: bool) {
        self.history_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn recent<E: Event>(&self, count: usize) -> Vec<E> {
        self.history().recent(count)
    }

    pub fn clear_history(&self) {
        self.history().clear();
    }

    fn history_types(&self) -> usize {
        self.history().event_types()
    }
}

/// 某事件类型一次分发所需的全部快照
pub struct DispatchPlan<E: Event> {
    handlers: HandlerList<E>,
    filters: FilterList<E>,
    interceptors: InterceptorList<E>,
    state: Arc<DispatchState>,
}

impl<E: Event> DispatchPlan<E> {
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn admit(&self, event: &E) -> bool {
        self.state.published.fetch_add(1, Ordering::Relaxed);
        if self.filters.iter().all(|f| f.should_handle(event)) {
            return true;
        }
        self.state.filtered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event_type = E::TYPE, event_id = %event.event_id(), "event rejected by filter");
        false
    }

    fn before(&self, event: &E, info: &HandlerInfo<'_>) -> bool {
        self.interceptors
            .iter()
            .all(|i| i.interceptor().on_before_handle(event, info))
    }

    fn succeeded(&self, event: &E, info: &HandlerInfo<'_>) {
        for i in self.interceptors.iter() {
            i.interceptor().on_after_handle(event, info);
        }
        self.state.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self, event: &E, info: &HandlerInfo<'_>, error: anyhow::Error) -> Result<()> {
        let recovered = self
            .interceptors
            .iter()
            .fold(false, |recovered, i| {
                i.interceptor().on_exception(event, info, &error) | recovered
            });
        if recovered {
            tracing::debug!(
                event_type = E::TYPE,
                handler = info.name,
                error = %error,
                "handler error recovered by interceptor"
            );
            return Ok(());
        }

        self.state.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            event_type = E::TYPE,
            event_id = %event.event_id(),
            handler = info.name,
            error = %error,
            "event handler failed"
        );
        Err(EventBusError::DispatchFailed {
            event_type: E::TYPE,
            handler: info.name.to_string(),
            source: error,
        })
    }

    fn finish(&self, event: &E) -> DispatchOutcome {
        let outcome = if event.is_cancelled() {
            self.state.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_type = E::TYPE, event_id = %event.event_id(), "event cancelled");
            DispatchOutcome::Cancelled
        } else {
            DispatchOutcome::Delivered
        };
        self.state.record(event);
        outcome
    }

    /// 同步执行；异步处理器不会被驱动，直接跳过
    pub fn execute(&self, event: &mut E) -> Result<DispatchOutcome> {
        if !self.admit(event) {
            return Ok(DispatchOutcome::Filtered);
        }

        for entry in self.handlers.iter() {
            if event.is_cancelled() {
                break;
            }
            let HandlerRef::Sync(handler) = entry.handler() else {
                tracing::debug!(
                    event_type = E::TYPE,
                    handler = entry.handler().name(),
                    "async handler skipped on synchronous publish"
                );
                continue;
            };
            if !handler.is_active() {
                continue;
            }
            let info = entry.info();
            if !self.before(event, &info) {
                continue;
            }
            match handler.handle(event) {
                Ok(()) => self.succeeded(event, &info),
                Err(error) => self.failed(event, &info, error)?,
            }
        }

        Ok(self.finish(event))
    }

    /// 按同样的顺序依次执行，异步处理器逐个 await
    pub async fn execute_async(&self, event: &mut E) -> Result<DispatchOutcome> {
        if !self.admit(event) {
            return Ok(DispatchOutcome::Filtered);
        }

        for entry in self.handlers.iter() {
            if event.is_cancelled() {
                break;
            }
            let handler = entry.handler();
            if !handler.is_active() {
                continue;
            }
            let info = entry.info();
            if !self.before(event, &info) {
                continue;
            }
            let result = match handler {
                HandlerRef::Sync(h) => h.handle(event),
                HandlerRef::Async(h) => h.handle(event).await,
            };
            match result {
                Ok(()) => self.succeeded(event, &info),
                Err(error) => self.failed(event, &info, error)?,
            }
        }

        Ok(self.finish(event))
    }
}

/// 总线诊断信息；`Display` 输出单段文本
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BusStatistics {
    pub registry: RegistryStatistics,
    pub counters: DispatchCounters,
    pub queue: QueueStatistics,
    pub pool: PoolStatistics,
    pub history_enabled: bool,
    pub history_types: usize,
}

impl fmt::Display for BusStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "EventBus statistics")?;
        writeln!(f, "  registry: {}", self.registry)?;
        writeln!(
            f,
            "  dispatch: published={}, processed={}, failed={}, filtered={}, cancelled={}",
            c.published, c.processed, c.failed, c.filtered, c.cancelled
        )?;
        writeln!(
            f,
            "  queue: total={}, ready={}, delayed={}, async={}",
            self.queue.total, self.queue.ready, self.queue.delayed, self.queue.async_items
        )?;
        writeln!(
            f,
            "  pool: all={}, active={}, inactive={}",
            self.pool.count_all, self.pool.count_active, self.pool.count_inactive
        )?;
        write!(
            f,
            "  history: enabled={}, event_types={}",
            self.history_enabled, self.history_types
        )
    }
}

/// 事件总线：注册表 + 分发 + 队列 + 历史
///
/// 单线程使用时直接持有；需要延迟发布或队列工作线程时包在 `Arc` 中。
/// 多线程共享请使用 `evbus-concurrent` 中的 `ThreadSafeEventBus`。
pub struct EventBus {
    config: EventBusConfig,
    registry: HandlerRegistry,
    state: Arc<DispatchState>,
    queue: Arc<EventQueue>,
    shutdown: CancellationToken,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::build(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EventBusConfig) -> Self {
        let cache_capacity =
            NonZeroUsize::new(config.handler_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: HandlerRegistry::new(cache_capacity),
            state: Arc::new(DispatchState::new(&config)),
            queue: Arc::new(EventQueue::with_pool_size(config.queue_pool_size)),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn state(&self) -> &Arc<DispatchState> {
        &self.state
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    // --- 订阅 ---

    pub fn subscribe<E: Event>(
        &mut self,
        handler: Arc<dyn EventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.subscribe_ref(HandlerRef::Sync(handler), priority)
    }

    pub fn subscribe_async<E: Event>(
        &mut self,
        handler: Arc<dyn AsyncEventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.subscribe_ref(HandlerRef::Async(handler), priority)
    }

    /// 以闭包订阅
    pub fn subscribe_fn<E, F>(&mut self, priority: Priority, f: F) -> Result<SubscriptionId>
    where
        E: Event,
        F: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnHandler::new(f)), priority)
    }

    pub fn subscribe_ref<E: Event>(
        &mut self,
        handler: HandlerRef<E>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        let name = handler.name().to_string();
        let id = self.registry.register_ref(handler, priority)?;
        tracing::debug!(event_type = E::TYPE, handler = %name, priority, subscription = %id, "handler subscribed");
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.registry.unregister(id);
        if removed {
            tracing::debug!(subscription = %id, "handler unsubscribed");
        }
        removed
    }

    pub fn unsubscribe_handler<E: Event>(&mut self, handler: &HandlerRef<E>) -> bool {
        let removed = self.registry.unregister_handler(handler);
        if removed {
            tracing::debug!(event_type = E::TYPE, handler = handler.name(), "handler unsubscribed");
        }
        removed
    }

    pub fn unsubscribe_all<E: Event>(&mut self) -> usize {
        let removed = self.registry.unregister_all::<E>();
        tracing::debug!(event_type = E::TYPE, removed, "all handlers unsubscribed");
        removed
    }

    pub fn add_filter<E: Event>(&mut self, filter: Arc<dyn EventFilter<E>>) -> Result<()> {
        self.registry.add_filter(filter)
    }

    pub fn remove_filter<E: Event>(&mut self, filter: &Arc<dyn EventFilter<E>>) -> bool {
        self.registry.remove_filter(filter)
    }

    pub fn add_interceptor<E: Event>(
        &mut self,
        interceptor: Arc<dyn EventInterceptor<E>>,
    ) -> Result<()> {
        self.registry.add_interceptor(interceptor)
    }

    pub fn remove_interceptor<E: Event>(
        &mut self,
        interceptor: &Arc<dyn EventInterceptor<E>>,
    ) -> bool {
        self.registry.remove_interceptor(interceptor)
    }

    /// 处理器 `is_active` 变化后刷新该类型的快照
    pub fn invalidate<E: Event>(&self) {
        self.registry.invalidate::<E>();
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.registry.subscriber_count::<E>()
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.registry.has_subscribers::<E>()
    }

    // --- 发布 ---

    /// 基于当前注册状态构建分发计划
    pub fn plan<E: Event>(&self) -> Result<DispatchPlan<E>> {
        Ok(DispatchPlan {
            handlers: self.registry.handlers::<E>()?,
            filters: self.registry.filters::<E>()?,
            interceptors: self.registry.interceptors::<E>()?,
            state: self.state.clone(),
        })
    }

    pub fn publish<E: Event>(&self, event: &mut E) -> Result<DispatchOutcome> {
        self.plan::<E>()?.execute(event)
    }

    pub async fn publish_async<E: Event>(&self, event: &mut E) -> Result<DispatchOutcome> {
        let plan = self.plan::<E>()?;
        plan.execute_async(event).await
    }

    /// 逐个独立发布，不具备原子性
    pub fn publish_batch<E: Event>(&self, events: &mut [E]) -> Vec<Result<DispatchOutcome>> {
        events.iter_mut().map(|e| self.publish(e)).collect()
    }

    pub async fn publish_batch_async<E: Event>(
        &self,
        events: &mut [E],
    ) -> Vec<Result<DispatchOutcome>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events.iter_mut() {
            results.push(self.publish_async(event).await);
        }
        results
    }

    /// 延迟发布：入队并在到期时由后台任务分发，不阻塞调用方
    pub fn publish_delayed<E: Event>(
        self: &Arc<Self>,
        event: E,
        delay: Duration,
    ) -> Result<QueueTicket> {
        self.schedule(event, delay, false)
    }

    pub fn publish_delayed_async<E: Event>(
        self: &Arc<Self>,
        event: E,
        delay: Duration,
    ) -> Result<QueueTicket> {
        self.schedule(event, delay, true)
    }

    fn schedule<E: Event>(
        self: &Arc<Self>,
        event: E,
        delay: Duration,
        is_async: bool,
    ) -> Result<QueueTicket> {
        let ticket = self.queue.enqueue(event, delay, is_async);
        if let Err(err) = scheduler::schedule_drain(self.clone(), Instant::now() + delay) {
            self.queue.release_item(ticket);
            return Err(err);
        }
        Ok(ticket)
    }

    /// 仅入队，由 `process_queue` 或队列工作任务分发
    pub fn enqueue<E: Event>(&self, event: E, delay: Duration, is_async: bool) -> QueueTicket {
        self.queue.enqueue(event, delay, is_async)
    }

    /// 在调用方分发全部已到期的队列项
    pub async fn process_queue(&self) -> QueueDrainReport {
        scheduler::drain_due(self).await
    }

    /// 周期性分发到期队列项，直到句柄关闭或总线 `shutdown`
    pub fn start_queue_worker(self: &Arc<Self>, interval: Duration) -> Result<QueueWorkerHandle> {
        scheduler::spawn_queue_worker(self.clone(), interval)
    }

    /// 停止全部定时器与队列工作任务
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // --- 历史与统计 ---

    /// 最近 `count` 条历史，按时间从旧到新
    pub fn event_history<E: Event>(&self, count: usize) -> Vec<E> {
        self.state.recent(count)
    }

    pub fn set_history_enabled(&self, enabled: bool) {
        self.state.set_history_enabled(enabled);
    }

    pub fn history_enabled(&self) -> bool {
        self.state.history_enabled()
    }

    pub fn clear_history(&self) {
        self.state.clear_history();
    }

    pub fn counters(&self) -> DispatchCounters {
        self.state.counters()
    }

    pub fn statistics(&self) -> BusStatistics {
        BusStatistics {
            registry: self.registry.statistics(),
            counters: self.state.counters(),
            queue: self.queue.statistics(),
            pool: self.queue.pool_statistics(),
            history_enabled: self.state.history_enabled(),
            history_types: self.state.history_types(),
        }
    }

    /// 清空注册表（含缓存）、历史与队列
    pub fn clear(&mut self) {
        self.registry.clear();
        self.state.clear_history();
        self.queue.clear();
    }
}

impl QueueDispatch for EventBus {
    fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn prepare(&self, item: QueueItem) -> Result<Option<PreparedDispatch>> {
        Ok(item.prepare(self))
    }

    fn dispatch_state(&self) -> &DispatchState {
        &self.state
    }
}
