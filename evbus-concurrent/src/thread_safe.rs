//! 线程安全事件总线（ThreadSafeEventBus）
//!
//! - 注册表变更（订阅、退订、过滤器、拦截器、清空）持有写锁；
//! - 发布只在读锁下构建 `DispatchPlan` 快照，释放锁后再执行处理器，
//!   处理器内部可以再次订阅或发布；
//! - `publish_async` 先获取信号量许可，限制同时运行的异步分发数；
//! - `subscribe_on_main_thread` 的处理器由宿主调用 `process_main_thread_queue` 执行；
//! - `dispose` 之后除再次 `dispose` 外的所有操作都返回 `EventBusError::Disposed`。
//!
use crate::main_thread::MainThreadQueue;
use evbus_core::dispatch::DispatchState;
use evbus_core::queue::{PreparedDispatch, QueueItem};
use evbus_core::scheduler::{self, QueueDispatch};
use evbus_core::{
    AsyncEventHandler, BusStatistics, DispatchCounters, DispatchOutcome, Event, EventBus,
    EventBusConfig, EventBusError, EventBusResult as Result, EventFilter, EventHandler,
    EventInterceptor, EventQueue, FnHandler, HandlerRef, Priority, QueueDrainReport,
    QueueTicket, QueueWorkerHandle, SubscriptionId,
};
use futures_util::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

struct Shared {
    bus: RwLock<EventBus>,
    state: Arc<DispatchState>,
    queue: Arc<EventQueue>,
    semaphore: Arc<Semaphore>,
    main_thread: MainThreadQueue,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl Shared {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EventBusError::Disposed);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EventBus>> {
        self.ensure_live()?;
        Ok(self.bus.read()?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EventBus>> {
        self.ensure_live()?;
        Ok(self.bus.write()?)
    }
}

impl QueueDispatch for Shared {
    fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn prepare(&self, item: QueueItem) -> Result<Option<PreparedDispatch>> {
        let is_async = item.is_async();
        let prepared = item.prepare(&*self.read()?);
        if !is_async {
            return Ok(prepared);
        }
        let semaphore = self.semaphore.clone();
        Ok(prepared.map(|dispatch| -> PreparedDispatch {
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EventBusError::Disposed)?;
                dispatch.await
            }
            .boxed()
        }))
    }

    fn dispatch_state(&self) -> &DispatchState {
        &self.state
    }
}

/// 可在线程间共享的事件总线句柄，克隆开销为一次引用计数
#[derive(Clone)]
pub struct ThreadSafeEventBus {
    inner: Arc<Shared>,
}

impl Default for ThreadSafeEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSafeEventBus {
    pub fn new() -> Self {
        Self::from_bus(EventBus::new())
    }

    pub fn with_config(config: EventBusConfig) -> Result<Self> {
        EventBus::with_config(config).map(Self::from_bus)
    }

    fn from_bus(bus: EventBus) -> Self {
        let permits = bus.config().max_concurrent_async.max(1);
        Self {
            inner: Arc::new(Shared {
                state: bus.state().clone(),
                queue: bus.queue().clone(),
                semaphore: Arc::new(Semaphore::new(permits)),
                main_thread: MainThreadQueue::new(),
                shutdown: CancellationToken::new(),
                disposed: AtomicBool::new(false),
                bus: RwLock::new(bus),
            }),
        }
    }

    pub fn config(&self) -> Result<EventBusConfig> {
        Ok(self.inner.read()?.config().clone())
    }

    // --- 订阅（写锁） ---

    pub fn subscribe<E: Event>(
        &self,
        handler: Arc<dyn EventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.inner.write()?.subscribe(handler, priority)
    }

    pub fn subscribe_async<E: Event>(
        &self,
        handler: Arc<dyn AsyncEventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.inner.write()?.subscribe_async(handler, priority)
    }

    pub fn subscribe_fn<E, F>(&self, priority: Priority, f: F) -> Result<SubscriptionId>
    where
        E: Event,
        F: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnHandler::new(f)), priority)
    }

    pub fn subscribe_ref<E: Event>(
        &self,
        handler: HandlerRef<E>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        self.inner.write()?.subscribe_ref(handler, priority)
    }

    /// 订阅后，处理器在宿主调用 `process_main_thread_queue` 的线程上执行
    ///
    /// 处理器收到的是事件的克隆，对事件的修改与取消不会影响本次发布。
    pub fn subscribe_on_main_thread<E: Event>(
        &self,
        handler: Arc<dyn EventHandler<E>>,
        priority: Priority,
    ) -> Result<SubscriptionId> {
        let relay = self.inner.main_thread.relay(handler);
        self.subscribe::<E>(Arc::new(relay), priority)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        Ok(self.inner.write()?.unsubscribe(id))
    }

    pub fn unsubscribe_handler<E: Event>(&self, handler: &HandlerRef<E>) -> Result<bool> {
        Ok(self.inner.write()?.unsubscribe_handler(handler))
    }

    pub fn unsubscribe_all<E: Event>(&self) -> Result<usize> {
        Ok(self.inner.write()?.unsubscribe_all::<E>())
    }

    pub fn add_filter<E: Event>(&self, filter: Arc<dyn EventFilter<E>>) -> Result<()> {
        self.inner.write()?.add_filter(filter)
    }

    pub fn remove_filter<E: Event>(&self, filter: &Arc<dyn EventFilter<E>>) -> Result<bool> {
        Ok(self.inner.write()?.remove_filter(filter))
    }

    pub fn add_interceptor<E: Event>(
        &self,
        interceptor: Arc<dyn EventInterceptor<E>>,
    ) -> Result<()> {
        self.inner.write()?.add_interceptor(interceptor)
    }

    pub fn remove_interceptor<E: Event>(
        &self,
        interceptor: &Arc<dyn EventInterceptor<E>>,
    ) -> Result<bool> {
        Ok(self.inner.write()?.remove_interceptor(interceptor))
    }

    pub fn invalidate<E: Event>(&self) -> Result<()> {
        self.inner.read()?.invalidate::<E>();
        Ok(())
    }

    pub fn subscriber_count<E: Event>(&self) -> Result<usize> {
        Ok(self.inner.read()?.subscriber_count::<E>())
    }

    pub fn has_subscribers<E: Event>(&self) -> Result<bool> {
        Ok(self.inner.read()?.has_subscribers::<E>())
    }

    // --- 发布（读锁仅用于快照） ---

    pub fn publish<E: Event>(&self, event: &mut E) -> Result<DispatchOutcome> {
        let plan = self.inner.read()?.plan::<E>()?;
        plan.execute(event)
    }

    pub async fn publish_async<E: Event>(&self, event: &mut E) -> Result<DispatchOutcome> {
        self.inner.ensure_live()?;
        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| EventBusError::Disposed)?;
        let plan = self.inner.read()?.plan::<E>()?;
        plan.execute_async(event).await
    }

    pub fn publish_batch<E: Event>(&self, events: &mut [E]) -> Result<Vec<Result<DispatchOutcome>>> {
        self.inner.ensure_live()?;
        Ok(events.iter_mut().map(|e| self.publish(e)).collect())
    }

    pub async fn publish_batch_async<E: Event>(
        &self,
        events: &mut [E],
    ) -> Result<Vec<Result<DispatchOutcome>>> {
        self.inner.ensure_live()?;
        let mut results = Vec::with_capacity(events.len());
        for event in events.iter_mut() {
            results.push(self.publish_async(event).await);
        }
        Ok(results)
    }

    pub fn publish_delayed<E: Event>(&self, event: E, delay: Duration) -> Result<QueueTicket> {
        self.schedule(event, delay, false)
    }

    pub fn publish_delayed_async<E: Event>(
        &self,
        event: E,
        delay: Duration,
    ) -> Result<QueueTicket> {
        self.schedule(event, delay, true)
    }

    fn schedule<E: Event>(&self, event: E, delay: Duration, is_async: bool) -> Result<QueueTicket> {
        self.inner.ensure_live()?;
        let ticket = self.inner.queue.enqueue(event, delay, is_async);
        if let Err(err) = scheduler::schedule_drain(self.inner.clone(), Instant::now() + delay) {
            self.inner.queue.release_item(ticket);
            return Err(err);
        }
        Ok(ticket)
    }

    pub fn enqueue<E: Event>(&self, event: E, delay: Duration, is_async: bool) -> Result<QueueTicket> {
        self.inner.ensure_live()?;
        Ok(self.inner.queue.enqueue(event, delay, is_async))
    }

    /// 撤回尚未分发的延迟事件
    pub fn cancel_delayed(&self, ticket: QueueTicket) -> Result<bool> {
        self.inner.ensure_live()?;
        Ok(self.inner.queue.release_item(ticket))
    }

    pub async fn process_queue(&self) -> Result<QueueDrainReport> {
        self.inner.ensure_live()?;
        Ok(scheduler::drain_due(self.inner.as_ref()).await)
    }

    pub fn start_queue_worker(&self, interval: Duration) -> Result<QueueWorkerHandle> {
        self.inner.ensure_live()?;
        scheduler::spawn_queue_worker(self.inner.clone(), interval)
    }

    // --- 主线程队列 ---

    /// 由宿主在主线程周期调用，返回执行的动作数
    pub fn process_main_thread_queue(&self) -> Result<usize> {
        self.inner.ensure_live()?;
        Ok(self.inner.main_thread.run_pending())
    }

    pub fn pending_main_thread_actions(&self) -> usize {
        self.inner.main_thread.pending()
    }

    // --- 历史与统计 ---

    pub fn event_history<E: Event>(&self, count: usize) -> Result<Vec<E>> {
        self.inner.ensure_live()?;
        Ok(self.inner.state.recent(count))
    }

    pub fn set_history_enabled(&self, enabled: bool) -> Result<()> {
        self.inner.write()?.set_history_enabled(enabled);
        Ok(())
    }

    pub fn history_enabled(&self) -> Result<bool> {
        self.inner.ensure_live()?;
        Ok(self.inner.state.history_enabled())
    }

    pub fn clear_history(&self) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.state.clear_history();
        Ok(())
    }

    pub fn counters(&self) -> Result<DispatchCounters> {
        self.inner.ensure_live()?;
        Ok(self.inner.state.counters())
    }

    pub fn statistics(&self) -> Result<BusStatistics> {
        Ok(self.inner.read()?.statistics())
    }

    /// 当前可用的异步分发许可数
    pub fn available_async_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.write()?.clear();
        Ok(())
    }

    // --- 生命周期 ---

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// 停止定时器与工作任务，清空注册表、历史、队列与主线程动作；
    /// 只有第一次调用生效并返回 true
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.shutdown.cancel();
        self.inner.semaphore.close();
        let discarded = self.inner.main_thread.close();

        let mut bus = self
            .inner
            .bus
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        bus.shutdown();
        bus.clear();
        tracing::info!(discarded_main_thread_actions = discarded, "event bus disposed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evbus_core::EventBase;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct Note {
        base: EventBase,
        text: &'static str,
    }

    impl Event for Note {
        const TYPE: &'static str = "Note";

        fn base(&self) -> &EventBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut EventBase {
            &mut self.base
        }
    }

    fn note(text: &'static str) -> Note {
        Note {
            base: EventBase::new(),
            text,
        }
    }

    #[test]
    fn handler_may_subscribe_while_publishing() {
        let bus = ThreadSafeEventBus::new();
        let added = Arc::new(AtomicUsize::new(0));
        let (b, a) = (bus.clone(), added.clone());
        bus.subscribe_fn::<Note, _>(0, move |_| {
            b.subscribe_fn::<Note, _>(10, |_| Ok(()))?;
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.publish(&mut note("first")).unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count::<Note>().unwrap(), 2);
        // 已取得的快照不受处理器内订阅影响
        assert_eq!(bus.counters().unwrap().processed, 1);
        bus.dispose();
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        #[derive(Debug, Clone)]
        struct Echoed {
            base: EventBase,
        }
        impl Event for Echoed {
            const TYPE: &'static str = "Echoed";
            fn base(&self) -> &EventBase {
                &self.base
            }
            fn base_mut(&mut self) -> &mut EventBase {
                &mut self.base
            }
        }

        let bus = ThreadSafeEventBus::new();
        let echoed = Arc::new(AtomicUsize::new(0));
        let e = echoed.clone();
        bus.subscribe_fn::<Echoed, _>(0, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let b = bus.clone();
        bus.subscribe_fn::<Note, _>(0, move |_| {
            b.publish(&mut Echoed {
                base: EventBase::new(),
            })?;
            Ok(())
        })
        .unwrap();

        bus.publish(&mut note("ping")).unwrap();
        assert_eq!(echoed.load(Ordering::SeqCst), 1);
        bus.dispose();
    }

    #[test]
    fn is_active_may_publish_on_the_same_bus() {
        #[derive(Debug, Clone)]
        struct Probed {
            base: EventBase,
        }
        impl Event for Probed {
            const TYPE: &'static str = "Probed";
            fn base(&self) -> &EventBase {
                &self.base
            }
            fn base_mut(&mut self) -> &mut EventBase {
                &mut self.base
            }
        }

        struct SelfChecking {
            bus: ThreadSafeEventBus,
        }

        impl EventHandler<Note> for SelfChecking {
            fn is_active(&self) -> bool {
                self.bus
                    .publish(&mut Probed {
                        base: EventBase::new(),
                    })
                    .is_ok()
            }

            fn handle(&self, _event: &mut Note) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let bus = ThreadSafeEventBus::new();
        let probed = Arc::new(AtomicUsize::new(0));
        let p = probed.clone();
        bus.subscribe_fn::<Probed, _>(0, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        bus.subscribe::<Note>(Arc::new(SelfChecking { bus: bus.clone() }), 0)
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let b = bus.clone();
        std::thread::spawn(move || {
            let _ = tx.send(b.publish(&mut note("check")));
        });
        let outcome = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("publish must not block on the handler cache");
        assert_eq!(outcome.unwrap(), DispatchOutcome::Delivered);
        assert!(probed.load(Ordering::SeqCst) >= 1);
        bus.dispose();
    }

    #[test]
    fn dispose_once_then_everything_fails() {
        let bus = ThreadSafeEventBus::new();
        bus.subscribe_fn::<Note, _>(0, |_| Ok(())).unwrap();
        bus.publish(&mut note("kept")).unwrap();

        assert!(bus.dispose());
        assert!(!bus.dispose());
        assert!(bus.is_disposed());
        assert!(matches!(
            bus.publish(&mut note("late")),
            Err(EventBusError::Disposed)
        ));
        assert!(matches!(
            bus.subscribe_fn::<Note, _>(0, |_| Ok(())),
            Err(EventBusError::Disposed)
        ));
        assert!(matches!(bus.statistics(), Err(EventBusError::Disposed)));
        assert!(matches!(
            bus.event_history::<Note>(1),
            Err(EventBusError::Disposed)
        ));
        assert!(matches!(
            bus.process_main_thread_queue(),
            Err(EventBusError::Disposed)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_publish_after_dispose_is_rejected() {
        let bus = ThreadSafeEventBus::new();
        bus.dispose();
        assert!(matches!(
            bus.publish_async(&mut note("late")).await,
            Err(EventBusError::Disposed)
        ));
        assert!(matches!(
            bus.publish_delayed(note("late"), Duration::from_millis(5)),
            Err(EventBusError::Disposed)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_cancels_pending_delayed_events() {
        let bus = ThreadSafeEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.subscribe_fn::<Note, _>(0, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.publish_delayed(note("later"), Duration::from_millis(40))
            .unwrap();
        bus.dispose();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_delayed_withdraws_item() {
        let bus = ThreadSafeEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.subscribe_fn::<Note, _>(0, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let ticket = bus
            .publish_delayed(note("never"), Duration::from_millis(30))
            .unwrap();
        assert!(bus.cancel_delayed(ticket).unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        bus.dispose();
    }

    #[test]
    fn main_thread_subscription_runs_on_host_thread() {
        let bus = ThreadSafeEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe_on_main_thread::<Note>(
            Arc::new(FnHandler::new(move |n: &mut Note| {
                s.lock().unwrap().push((n.text, std::thread::current().id()));
                Ok(())
            })),
            0,
        )
        .unwrap();

        let b = bus.clone();
        std::thread::spawn(move || b.publish(&mut note("from worker")).unwrap())
            .join()
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.pending_main_thread_actions(), 1);

        assert_eq!(bus.process_main_thread_queue().unwrap(), 1);
        let here = std::thread::current().id();
        assert_eq!(*seen.lock().unwrap(), vec![("from worker", here)]);
        bus.dispose();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EventBusConfig::builder().max_concurrent_async(0).build();
        assert!(matches!(
            ThreadSafeEventBus::with_config(config),
            Err(EventBusError::InvalidArgument { .. })
        ));
    }
}
