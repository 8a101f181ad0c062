//! 事件队列（EventQueue）
//!
//! 按 `(priority, 入队顺序)` 排序保存待发布（可能延迟）的事件：
//! - 队列项存放在内部 `Pool<QueueItem>` 的槽位中，入队借出、出队/清空/释放时归还；
//! - `dequeue` 只返回已到期（`delay_until <= now`）的项，从不阻塞；
//! - 内部自带互斥锁，可在任意线程直接使用。
//!
use crate::dispatch::{DispatchOutcome, EventBus};
use crate::error::EventBusResult;
use crate::event::{Event, Priority};
use crate::pool::{Pool, PoolStatistics, SlotId};
use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 已解析出处理计划、可直接 await 的一次分发
pub type PreparedDispatch = BoxFuture<'static, EventBusResult<DispatchOutcome>>;

trait DeferredEvent: Send {
    fn prepare(self: Box<Self>, bus: &EventBus) -> PreparedDispatch;
}

struct Deferred<E: Event> {
    event: E,
    is_async: bool,
}

impl<E: Event> DeferredEvent for Deferred<E> {
    fn prepare(self: Box<Self>, bus: &EventBus) -> PreparedDispatch {
        let Deferred {
            mut event,
            is_async,
        } = *self;
        let plan = bus.plan::<E>();
        async move {
            let plan = plan?;
            if is_async {
                plan.execute_async(&mut event).await
            } else {
                plan.execute(&mut event)
            }
        }
        .boxed()
    }
}

/// 队列项
pub struct QueueItem {
    payload: Option<Box<dyn DeferredEvent>>,
    event_type: &'static str,
    priority: Priority,
    enqueue_time: Instant,
    delay_until: Instant,
    is_async: bool,
    sequence: u64,
}

impl Default for QueueItem {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            payload: None,
            event_type: "",
            priority: 0,
            enqueue_time: now,
            delay_until: now,
            is_async: false,
            sequence: 0,
        }
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("delay_until", &self.delay_until)
            .field("is_async", &self.is_async)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl QueueItem {
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn enqueue_time(&self) -> Instant {
        self.enqueue_time
    }

    pub fn delay_until(&self) -> Instant {
        self.delay_until
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn info(&self) -> QueueItemInfo {
        QueueItemInfo {
            event_type: self.event_type,
            priority: self.priority,
            enqueue_time: self.enqueue_time,
            delay_until: self.delay_until,
            is_async: self.is_async,
        }
    }

    /// 基于 `bus` 的当前注册状态解析处理计划；返回的 future 不再借用 `bus`
    pub fn prepare(mut self, bus: &EventBus) -> Option<PreparedDispatch> {
        self.payload.take().map(|p| p.prepare(bus))
    }
}

/// 队列项的只读摘要
#[derive(Clone, Copy, Debug)]
pub struct QueueItemInfo {
    pub event_type: &'static str,
    pub priority: Priority,
    pub enqueue_time: Instant,
    pub delay_until: Instant,
    pub is_async: bool,
}

/// 入队凭据，可用于 `release_item` 撤回尚未出队的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueTicket {
    slot: SlotId,
    sequence: u64,
}

/// 队列统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    pub total: usize,
    pub ready: usize,
    pub delayed: usize,
    pub async_items: usize,
}

#[derive(Clone, Copy)]
struct PendingKey {
    priority: Priority,
    sequence: u64,
    delay_until: Instant,
    is_async: bool,
    slot: SlotId,
}

struct QueueInner {
    pool: Pool<QueueItem>,
    // 按 (priority, sequence) 升序
    pending: Vec<PendingKey>,
    sequence: u64,
}

impl QueueInner {
    fn take_at(&mut self, position: usize) -> QueueItem {
        let key = self.pending.remove(position);
        let item = self
            .pool
            .get_mut(key.slot)
            .map(std::mem::take)
            .unwrap_or_default();
        self.pool.release(key.slot);
        item
    }

    fn first_due(&self, now: Instant) -> Option<usize> {
        self.pending.iter().position(|k| k.delay_until <= now)
    }
}

pub struct EventQueue {
    inner: Mutex<QueueInner>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_pool_size(0)
    }

    /// 预热 `pool_size` 个队列项槽位
    pub fn with_pool_size(pool_size: usize) -> Self {
        let mut pool = Pool::new(QueueItem::default)
            .with_reset(|item: &mut QueueItem| *item = QueueItem::default())
            .with_cleanup(|item: &mut QueueItem| item.payload = None);
        pool.warm_up(pool_size);
        Self {
            inner: Mutex::new(QueueInner {
                pool,
                pending: Vec::new(),
                sequence: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // 队列内部不执行用户代码，持锁期间不会 panic，这里直接取回数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue<E: Event>(&self, event: E, delay: Duration, is_async: bool) -> QueueTicket {
        let now = Instant::now();
        let priority = event.priority();
        let mut inner = self.lock();
        inner.sequence += 1;
        let sequence = inner.sequence;

        let slot = inner.pool.get();
        if let Some(item) = inner.pool.get_mut(slot) {
            item.payload = Some(Box::new(Deferred { event, is_async }));
            item.event_type = E::TYPE;
            item.priority = priority;
            item.enqueue_time = now;
            item.delay_until = now + delay;
            item.is_async = is_async;
            item.sequence = sequence;
        }

        let key = PendingKey {
            priority,
            sequence,
            delay_until: now + delay,
            is_async,
            slot,
        };
        let position = inner
            .pending
            .partition_point(|k| (k.priority, k.sequence) <= (priority, sequence));
        inner.pending.insert(position, key);

        QueueTicket { slot, sequence }
    }

    /// 取出第一个已到期的项；为空或均未到期时返回 None
    pub fn dequeue(&self) -> Option<QueueItem> {
        let now = Instant::now();
        let mut inner = self.lock();
        let position = inner.first_due(now)?;
        Some(inner.take_at(position))
    }

    /// 最多取出 `max_count` 个已到期的项，保持队列顺序
    pub fn dequeue_batch(&self, max_count: usize) -> Vec<QueueItem> {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut items = Vec::new();
        while items.len() < max_count {
            let Some(position) = inner.first_due(now) else {
                break;
            };
            items.push(inner.take_at(position));
        }
        items
    }

    /// 查看 `dequeue` 将返回的项
    pub fn peek(&self) -> Option<QueueItemInfo> {
        let now = Instant::now();
        let inner = self.lock();
        let position = inner.first_due(now)?;
        let slot = inner.pending[position].slot;
        inner.pool.get_ref(slot).map(QueueItem::info)
    }

    /// 撤回尚未出队的项并归还槽位
    pub fn release_item(&self, ticket: QueueTicket) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner
            .pending
            .iter()
            .position(|k| k.slot == ticket.slot && k.sequence == ticket.sequence)
        else {
            return false;
        };
        inner.pending.remove(position);
        inner.pool.release(ticket.slot)
    }

    /// 清空队列，全部槽位归还池中；返回被丢弃的项数
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let pending = std::mem::take(&mut inner.pending);
        for key in &pending {
            inner.pool.release(key.slot);
        }
        pending.len()
    }

    /// 最早的到期时间
    pub fn next_due(&self) -> Option<Instant> {
        self.lock().pending.iter().map(|k| k.delay_until).min()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn statistics(&self) -> QueueStatistics {
        let now = Instant::now();
        let inner = self.lock();
        let total = inner.pending.len();
        let ready = inner.pending.iter().filter(|k| k.delay_until <= now).count();
        QueueStatistics {
            total,
            ready,
            delayed: total - ready,
            async_items: inner.pending.iter().filter(|k| k.is_async).count(),
        }
    }

    pub fn pool_statistics(&self) -> PoolStatistics {
        self.lock().pool.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBase;

    #[derive(Debug, Clone)]
    struct Job {
        base: EventBase,
    }

    impl Event for Job {
        const TYPE: &'static str = "Job";

        fn base(&self) -> &EventBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut EventBase {
            &mut self.base
        }
    }

    fn job(priority: Priority) -> Job {
        Job {
            base: EventBase::new().with_priority(priority),
        }
    }

    #[test]
    fn dequeue_orders_by_priority_then_enqueue_order() {
        let queue = EventQueue::new();
        queue.enqueue(job(5), Duration::ZERO, false);
        queue.enqueue(job(1), Duration::ZERO, false);
        queue.enqueue(job(5), Duration::ZERO, true);
        queue.enqueue(job(-2), Duration::ZERO, false);

        let order: Vec<(Priority, bool)> = std::iter::from_fn(|| queue.dequeue())
            .map(|item| (item.priority(), item.is_async()))
            .collect();
        assert_eq!(order, vec![(-2, false), (1, false), (5, false), (5, true)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn delayed_items_are_not_due_yet() {
        let queue = EventQueue::new();
        queue.enqueue(job(0), Duration::from_secs(60), false);
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());

        let stats = queue.statistics();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.delayed, 1);
        assert!(queue.next_due().is_some());
    }

    #[test]
    fn ready_item_skips_ahead_of_delayed_higher_priority() {
        let queue = EventQueue::new();
        queue.enqueue(job(-10), Duration::from_secs(60), false);
        queue.enqueue(job(10), Duration::ZERO, true);

        let peeked = queue.peek().expect("one item is due");
        assert_eq!(peeked.priority, 10);
        let item = queue.dequeue().expect("due item");
        assert_eq!(item.priority(), 10);
        assert!(item.delay_until() >= item.enqueue_time());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dequeue_batch_respects_max_count() {
        let queue = EventQueue::new();
        for p in 0..5 {
            queue.enqueue(job(p), Duration::ZERO, false);
        }
        let batch = queue.dequeue_batch(3);
        let priorities: Vec<_> = batch.iter().map(QueueItem::priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn release_item_returns_slot_once() {
        let queue = EventQueue::new();
        let ticket = queue.enqueue(job(0), Duration::from_secs(60), false);
        assert_eq!(queue.pool_statistics().count_active, 1);

        assert!(queue.release_item(ticket));
        assert!(!queue.release_item(ticket));
        assert_eq!(queue.pool_statistics().count_active, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn stale_ticket_does_not_release_recycled_slot() {
        let queue = EventQueue::new();
        let first = queue.enqueue(job(0), Duration::ZERO, false);
        let _ = queue.dequeue();
        // 同一槽位被下一次入队复用
        let _second = queue.enqueue(job(0), Duration::from_secs(60), false);
        assert!(!queue.release_item(first));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_returns_every_slot_to_the_pool() {
        let queue = EventQueue::with_pool_size(1_200);
        let before = queue.pool_statistics().count_all;
        for i in 0..1_200 {
            queue.enqueue(job(i % 7), Duration::from_secs(30), i % 2 == 0);
        }
        assert_eq!(queue.statistics().async_items, 600);

        assert_eq!(queue.clear(), 1_200);
        let after = queue.pool_statistics();
        assert_eq!(after.count_all, before);
        assert_eq!(after.count_active, 0);
        assert_eq!(after.count_inactive, before);
    }
}
