//! 事件处理器（EventHandler / AsyncEventHandler）
//!
//! 定义同步与异步两类处理器协议、闭包适配器，以及注册表内部保存的订阅条目。
//!
use crate::event::{Event, Priority};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 订阅 ID：在同一注册表生命周期内唯一，不复用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 同步处理器：处理某一类型的事件
pub trait EventHandler<E: Event>: Send + Sync {
    /// 处理器名称（用于日志与错误信息）
    fn handler_name(&self) -> &str {
        type_name::<Self>()
    }

    /// 软禁用：返回 false 时保留订阅但不再被调用
    fn is_active(&self) -> bool {
        true
    }

    /// 处理事件；可通过 `event.cancel()` 终止后续处理器
    fn handle(&self, event: &mut E) -> anyhow::Result<()>;
}

/// 异步处理器：由 `publish_async` 按优先级依次 await
#[async_trait]
pub trait AsyncEventHandler<E: Event>: Send + Sync {
    fn handler_name(&self) -> &str {
        type_name::<Self>()
    }

    fn is_active(&self) -> bool {
        true
    }

    async fn handle(&self, event: &mut E) -> anyhow::Result<()>;
}

/// 闭包处理器适配器
pub struct FnHandler<E, F> {
    name: &'static str,
    f: F,
    _event: PhantomData<fn(&mut E)>,
}

impl<E, F> FnHandler<E, F>
where
    E: Event,
    F: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            name: type_name::<F>(),
            f,
            _event: PhantomData,
        }
    }

    pub fn named(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventHandler<E> for FnHandler<E, F>
where
    E: Event,
    F: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handler_name(&self) -> &str {
        self.name
    }

    fn handle(&self, event: &mut E) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// 已注册处理器的引用（同步或异步）
pub enum HandlerRef<E: Event> {
    Sync(Arc<dyn EventHandler<E>>),
    Async(Arc<dyn AsyncEventHandler<E>>),
}

impl<E: Event> Clone for HandlerRef<E> {
    fn clone(&self) -> Self {
        match self {
            HandlerRef::Sync(h) => HandlerRef::Sync(h.clone()),
            HandlerRef::Async(h) => HandlerRef::Async(h.clone()),
        }
    }
}

impl<E: Event> HandlerRef<E> {
    pub fn name(&self) -> &str {
        match self {
            HandlerRef::Sync(h) => h.handler_name(),
            HandlerRef::Async(h) => h.handler_name(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            HandlerRef::Sync(h) => h.is_active(),
            HandlerRef::Async(h) => h.is_active(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, HandlerRef::Async(_))
    }

    /// 按指针判断是否为同一处理器实例
    pub fn same_instance(&self, other: &HandlerRef<E>) -> bool {
        match (self, other) {
            (HandlerRef::Sync(a), HandlerRef::Sync(b)) => Arc::ptr_eq(a, b),
            (HandlerRef::Async(a), HandlerRef::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<E: Event> From<Arc<dyn EventHandler<E>>> for HandlerRef<E> {
    fn from(h: Arc<dyn EventHandler<E>>) -> Self {
        HandlerRef::Sync(h)
    }
}

impl<E: Event> From<Arc<dyn AsyncEventHandler<E>>> for HandlerRef<E> {
    fn from(h: Arc<dyn AsyncEventHandler<E>>) -> Self {
        HandlerRef::Async(h)
    }
}

/// 注册表中的一条订阅
pub struct HandlerEntry<E: Event> {
    subscription_id: SubscriptionId,
    priority: Priority,
    sequence: u64,
    handler: HandlerRef<E>,
}

impl<E: Event> Clone for HandlerEntry<E> {
    fn clone(&self) -> Self {
        Self {
            subscription_id: self.subscription_id,
            priority: self.priority,
            sequence: self.sequence,
            handler: self.handler.clone(),
        }
    }
}

impl<E: Event> HandlerEntry<E> {
    pub(crate) fn new(
        subscription_id: SubscriptionId,
        priority: Priority,
        sequence: u64,
        handler: HandlerRef<E>,
    ) -> Self {
        Self {
            subscription_id,
            priority,
            sequence,
            handler,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// 排序键：优先级相同则按订阅先后
    pub(crate) fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }

    pub fn handler(&self) -> &HandlerRef<E> {
        &self.handler
    }

    pub fn info(&self) -> HandlerInfo<'_> {
        HandlerInfo {
            subscription_id: self.subscription_id,
            name: self.handler.name(),
            priority: self.priority,
            is_async: self.handler.is_async(),
        }
    }
}

/// 传递给拦截器的处理器只读视图
#[derive(Clone, Copy, Debug)]
pub struct HandlerInfo<'a> {
    pub subscription_id: SubscriptionId,
    pub name: &'a str,
    pub priority: Priority,
    pub is_async: bool,
}
