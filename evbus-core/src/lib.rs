//! 进程内事件总线核心库（evbus-core）
//!
//! 提供类型化的发布/订阅与分发引擎：
//! - 事件模型（`event`）：`EventBase` 与带稳定类型标签的 `Event` trait
//! - 处理器（`handler`）、过滤器（`filter`）与拦截器（`interceptor`）
//! - 处理器注册表（`registry`）：按 `(priority, 订阅顺序)` 排序，快照经 LRU 缓存（`cache`）
//! - 分发引擎（`dispatch`）：同步/异步/批量/延迟发布、取消传播、计数与历史（`history`）
//! - 事件队列（`queue`）：按优先级与到期时间出队，队列项存放在槽位池（`pool`）中
//! - 队列调度（`scheduler`）：延迟发布的定时器与周期性的队列工作任务
//!
//! 本 crate 的 `EventBus` 面向单一所有者；跨线程共享请使用 `evbus-concurrent`。
//!
//! 典型用法：
//! 1. 用 `#[event]`（evbus-macros）定义事件结构体；
//! 2. 创建 `EventBus` 并订阅处理器，可选添加过滤器与拦截器；
//! 3. 调用 `publish` / `publish_async`，或将总线放入 `Arc` 后使用 `publish_delayed`。
//!
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod history;
pub mod interceptor;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use config::EventBusConfig;
pub use dispatch::{BusStatistics, DispatchCounters, DispatchOutcome, DispatchPlan, EventBus};
pub use error::{EventBusError, EventBusResult};
pub use event::{Event, EventBase, Priority};
pub use filter::EventFilter;
pub use handler::{
    AsyncEventHandler, EventHandler, FnHandler, HandlerInfo, HandlerRef, SubscriptionId,
};
pub use interceptor::EventInterceptor;
pub use queue::{EventQueue, QueueTicket};
pub use scheduler::{QueueDrainReport, QueueWorkerHandle};

// 允许在本 crate 内部通过 ::evbus_core 进行自引用，
// 以便过程宏在本 crate 的测试中也能解析到 ::evbus_core 路径。
extern crate self as evbus_core;
