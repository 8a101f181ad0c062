//! 线程安全事件总线（evbus-concurrent）
//!
//! 在 `evbus-core` 的 `EventBus` 之上提供：
//! - `ThreadSafeEventBus`：读写锁保护的注册表、信号量限制的异步分发、延迟发布与 dispose
//! - `MainThreadQueue`：把处理器调用转交给宿主主循环执行
//! - `EventBusManager`：由应用根对象持有的命名总线集合
//!
pub mod main_thread;
pub mod manager;
pub mod thread_safe;

pub use main_thread::{MainThreadQueue, MainThreadRelay};
pub use manager::EventBusManager;
pub use thread_safe::ThreadSafeEventBus;
